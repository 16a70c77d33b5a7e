//! Block-structured lattice geometry and the `.gmy` file format.
//!
//! A [`Geometry`] is a grid of cubic blocks of `block_size³` sites each.
//! Blocks hold either no site records (empty, or not read on this rank) or
//! exactly one record per site.

pub mod format;
pub mod header;
pub mod source;
pub mod writer;

pub use header::{BlockRecord, HeaderIndex, Preamble};
pub use source::{BlockSource, FileSource, MemorySource};
pub use writer::GeometryFileBuilder;

use crate::lattice::LatticeInfo;

/// What a lattice link crosses before reaching the neighbouring site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IntersectionType {
    #[default]
    None,
    Wall,
    Inlet,
    Outlet,
}

impl IntersectionType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(IntersectionType::None),
            1 => Some(IntersectionType::Wall),
            2 => Some(IntersectionType::Inlet),
            3 => Some(IntersectionType::Outlet),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            IntersectionType::None => 0,
            IntersectionType::Wall => 1,
            IntersectionType::Inlet => 2,
            IntersectionType::Outlet => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Link {
    pub kind: IntersectionType,
    /// Fraction of the link length at which the intersection lies.
    pub distance: f32,
    pub iolet_id: Option<u32>,
}

/// One voxel as read from the geometry file.
#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub is_fluid: bool,
    /// One link per non-rest lattice direction (`links[d - 1]`); empty for solid sites.
    pub links: Vec<Link>,
    pub wall_normal: Option<[f32; 3]>,
    /// Owning rank; `None` for solid sites.
    pub target_processor: Option<usize>,
}

impl Site {
    pub fn solid() -> Self {
        Self {
            is_fluid: false,
            links: Vec::new(),
            wall_normal: None,
            target_processor: None,
        }
    }

    /// A fluid site without any intersections.
    pub fn bulk_fluid(lattice: &LatticeInfo) -> Self {
        Self {
            is_fluid: true,
            links: vec![Link::default(); lattice.q() - 1],
            wall_normal: None,
            target_processor: None,
        }
    }

    pub fn has_link_of(&self, kind: IntersectionType) -> bool {
        self.links.iter().any(|l| l.kind == kind)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub sites: Vec<Site>,
}

impl Block {
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn clear(&mut self) {
        self.sites = Vec::new();
    }
}

/// The local view of the whole domain.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub blocks_per_dim: [usize; 3],
    pub block_size: usize,
    pub voxel_size: f64,
    pub origin: [f64; 3],
    pub blocks: Vec<Block>,
}

impl Geometry {
    /// A geometry with every block empty.
    pub fn new(preamble: &Preamble) -> Self {
        let count = preamble.block_count();
        Self {
            blocks_per_dim: preamble.blocks,
            block_size: preamble.block_size,
            voxel_size: preamble.voxel_size,
            origin: preamble.origin,
            blocks: vec![Block::default(); count],
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn sites_per_block(&self) -> usize {
        self.block_size * self.block_size * self.block_size
    }

    pub fn block_id(&self, b: [usize; 3]) -> usize {
        let [_, ny, nz] = self.blocks_per_dim;
        (b[0] * ny + b[1]) * nz + b[2]
    }

    pub fn block_coords(&self, block: usize) -> [usize; 3] {
        let [_, ny, nz] = self.blocks_per_dim;
        [block / (ny * nz), (block / nz) % ny, block % nz]
    }

    pub fn site_id(&self, s: [usize; 3]) -> usize {
        let bs = self.block_size;
        (s[0] * bs + s[1]) * bs + s[2]
    }

    pub fn site_coords(&self, site: usize) -> [usize; 3] {
        let bs = self.block_size;
        [site / (bs * bs), (site / bs) % bs, site % bs]
    }

    /// Global lattice coordinates of `site` in `block`.
    pub fn global_coords(&self, block: usize, site: usize) -> [i64; 3] {
        let b = self.block_coords(block);
        let s = self.site_coords(site);
        let bs = self.block_size;
        [
            (b[0] * bs + s[0]) as i64,
            (b[1] * bs + s[1]) as i64,
            (b[2] * bs + s[2]) as i64,
        ]
    }

    /// `(block, site)` holding the global coordinates, if inside the domain.
    pub fn locate(&self, coords: [i64; 3]) -> Option<(usize, usize)> {
        let bs = self.block_size as i64;
        let mut b = [0usize; 3];
        let mut s = [0usize; 3];
        for axis in 0..3 {
            let c = coords[axis];
            if c < 0 || c >= self.blocks_per_dim[axis] as i64 * bs {
                return None;
            }
            b[axis] = (c / bs) as usize;
            s[axis] = (c % bs) as usize;
        }
        Some((self.block_id(b), self.site_id(s)))
    }

    /// The site at `coords`, if in bounds and its block is present locally.
    pub fn site_at(&self, coords: [i64; 3]) -> Option<&Site> {
        let (block, site) = self.locate(coords)?;
        self.blocks[block].sites.get(site)
    }

    /// Ids of the in-bounds blocks in the 26-neighbourhood of `block`.
    pub fn neighbouring_blocks(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        let b = self.block_coords(block);
        format::neighbourhood().into_iter().filter_map(move |d| {
            let mut n = [0usize; 3];
            for axis in 0..3 {
                let c = b[axis] as i64 + d[axis] as i64;
                if c < 0 || c >= self.blocks_per_dim[axis] as i64 {
                    return None;
                }
                n[axis] = c as usize;
            }
            Some(self.block_id(n))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(&Preamble {
            blocks: [3, 2, 4],
            block_size: 4,
            voxel_size: 1.0,
            origin: [0.0; 3],
        })
    }

    #[test]
    fn block_and_site_ids_roundtrip() {
        let g = geometry();
        for id in 0..g.block_count() {
            assert_eq!(g.block_id(g.block_coords(id)), id);
        }
        assert_eq!(g.block_id([1, 1, 2]), (1 * 2 + 1) * 4 + 2);
        for s in 0..g.sites_per_block() {
            assert_eq!(g.site_id(g.site_coords(s)), s);
        }
    }

    #[test]
    fn locate_inverts_global_coords() {
        let g = geometry();
        assert_eq!(g.global_coords(g.block_id([2, 1, 3]), 63), [11, 7, 15]);
        assert_eq!(g.locate([11, 7, 15]), Some((g.block_id([2, 1, 3]), 63)));
        assert_eq!(g.locate([12, 0, 0]), None);
        assert_eq!(g.locate([0, -1, 0]), None);
    }

    #[test]
    fn corner_block_has_seven_neighbours() {
        let g = geometry();
        assert_eq!(g.neighbouring_blocks(0).count(), 7);
        let centre = g.block_id([1, 0, 1]);
        assert_eq!(g.neighbouring_blocks(centre).count(), 17);
    }
}
