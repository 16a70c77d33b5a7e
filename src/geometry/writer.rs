//! Writing geometry files.
//!
//! Used to produce inputs for tests and benchmarks, and by tools that
//! voxelise a domain from a fluid mask.

use super::format::{self, GEOMETRY_MAGIC, HEMELB_MAGIC, VERSION};
use super::{IntersectionType, Link, Preamble, Site};
use crate::decomp_error::DecompError;
use crate::lattice::LatticeInfo;
use bytes::BufMut;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;

/// Distance recorded on wall links produced by [`GeometryFileBuilder::from_mask`].
const MASK_WALL_DISTANCE: f32 = 0.5;

#[derive(Clone, Debug)]
pub struct GeometryFileBuilder {
    preamble: Preamble,
    lattice: LatticeInfo,
    /// Site records per block; empty for blocks without fluid.
    blocks: Vec<Vec<Site>>,
}

impl GeometryFileBuilder {
    pub fn new(blocks: [usize; 3], block_size: usize, lattice: LatticeInfo) -> Self {
        let preamble = Preamble {
            blocks,
            block_size,
            voxel_size: 1.0,
            origin: [0.0; 3],
        };
        let count = preamble.block_count();
        Self {
            preamble,
            lattice,
            blocks: vec![Vec::new(); count],
        }
    }

    /// Voxelise `is_fluid` over the whole domain.
    ///
    /// Links to solid or out-of-domain neighbours become walls, and sites
    /// with a wall get an outward normal.
    pub fn from_mask(
        blocks: [usize; 3],
        block_size: usize,
        lattice: LatticeInfo,
        is_fluid: impl Fn([i64; 3]) -> bool,
    ) -> Self {
        let mut builder = Self::new(blocks, block_size, lattice);
        let extent: Vec<i64> = blocks.iter().map(|&b| (b * block_size) as i64).collect();
        let inside = |c: [i64; 3]| (0..3).all(|a| c[a] >= 0 && c[a] < extent[a]);
        let geometry = super::Geometry::new(&builder.preamble);

        for block in 0..geometry.block_count() {
            let mut sites = Vec::with_capacity(geometry.sites_per_block());
            let mut any_fluid = false;
            for site in 0..geometry.sites_per_block() {
                let coords = geometry.global_coords(block, site);
                if !is_fluid(coords) {
                    sites.push(Site::solid());
                    continue;
                }
                any_fluid = true;
                let mut links = vec![Link::default(); lattice.q() - 1];
                let mut normal = [0.0f32; 3];
                let mut walls = 0;
                for d in 1..lattice.q() {
                    let c = lattice.vector(d);
                    let n = [
                        coords[0] + c[0] as i64,
                        coords[1] + c[1] as i64,
                        coords[2] + c[2] as i64,
                    ];
                    if !inside(n) || !is_fluid(n) {
                        links[d - 1] = Link {
                            kind: IntersectionType::Wall,
                            distance: MASK_WALL_DISTANCE,
                            iolet_id: None,
                        };
                        for a in 0..3 {
                            normal[a] += c[a] as f32;
                        }
                        walls += 1;
                    }
                }
                let wall_normal = (walls > 0).then(|| {
                    let len = normal.iter().map(|x| x * x).sum::<f32>().sqrt();
                    if len > 0.0 {
                        normal.map(|x| x / len)
                    } else {
                        normal
                    }
                });
                sites.push(Site {
                    is_fluid: true,
                    links,
                    wall_normal,
                    target_processor: None,
                });
            }
            if any_fluid {
                builder.blocks[block] = sites;
            }
        }
        builder
    }

    pub fn voxel_size(mut self, voxel_size: f64) -> Self {
        self.preamble.voxel_size = voxel_size;
        self
    }

    pub fn origin(mut self, origin: [f64; 3]) -> Self {
        self.preamble.origin = origin;
        self
    }

    pub fn preamble(&self) -> &Preamble {
        &self.preamble
    }

    /// Replace the records of `block`; an all-solid block is stored as empty.
    pub fn set_block(&mut self, block: usize, sites: Vec<Site>) -> Result<(), DecompError> {
        let expected = self.preamble.sites_per_block();
        if sites.len() != expected {
            return Err(DecompError::InvalidConfig(format!(
                "block {block} needs {expected} site records, got {}",
                sites.len()
            )));
        }
        if block >= self.blocks.len() {
            return Err(DecompError::InvalidConfig(format!(
                "block {block} outside a grid of {} blocks",
                self.blocks.len()
            )));
        }
        self.blocks[block] = if sites.iter().any(|s| s.is_fluid) {
            sites
        } else {
            Vec::new()
        };
        Ok(())
    }

    pub fn block_sites(&self, block: usize) -> &[Site] {
        &self.blocks[block]
    }

    pub fn fluid_sites(&self, block: usize) -> usize {
        self.blocks[block].iter().filter(|s| s.is_fluid).count()
    }

    /// Uncompressed body of `block`; empty for blocks without fluid.
    pub fn encode_block(&self, block: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for site in &self.blocks[block] {
            format::encode_site(site, &self.lattice, &mut out);
        }
        out
    }

    /// Serialise the complete file.
    pub fn build(&self) -> Result<Vec<u8>, DecompError> {
        let mut bodies = Vec::with_capacity(self.blocks.len());
        let mut header = Vec::with_capacity(format::header_length(self.blocks.len()).unwrap_or(0));
        for block in 0..self.blocks.len() {
            let raw = self.encode_block(block);
            let compressed = if raw.is_empty() {
                Vec::new()
            } else {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&raw)?;
                encoder.finish()?
            };
            header.put_u32(self.fluid_sites(block) as u32);
            header.put_u32(compressed.len() as u32);
            header.put_u32(raw.len() as u32);
            bodies.push(compressed);
        }

        let p = &self.preamble;
        let mut out = Vec::new();
        out.put_u32(HEMELB_MAGIC);
        out.put_u32(GEOMETRY_MAGIC);
        out.put_u32(VERSION);
        for n in p.blocks {
            out.put_u32(n as u32);
        }
        out.put_u32(p.block_size as u32);
        out.put_f64(p.voxel_size);
        for o in p.origin {
            out.put_f64(o);
        }
        out.put_u32(0);
        out.extend_from_slice(&header);
        for body in bodies {
            out.extend_from_slice(&body);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::geometry::{HeaderIndex, MemorySource};

    #[test]
    fn mask_sites_have_consistent_walls() {
        let lattice = LatticeInfo::D3Q15;
        let b = GeometryFileBuilder::from_mask([1, 1, 1], 4, lattice, |c| c[0] >= 1);
        assert_eq!(b.fluid_sites(0), 48);
        let sites = b.block_sites(0);
        // interior site (2,2,2) touches no wall in D3Q15
        let interior = &sites[(2 * 4 + 2) * 4 + 2];
        assert!(interior.wall_normal.is_none());
        assert!(!interior.has_link_of(IntersectionType::Wall));
        // (1,1,1) sits next to the solid x=0 plane
        let edge = &sites[(1 * 4 + 1) * 4 + 1];
        assert!(edge.has_link_of(IntersectionType::Wall));
        assert!(edge.wall_normal.is_some());
    }

    #[test]
    fn header_describes_bodies() {
        let lattice = LatticeInfo::D3Q19;
        let b = GeometryFileBuilder::from_mask([2, 1, 1], 2, lattice, |c| c[0] < 2);
        let bytes = b.build().unwrap();
        let index = HeaderIndex::read_and_broadcast(&NoComm, &MemorySource::new(bytes.clone()))
            .unwrap();
        assert_eq!(index.fluid_sites(0), 8);
        assert_eq!(index.fluid_sites(1), 0);
        assert_eq!(index.record(1).compressed_bytes, 0);
        let end = index.block_offset(0) + index.record(0).compressed_bytes as u64;
        assert_eq!(end as usize, bytes.len());
        assert_eq!(index.record(0).uncompressed_bytes as usize, b.encode_block(0).len());
    }
}
