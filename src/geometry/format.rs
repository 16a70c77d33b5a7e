//! On-disk layout of `.gmy` geometry files.
//!
//! All values are XDR encoded: big-endian 4-byte integers and floats,
//! 8-byte doubles. The file is a fixed preamble, a header of one record per
//! block, then the zlib-compressed bodies of the non-empty blocks in block
//! order.

use super::{IntersectionType, Link, Site};
use crate::decomp_error::DecompError;
use crate::lattice::LatticeInfo;
use bytes::{Buf, BufMut};

pub const HEMELB_MAGIC: u32 = 0x686C_6221;
pub const GEOMETRY_MAGIC: u32 = 0x676D_7904;
pub const VERSION: u32 = 4;

/// 3 magic/version words, 3 block counts, block size, voxel size,
/// 3 origin doubles and one padding word.
pub const PREAMBLE_LENGTH: usize = 64;
/// Fluid sites, compressed bytes, uncompressed bytes.
pub const HEADER_RECORD_LENGTH: usize = 12;

pub const WALL_NORMAL_AVAILABLE: u32 = 1;
pub const WALL_NORMAL_NOT_AVAILABLE: u32 = 0;

/// Number of link records stored for every fluid site.
pub const NEIGHBOURHOOD_SIZE: usize = 26;

/// The 26 unit displacements in the order link records appear in a fluid
/// site: x outermost, z innermost, the zero vector skipped.
pub fn neighbourhood() -> [[i32; 3]; NEIGHBOURHOOD_SIZE] {
    let mut out = [[0; 3]; NEIGHBOURHOOD_SIZE];
    let mut n = 0;
    for i in -1..=1 {
        for j in -1..=1 {
            for k in -1..=1 {
                if (i, j, k) != (0, 0, 0) {
                    out[n] = [i, j, k];
                    n += 1;
                }
            }
        }
    }
    out
}

/// Byte length of the header for `block_count` blocks, `None` on overflow.
pub fn header_length(block_count: usize) -> Option<usize> {
    HEADER_RECORD_LENGTH.checked_mul(block_count)
}

/// Largest possible uncompressed block record.
///
/// A solid site is one word. A fluid site is the fluid word, 26 links of at
/// most three words each, the normal flag and three normal components.
pub fn max_block_record_length(block_size: usize, fluid_sites: usize) -> usize {
    let sites = block_size * block_size * block_size;
    let fluid = fluid_sites.min(sites);
    let solid_record = 4;
    let fluid_record = 4 + NEIGHBOURHOOD_SIZE * 3 * 4 + 4 + 3 * 4;
    fluid * fluid_record + (sites - fluid) * solid_record
}

/// Big-endian cursor over an in-memory buffer.
pub struct XdrReader<'a> {
    buf: &'a [u8],
    what: &'a str,
}

impl<'a> XdrReader<'a> {
    pub fn new(buf: &'a [u8], what: &'a str) -> Self {
        Self { buf, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, n: usize) -> Result<(), DecompError> {
        if self.buf.remaining() < n {
            return Err(DecompError::format(format!(
                "{} truncated: needed {n} more bytes, {} left",
                self.what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, DecompError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_f32(&mut self) -> Result<f32, DecompError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> Result<f64, DecompError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }
}

/// Parse one site record, keeping the links the lattice uses.
pub fn parse_site(reader: &mut XdrReader<'_>, lattice: &LatticeInfo) -> Result<Site, DecompError> {
    let is_fluid = reader.read_u32()? != 0;
    if !is_fluid {
        return Ok(Site::solid());
    }

    let mut links = vec![Link::default(); lattice.q() - 1];
    let mut has_wall = false;
    for displacement in neighbourhood() {
        let code = reader.read_u32()?;
        let kind = IntersectionType::from_code(code)
            .ok_or_else(|| DecompError::format(format!("unknown link type {code}")))?;
        let link = match kind {
            IntersectionType::None => Link::default(),
            IntersectionType::Wall => {
                has_wall = true;
                Link {
                    kind,
                    distance: reader.read_f32()?,
                    iolet_id: None,
                }
            }
            IntersectionType::Inlet | IntersectionType::Outlet => {
                let iolet_id = reader.read_u32()?;
                Link {
                    kind,
                    distance: reader.read_f32()?,
                    iolet_id: Some(iolet_id),
                }
            }
        };
        if let Some(d) = lattice.direction_of(displacement).filter(|&d| d > 0) {
            links[d - 1] = link;
        }
    }

    let normal_available = reader.read_u32()? == WALL_NORMAL_AVAILABLE;
    if normal_available != has_wall {
        let what = if has_wall {
            "wall fluid site without"
        } else {
            "bulk fluid site with"
        };
        return Err(DecompError::format(format!(
            "{what} a defined wall normal"
        )));
    }
    let wall_normal = if normal_available {
        Some([reader.read_f32()?, reader.read_f32()?, reader.read_f32()?])
    } else {
        None
    };

    Ok(Site {
        is_fluid: true,
        links,
        wall_normal,
        target_processor: None,
    })
}

/// Parse the `sites_per_block` records of an uncompressed block body.
pub fn parse_block(
    data: &[u8],
    block: usize,
    sites_per_block: usize,
    lattice: &LatticeInfo,
) -> Result<Vec<Site>, DecompError> {
    let what = format!("block {block}");
    let mut reader = XdrReader::new(data, &what);
    let mut sites = Vec::with_capacity(sites_per_block);
    for _ in 0..sites_per_block {
        sites.push(parse_site(&mut reader, lattice)?);
    }
    if reader.remaining() != 0 {
        return Err(DecompError::format(format!(
            "block {block} has {} trailing bytes",
            reader.remaining()
        )));
    }
    Ok(sites)
}

/// Append the record of `site` to `out`.
///
/// Directions missing from `lattice` are written without an intersection.
pub fn encode_site(site: &Site, lattice: &LatticeInfo, out: &mut Vec<u8>) {
    if !site.is_fluid {
        out.put_u32(0);
        return;
    }
    out.put_u32(1);
    for displacement in neighbourhood() {
        let link = lattice
            .direction_of(displacement)
            .filter(|&d| d > 0)
            .and_then(|d| site.links.get(d - 1))
            .copied()
            .unwrap_or_default();
        out.put_u32(link.kind.code());
        match link.kind {
            IntersectionType::None => {}
            IntersectionType::Wall => out.put_f32(link.distance),
            IntersectionType::Inlet | IntersectionType::Outlet => {
                out.put_u32(link.iolet_id.unwrap_or(0));
                out.put_f32(link.distance);
            }
        }
    }
    match site.wall_normal {
        Some(n) => {
            out.put_u32(WALL_NORMAL_AVAILABLE);
            for c in n {
                out.put_f32(c);
            }
        }
        None => out.put_u32(WALL_NORMAL_NOT_AVAILABLE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wall_site(lattice: &LatticeInfo) -> Site {
        let mut links = vec![Link::default(); lattice.q() - 1];
        links[0] = Link {
            kind: IntersectionType::Wall,
            distance: 0.25,
            iolet_id: None,
        };
        links[3] = Link {
            kind: IntersectionType::Inlet,
            distance: 0.5,
            iolet_id: Some(2),
        };
        Site {
            is_fluid: true,
            links,
            wall_normal: Some([1.0, 0.0, 0.0]),
            target_processor: None,
        }
    }

    #[test]
    fn neighbourhood_order() {
        let n = neighbourhood();
        assert_eq!(n[0], [-1, -1, -1]);
        assert_eq!(n[12], [0, 0, -1]);
        assert_eq!(n[13], [0, 0, 1]);
        assert_eq!(n[25], [1, 1, 1]);
    }

    #[test]
    fn max_record_length_bounds() {
        assert_eq!(max_block_record_length(2, 0), 32);
        assert_eq!(max_block_record_length(1, 1), 332);
    }

    #[test]
    fn site_record_parses_back() {
        let lattice = LatticeInfo::D3Q15;
        let site = wall_site(&lattice);
        let mut buf = Vec::new();
        encode_site(&site, &lattice, &mut buf);
        encode_site(&Site::solid(), &lattice, &mut buf);
        let sites = parse_block(&buf, 0, 2, &lattice).unwrap();
        assert_eq!(sites[0], site);
        assert!(!sites[1].is_fluid);
        assert_eq!(sites[1].target_processor, None);
    }

    #[test]
    fn normal_without_wall_is_rejected() {
        let lattice = LatticeInfo::D3Q15;
        let mut site = Site::bulk_fluid(&lattice);
        site.wall_normal = Some([0.0, 0.0, 1.0]);
        let mut buf = Vec::new();
        encode_site(&site, &lattice, &mut buf);
        let err = parse_block(&buf, 3, 1, &lattice).unwrap_err();
        assert!(matches!(err, DecompError::Format(msg) if msg.contains("bulk fluid site")));
    }

    #[test]
    fn trailing_and_missing_bytes_are_errors() {
        let lattice = LatticeInfo::D3Q15;
        let mut buf = Vec::new();
        encode_site(&Site::solid(), &lattice, &mut buf);
        assert!(parse_block(&buf, 0, 2, &lattice).is_err());
        buf.extend_from_slice(&[0, 0, 0, 0, 9]);
        assert!(parse_block(&buf, 0, 2, &lattice).is_err());
    }
}
