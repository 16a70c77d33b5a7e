//! Fixed, little-endian wire types for the decomposition phases.

use crate::decomp_error::DecompError;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a received buffer into owned records.
///
/// Copies so the input need not be aligned for `T`.
pub fn decode_all<T: Pod>(peer: usize, bytes: &[u8]) -> Result<Vec<T>, DecompError> {
    let width = size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(DecompError::BufferSizeMismatch {
            neighbor: peer,
            expected: bytes.len() - bytes.len() % width.max(1),
            got: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBlockId {
    pub id_le: u64,
}
impl WireBlockId {
    pub fn of(id: usize) -> Self {
        Self {
            id_le: (id as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.id_le) as usize
    }
}

/// One relocated site: `(block, site) -> to`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMove {
    pub block_le: u64,
    pub site_le: u64,
    pub to_le: u64,
}
impl WireMove {
    pub fn new(block: usize, site: usize, to: usize) -> Self {
        Self {
            block_le: (block as u64).to_le(),
            site_le: (site as u64).to_le(),
            to_le: (to as u64).to_le(),
        }
    }
    pub fn block(&self) -> usize {
        u64::from_le(self.block_le) as usize
    }
    pub fn site(&self) -> usize {
        u64::from_le(self.site_le) as usize
    }
    pub fn to(&self) -> usize {
        u64::from_le(self.to_le) as usize
    }
}

/// A shared distribution: global site coordinates plus lattice direction.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHaloEntry {
    pub x_le: i64,
    pub y_le: i64,
    pub z_le: i64,
    pub direction_le: u64,
}
impl WireHaloEntry {
    pub fn new(coords: [i64; 3], direction: usize) -> Self {
        Self {
            x_le: coords[0].to_le(),
            y_le: coords[1].to_le(),
            z_le: coords[2].to_le(),
            direction_le: (direction as u64).to_le(),
        }
    }
    pub fn coords(&self) -> [i64; 3] {
        [
            i64::from_le(self.x_le),
            i64::from_le(self.y_le),
            i64::from_le(self.z_le),
        ]
    }
    pub fn direction(&self) -> usize {
        u64::from_le(self.direction_le) as usize
    }
}

/// A directed graph edge between global vertex ids.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEdge {
    pub src_le: u64,
    pub dst_le: u64,
}
impl WireEdge {
    pub fn new(src: usize, dst: usize) -> Self {
        Self {
            src_le: (src as u64).to_le(),
            dst_le: (dst as u64).to_le(),
        }
    }
    pub fn src(&self) -> usize {
        u64::from_le(self.src_le) as usize
    }
    pub fn dst(&self) -> usize {
        u64::from_le(self.dst_le) as usize
    }
}

// ===== Compile-time layout checks =========================================
static_assertions::const_assert_eq!(size_of::<WireCount>(), 8);
static_assertions::const_assert_eq!(size_of::<WireBlockId>(), 8);
static_assertions::const_assert_eq!(size_of::<WireMove>(), 24);
static_assertions::const_assert_eq!(size_of::<WireHaloEntry>(), 32);
static_assertions::const_assert_eq!(size_of::<WireEdge>(), 16);
static_assertions::const_assert!(align_of::<WireMove>() <= 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halo_entry_keeps_negative_coords() {
        let e = WireHaloEntry::new([-1, 0, 7], 14);
        let bytes = cast_slice(std::slice::from_ref(&e)).to_vec();
        let back: Vec<WireHaloEntry> = decode_all(3, &bytes).unwrap();
        assert_eq!(back[0].coords(), [-1, 0, 7]);
        assert_eq!(back[0].direction(), 14);
    }

    #[test]
    fn ragged_buffer_is_rejected() {
        let err = decode_all::<WireMove>(2, &[0u8; 30]).unwrap_err();
        assert!(matches!(
            err,
            DecompError::BufferSizeMismatch { neighbor: 2, expected: 24, got: 30 }
        ));
    }
}
