//! Preamble and per-block header of a geometry file.
//!
//! One rank reads both sections and broadcasts the raw bytes; every rank
//! then parses the same bytes, so all ranks agree on the index.

use super::format::{
    self, GEOMETRY_MAGIC, HEMELB_MAGIC, PREAMBLE_LENGTH, VERSION, XdrReader,
};
use super::source::BlockSource;
use crate::algs::communicator::Communicator;
use crate::decomp_error::DecompError;

/// Rank that reads the preamble and header.
pub const HEADER_READING_RANK: usize = 0;

#[derive(Clone, Debug, PartialEq)]
pub struct Preamble {
    pub blocks: [usize; 3],
    pub block_size: usize,
    pub voxel_size: f64,
    pub origin: [f64; 3],
}

impl Preamble {
    /// Total number of blocks. Only call on a preamble whose sizes passed
    /// [`Preamble::checked_sizes`], as every parsed preamble has.
    pub fn block_count(&self) -> usize {
        self.blocks.iter().product()
    }

    pub fn sites_per_block(&self) -> usize {
        self.block_size.pow(3)
    }

    /// Block count and sites per block, or `None` if either, or the header
    /// they imply, does not fit in `usize`.
    pub fn checked_sizes(&self) -> Option<(usize, usize)> {
        let blocks = self
            .blocks
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))?;
        format::header_length(blocks)?;
        let sites = self
            .block_size
            .checked_mul(self.block_size)?
            .checked_mul(self.block_size)?;
        Some((blocks, sites))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, DecompError> {
        if bytes.len() < PREAMBLE_LENGTH {
            return Err(DecompError::format(format!(
                "preamble is {} bytes, expected {PREAMBLE_LENGTH}",
                bytes.len()
            )));
        }
        let mut r = XdrReader::new(&bytes[..PREAMBLE_LENGTH], "preamble");
        let hemelb = r.read_u32()?;
        if hemelb != HEMELB_MAGIC {
            return Err(DecompError::format(format!(
                "file does not start with the HemeLB magic number: expected {HEMELB_MAGIC:#x}, found {hemelb:#x}"
            )));
        }
        let gmy = r.read_u32()?;
        if gmy != GEOMETRY_MAGIC {
            return Err(DecompError::format(format!(
                "file does not carry the geometry magic number: expected {GEOMETRY_MAGIC:#x}, found {gmy:#x}"
            )));
        }
        let version = r.read_u32()?;
        if version != VERSION {
            return Err(DecompError::format(format!(
                "unsupported geometry version {version}, supported {VERSION}"
            )));
        }
        let blocks = [
            r.read_u32()? as usize,
            r.read_u32()? as usize,
            r.read_u32()? as usize,
        ];
        let block_size = r.read_u32()? as usize;
        if block_size == 0 {
            return Err(DecompError::format("block size is zero"));
        }
        let voxel_size = r.read_f64()?;
        let origin = [r.read_f64()?, r.read_f64()?, r.read_f64()?];
        let _padding = r.read_u32()?;
        let preamble = Self {
            blocks,
            block_size,
            voxel_size,
            origin,
        };
        if preamble.checked_sizes().is_none() {
            return Err(DecompError::format(format!(
                "block count overflows: {blocks:?} blocks of {block_size}^3 sites"
            )));
        }
        Ok(preamble)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockRecord {
    pub fluid_sites: u32,
    pub compressed_bytes: u32,
    pub uncompressed_bytes: u32,
}

/// Parsed preamble plus the per-block header table.
#[derive(Clone, Debug)]
pub struct HeaderIndex {
    pub preamble: Preamble,
    records: Vec<BlockRecord>,
    /// Absolute file offset of each block body.
    offsets: Vec<u64>,
}

impl HeaderIndex {
    pub fn parse(preamble: Preamble, header: &[u8]) -> Result<Self, DecompError> {
        let (count, _) = preamble
            .checked_sizes()
            .ok_or_else(|| DecompError::format("block count overflows"))?;
        let expected = format::header_length(count)
            .ok_or_else(|| DecompError::format("block count overflows"))?;
        if header.len() != expected {
            return Err(DecompError::format(format!(
                "header is {} bytes, expected {expected} for {count} blocks",
                header.len()
            )));
        }
        let mut r = XdrReader::new(header, "header");
        let mut records = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        let mut offset = (PREAMBLE_LENGTH + expected) as u64;
        for _ in 0..count {
            let record = BlockRecord {
                fluid_sites: r.read_u32()?,
                compressed_bytes: r.read_u32()?,
                uncompressed_bytes: r.read_u32()?,
            };
            offsets.push(offset);
            offset += record.compressed_bytes as u64;
            records.push(record);
        }
        Ok(Self {
            preamble,
            records,
            offsets,
        })
    }

    /// Read the preamble and header on [`HEADER_READING_RANK`] and share
    /// them with every rank of `comm`.
    ///
    /// A failed read on the reading rank is broadcast as an empty buffer so
    /// the other ranks fail too instead of waiting.
    pub fn read_and_broadcast<C, S>(comm: &C, source: &S) -> Result<Self, DecompError>
    where
        C: Communicator + ?Sized,
        S: BlockSource + ?Sized,
    {
        let root = HEADER_READING_RANK;
        let mut preamble_bytes = Vec::new();
        let mut local_err = None;
        if comm.rank() == root {
            let mut buf = vec![0u8; PREAMBLE_LENGTH];
            match source.read_at(0, &mut buf) {
                Ok(()) => preamble_bytes = buf,
                Err(e) => local_err = Some(e),
            }
        }
        comm.broadcast(root, &mut preamble_bytes)?;
        if let Some(e) = local_err {
            return Err(e);
        }
        if preamble_bytes.is_empty() {
            return Err(DecompError::format("header reading rank could not read the preamble"));
        }
        let preamble = Preamble::parse(&preamble_bytes)?;
        log::debug!(
            "geometry preamble: {:?} blocks of {}^3 sites",
            preamble.blocks,
            preamble.block_size
        );

        let header_len = preamble
            .checked_sizes()
            .and_then(|(blocks, _)| format::header_length(blocks))
            .ok_or_else(|| DecompError::format("block count overflows"))?;
        let mut header_bytes = Vec::new();
        if comm.rank() == root {
            match Self::read_header(source, header_len) {
                Ok(buf) => header_bytes = buf,
                Err(e) => local_err = Some(e),
            }
        }
        comm.broadcast(root, &mut header_bytes)?;
        if let Some(e) = local_err {
            return Err(e);
        }
        if header_bytes.len() != header_len {
            return Err(DecompError::format("header reading rank could not read the header"));
        }
        Self::parse(preamble, &header_bytes)
    }

    /// Size-check the declared header against the source before allocating it.
    fn read_header<S: BlockSource + ?Sized>(
        source: &S,
        header_len: usize,
    ) -> Result<Vec<u8>, DecompError> {
        let available = source.byte_len()?.saturating_sub(PREAMBLE_LENGTH as u64);
        if header_len as u64 > available {
            return Err(DecompError::format(format!(
                "header declares {header_len} bytes, file holds {available} after the preamble"
            )));
        }
        let mut buf = vec![0u8; header_len];
        source.read_at(PREAMBLE_LENGTH as u64, &mut buf)?;
        Ok(buf)
    }

    pub fn block_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, block: usize) -> &BlockRecord {
        &self.records[block]
    }

    pub fn fluid_sites(&self, block: usize) -> usize {
        self.records[block].fluid_sites as usize
    }

    pub fn total_fluid_sites(&self) -> usize {
        self.records.iter().map(|r| r.fluid_sites as usize).sum()
    }

    pub fn fluid_sites_per_block(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.fluid_sites as usize).collect()
    }

    /// Absolute file offset of the compressed body of `block`.
    pub fn block_offset(&self, block: usize) -> u64 {
        self.offsets[block]
    }

    /// Blocks whose declared uncompressed size exceeds what their fluid
    /// count allows.
    pub fn oversized_blocks(&self) -> Vec<(usize, usize, usize)> {
        let bs = self.preamble.block_size;
        self.records
            .iter()
            .enumerate()
            .filter_map(|(block, r)| {
                let max = format::max_block_record_length(bs, r.fluid_sites as usize);
                let got = r.uncompressed_bytes as usize;
                (got > max).then_some((block, got, max))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::geometry::source::MemorySource;
    use bytes::BufMut;

    fn preamble_bytes(hemelb: u32, gmy: u32, version: u32) -> Vec<u8> {
        preamble_with_blocks(hemelb, gmy, version, [2, 1, 1], 4)
    }

    fn preamble_with_blocks(
        hemelb: u32,
        gmy: u32,
        version: u32,
        blocks: [u32; 3],
        block_size: u32,
    ) -> Vec<u8> {
        let mut b = Vec::new();
        b.put_u32(hemelb);
        b.put_u32(gmy);
        b.put_u32(version);
        for n in [blocks[0], blocks[1], blocks[2], block_size] {
            b.put_u32(n);
        }
        b.put_f64(0.5);
        for o in [1.0f64, 2.0, 3.0] {
            b.put_f64(o);
        }
        b.put_u32(0);
        b
    }

    #[test]
    fn preamble_fields() {
        let p = Preamble::parse(&preamble_bytes(HEMELB_MAGIC, GEOMETRY_MAGIC, VERSION)).unwrap();
        assert_eq!(p.blocks, [2, 1, 1]);
        assert_eq!(p.block_size, 4);
        assert_eq!(p.voxel_size, 0.5);
        assert_eq!(p.origin, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn wrong_magic_or_version_is_a_format_error() {
        for bytes in [
            preamble_bytes(0xdead_beef, GEOMETRY_MAGIC, VERSION),
            preamble_bytes(HEMELB_MAGIC, 0, VERSION),
            preamble_bytes(HEMELB_MAGIC, GEOMETRY_MAGIC, 3),
        ] {
            assert!(matches!(Preamble::parse(&bytes), Err(DecompError::Format(_))));
        }
        assert!(Preamble::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn offsets_accumulate_compressed_sizes() {
        let mut file = preamble_bytes(HEMELB_MAGIC, GEOMETRY_MAGIC, VERSION);
        for (sites, comp, raw) in [(3u32, 10u32, 400u32), (0, 0, 0)] {
            file.put_u32(sites);
            file.put_u32(comp);
            file.put_u32(raw);
        }
        let index = HeaderIndex::read_and_broadcast(&NoComm, &MemorySource::new(file)).unwrap();
        assert_eq!(index.block_count(), 2);
        assert_eq!(index.block_offset(0), 64 + 24);
        assert_eq!(index.block_offset(1), 64 + 24 + 10);
        assert_eq!(index.total_fluid_sites(), 3);
        assert!(index.oversized_blocks().is_empty());
    }

    #[test]
    fn every_rank_sees_the_same_format_error() {
        let file = preamble_bytes(HEMELB_MAGIC, GEOMETRY_MAGIC, 7);
        let results = LocalComm::run(3, |comm| {
            let source = MemorySource::new(file.clone());
            HeaderIndex::read_and_broadcast(&comm, &source).map(|_| ())
        });
        assert!(results.iter().all(|r| matches!(r, Err(DecompError::Format(_)))));
    }

    #[test]
    fn overflowing_block_count_is_a_format_error() {
        let huge = preamble_with_blocks(HEMELB_MAGIC, GEOMETRY_MAGIC, VERSION, [1 << 21, 1 << 21, 1 << 22], 4);
        match Preamble::parse(&huge) {
            Err(DecompError::Format(msg)) => assert!(msg.contains("overflows"), "{msg}"),
            other => panic!("expected a format error, got {other:?}"),
        }
        let err = HeaderIndex::read_and_broadcast(&NoComm, &MemorySource::new(huge)).unwrap_err();
        assert!(matches!(err, DecompError::Format(_)));
    }

    #[test]
    fn header_larger_than_the_file_is_rejected_before_reading() {
        // 2^48 blocks: the header size fits in usize but not in the 64-byte file
        let file = preamble_with_blocks(HEMELB_MAGIC, GEOMETRY_MAGIC, VERSION, [1 << 16; 3], 4);
        assert_eq!(file.len(), PREAMBLE_LENGTH);
        let results = LocalComm::run(2, |comm| {
            HeaderIndex::read_and_broadcast(&comm, &MemorySource::new(file.clone())).map(|_| ())
        });
        assert!(results.iter().all(|r| matches!(r, Err(DecompError::Format(_)))));
    }
}
