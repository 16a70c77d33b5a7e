//! Parallel read of block bodies by a small reading group.
//!
//! Blocks are handled one at a time in block order. The reading core of a
//! block reads and inflates it only if some rank needs it, then forwards the
//! inflated bytes to every other rank that does. Every rank then parses the
//! blocks it needs and clears the ones it does not.

use super::needs::Needs;
use super::reading_core;
use crate::algs::communicator::{Communicator, Inbound, Outbound, tags};
use crate::decomp_error::DecompError;
use crate::geometry::header::{BlockRecord, HeaderIndex};
use crate::geometry::{BlockSource, Geometry, format};
use crate::lattice::LatticeInfo;
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Blocks owned by `rank` plus the one-block ring around them, restricted to
/// blocks with fluid sites.
pub fn blocks_to_read(
    geometry: &Geometry,
    header: &HeaderIndex,
    block_owner: &[Option<usize>],
    rank: usize,
) -> Vec<bool> {
    let mut read = vec![false; geometry.block_count()];
    for block in (0..geometry.block_count()).filter(|&b| block_owner[b] == Some(rank)) {
        read[block] = true;
        for n in geometry.neighbouring_blocks(block) {
            read[n] = true;
        }
    }
    for (block, r) in read.iter_mut().enumerate() {
        *r &= header.fluid_sites(block) > 0;
    }
    read
}

/// Inflate a zlib block body to exactly `expected` bytes.
pub fn inflate_block(
    block: usize,
    compressed: &[u8],
    expected: usize,
) -> Result<Vec<u8>, DecompError> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(compressed)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecompError::Decompression {
            block,
            reason: e.to_string(),
        })?;
    if out.len() > expected {
        return Err(DecompError::Decompression {
            block,
            reason: format!("inflated data exceeds the declared {expected} bytes"),
        });
    }
    if out.len() < expected {
        return Err(DecompError::Decompression {
            block,
            reason: format!("inflated to {} bytes, header declares {expected}", out.len()),
        });
    }
    Ok(out)
}

pub struct ParallelBlockReader<'a, C: ?Sized, S: ?Sized> {
    comm: &'a C,
    header: &'a HeaderIndex,
    source: &'a S,
    lattice: LatticeInfo,
    reading_group: usize,
    rank_offset: usize,
    validate: bool,
}

impl<'a, C, S> ParallelBlockReader<'a, C, S>
where
    C: Communicator + ?Sized,
    S: BlockSource + ?Sized,
{
    /// `rank_offset` converts ranks of `comm` to the ranks written into
    /// [`Site::target_processor`](crate::geometry::Site::target_processor).
    pub fn new(
        comm: &'a C,
        header: &'a HeaderIndex,
        source: &'a S,
        lattice: LatticeInfo,
        reading_group_size: usize,
        rank_offset: usize,
        validate: bool,
    ) -> Self {
        Self {
            comm,
            header,
            source,
            lattice,
            reading_group: reading_group_size.clamp(1, comm.size().max(1)),
            rank_offset,
            validate,
        }
    }

    pub fn reading_group(&self) -> usize {
        self.reading_group
    }

    fn read_compressed(&self, block: usize, record: &BlockRecord) -> Result<Vec<u8>, DecompError> {
        let mut compressed = vec![0u8; record.compressed_bytes as usize];
        self.source
            .read_at(self.header.block_offset(block), &mut compressed)?;
        inflate_block(block, &compressed, record.uncompressed_bytes as usize)
    }

    /// Read every block `block_owner` makes this rank need and clear the rest.
    pub fn read_blocks_with_halo(
        &self,
        geometry: &mut Geometry,
        block_owner: &[Option<usize>],
    ) -> Result<(), DecompError> {
        let me = self.comm.rank();
        let needed = blocks_to_read(geometry, self.header, block_owner, me);

        if self.validate {
            for (block, got, max) in self.header.oversized_blocks() {
                log::error!(
                    "block {block} is {got} bytes when the longest possible block is {max} bytes"
                );
            }
        }

        log::debug!("informing reading cores of block needs");
        let needs = Needs::exchange(self.comm, &needed, self.reading_group)?;

        let sites_per_block = geometry.sites_per_block();
        let mut parsed = 0usize;
        for block in 0..geometry.block_count() {
            let record = *self.header.record(block);
            let core = reading_core(block, self.reading_group);

            let mut data = None;
            if core == me {
                let wanting = needs.procs_wanting(block);
                if !wanting.is_empty() {
                    let inflated = self.read_compressed(block, &record)?;
                    {
                        let sends: Vec<Outbound<'_>> = wanting
                            .iter()
                            .filter(|&&r| r != me)
                            .map(|&peer| Outbound {
                                peer,
                                tag: tags::BLOCK_DATA,
                                data: &inflated,
                            })
                            .collect();
                        self.comm.exchange(&sends, &[])?;
                    }
                    if needed[block] {
                        data = Some(inflated);
                    }
                }
            } else if needed[block] {
                let mut received = self.comm.exchange(
                    &[],
                    &[Inbound {
                        peer: core,
                        tag: tags::BLOCK_DATA,
                        len: record.uncompressed_bytes as usize,
                    }],
                )?;
                data = received.pop();
            }

            let Some(bytes) = data else {
                geometry.blocks[block].clear();
                continue;
            };
            let mut sites = format::parse_block(&bytes, block, sites_per_block, &self.lattice)?;
            let owner = block_owner[block].map(|r| r + self.rank_offset);
            let mut fluid = 0usize;
            for site in sites.iter_mut().filter(|s| s.is_fluid) {
                site.target_processor = owner;
                fluid += 1;
            }
            if self.validate && fluid != record.fluid_sites as usize {
                log::error!(
                    "block {block} has {fluid} fluid sites, header declares {}",
                    record.fluid_sites
                );
            }
            geometry.blocks[block].sites = sites;
            parsed += 1;
        }
        log::debug!("rank {me} parsed {parsed} blocks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut e = ZlibEncoder::new(Vec::new(), Compression::default());
        e.write_all(data).unwrap();
        e.finish().unwrap()
    }

    #[test]
    fn inflate_requires_exact_length() {
        let body = vec![7u8; 100];
        let packed = zlib(&body);
        assert_eq!(inflate_block(0, &packed, 100).unwrap(), body);
        assert!(matches!(
            inflate_block(4, &packed, 99),
            Err(DecompError::Decompression { block: 4, .. })
        ));
        assert!(matches!(
            inflate_block(4, &packed, 101),
            Err(DecompError::Decompression { block: 4, .. })
        ));
    }

    #[test]
    fn garbage_is_a_decompression_error() {
        assert!(matches!(
            inflate_block(2, &[1, 2, 3, 4, 5], 10),
            Err(DecompError::Decompression { block: 2, .. })
        ));
    }
}
