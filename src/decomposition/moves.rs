//! Site moves produced by the optimiser and their application.

use crate::algs::communicator::Communicator;
use crate::algs::wire::{WireCount, WireMove, cast_slice, decode_all};
use crate::decomp_error::DecompError;
use crate::geometry::Geometry;

/// Relocation of one fluid site to rank `to` (a rank of the compute group).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Move {
    pub block: usize,
    pub site: usize,
    pub to: usize,
}

/// Every move of every rank, ordered by origin rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveList {
    moves: Vec<Move>,
    /// Number of moves contributed by each origin rank.
    counts: Vec<usize>,
}

impl MoveList {
    pub fn from_origins(per_origin: Vec<Vec<Move>>) -> Self {
        let counts = per_origin.iter().map(Vec::len).collect();
        Self {
            moves: per_origin.into_iter().flatten().collect(),
            counts,
        }
    }

    /// Share the local moves with every rank: counts first, then the moves.
    pub fn all_gather<C: Communicator + ?Sized>(
        comm: &C,
        local: &[Move],
    ) -> Result<Self, DecompError> {
        let count = WireCount::new(local.len());
        let counts: Vec<usize> = comm
            .all_gather(cast_slice(std::slice::from_ref(&count)))?
            .iter()
            .enumerate()
            .map(|(rank, raw)| {
                decode_all::<WireCount>(rank, raw)
                    .map(|c| c.first().map(WireCount::get).unwrap_or(0))
            })
            .collect::<Result<_, _>>()?;

        let wire: Vec<WireMove> = local
            .iter()
            .map(|m| WireMove::new(m.block, m.site, m.to))
            .collect();
        let gathered = comm.all_gather(cast_slice(&wire))?;

        let mut per_origin = Vec::with_capacity(gathered.len());
        for (rank, raw) in gathered.iter().enumerate() {
            let moves: Vec<WireMove> = decode_all(rank, raw)?;
            if moves.len() != counts[rank] {
                return Err(DecompError::BufferSizeMismatch {
                    neighbor: rank,
                    expected: counts[rank] * std::mem::size_of::<WireMove>(),
                    got: raw.len(),
                });
            }
            per_origin.push(
                moves
                    .iter()
                    .map(|w| Move {
                        block: w.block(),
                        site: w.site(),
                        to: w.to(),
                    })
                    .collect(),
            );
        }
        Ok(Self::from_origins(per_origin))
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn count_from(&self, origin: usize) -> usize {
        self.counts.get(origin).copied().unwrap_or(0)
    }

    /// `(origin rank, move)` in list order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Move)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .flat_map(|(origin, &n)| std::iter::repeat_n(origin, n))
            .zip(self.moves.iter())
    }
}

/// Ownership map for the second read: the initial map with every block that
/// receives a site moving to `local_rank` assigned to `local_rank`.
pub fn reread_map(
    block_owner: &[Option<usize>],
    moves: &MoveList,
    local_rank: usize,
) -> Vec<Option<usize>> {
    let mut map = block_owner.to_vec();
    for m in moves.moves().iter().filter(|m| m.to == local_rank) {
        map[m.block] = Some(local_rank);
    }
    map
}

/// Set the final owner of every fluid site on locally present blocks.
///
/// Sites are first reset to the owner of their block under `block_owner`,
/// then the moves are replayed in order, so the result depends only on the
/// inputs. Returns the number of moves applied locally.
pub fn implement_moves(
    geometry: &mut Geometry,
    block_owner: &[Option<usize>],
    moves: &MoveList,
    rank_offset: usize,
    validate: bool,
) -> Result<usize, DecompError> {
    for (block, data) in geometry.blocks.iter_mut().enumerate() {
        let owner = block_owner[block].map(|r| r + rank_offset);
        for site in data.sites.iter_mut().filter(|s| s.is_fluid) {
            site.target_processor = owner;
        }
    }

    let mut applied = 0;
    for (origin, m) in moves.iter() {
        let Some(block) = geometry.blocks.get_mut(m.block) else {
            return Err(DecompError::Lookup(format!(
                "move from rank {origin} names block {} outside the domain",
                m.block
            )));
        };
        if block.is_empty() {
            continue;
        }
        let Some(site) = block.sites.get_mut(m.site) else {
            return Err(DecompError::Lookup(format!(
                "move from rank {origin} names site {} outside block {}",
                m.site, m.block
            )));
        };
        if validate {
            if !site.is_fluid {
                log::error!(
                    "rank {origin} moves solid site {} of block {}",
                    m.site,
                    m.block
                );
            } else if site.target_processor != Some(origin + rank_offset) {
                log::error!(
                    "site {} of block {} is moved by rank {origin} but belongs to {:?}",
                    m.site,
                    m.block,
                    site.target_processor
                );
            }
        }
        site.target_processor = Some(m.to + rank_offset);
        applied += 1;
    }
    Ok(applied)
}
