//! Streaming neighbour tables and the negotiated halo layout.
//!
//! Distribution `d` of local site `c` lives at `c * Q + d`. Index `N * Q`
//! is a rubbish slot for distributions streaming into walls or out of the
//! domain, and the shared (halo) distributions follow from `N * Q + 1`.

use super::site_data::LocalSite;
use crate::algs::communicator::{Communicator, Inbound, Outbound, tags};
use crate::algs::wire::{WireHaloEntry, cast_slice, decode_all};
use crate::decomp_error::DecompError;
use crate::geometry::Geometry;
use crate::lattice::LatticeInfo;
use hashbrown::HashMap;
use std::mem::size_of;

/// Of two ranks sharing distributions, the lower one sends its ordering.
#[inline]
pub fn lower_rank_sends(local: usize, peer: usize) -> bool {
    local < peer
}

/// A rank this rank exchanges distributions with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct NeighbourProcessor {
    pub rank: usize,
    pub shared_distribution_count: usize,
    /// Index of this rank's first halo slot in the distribution buffer.
    pub first_shared_distribution: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighbourTables {
    /// `N * Q` streaming destinations, indexed by `c * Q + d`.
    pub neighbour_indices: Vec<usize>,
    pub neighbour_processors: Vec<NeighbourProcessor>,
    /// For halo slot `k`, where the received distribution streams to.
    pub received_streaming_index: Vec<usize>,
}

impl NeighbourTables {
    pub fn total_shared_distributions(&self) -> usize {
        self.received_streaming_index.len()
    }
}

pub struct NeighbourLookupBuilder<'a, C: ?Sized> {
    comm: &'a C,
    geometry: &'a Geometry,
    lattice: LatticeInfo,
}

impl<'a, C: Communicator + ?Sized> NeighbourLookupBuilder<'a, C> {
    pub fn new(comm: &'a C, geometry: &'a Geometry, lattice: LatticeInfo) -> Self {
        Self {
            comm,
            geometry,
            lattice,
        }
    }

    fn shifted(&self, coords: [i64; 3], direction: usize) -> [i64; 3] {
        let c = self.lattice.vector(direction);
        [
            coords[0] + c[0] as i64,
            coords[1] + c[1] as i64,
            coords[2] + c[2] as i64,
        ]
    }

    /// Build the tables for `sites`, given in contiguous order, with
    /// `index` mapping their coordinates back to contiguous ids.
    ///
    /// Collective: every rank with shared distributions must call it.
    pub fn build(
        &self,
        sites: &[LocalSite],
        index: &HashMap<[i64; 3], usize>,
    ) -> Result<NeighbourTables, DecompError> {
        let me = self.comm.rank();
        let q = self.lattice.q();
        let n = sites.len();
        let rubbish = n * q;

        let mut neighbour_indices = vec![rubbish; n * q];
        let mut peers: Vec<usize> = Vec::new();
        let mut pending: Vec<Vec<WireHaloEntry>> = Vec::new();
        let mut slot_of_peer: HashMap<usize, usize> = HashMap::new();

        for (c, site) in sites.iter().enumerate() {
            neighbour_indices[c * q] = c * q;
            for d in 1..q {
                let target = self.shifted(site.coords, d);
                let Some(nb) = self.geometry.site_at(target) else {
                    continue;
                };
                if !nb.is_fluid {
                    continue;
                }
                match nb.target_processor {
                    Some(r) if r == me => {
                        let nc = index.get(&target).copied().ok_or_else(|| {
                            DecompError::Lookup(format!(
                                "rank {me} owns site {target:?} but has not numbered it"
                            ))
                        })?;
                        neighbour_indices[c * q + d] = nc * q + d;
                    }
                    Some(r) => {
                        let slot = *slot_of_peer.entry(r).or_insert_with(|| {
                            peers.push(r);
                            pending.push(Vec::new());
                            peers.len() - 1
                        });
                        pending[slot].push(WireHaloEntry::new(site.coords, d));
                    }
                    None => {
                        log::warn!("fluid site {target:?} has no owner on rank {me}");
                    }
                }
            }
        }

        let mut neighbour_processors = Vec::with_capacity(peers.len());
        let mut first = rubbish + 1;
        for (&rank, list) in peers.iter().zip(&pending) {
            neighbour_processors.push(NeighbourProcessor {
                rank,
                shared_distribution_count: list.len(),
                first_shared_distribution: first,
            });
            first += list.len();
        }

        let agreed = self.negotiate(&peers, pending)?;

        let mut received_streaming_index = Vec::with_capacity(first - rubbish - 1);
        for (k, (coords, d)) in agreed.into_iter().enumerate() {
            let c = index.get(&coords).copied().ok_or_else(|| {
                DecompError::Lookup(format!(
                    "shared distribution {k} names site {coords:?}, which rank {me} does not own"
                ))
            })?;
            neighbour_indices[c * q + d] = rubbish + 1 + k;
            received_streaming_index.push(c * q + self.lattice.inverse(d));
        }

        log::debug!(
            "rank {me}: {} neighbouring ranks, {} shared distributions",
            neighbour_processors.len(),
            received_streaming_index.len()
        );
        Ok(NeighbourTables {
            neighbour_indices,
            neighbour_processors,
            received_streaming_index,
        })
    }

    /// Agree with every peer on the order of the shared distributions.
    ///
    /// Returns `(coords, direction)` of every local site and outgoing
    /// direction, peers in discovery order.
    fn negotiate(
        &self,
        peers: &[usize],
        pending: Vec<Vec<WireHaloEntry>>,
    ) -> Result<Vec<([i64; 3], usize)>, DecompError> {
        let me = self.comm.rank();
        let sends: Vec<Outbound<'_>> = peers
            .iter()
            .zip(&pending)
            .filter(|&(&peer, _)| lower_rank_sends(me, peer))
            .map(|(&peer, list)| Outbound {
                peer,
                tag: tags::HALO_LIST,
                data: cast_slice(list),
            })
            .collect();
        let recvs: Vec<Inbound> = peers
            .iter()
            .zip(&pending)
            .filter(|&(&peer, _)| !lower_rank_sends(me, peer))
            .map(|(&peer, list)| Inbound {
                peer,
                tag: tags::HALO_LIST,
                len: list.len() * size_of::<WireHaloEntry>(),
            })
            .collect();
        let mut received = self.comm.exchange(&sends, &recvs)?.into_iter();

        let mut agreed = Vec::with_capacity(pending.iter().map(Vec::len).sum());
        for (&peer, list) in peers.iter().zip(&pending) {
            if lower_rank_sends(me, peer) {
                agreed.extend(list.iter().map(|e| (e.coords(), e.direction())));
            } else {
                let raw = received.next().unwrap_or_default();
                for e in decode_all::<WireHaloEntry>(peer, &raw)? {
                    let d = e.direction();
                    if d == 0 || d >= self.lattice.q() {
                        return Err(DecompError::Lookup(format!(
                            "rank {peer} shares direction {d}, outside {}",
                            self.lattice.name()
                        )));
                    }
                    agreed.push((self.shifted(e.coords(), d), self.lattice.inverse(d)));
                }
            }
        }
        Ok(agreed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_rank_sends_is_antisymmetric() {
        for a in 0..4 {
            for b in 0..4 {
                if a != b {
                    assert_ne!(lower_rank_sends(a, b), lower_rank_sends(b, a));
                }
            }
        }
    }
}
