//! Which ranks need which blocks.
//!
//! Every rank tells each reading core how many, and then which, of the
//! blocks that core reads it needs. A reading core ends up with the sorted
//! list of ranks wanting each of its blocks.

use super::reading_core;
use crate::algs::communicator::{Communicator, tags};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WireBlockId;
use crate::decomp_error::DecompError;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Needs {
    /// Ranks wanting each block; only filled for blocks read locally.
    wanting: Vec<Vec<usize>>,
}

impl Needs {
    pub fn exchange<C: Communicator + ?Sized>(
        comm: &C,
        needed: &[bool],
        reading_group: usize,
    ) -> Result<Self, DecompError> {
        let me = comm.rank();
        let mut wanting = vec![Vec::new(); needed.len()];

        let mut outgoing: BTreeMap<usize, Vec<WireBlockId>> = (0..reading_group)
            .filter(|&core| core != me)
            .map(|core| (core, Vec::new()))
            .collect();
        for block in (0..needed.len()).filter(|&b| needed[b]) {
            let core = reading_core(block, reading_group);
            if core == me {
                wanting[block].push(me);
            } else {
                outgoing.entry(core).or_default().push(WireBlockId::of(block));
            }
        }

        let sources: Vec<usize> = if me < reading_group {
            (0..comm.size()).filter(|&r| r != me).collect()
        } else {
            Vec::new()
        };
        let received =
            exchange_records(comm, &outgoing, &sources, tags::NEEDS_COUNT, tags::NEEDS_LIST)?;

        for (rank, ids) in received {
            for id in ids {
                let block = id.get();
                if block >= needed.len() || reading_core(block, reading_group) != me {
                    return Err(DecompError::comm(
                        rank,
                        format!("asked rank {me} for block {block}, which it does not read"),
                    ));
                }
                wanting[block].push(rank);
            }
        }
        for ranks in &mut wanting {
            ranks.sort_unstable();
        }
        Ok(Self { wanting })
    }

    /// Sorted ranks needing `block`; empty unless this rank reads it.
    pub fn procs_wanting(&self, block: usize) -> &[usize] {
        &self.wanting[block]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;

    #[test]
    fn reading_cores_learn_who_wants_their_blocks() {
        // 6 blocks, 3 ranks, reading group 2: core 0 reads even blocks, core 1 odd ones
        let got = LocalComm::run(3, |comm| {
            let needed: Vec<bool> = match comm.rank() {
                0 => vec![true, true, false, false, false, false],
                1 => vec![false, true, true, false, false, false],
                _ => vec![false, false, false, true, true, true],
            };
            let needs = Needs::exchange(&comm, &needed, 2).unwrap();
            (0..6).map(|b| needs.procs_wanting(b).to_vec()).collect::<Vec<_>>()
        });
        assert_eq!(got[0][0], vec![0]);
        assert_eq!(got[0][2], vec![1]);
        assert_eq!(got[0][4], vec![2]);
        assert_eq!(got[1][1], vec![0, 1]);
        assert_eq!(got[1][3], vec![2]);
        assert_eq!(got[1][5], vec![2]);
        assert!(got[2].iter().all(|w| w.is_empty()));
    }
}
