//! Initial block-to-rank assignment by greedy region growing.
//!
//! Blocks are visited in raster order. The first unassigned fluid block
//! seeds a region for the current rank, which then grows breadth-first over
//! the 26-neighbourhood until it holds its share of fluid sites. A region
//! that runs out of adjacent blocks is continued from the next raster block.

use crate::geometry::format::neighbourhood;
use std::collections::VecDeque;

/// Owner per block; `None` for blocks without fluid sites.
pub type BlockOwnership = Vec<Option<usize>>;

pub struct InitialBlockAssigner<'a> {
    blocks_per_dim: [usize; 3],
    fluid_sites: &'a [usize],
}

impl<'a> InitialBlockAssigner<'a> {
    pub fn new(blocks_per_dim: [usize; 3], fluid_sites: &'a [usize]) -> Self {
        Self {
            blocks_per_dim,
            fluid_sites,
        }
    }

    fn neighbours(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        let [nx, ny, nz] = self.blocks_per_dim;
        let b = [block / (ny * nz), (block / nz) % ny, block % nz];
        neighbourhood().into_iter().filter_map(move |d| {
            let x = b[0] as i64 + d[0] as i64;
            let y = b[1] as i64 + d[1] as i64;
            let z = b[2] as i64 + d[2] as i64;
            let inside = (0..nx as i64).contains(&x)
                && (0..ny as i64).contains(&y)
                && (0..nz as i64).contains(&z);
            inside.then(|| ((x as usize * ny) + y as usize) * nz + z as usize)
        })
    }

    /// Assign every fluid block to one of `ranks` ranks.
    pub fn assign(&self, ranks: usize) -> BlockOwnership {
        let count = self.fluid_sites.len();
        let mut owner: BlockOwnership = vec![None; count];
        if ranks == 0 {
            return owner;
        }

        let mut remaining_sites: usize = self.fluid_sites.iter().sum();
        let mut remaining_ranks = ranks;
        let mut rank = 0;
        let mut region_sites = 0usize;
        let mut queue = VecDeque::new();

        let target = |sites: usize, ranks: usize| (sites / ranks).max(1);
        let mut target_sites = target(remaining_sites, remaining_ranks);

        for seed in 0..count {
            if self.fluid_sites[seed] == 0 || owner[seed].is_some() {
                continue;
            }
            let last_rank = rank + 1 == ranks;

            owner[seed] = Some(rank);
            region_sites += self.fluid_sites[seed];
            queue.clear();
            queue.push_back(seed);

            while let Some(block) = queue.pop_front() {
                if !last_rank && region_sites >= target_sites {
                    break;
                }
                for n in self.neighbours(block) {
                    if !last_rank && region_sites >= target_sites {
                        break;
                    }
                    if self.fluid_sites[n] == 0 || owner[n].is_some() {
                        continue;
                    }
                    owner[n] = Some(rank);
                    region_sites += self.fluid_sites[n];
                    queue.push_back(n);
                }
            }

            if !last_rank && region_sites >= target_sites {
                log::debug!("rank {rank} assigned {region_sites} fluid sites");
                remaining_sites -= region_sites;
                remaining_ranks -= 1;
                rank += 1;
                region_sites = 0;
                target_sites = target(remaining_sites, remaining_ranks);
            }
        }
        owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn four_equal_blocks_on_four_ranks() {
        let sites = vec![20; 4];
        let owner = InitialBlockAssigner::new([2, 2, 1], &sites).assign(4);
        assert_eq!(owner, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn empty_blocks_stay_unowned() {
        let sites = vec![0, 5, 0, 5, 0, 5];
        let owner = InitialBlockAssigner::new([6, 1, 1], &sites).assign(2);
        // block 1 cannot reach block 3 through empty space, so rank 0 restarts there
        assert_eq!(owner, vec![None, Some(0), None, Some(0), None, Some(1)]);
    }

    #[test]
    fn regions_grow_through_neighbours() {
        // 4x1x1 line, one rank per half
        let sites = vec![10; 4];
        let owner = InitialBlockAssigner::new([4, 1, 1], &sites).assign(2);
        assert_eq!(owner, vec![Some(0), Some(0), Some(1), Some(1)]);
    }

    #[test]
    fn more_ranks_than_blocks() {
        let sites = vec![3, 3];
        let owner = InitialBlockAssigner::new([2, 1, 1], &sites).assign(5);
        assert_eq!(owner, vec![Some(0), Some(1)]);
    }

    proptest! {
        #[test]
        fn every_fluid_block_has_one_owner(
            sites in prop::collection::vec(prop_oneof![Just(0usize), 1usize..50], 27),
            ranks in 1usize..6,
        ) {
            let owner = InitialBlockAssigner::new([3, 3, 3], &sites).assign(ranks);
            for (block, o) in owner.iter().enumerate() {
                prop_assert_eq!(o.is_some(), sites[block] > 0);
                if let Some(r) = o {
                    prop_assert!(*r < ranks);
                }
            }
            let assigned: usize = owner
                .iter()
                .zip(&sites)
                .filter(|(o, _)| o.is_some())
                .map(|(_, s)| s)
                .sum();
            prop_assert_eq!(assigned, sites.iter().sum::<usize>());
        }
    }
}
