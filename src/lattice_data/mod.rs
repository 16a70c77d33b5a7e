//! Per-rank lattice data built from a decomposed [`Geometry`].
//!
//! Owned fluid sites are numbered contiguously: first every mid-domain site
//! (no neighbour on another rank) grouped by [`CollisionType`], then every
//! domain-edge site grouped the same way. Within a group sites keep block
//! then site order.

pub mod neighbours;
pub mod site_data;

pub use neighbours::{NeighbourLookupBuilder, NeighbourProcessor, NeighbourTables, lower_rank_sends};
pub use site_data::{CollisionType, LocalSite};

use crate::algs::communicator::{Communicator, ReduceOp};
use crate::algs::wire::{WireCount, cast_slice, decode_all};
use crate::decomp_error::DecompError;
use crate::geometry::Geometry;
use crate::lattice::LatticeInfo;
use hashbrown::HashMap;
use itertools::Itertools;

/// Bounding box of the owned fluid sites of all ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SiteExtrema {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

#[derive(Debug)]
pub struct LatticeData {
    lattice: LatticeInfo,
    rank: usize,
    geometry: Geometry,
    sites: Vec<LocalSite>,
    index: HashMap<[i64; 3], usize>,
    mid_domain_counts: [usize; CollisionType::COUNT],
    domain_edge_counts: [usize; CollisionType::COUNT],
    tables: NeighbourTables,
    fluid_sites_per_rank: Vec<usize>,
    extrema: Option<SiteExtrema>,
}

impl LatticeData {
    /// Number the owned sites and build the neighbour tables.
    ///
    /// Collective over `comm`, whose ranks must be the ones written into
    /// [`Site::target_processor`](crate::geometry::Site::target_processor).
    pub fn build<C: Communicator + ?Sized>(
        comm: &C,
        geometry: Geometry,
        lattice: LatticeInfo,
    ) -> Result<Self, DecompError> {
        let me = comm.rank();
        let sites = Self::collect_sites(me, &geometry, &lattice);

        let mut mid_domain_counts = [0; CollisionType::COUNT];
        let mut domain_edge_counts = [0; CollisionType::COUNT];
        for s in &sites {
            let counts = if s.domain_edge {
                &mut domain_edge_counts
            } else {
                &mut mid_domain_counts
            };
            counts[s.collision.index()] += 1;
        }
        let index: HashMap<[i64; 3], usize> =
            sites.iter().enumerate().map(|(c, s)| (s.coords, c)).collect();

        let tables = NeighbourLookupBuilder::new(comm, &geometry, lattice).build(&sites, &index)?;

        let count = WireCount::new(sites.len());
        let fluid_sites_per_rank = comm
            .all_gather(cast_slice(std::slice::from_ref(&count)))?
            .iter()
            .enumerate()
            .map(|(rank, raw)| {
                decode_all::<WireCount>(rank, raw)
                    .map(|c| c.first().map(WireCount::get).unwrap_or(0))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let extrema = Self::global_extrema(comm, &sites)?;
        if me == 0 {
            let (least, most) = fluid_sites_per_rank
                .iter()
                .minmax()
                .into_option()
                .map_or((0, 0), |(a, b)| (*a, *b));
            log::info!(
                "{} fluid sites over {} ranks ({least} to {most} per rank), extent {:?}",
                fluid_sites_per_rank.iter().sum::<usize>(),
                fluid_sites_per_rank.len(),
                extrema
            );
        }

        Ok(Self {
            lattice,
            rank: me,
            geometry,
            sites,
            index,
            mid_domain_counts,
            domain_edge_counts,
            tables,
            fluid_sites_per_rank,
            extrema,
        })
    }

    fn collect_sites(me: usize, geometry: &Geometry, lattice: &LatticeInfo) -> Vec<LocalSite> {
        let mut sites = Vec::new();
        for (block, data) in geometry.blocks.iter().enumerate() {
            for (site, s) in data.sites.iter().enumerate() {
                if !s.is_fluid || s.target_processor != Some(me) {
                    continue;
                }
                let coords = geometry.global_coords(block, site);
                let domain_edge = (1..lattice.q()).any(|d| {
                    let c = lattice.vector(d);
                    let n = [
                        coords[0] + c[0] as i64,
                        coords[1] + c[1] as i64,
                        coords[2] + c[2] as i64,
                    ];
                    geometry
                        .site_at(n)
                        .is_some_and(|nb| nb.is_fluid && nb.target_processor != Some(me))
                });
                sites.push(LocalSite::new(block, site, coords, s, domain_edge));
            }
        }
        // stable: traversal order survives within each group
        sites.sort_by_key(LocalSite::order_key);
        sites
    }

    fn global_extrema<C: Communicator + ?Sized>(
        comm: &C,
        sites: &[LocalSite],
    ) -> Result<Option<SiteExtrema>, DecompError> {
        let mut min = [i64::MAX; 3];
        let mut max = [i64::MIN; 3];
        for s in sites {
            for axis in 0..3 {
                min[axis] = min[axis].min(s.coords[axis]);
                max[axis] = max[axis].max(s.coords[axis]);
            }
        }
        comm.all_reduce_i64(&mut min, ReduceOp::Min)?;
        comm.all_reduce_i64(&mut max, ReduceOp::Max)?;
        Ok((min[0] <= max[0]).then_some(SiteExtrema { min, max }))
    }

    pub fn lattice(&self) -> LatticeInfo {
        self.lattice
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn local_fluid_sites(&self) -> usize {
        self.sites.len()
    }

    /// Sites in contiguous order.
    pub fn sites(&self) -> &[LocalSite] {
        &self.sites
    }

    pub fn site(&self, contiguous: usize) -> &LocalSite {
        &self.sites[contiguous]
    }

    pub fn mid_domain_count(&self, kind: CollisionType) -> usize {
        self.mid_domain_counts[kind.index()]
    }

    pub fn domain_edge_count(&self, kind: CollisionType) -> usize {
        self.domain_edge_counts[kind.index()]
    }

    pub fn mid_domain_sites(&self) -> usize {
        self.mid_domain_counts.iter().sum()
    }

    pub fn domain_edge_sites(&self) -> usize {
        self.domain_edge_counts.iter().sum()
    }

    /// Streaming destination of distribution `direction` of site `contiguous`.
    pub fn neighbour_index(&self, contiguous: usize, direction: usize) -> usize {
        self.tables.neighbour_indices[contiguous * self.lattice.q() + direction]
    }

    pub fn neighbour_indices(&self) -> &[usize] {
        &self.tables.neighbour_indices
    }

    /// Slot that absorbs distributions streaming into walls or out of the domain.
    pub fn rubbish_index(&self) -> usize {
        self.sites.len() * self.lattice.q()
    }

    pub fn neighbour_processors(&self) -> &[NeighbourProcessor] {
        &self.tables.neighbour_processors
    }

    pub fn received_streaming_index(&self) -> &[usize] {
        &self.tables.received_streaming_index
    }

    pub fn total_shared_distributions(&self) -> usize {
        self.tables.total_shared_distributions()
    }

    /// Length of the distribution buffer: local, rubbish and halo slots.
    pub fn distribution_buffer_len(&self) -> usize {
        self.rubbish_index() + 1 + self.total_shared_distributions()
    }

    pub fn fluid_sites_per_rank(&self) -> &[usize] {
        &self.fluid_sites_per_rank
    }

    pub fn total_fluid_sites(&self) -> usize {
        self.fluid_sites_per_rank.iter().sum()
    }

    pub fn global_site_extrema(&self) -> Option<SiteExtrema> {
        self.extrema
    }

    /// Owner of the fluid site at `coords`, if this rank knows it.
    pub fn proc_for_site(&self, coords: [i64; 3]) -> Option<usize> {
        self.geometry.site_at(coords)?.target_processor
    }

    /// Contiguous id of the site at `coords`, if this rank owns it.
    pub fn contiguous_site_id(&self, coords: [i64; 3]) -> Option<usize> {
        self.index.get(&coords).copied()
    }

    pub fn is_local(&self, coords: [i64; 3]) -> bool {
        self.proc_for_site(coords) == Some(self.rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::geometry::{IntersectionType, Link, Preamble, Site};

    /// One 2x2x2 block; every site fluid, ranks by x.
    fn cube(owner_of_x: impl Fn(i64) -> usize) -> Geometry {
        let lattice = LatticeInfo::D3Q15;
        let mut g = Geometry::new(&Preamble {
            blocks: [1, 1, 1],
            block_size: 2,
            voxel_size: 1.0,
            origin: [0.0; 3],
        });
        g.blocks[0].sites = (0..8)
            .map(|s| {
                let mut site = Site::bulk_fluid(&lattice);
                site.target_processor = Some(owner_of_x((s / 4) as i64));
                site
            })
            .collect();
        g
    }

    #[test]
    fn serial_cube_has_no_halo() {
        let data = LatticeData::build(&NoComm, cube(|_| 0), LatticeInfo::D3Q15).unwrap();
        assert_eq!(data.local_fluid_sites(), 8);
        assert_eq!(data.domain_edge_sites(), 0);
        assert_eq!(data.total_shared_distributions(), 0);
        assert_eq!(data.rubbish_index(), 8 * 15);
        // site (0,0,0) streams +x into (1,0,0), the rest of the -x links leave
        let origin = data.contiguous_site_id([0, 0, 0]).unwrap();
        let east = data.contiguous_site_id([1, 0, 0]).unwrap();
        assert_eq!(data.neighbour_index(origin, 1), east * 15 + 1);
        assert_eq!(data.neighbour_index(origin, 2), data.rubbish_index());
        assert_eq!(data.neighbour_index(origin, 0), origin * 15);
        assert_eq!(
            data.global_site_extrema(),
            Some(SiteExtrema { min: [0; 3], max: [1; 3] })
        );
    }

    #[test]
    fn wall_sites_come_after_bulk_sites() {
        let mut g = cube(|_| 0);
        g.blocks[0].sites[0].links[1] = Link {
            kind: IntersectionType::Wall,
            distance: 0.5,
            iolet_id: None,
        };
        g.blocks[0].sites[0].wall_normal = Some([-1.0, 0.0, 0.0]);
        let data = LatticeData::build(&NoComm, g, LatticeInfo::D3Q15).unwrap();
        assert_eq!(data.mid_domain_count(CollisionType::Fluid), 7);
        assert_eq!(data.mid_domain_count(CollisionType::Wall), 1);
        assert_eq!(data.contiguous_site_id([0, 0, 0]), Some(7));
        assert_eq!(data.site(7).wall_distance(2), Some(0.5));
    }

    #[test]
    fn split_cube_shares_matching_halo() {
        let got = LocalComm::run(2, |comm| {
            let data = LatticeData::build(&comm, cube(|x| x as usize), LatticeInfo::D3Q15).unwrap();
            (
                data.local_fluid_sites(),
                data.domain_edge_sites(),
                data.neighbour_processors().to_vec(),
                data.fluid_sites_per_rank().to_vec(),
            )
        });
        for (rank, (n, edge, procs, per_rank)) in got.iter().enumerate() {
            assert_eq!(*n, 4);
            assert_eq!(*edge, 4);
            assert_eq!(per_rank, &vec![4, 4]);
            assert_eq!(procs.len(), 1);
            assert_eq!(procs[0].rank, 1 - rank);
            assert_eq!(procs[0].first_shared_distribution, 4 * 15 + 1);
        }
        assert_eq!(
            got[0].2[0].shared_distribution_count,
            got[1].2[0].shared_distribution_count
        );
    }
}
