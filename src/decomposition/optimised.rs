//! Refinement of the block decomposition at site granularity.
//!
//! Builds the distributed site graph from the locally known blocks, hands it
//! to a [`GraphPartitioner`] and turns the result into a global [`MoveList`].

use super::moves::{Move, MoveList};
use super::validation::validate_graph;
use crate::algs::communicator::Communicator;
use crate::config::DecompositionConfig;
use crate::decomp_error::DecompError;
use crate::geometry::{Geometry, HeaderIndex};
use crate::lattice::LatticeInfo;
use crate::partitioning::{DistributedGraph, GraphPartitioner, PartitionParams};
use hashbrown::HashMap;

/// `vtxdist` plus the first global vertex id of every owned block.
///
/// Derived from the header and the ownership map only, so every rank
/// computes the same numbering.
pub fn vertex_distribution(
    fluid_sites: &[usize],
    block_owner: &[Option<usize>],
    ranks: usize,
) -> (Vec<usize>, Vec<Option<usize>>) {
    let mut per_rank = vec![0usize; ranks];
    for (block, owner) in block_owner.iter().enumerate() {
        if let Some(r) = *owner {
            per_rank[r] += fluid_sites[block];
        }
    }
    let mut vtxdist = Vec::with_capacity(ranks + 1);
    vtxdist.push(0);
    for n in &per_rank {
        vtxdist.push(vtxdist[vtxdist.len() - 1] + n);
    }

    let mut cursor = vtxdist[..ranks].to_vec();
    let first_vertex = block_owner
        .iter()
        .enumerate()
        .map(|(block, owner)| {
            owner.map(|r| {
                let first = cursor[r];
                cursor[r] += fluid_sites[block];
                first
            })
        })
        .collect();
    (vtxdist, first_vertex)
}

/// The local part of the site graph and the site behind each local vertex.
#[derive(Clone, Debug, Default)]
pub struct SiteGraph {
    pub graph: DistributedGraph,
    /// `(block, site)` of each local vertex.
    pub local_sites: Vec<(usize, usize)>,
}

pub struct GraphDecompositionOptimizer<'a, C: ?Sized> {
    comm: &'a C,
    geometry: &'a Geometry,
    header: &'a HeaderIndex,
    block_owner: &'a [Option<usize>],
    lattice: LatticeInfo,
    config: &'a DecompositionConfig,
}

impl<'a, C: Communicator + ?Sized> GraphDecompositionOptimizer<'a, C> {
    pub fn new(
        comm: &'a C,
        geometry: &'a Geometry,
        header: &'a HeaderIndex,
        block_owner: &'a [Option<usize>],
        lattice: LatticeInfo,
        config: &'a DecompositionConfig,
    ) -> Self {
        Self {
            comm,
            geometry,
            header,
            block_owner,
            lattice,
            config,
        }
    }

    /// Fluid ordinal of every site of a locally present block.
    fn fluid_ordinals(&self, block: usize) -> Vec<Option<usize>> {
        let mut next = 0;
        self.geometry.blocks[block]
            .sites
            .iter()
            .map(|s| {
                s.is_fluid.then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }

    pub fn build_graph(&self) -> Result<SiteGraph, DecompError> {
        let me = self.comm.rank();
        let (vtxdist, first_vertex) = vertex_distribution(
            &self.header.fluid_sites_per_block(),
            self.block_owner,
            self.comm.size(),
        );

        let mut ordinals: HashMap<usize, Vec<Option<usize>>> = HashMap::new();
        let mut graph = DistributedGraph {
            vtxdist,
            xadj: vec![0],
            adjncy: Vec::new(),
            vwgt: Vec::new(),
        };
        let mut local_sites = Vec::new();

        for block in (0..self.geometry.block_count()).filter(|&b| self.block_owner[b] == Some(me)) {
            let sites = &self.geometry.blocks[block].sites;
            for site in (0..sites.len()).filter(|&s| sites[s].is_fluid) {
                let coords = self.geometry.global_coords(block, site);
                for d in 1..self.lattice.q() {
                    let c = self.lattice.vector(d);
                    let n = [
                        coords[0] + c[0] as i64,
                        coords[1] + c[1] as i64,
                        coords[2] + c[2] as i64,
                    ];
                    let Some((nb_block, nb_site)) = self.geometry.locate(n) else {
                        continue;
                    };
                    let neighbour_is_fluid = self.geometry.blocks[nb_block]
                        .sites
                        .get(nb_site)
                        .is_some_and(|s| s.is_fluid);
                    if !neighbour_is_fluid {
                        continue;
                    }
                    let base = first_vertex[nb_block].ok_or_else(|| {
                        DecompError::Lookup(format!(
                            "fluid site {nb_site} in block {nb_block}, which has no owner"
                        ))
                    })?;
                    let ordinal = ordinals
                        .entry(nb_block)
                        .or_insert_with(|| self.fluid_ordinals(nb_block))[nb_site]
                        .ok_or_else(|| {
                            DecompError::Lookup(format!("site {nb_site} of block {nb_block}"))
                        })?;
                    graph.adjncy.push(base + ordinal);
                }
                graph.xadj.push(graph.adjncy.len());
                graph.vwgt.push(1);
                local_sites.push((block, site));
            }
        }

        let expected = graph.vtxdist[me + 1] - graph.vtxdist[me];
        if local_sites.len() != expected {
            log::warn!(
                "rank {me} found {} local fluid sites, header implies {expected}",
                local_sites.len()
            );
        }
        Ok(SiteGraph { graph, local_sites })
    }

    /// Partition the site graph and share the resulting moves.
    pub fn optimise<P: GraphPartitioner>(
        &self,
        partitioner: &P,
    ) -> Result<MoveList, DecompError> {
        let me = self.comm.rank();
        let site_graph = self.build_graph()?;
        log::debug!(
            "rank {me}: site graph with {} vertices and {} arcs",
            site_graph.graph.local_vertex_count(),
            site_graph.graph.adjncy.len()
        );
        if self.config.validate {
            validate_graph(self.comm, &site_graph.graph)?;
        }

        let params = PartitionParams {
            n_parts: self.comm.size(),
            imbalance_tolerance: self.config.imbalance_tolerance,
            refine_passes: self.config.refine_passes,
        };
        let parts = partitioner.partition(&site_graph.graph, &params, self.comm)?;

        let local_moves: Vec<Move> = site_graph
            .local_sites
            .iter()
            .zip(&parts)
            .filter(|&(_, &p)| p != me)
            .map(|(&(block, site), &to)| Move { block, site, to })
            .collect();
        let moves = MoveList::all_gather(self.comm, &local_moves)?;
        if me == 0 {
            log::info!(
                "optimisation moves {} of {} fluid sites",
                moves.len(),
                self.header.total_fluid_sites()
            );
        }
        Ok(moves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_ids_follow_rank_then_block_order() {
        let sites = [3, 0, 2, 4];
        let owner = [Some(1), None, Some(0), Some(1)];
        let (vtxdist, first) = vertex_distribution(&sites, &owner, 2);
        assert_eq!(vtxdist, vec![0, 2, 9]);
        assert_eq!(first, vec![Some(2), None, Some(0), Some(5)]);
    }
}
