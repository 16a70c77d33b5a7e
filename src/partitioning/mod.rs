//! Graph partitioning of the distributed site graph.
//!
//! Every rank holds a contiguous range of vertices (`vtxdist`) in CSR form.
//! A [`GraphPartitioner`] is called collectively and returns one part per
//! local vertex.

pub mod error;
#[cfg(feature = "metis-support")]
pub mod metis;
pub mod metrics;
pub mod refine;

pub use error::PartitionError;
#[cfg(feature = "metis-support")]
pub use self::metis::MetisPartitioner;
pub use metrics::{edge_cut, imbalance, part_weights};
pub use refine::KwayRefiner;

use crate::algs::communicator::Communicator;
use crate::algs::wire::{cast_slice, decode_all};

/// The local slice of a distributed graph in CSR form.
///
/// `adjncy` holds global vertex ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributedGraph {
    /// `vtxdist[r]..vtxdist[r + 1]` are the vertices of rank `r`.
    pub vtxdist: Vec<usize>,
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
    pub vwgt: Vec<usize>,
}

impl DistributedGraph {
    pub fn local_vertex_count(&self) -> usize {
        self.vwgt.len()
    }

    pub fn total_vertices(&self) -> usize {
        self.vtxdist.last().copied().unwrap_or(0)
    }

    pub fn neighbours(&self, local: usize) -> &[usize] {
        &self.adjncy[self.xadj[local]..self.xadj[local + 1]]
    }

    /// Rank owning global vertex `v`.
    pub fn owner_of(&self, v: usize) -> Option<usize> {
        if v >= self.total_vertices() {
            return None;
        }
        Some(self.vtxdist.partition_point(|&start| start <= v) - 1)
    }

    /// Check the CSR arrays against `vtxdist` for `rank`.
    pub fn check(&self, rank: usize) -> Result<(), PartitionError> {
        if self.vtxdist.len() < rank + 2 {
            return Err(PartitionError::MalformedGraph(format!(
                "vtxdist has {} entries, rank {rank} needs {}",
                self.vtxdist.len(),
                rank + 2
            )));
        }
        if self.vtxdist.windows(2).any(|w| w[0] > w[1]) {
            return Err(PartitionError::MalformedGraph("vtxdist is not monotone".into()));
        }
        let n = self.vtxdist[rank + 1] - self.vtxdist[rank];
        if self.vwgt.len() != n || self.xadj.len() != n + 1 {
            return Err(PartitionError::MalformedGraph(format!(
                "rank {rank} owns {n} vertices but has {} weights and {} offsets",
                self.vwgt.len(),
                self.xadj.len()
            )));
        }
        if self.xadj.first() != Some(&0)
            || self.xadj.windows(2).any(|w| w[0] > w[1])
            || self.xadj.last() != Some(&self.adjncy.len())
        {
            return Err(PartitionError::MalformedGraph("xadj is not a valid offset array".into()));
        }
        let total = self.total_vertices();
        if let Some(&bad) = self.adjncy.iter().find(|&&v| v >= total) {
            return Err(PartitionError::MalformedGraph(format!(
                "edge to vertex {bad} outside 0..{total}"
            )));
        }
        Ok(())
    }
}

/// Knobs handed to a partitioner.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionParams {
    pub n_parts: usize,
    /// Relative overload allowed on any part.
    pub imbalance_tolerance: f64,
    /// Boundary refinement sweeps for iterative partitioners.
    pub refine_passes: usize,
}

/// Collective graph partitioning.
pub trait GraphPartitioner {
    /// Return a part in `0..params.n_parts` for each local vertex of `graph`.
    ///
    /// Must be called by every rank of `comm`.
    fn partition<C: Communicator + ?Sized>(
        &self,
        graph: &DistributedGraph,
        params: &PartitionParams,
        comm: &C,
    ) -> Result<Vec<usize>, PartitionError>;
}

/// The whole graph, assembled identically on every rank.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalGraph {
    pub vtxdist: Vec<usize>,
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
    pub vwgt: Vec<usize>,
}

impl GlobalGraph {
    pub fn vertex_count(&self) -> usize {
        self.vwgt.len()
    }

    pub fn neighbours(&self, v: usize) -> &[usize] {
        &self.adjncy[self.xadj[v]..self.xadj[v + 1]]
    }

    /// Part of every vertex if each rank kept its own vertices.
    pub fn current_owners(&self) -> Vec<usize> {
        let mut owners = Vec::with_capacity(self.vertex_count());
        for (rank, w) in self.vtxdist.windows(2).enumerate() {
            owners.extend(std::iter::repeat_n(rank, w[1] - w[0]));
        }
        owners
    }
}

/// All-gather the distributed graph.
///
/// Each rank contributes `weight, degree, neighbours...` per local vertex.
pub fn gather_graph<C: Communicator + ?Sized>(
    graph: &DistributedGraph,
    comm: &C,
) -> Result<GlobalGraph, PartitionError> {
    graph.check(comm.rank())?;
    let mut local: Vec<u64> = Vec::with_capacity(2 * graph.local_vertex_count() + graph.adjncy.len());
    for v in 0..graph.local_vertex_count() {
        let nbrs = graph.neighbours(v);
        local.push((graph.vwgt[v] as u64).to_le());
        local.push((nbrs.len() as u64).to_le());
        local.extend(nbrs.iter().map(|&n| (n as u64).to_le()));
    }
    let gathered = comm
        .all_gather(cast_slice(&local))
        .map_err(|e| PartitionError::Exchange(e.to_string()))?;

    let mut out = GlobalGraph {
        vtxdist: graph.vtxdist.clone(),
        xadj: vec![0],
        adjncy: Vec::with_capacity(graph.adjncy.len() * comm.size()),
        vwgt: Vec::with_capacity(graph.total_vertices()),
    };
    for (rank, raw) in gathered.iter().enumerate() {
        let words: Vec<u64> = decode_all(rank, raw)
            .map_err(|e| PartitionError::Exchange(e.to_string()))?;
        let mut words = words.into_iter().map(u64::from_le);
        let n = graph.vtxdist[rank + 1] - graph.vtxdist[rank];
        for _ in 0..n {
            let (Some(w), Some(deg)) = (words.next(), words.next()) else {
                return Err(PartitionError::Exchange(format!(
                    "rank {rank} sent fewer vertices than vtxdist declares"
                )));
            };
            out.vwgt.push(w as usize);
            for _ in 0..deg {
                let nb = words.next().ok_or_else(|| {
                    PartitionError::Exchange(format!("rank {rank} sent a truncated adjacency list"))
                })?;
                out.adjncy.push(nb as usize);
            }
            out.xadj.push(out.adjncy.len());
        }
        if words.next().is_some() {
            return Err(PartitionError::Exchange(format!(
                "rank {rank} sent more vertices than vtxdist declares"
            )));
        }
    }
    Ok(out)
}

/// Check a partitioner result for the local vertices.
pub(crate) fn check_parts(
    parts: &[usize],
    graph: &DistributedGraph,
    n_parts: usize,
) -> Result<(), PartitionError> {
    if parts.len() != graph.local_vertex_count() {
        return Err(PartitionError::LengthMismatch {
            expected: graph.local_vertex_count(),
            got: parts.len(),
        });
    }
    if let Some((vertex, &part)) = parts.iter().enumerate().find(|(_, p)| **p >= n_parts) {
        return Err(PartitionError::PartOutOfRange {
            vertex,
            part,
            n_parts,
        });
    }
    Ok(())
}
