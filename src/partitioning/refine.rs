//! Deterministic k-way refinement of the current vertex distribution.
//!
//! Every rank gathers the whole graph and runs the same sequential
//! algorithm, so all ranks agree on the result without further messages:
//!
//! 1. start from the current owner of each vertex;
//! 2. move vertices out of overloaded parts, preferring adjacent parts;
//! 3. sweep the vertices, greedily moving a vertex to the adjacent part it
//!    is most connected to whenever that lowers the edge cut and keeps the
//!    destination within the weight limit.

use super::metrics::{edge_cut, imbalance, part_weights};
use super::{
    DistributedGraph, GlobalGraph, GraphPartitioner, PartitionError, PartitionParams, check_parts,
    gather_graph,
};
use crate::algs::communicator::Communicator;

#[derive(Clone, Copy, Debug, Default)]
pub struct KwayRefiner;

impl GraphPartitioner for KwayRefiner {
    fn partition<C: Communicator + ?Sized>(
        &self,
        graph: &DistributedGraph,
        params: &PartitionParams,
        comm: &C,
    ) -> Result<Vec<usize>, PartitionError> {
        if params.n_parts == 0 {
            return Err(PartitionError::Other("cannot partition into zero parts".into()));
        }
        let global = gather_graph(graph, comm)?;
        let mut parts: Vec<usize> = global
            .current_owners()
            .into_iter()
            .map(|p| p % params.n_parts)
            .collect();
        let stats = refine_assignment(&global, &mut parts, params);
        if comm.rank() == 0 {
            log::info!(
                "k-way refinement: {} vertices, edge cut {} -> {}, imbalance {:.4} -> {:.4}, {} moves",
                global.vertex_count(),
                stats.cut_before,
                stats.cut_after,
                stats.imbalance_before,
                stats.imbalance_after,
                stats.moves
            );
        }

        let me = comm.rank();
        let local = parts[graph.vtxdist[me]..graph.vtxdist[me + 1]].to_vec();
        check_parts(&local, graph, params.n_parts)?;
        Ok(local)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefineStats {
    pub cut_before: usize,
    pub cut_after: usize,
    pub imbalance_before: f64,
    pub imbalance_after: f64,
    pub moves: usize,
}

/// Largest part weight allowed for `total` weight over `n_parts`.
pub fn max_part_weight(total: usize, n_parts: usize, tolerance: f64) -> usize {
    let target = total as f64 / n_parts as f64;
    ((target * (1.0 + tolerance)).floor() as usize).max(target.ceil() as usize)
}

/// Per-part edge counts of one vertex, reset between vertices.
struct Connectivity {
    count: Vec<usize>,
    touched: Vec<usize>,
}

impl Connectivity {
    fn new(n_parts: usize) -> Self {
        Self {
            count: vec![0; n_parts],
            touched: Vec::new(),
        }
    }

    fn load(&mut self, g: &GlobalGraph, parts: &[usize], v: usize) {
        for &p in &self.touched {
            self.count[p] = 0;
        }
        self.touched.clear();
        for &n in g.neighbours(v) {
            let p = parts[n];
            if self.count[p] == 0 {
                self.touched.push(p);
            }
            self.count[p] += 1;
        }
        self.touched.sort_unstable();
    }
}

/// Refine `parts` in place.
pub fn refine_assignment(
    g: &GlobalGraph,
    parts: &mut [usize],
    params: &PartitionParams,
) -> RefineStats {
    let k = params.n_parts;
    let mut weights = part_weights(g, parts, k);
    let total: usize = weights.iter().sum();
    let max_w = max_part_weight(total, k, params.imbalance_tolerance);
    let cut_before = edge_cut(g, parts);
    let imbalance_before = imbalance(&weights);
    let mut conn = Connectivity::new(k);
    let mut moves = 0;

    // balance
    for _ in 0..params.refine_passes.max(1) {
        if weights.iter().all(|&w| w <= max_w) {
            break;
        }
        let mut moved = false;
        for v in 0..g.vertex_count() {
            let p = parts[v];
            let vw = g.vwgt[v];
            if weights[p] <= max_w {
                continue;
            }
            conn.load(g, parts, v);
            let here = conn.count[p] as isize;
            let adjacent = conn
                .touched
                .iter()
                .copied()
                .filter(|&q| q != p && weights[q] + vw <= max_w)
                .max_by(|&a, &b| {
                    (conn.count[a] as isize - here)
                        .cmp(&(conn.count[b] as isize - here))
                        .then(weights[b].cmp(&weights[a]))
                        .then(b.cmp(&a))
                });
            let dest = adjacent.or_else(|| {
                (0..k)
                    .filter(|&q| q != p && weights[q] + vw <= max_w)
                    .min_by_key(|&q| (weights[q], q))
            });
            if let Some(q) = dest {
                parts[v] = q;
                weights[p] -= vw;
                weights[q] += vw;
                moves += 1;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    // cut refinement
    for _ in 0..params.refine_passes {
        let mut moved = false;
        for v in 0..g.vertex_count() {
            let p = parts[v];
            let vw = g.vwgt[v];
            if weights[p] <= vw {
                continue;
            }
            conn.load(g, parts, v);
            let here = conn.count[p];
            let best = conn
                .touched
                .iter()
                .copied()
                .filter(|&q| q != p && conn.count[q] > here && weights[q] + vw <= max_w)
                .max_by(|&a, &b| {
                    conn.count[a]
                        .cmp(&conn.count[b])
                        .then(weights[b].cmp(&weights[a]))
                        .then(b.cmp(&a))
                });
            if let Some(q) = best {
                parts[v] = q;
                weights[p] -= vw;
                weights[q] += vw;
                moves += 1;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    RefineStats {
        cut_before,
        cut_after: edge_cut(g, parts),
        imbalance_before,
        imbalance_after: imbalance(&weights),
        moves,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;

    fn path(n: usize) -> GlobalGraph {
        let mut xadj = vec![0];
        let mut adjncy = Vec::new();
        for v in 0..n {
            if v > 0 {
                adjncy.push(v - 1);
            }
            if v + 1 < n {
                adjncy.push(v + 1);
            }
            xadj.push(adjncy.len());
        }
        GlobalGraph {
            vtxdist: vec![0, n],
            xadj,
            adjncy,
            vwgt: vec![1; n],
        }
    }

    fn params(n_parts: usize, tol: f64) -> PartitionParams {
        PartitionParams {
            n_parts,
            imbalance_tolerance: tol,
            refine_passes: 8,
        }
    }

    #[test]
    fn weight_limit_never_below_ceiling() {
        assert_eq!(max_part_weight(80, 4, 0.001), 20);
        assert_eq!(max_part_weight(81, 4, 0.001), 21);
        assert_eq!(max_part_weight(100, 4, 0.2), 30);
    }

    #[test]
    fn interleaved_path_is_untangled() {
        let g = path(8);
        let mut parts = vec![0, 0, 1, 0, 1, 1, 1, 0];
        let stats = refine_assignment(&g, &mut parts, &params(2, 0.25));
        assert_eq!(parts, vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(stats.cut_after, 1);
        assert!(stats.cut_after < stats.cut_before);
    }

    #[test]
    fn overloaded_part_is_drained() {
        let g = path(4);
        let mut parts = vec![0; 4];
        let stats = refine_assignment(&g, &mut parts, &params(2, 0.001));
        assert_eq!(parts, vec![1, 1, 0, 0]);
        assert_eq!(stats.imbalance_after, 1.0);
    }

    #[test]
    fn ranks_receive_their_slices_of_one_answer() {
        let got = LocalComm::run(2, |comm| {
            // path 0..8, interleaved ownership, vertices 0..4 on rank 0
            let full = path(8);
            let me = comm.rank();
            let range = me * 4..(me + 1) * 4;
            let base = full.xadj[range.start];
            let local = DistributedGraph {
                vtxdist: vec![0, 4, 8],
                xadj: full.xadj[range.start..=range.end].iter().map(|x| x - base).collect(),
                adjncy: full.adjncy[full.xadj[range.start]..full.xadj[range.end]].to_vec(),
                vwgt: vec![1; 4],
            };
            let p = PartitionParams {
                n_parts: 2,
                imbalance_tolerance: 0.001,
                refine_passes: 4,
            };
            KwayRefiner.partition(&local, &p, &comm).unwrap()
        });
        // already optimal: nothing moves
        assert_eq!(got[0], vec![0; 4]);
        assert_eq!(got[1], vec![1; 4]);
    }
}
