//! METIS k-way partitioning of the gathered site graph.
//!
//! Every rank gathers the full graph and calls METIS with identical input,
//! so all ranks compute the same partition.

use super::{
    DistributedGraph, GraphPartitioner, PartitionError, PartitionParams, check_parts, gather_graph,
};
use crate::algs::communicator::Communicator;
use metis::{Idx, Real};

#[derive(Clone, Copy, Debug, Default)]
pub struct MetisPartitioner;

impl GraphPartitioner for MetisPartitioner {
    fn partition<C: Communicator + ?Sized>(
        &self,
        graph: &DistributedGraph,
        params: &PartitionParams,
        comm: &C,
    ) -> Result<Vec<usize>, PartitionError> {
        let global = gather_graph(graph, comm)?;
        let n = global.vertex_count();
        let nparts = params.n_parts;
        if nparts == 0 {
            return Err(PartitionError::Other("cannot partition into zero parts".into()));
        }

        let mut part: Vec<Idx> = vec![0; n];
        if nparts > 1 && n > 0 {
            let xadj: Vec<Idx> = global.xadj.iter().map(|&x| x as Idx).collect();
            let adjncy: Vec<Idx> = global.adjncy.iter().map(|&v| v as Idx).collect();
            let vwgt: Vec<Idx> = global.vwgt.iter().map(|&w| w as Idx).collect();
            let tpwgts: Vec<Real> = vec![1.0 / nparts as Real; nparts];
            let ubvec: [Real; 1] = [1.0 + params.imbalance_tolerance as Real];

            metis::Graph::new(1, nparts as Idx, &xadj, &adjncy)
                .map_err(|e| PartitionError::Other(e.to_string()))?
                .set_vwgt(&vwgt)
                .set_tpwgts(&tpwgts)
                .set_ubvec(&ubvec)
                .part_kway(&mut part)
                .map_err(|e| PartitionError::Other(e.to_string()))?;
        }

        let me = comm.rank();
        let local: Vec<usize> = part[graph.vtxdist[me]..graph.vtxdist[me + 1]]
            .iter()
            .map(|&p| p as usize)
            .collect();
        check_parts(&local, graph, nparts)?;
        Ok(local)
    }
}
