mod util;

use gmy_decomp::algs::communicator::{Communicator, LocalComm, NoComm};
use gmy_decomp::config::DecompositionConfig;
use gmy_decomp::decomposition::{DecompositionContext, GeometryReader, LoadedGeometry};
use gmy_decomp::geometry::{HeaderIndex, MemorySource};
use gmy_decomp::lattice::LatticeInfo;
use gmy_decomp::lattice_data::LatticeData;
use gmy_decomp::partitioning::{
    DistributedGraph, GraphPartitioner, PartitionError, PartitionParams,
};
use serial_test::serial;
use std::collections::{BTreeMap, BTreeSet};
use util::{HaloView, assert_halos_pair_up, config, halo_view, owned_sites, tube, twenty_per_block};

/// Deals vertices out round-robin by global id, so almost every site moves.
struct RoundRobin;

impl GraphPartitioner for RoundRobin {
    fn partition<C: Communicator + ?Sized>(
        &self,
        graph: &DistributedGraph,
        params: &PartitionParams,
        comm: &C,
    ) -> Result<Vec<usize>, PartitionError> {
        let first = graph.vtxdist[comm.rank()];
        Ok((0..graph.local_vertex_count())
            .map(|v| (first + v) % params.n_parts)
            .collect())
    }
}

fn load_round_robin<C: Communicator>(
    comm: &C,
    file: &[u8],
    config: DecompositionConfig,
) -> LoadedGeometry {
    let ctx = DecompositionContext::new(comm, config, LatticeInfo::D3Q15);
    GeometryReader::with_partitioner(ctx, RoundRobin)
        .load_and_decompose(&MemorySource::new(file.to_vec()))
        .unwrap()
}

/// Run the round-robin decomposition and check moves, ownership and halos.
/// Returns the number of moves.
fn check_world(ranks: usize, file: &[u8], config: DecompositionConfig, total: usize) -> usize {
    let lattice = LatticeInfo::D3Q15;
    let results = LocalComm::run(ranks, |comm| {
        let loaded = load_round_robin(&comm, file, config.clone());
        let data = LatticeData::build(&comm, loaded.geometry.clone(), lattice).unwrap();
        let view = halo_view(&data);
        (loaded, data.fluid_sites_per_rank().to_vec(), view)
    });

    // a reserved rank takes no part and sees no moves
    let offset = results[ranks - 1].0.rank_offset;
    let moves = &results[ranks - 1].0.moves;
    assert!(!moves.is_empty(), "round-robin partition produced no moves");
    for (loaded, _, _) in &results[offset..] {
        assert_eq!(&loaded.moves, moves);
    }

    for (_, m) in moves.iter() {
        let dest = m.to + offset;
        let site = &results[dest].0.geometry.blocks[m.block].sites[m.site];
        assert!(site.is_fluid);
        assert_eq!(
            site.target_processor,
            Some(dest),
            "site {} of block {} did not land on rank {dest}",
            m.site,
            m.block
        );
    }

    let mut seen = BTreeSet::new();
    for (rank, (loaded, per_rank, _)) in results.iter().enumerate() {
        assert_eq!(per_rank.iter().sum::<usize>(), total);
        for c in owned_sites(loaded, rank) {
            assert!(seen.insert(c), "site {c:?} owned twice");
        }
    }
    assert_eq!(seen.len(), total);

    let by_rank: BTreeMap<usize, HaloView> = results
        .iter()
        .enumerate()
        .map(|(rank, (_, _, view))| (rank, view.clone()))
        .collect();
    assert_halos_pair_up(lattice, &by_rank);
    moves.len()
}

#[test]
#[serial]
fn scattered_sites_reach_their_new_owners() {
    let file = twenty_per_block();
    let moved = check_world(4, &file, config(2), 80);
    // each rank keeps the quarter of its 20 vertices that deal back to itself
    assert_eq!(moved, 60);
}

#[test]
#[serial]
fn scattered_sites_skip_the_reserved_rank() {
    let file = tube([4, 2, 2]);
    let total = HeaderIndex::read_and_broadcast(&NoComm, &MemorySource::new(file.clone()))
        .unwrap()
        .total_fluid_sites();
    let reserved = DecompositionConfig {
        reserve_io_rank: true,
        ..config(2)
    };
    check_world(3, &file, reserved, total);
}
