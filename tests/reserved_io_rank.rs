mod util;

use gmy_decomp::algs::communicator::{Communicator, LocalComm, NoComm};
use gmy_decomp::config::DecompositionConfig;
use gmy_decomp::lattice::LatticeInfo;
use gmy_decomp::lattice_data::LatticeData;
use serial_test::serial;
use util::{load, owned_sites, twenty_per_block};

fn reserved(reading_group_size: usize) -> DecompositionConfig {
    DecompositionConfig {
        reading_group_size,
        reserve_io_rank: true,
        validate: true,
        ..DecompositionConfig::default()
    }
}

#[test]
#[serial]
fn rank_zero_holds_nothing() {
    let file = twenty_per_block();
    let results = LocalComm::run(3, |comm| {
        let loaded = load(&comm, &file, reserved(2));
        let owners: Vec<usize> = loaded
            .geometry
            .blocks
            .iter()
            .flat_map(|b| b.sites.iter())
            .filter_map(|s| s.target_processor)
            .collect();
        let data = LatticeData::build(&comm, loaded.geometry.clone(), LatticeInfo::D3Q15).unwrap();
        (loaded, owners, data.local_fluid_sites(), data.fluid_sites_per_rank().to_vec())
    });

    let (rank0, owners0, local0, _) = &results[0];
    assert_eq!(rank0.rank_offset, 1);
    assert!(rank0.moves.is_empty());
    assert!(rank0.geometry.blocks.iter().all(|b| b.is_empty()));
    assert!(owners0.is_empty());
    assert_eq!(rank0.block_owner.len(), 4);
    assert!(rank0.block_owner.iter().all(Option::is_none));
    assert_eq!(*local0, 0);

    for (loaded, owners, _, per_rank) in &results[1..] {
        assert!(owners.iter().all(|&r| r == 1 || r == 2));
        assert_eq!(per_rank[0], 0);
        assert_eq!(per_rank.iter().sum::<usize>(), 80);
        assert!(loaded.block_owner.iter().all(|o| o.is_some_and(|r| r < 2)));
    }
    let owned: usize = (1..3).map(|r| owned_sites(&results[r].0, r).len()).sum();
    assert_eq!(owned, 80);
}

#[test]
#[serial]
fn two_ranks_leave_one_compute_rank() {
    let file = twenty_per_block();
    let counts = LocalComm::run(2, |comm| {
        let loaded = load(&comm, &file, reserved(5));
        owned_sites(&loaded, comm.rank()).len()
    });
    assert_eq!(counts, vec![0, 80]);
}

#[test]
fn single_rank_ignores_the_reservation() {
    let file = twenty_per_block();
    let loaded = load(&NoComm, &file, reserved(5));
    assert_eq!(loaded.rank_offset, 0);
    assert_eq!(owned_sites(&loaded, 0).len(), 80);
}
