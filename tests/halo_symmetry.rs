mod util;

use gmy_decomp::algs::communicator::{Communicator, LocalComm};
use gmy_decomp::lattice::LatticeInfo;
use gmy_decomp::lattice_data::LatticeData;
use serial_test::serial;
use std::collections::BTreeMap;
use util::{HaloView, assert_halos_pair_up, config, halo_view, load, tube};

#[test]
#[serial]
fn halo_slots_pair_up_across_ranks() {
    let lattice = LatticeInfo::D3Q15;
    let file = tube([4, 2, 2]);
    let views = LocalComm::run(3, |comm| {
        let loaded = load(&comm, &file, config(2));
        let data = LatticeData::build(&comm, loaded.geometry, lattice).unwrap();

        for (k, &dest) in data.received_streaming_index().iter().enumerate() {
            assert!(dest < data.rubbish_index(), "slot {k} streams outside the local sites");
        }
        assert_eq!(
            data.distribution_buffer_len(),
            data.rubbish_index() + 1 + data.total_shared_distributions()
        );
        (comm.rank(), halo_view(&data))
    });

    let by_rank: BTreeMap<usize, HaloView> = views.into_iter().collect();
    assert_halos_pair_up(lattice, &by_rank);
}

#[test]
#[serial]
fn received_distributions_stream_back_inwards() {
    let lattice = LatticeInfo::D3Q15;
    let file = tube([4, 2, 2]);
    LocalComm::run(2, |comm| {
        let loaded = load(&comm, &file, config(2));
        let data = LatticeData::build(&comm, loaded.geometry, lattice).unwrap();
        let first_halo = data.rubbish_index() + 1;
        let q = lattice.q();
        for c in 0..data.local_fluid_sites() {
            for d in 1..q {
                let idx = data.neighbour_index(c, d);
                if idx >= first_halo {
                    let k = idx - first_halo;
                    assert_eq!(data.received_streaming_index()[k], c * q + lattice.inverse(d));
                }
            }
        }
    });
}
