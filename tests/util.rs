#![allow(dead_code)]
use gmy_decomp::algs::communicator::Communicator;
use gmy_decomp::config::DecompositionConfig;
use gmy_decomp::decomposition::{DecompositionContext, GeometryReader, LoadedGeometry};
use gmy_decomp::geometry::{GeometryFileBuilder, MemorySource};
use gmy_decomp::lattice::LatticeInfo;
use gmy_decomp::lattice_data::LatticeData;
use std::collections::BTreeMap;

/// 2x2x1 blocks of edge 4 with 20 fluid sites in every block.
pub fn twenty_per_block() -> Vec<u8> {
    GeometryFileBuilder::from_mask([2, 2, 1], 4, LatticeInfo::D3Q15, |c| {
        let (lx, ly) = (c[0] % 4, c[1] % 4);
        lx * 4 + ly < 5
    })
    .build()
    .unwrap()
}

/// A tube along x through `blocks` blocks of edge 4.
pub fn tube(blocks: [usize; 3]) -> Vec<u8> {
    let ny = (blocks[1] * 4) as f64;
    let nz = (blocks[2] * 4) as f64;
    let radius = ny.min(nz) / 2.0 - 0.5;
    GeometryFileBuilder::from_mask(blocks, 4, LatticeInfo::D3Q15, move |c| {
        let dy = c[1] as f64 + 0.5 - ny / 2.0;
        let dz = c[2] as f64 + 0.5 - nz / 2.0;
        dy * dy + dz * dz <= radius * radius
    })
    .build()
    .unwrap()
}

pub fn config(reading_group_size: usize) -> DecompositionConfig {
    DecompositionConfig {
        reading_group_size,
        validate: true,
        ..DecompositionConfig::default()
    }
}

pub fn load<C: Communicator>(comm: &C, file: &[u8], config: DecompositionConfig) -> LoadedGeometry {
    let ctx = DecompositionContext::new(comm, config, LatticeInfo::D3Q15);
    GeometryReader::new(ctx)
        .load_and_decompose(&MemorySource::new(file.to_vec()))
        .unwrap()
}

/// Coordinates of every fluid site this rank's geometry assigns to `rank`.
pub fn owned_sites(loaded: &LoadedGeometry, rank: usize) -> Vec<[i64; 3]> {
    let g = &loaded.geometry;
    let mut out = Vec::new();
    for (block, data) in g.blocks.iter().enumerate() {
        for (site, s) in data.sites.iter().enumerate() {
            if s.is_fluid && s.target_processor == Some(rank) {
                out.push(g.global_coords(block, site));
            }
        }
    }
    out
}

pub type HaloView = BTreeMap<usize, Vec<([i64; 3], usize)>>;

/// For every neighbouring rank, `(coords, direction)` behind each of its
/// halo slots, read back out of the neighbour index table.
pub fn halo_view(data: &LatticeData) -> HaloView {
    let q = data.lattice().q();
    let first_halo = data.rubbish_index() + 1;
    let mut by_slot = vec![None; data.total_shared_distributions()];
    for c in 0..data.local_fluid_sites() {
        for d in 1..q {
            let idx = data.neighbour_index(c, d);
            if idx >= first_halo {
                assert!(by_slot[idx - first_halo].is_none(), "halo slot used twice");
                by_slot[idx - first_halo] = Some((data.site(c).coords, d));
            }
        }
    }
    let mut view = BTreeMap::new();
    for p in data.neighbour_processors() {
        let start = p.first_shared_distribution - first_halo;
        let slots = by_slot[start..start + p.shared_distribution_count]
            .iter()
            .map(|s| s.expect("every halo slot is used"))
            .collect();
        view.insert(p.rank, slots);
    }
    view
}

/// Slot `k` towards rank `b` on rank `a` must be `(x + e_d, inverse(d))` of
/// slot `k` towards rank `a` on rank `b`.
pub fn assert_halos_pair_up(lattice: LatticeInfo, by_rank: &BTreeMap<usize, HaloView>) {
    for (&a, view_a) in by_rank {
        for (&b, slots_a) in view_a {
            let slots_b = &by_rank[&b][&a];
            assert_eq!(slots_a.len(), slots_b.len(), "ranks {a} and {b} disagree on halo size");
            for (&(x, d), &(y, e)) in slots_a.iter().zip(slots_b) {
                let c = lattice.vector(d);
                let across = [x[0] + c[0] as i64, x[1] + c[1] as i64, x[2] + c[2] as i64];
                assert_eq!(across, y);
                assert_eq!(lattice.inverse(d), e);
            }
        }
    }
}
