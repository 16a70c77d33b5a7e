//! Cross-rank consistency checks, run only when validation is enabled.
//!
//! Nothing here fails a run: every disagreement is logged and the
//! decomposition carries on.

use crate::algs::communicator::{Communicator, ReduceOp, tags};
use crate::algs::exchange::exchange_records;
use crate::algs::wire::WireEdge;
use crate::decomp_error::DecompError;
use crate::geometry::Geometry;
use crate::partitioning::DistributedGraph;
use std::collections::BTreeMap;

const UNOWNED: i64 = -1;

fn encode_owner(owner: Option<usize>) -> i64 {
    owner.map_or(UNOWNED, |r| r as i64)
}

/// Reduce `local` with both MIN and MAX; returns `(min, max)`.
fn min_max<C: Communicator + ?Sized>(
    comm: &C,
    local: &[i64],
) -> Result<(Vec<i64>, Vec<i64>), DecompError> {
    let mut min = local.to_vec();
    let mut max = local.to_vec();
    comm.all_reduce_i64(&mut min, ReduceOp::Min)?;
    comm.all_reduce_i64(&mut max, ReduceOp::Max)?;
    Ok((min, max))
}

/// Check that every rank holds the same block ownership map.
/// Returns the number of blocks that disagree.
pub fn validate_block_map<C: Communicator + ?Sized>(
    comm: &C,
    block_owner: &[Option<usize>],
) -> Result<usize, DecompError> {
    let local: Vec<i64> = block_owner.iter().copied().map(encode_owner).collect();
    let (min, max) = min_max(comm, &local)?;
    let mut bad = 0;
    for block in 0..local.len() {
        if min[block] != max[block] {
            log::error!(
                "rank {} sees block {block} owned by {}, other ranks range {}..={}",
                comm.rank(),
                local[block],
                min[block],
                max[block]
            );
            bad += 1;
        }
    }
    Ok(bad)
}

/// Per-site fingerprint: owner, fluid flag and link types.
fn site_words(geometry: &Geometry, block: usize, q: usize, out: &mut Vec<i64>, absent: i64) {
    let data = &geometry.blocks[block];
    for site in 0..geometry.sites_per_block() {
        match data.sites.get(site) {
            None => out.extend(std::iter::repeat_n(absent, q + 1)),
            Some(s) => {
                out.push(encode_owner(s.target_processor));
                out.push(s.is_fluid as i64);
                for d in 0..q - 1 {
                    out.push(s.links.get(d).map_or(0, |l| l.kind.code() as i64));
                }
            }
        }
    }
}

/// Upper bound on the words reduced at once by [`validate_geometry`].
const REDUCE_BATCH_WORDS: usize = 1 << 20;

/// Check that ranks holding the same block parsed identical site data.
/// Returns the number of sites that disagree.
///
/// Blocks are packed into as few reductions as [`REDUCE_BATCH_WORDS`]
/// allows; every rank forms the same batches from the block count alone.
pub fn validate_geometry<C: Communicator + ?Sized>(
    comm: &C,
    geometry: &Geometry,
    q: usize,
) -> Result<usize, DecompError> {
    let words_per_site = q + 1;
    let words_per_block = (geometry.sites_per_block() * words_per_site).max(1);
    let blocks_per_batch = (REDUCE_BATCH_WORDS / words_per_block).max(1);
    let mut bad = 0;
    let mut first = 0;
    while first < geometry.block_count() {
        let batch = first..(first + blocks_per_batch).min(geometry.block_count());
        // absent blocks must not influence either reduction
        let mut for_min = Vec::with_capacity(batch.len() * words_per_block);
        let mut for_max = Vec::with_capacity(batch.len() * words_per_block);
        for block in batch.clone() {
            site_words(geometry, block, q, &mut for_min, i64::MAX);
            site_words(geometry, block, q, &mut for_max, i64::MIN);
        }
        comm.all_reduce_i64(&mut for_min, ReduceOp::Min)?;
        comm.all_reduce_i64(&mut for_max, ReduceOp::Max)?;
        for (i, block) in batch.clone().enumerate() {
            if geometry.blocks[block].is_empty() {
                continue;
            }
            let base = i * words_per_block;
            for site in 0..geometry.sites_per_block() {
                let range = base + site * words_per_site..base + (site + 1) * words_per_site;
                if for_min[range.clone()] != for_max[range] {
                    log::error!(
                        "rank {} disagrees with another rank about site {site} of block {block}",
                        comm.rank()
                    );
                    bad += 1;
                }
            }
        }
        first = batch.end;
    }
    Ok(bad)
}

/// Check that `vtxdist` agrees across ranks and that every cross-rank edge
/// has its reverse on the far side. Returns the number of problems found.
pub fn validate_graph<C: Communicator + ?Sized>(
    comm: &C,
    graph: &DistributedGraph,
) -> Result<usize, DecompError> {
    let me = comm.rank();
    let mut problems = 0;

    let dist: Vec<i64> = graph.vtxdist.iter().map(|&v| v as i64).collect();
    let (min, max) = min_max(comm, &dist)?;
    if min != max {
        log::error!("rank {me} has vtxdist {:?}, other ranks differ", graph.vtxdist);
        problems += 1;
    }

    let first = graph.vtxdist[me];
    let mut outgoing: BTreeMap<usize, Vec<WireEdge>> = (0..comm.size())
        .filter(|&r| r != me)
        .map(|r| (r, Vec::new()))
        .collect();
    for v in 0..graph.local_vertex_count() {
        for &n in graph.neighbours(v) {
            match graph.owner_of(n) {
                Some(owner) if owner != me => {
                    outgoing.entry(owner).or_default().push(WireEdge::new(first + v, n));
                }
                Some(_) => {
                    let local = n - first;
                    if !graph.neighbours(local).contains(&(first + v)) {
                        log::error!("edge {} -> {n} has no reverse on rank {me}", first + v);
                        problems += 1;
                    }
                }
                None => {
                    log::error!("edge {} -> {n} points outside the graph", first + v);
                    problems += 1;
                }
            }
        }
    }

    let sources: Vec<usize> = (0..comm.size()).filter(|&r| r != me).collect();
    let received = exchange_records(
        comm,
        &outgoing,
        &sources,
        tags::GRAPH_CHECK_COUNT,
        tags::GRAPH_CHECK_EDGES,
    )?;
    for (from, edges) in received {
        for e in edges {
            let target = e.dst();
            let reverse_exists = graph.owner_of(target) == Some(me)
                && graph.neighbours(target - first).contains(&e.src());
            if !reverse_exists {
                log::error!(
                    "rank {from} has edge {} -> {target} but rank {me} lacks the reverse",
                    e.src()
                );
                problems += 1;
            }
        }
    }
    Ok(problems)
}
