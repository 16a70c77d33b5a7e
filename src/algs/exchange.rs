//! Two-stage exchange of variable-length record lists.
//!
//! Stage 1 sends a [`WireCount`] to every destination and receives one from
//! every expected source; stage 2 moves the records themselves. Empty lists
//! still announce their count but skip the payload message.

use crate::algs::communicator::{CommTag, Communicator, Inbound, Outbound};
use crate::algs::wire::{WireCount, cast_slice, decode_all};
use crate::decomp_error::DecompError;
use bytemuck::Pod;
use std::collections::BTreeMap;
use std::mem::size_of;

/// Send `outgoing[peer]` to each peer and receive one list from each of
/// `sources`. Returns `source → records`.
pub fn exchange_records<C, T>(
    comm: &C,
    outgoing: &BTreeMap<usize, Vec<T>>,
    sources: &[usize],
    count_tag: CommTag,
    data_tag: CommTag,
) -> Result<BTreeMap<usize, Vec<T>>, DecompError>
where
    C: Communicator + ?Sized,
    T: Pod,
{
    // 1) counts
    let counts: Vec<(usize, WireCount)> = outgoing
        .iter()
        .map(|(&peer, items)| (peer, WireCount::new(items.len())))
        .collect();
    let count_sends: Vec<Outbound<'_>> = counts
        .iter()
        .map(|(peer, count)| Outbound {
            peer: *peer,
            tag: count_tag,
            data: cast_slice(std::slice::from_ref(count)),
        })
        .collect();
    let count_recvs: Vec<Inbound> = sources
        .iter()
        .map(|&peer| Inbound {
            peer,
            tag: count_tag,
            len: size_of::<WireCount>(),
        })
        .collect();
    let raw_counts = comm.exchange(&count_sends, &count_recvs)?;

    let mut expected = Vec::with_capacity(sources.len());
    for (&peer, raw) in sources.iter().zip(&raw_counts) {
        let count = decode_all::<WireCount>(peer, raw)?
            .first()
            .map(WireCount::get)
            .unwrap_or(0);
        expected.push((peer, count));
    }

    // 2) payloads
    let data_sends: Vec<Outbound<'_>> = outgoing
        .iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(&peer, items)| Outbound {
            peer,
            tag: data_tag,
            data: cast_slice(items),
        })
        .collect();
    let data_recvs: Vec<Inbound> = expected
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|&(peer, n)| Inbound {
            peer,
            tag: data_tag,
            len: n * size_of::<T>(),
        })
        .collect();
    let mut payloads = comm.exchange(&data_sends, &data_recvs)?.into_iter();

    let mut out = BTreeMap::new();
    for (peer, n) in expected {
        let records = if n == 0 {
            Vec::new()
        } else {
            let raw = payloads.next().unwrap_or_default();
            decode_all::<T>(peer, &raw)?
        };
        out.insert(peer, records);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::algs::wire::WireBlockId;

    #[test]
    fn uneven_lists_arrive_intact() {
        let got = LocalComm::run(3, |comm| {
            let me = comm.rank();
            let mut outgoing = BTreeMap::new();
            for peer in 0..3 {
                if peer != me {
                    // rank r sends r copies of its own id
                    outgoing.insert(peer, vec![WireBlockId::of(me); me]);
                }
            }
            let sources: Vec<usize> = (0..3).filter(|&p| p != me).collect();
            let received = exchange_records(
                &comm,
                &outgoing,
                &sources,
                CommTag::new(40),
                CommTag::new(41),
            )
            .unwrap();
            received
                .into_iter()
                .map(|(peer, ids)| (peer, ids.iter().map(WireBlockId::get).collect::<Vec<_>>()))
                .collect::<Vec<_>>()
        });
        assert_eq!(got[0], vec![(1, vec![1]), (2, vec![2, 2])]);
        assert_eq!(got[1], vec![(0, vec![]), (2, vec![2, 2])]);
    }
}
