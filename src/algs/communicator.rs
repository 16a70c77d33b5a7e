//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*. Point-to-point traffic is organised
//! in **phases**: a rank hands every send and receive of a phase to
//! [`Communicator::exchange`], which posts them all and returns once every
//! one of them has completed. Collectives have default implementations on
//! top of `exchange`, so a backend only has to provide point-to-point
//! delivery; [`MpiComm`] overrides them with native MPI collectives.
//!
//! Messages between the same pair of ranks with the same tag are delivered
//! in the order they were posted.

use crate::decomp_error::DecompError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Tags used by the decomposition phases. Collectives use the `0xFFxx` range.
pub mod tags {
    use super::CommTag;

    pub const NEEDS_COUNT: CommTag = CommTag::new(0x0101);
    pub const NEEDS_LIST: CommTag = CommTag::new(0x0102);
    pub const BLOCK_DATA: CommTag = CommTag::new(0x0201);
    pub const GRAPH_CHECK_COUNT: CommTag = CommTag::new(0x0301);
    pub const GRAPH_CHECK_EDGES: CommTag = CommTag::new(0x0302);
    pub const HALO_LIST: CommTag = CommTag::new(0x0401);

    pub(crate) const BCAST_LEN: CommTag = CommTag::new(0xFF01);
    pub(crate) const BCAST_DATA: CommTag = CommTag::new(0xFF02);
    pub(crate) const GATHER_LEN: CommTag = CommTag::new(0xFF03);
    pub(crate) const GATHER_DATA: CommTag = CommTag::new(0xFF04);
}

/// One send of a phase.
#[derive(Clone, Copy, Debug)]
pub struct Outbound<'a> {
    pub peer: usize,
    pub tag: CommTag,
    pub data: &'a [u8],
}

/// One receive of a phase; the sender must send exactly `len` bytes.
#[derive(Clone, Copy, Debug)]
pub struct Inbound {
    pub peer: usize,
    pub tag: CommTag,
    pub len: usize,
}

/// Element-wise reduction used by [`Communicator::all_reduce_i64`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

impl ReduceOp {
    fn fold(self, acc: i64, x: i64) -> i64 {
        match self {
            ReduceOp::Min => acc.min(x),
            ReduceOp::Max => acc.max(x),
            ReduceOp::Sum => acc + x,
        }
    }
}

/// Blocking, phase-oriented communication interface.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Post every send and receive of one phase and wait for all of them.
    ///
    /// Received payloads are returned in the order of `recvs`.
    fn exchange(
        &self,
        sends: &[Outbound<'_>],
        recvs: &[Inbound],
    ) -> Result<Vec<Vec<u8>>, DecompError>;

    /// Replace `buf` on every rank with the contents of `buf` on `root`.
    fn broadcast(&self, root: usize, buf: &mut Vec<u8>) -> Result<(), DecompError> {
        let me = self.rank();
        let others: Vec<usize> = (0..self.size()).filter(|&r| r != root).collect();
        if me == root {
            let len = (buf.len() as u64).to_le_bytes();
            let len_sends: Vec<Outbound<'_>> = others
                .iter()
                .map(|&peer| Outbound { peer, tag: tags::BCAST_LEN, data: &len })
                .collect();
            self.exchange(&len_sends, &[])?;
            let data_sends: Vec<Outbound<'_>> = others
                .iter()
                .map(|&peer| Outbound { peer, tag: tags::BCAST_DATA, data: buf })
                .collect();
            self.exchange(&data_sends, &[])?;
        } else {
            let raw = self.exchange(
                &[],
                &[Inbound { peer: root, tag: tags::BCAST_LEN, len: 8 }],
            )?;
            let len = read_u64(&raw[0], root)? as usize;
            let mut data = self.exchange(
                &[],
                &[Inbound { peer: root, tag: tags::BCAST_DATA, len }],
            )?;
            *buf = data.pop().unwrap_or_default();
        }
        Ok(())
    }

    /// Gather a variable-length contribution from every rank, on every rank.
    fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, DecompError> {
        let me = self.rank();
        let others: Vec<usize> = (0..self.size()).filter(|&r| r != me).collect();
        let len = (local.len() as u64).to_le_bytes();
        let len_sends: Vec<Outbound<'_>> = others
            .iter()
            .map(|&peer| Outbound { peer, tag: tags::GATHER_LEN, data: &len })
            .collect();
        let len_recvs: Vec<Inbound> = others
            .iter()
            .map(|&peer| Inbound { peer, tag: tags::GATHER_LEN, len: 8 })
            .collect();
        let raw_lens = self.exchange(&len_sends, &len_recvs)?;

        let mut data_recvs = Vec::with_capacity(others.len());
        for (&peer, raw) in others.iter().zip(&raw_lens) {
            let len = read_u64(raw, peer)? as usize;
            data_recvs.push(Inbound { peer, tag: tags::GATHER_DATA, len });
        }
        let data_sends: Vec<Outbound<'_>> = others
            .iter()
            .map(|&peer| Outbound { peer, tag: tags::GATHER_DATA, data: local })
            .collect();
        let mut received = self.exchange(&data_sends, &data_recvs)?.into_iter();

        let mut out = Vec::with_capacity(self.size());
        for r in 0..self.size() {
            if r == me {
                out.push(local.to_vec());
            } else {
                out.push(received.next().unwrap_or_default());
            }
        }
        Ok(out)
    }

    /// Element-wise reduction of `values` over all ranks, result on every rank.
    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), DecompError> {
        let local: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let gathered = self.all_gather(&local)?;
        for (rank, contribution) in gathered.iter().enumerate() {
            if contribution.len() != local.len() {
                return Err(DecompError::BufferSizeMismatch {
                    neighbor: rank,
                    expected: local.len(),
                    got: contribution.len(),
                });
            }
        }
        // Fold in rank order so every rank computes the same result.
        let decode = |chunk: &[u8]| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            i64::from_le_bytes(word)
        };
        let mut contributions = gathered.iter();
        if let Some(first) = contributions.next() {
            for (v, chunk) in values.iter_mut().zip(first.chunks_exact(8)) {
                *v = decode(chunk);
            }
        }
        for contribution in contributions {
            for (v, chunk) in values.iter_mut().zip(contribution.chunks_exact(8)) {
                *v = op.fold(*v, decode(chunk));
            }
        }
        Ok(())
    }

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> Result<(), DecompError> {
        self.all_gather(&[]).map(|_| ())
    }
}

/// A receive must deliver exactly the length it was posted with.
fn check_received_len(inbound: &Inbound, got: usize) -> Result<(), DecompError> {
    if got != inbound.len {
        return Err(DecompError::BufferSizeMismatch {
            neighbor: inbound.peer,
            expected: inbound.len,
            got,
        });
    }
    Ok(())
}

fn read_u64(raw: &[u8], peer: usize) -> Result<u64, DecompError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| DecompError::BufferSizeMismatch {
        neighbor: peer,
        expected: 8,
        got: raw.len(),
    })?;
    Ok(u64::from_le_bytes(bytes))
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn exchange(
        &self,
        sends: &[Outbound<'_>],
        recvs: &[Inbound],
    ) -> Result<Vec<Vec<u8>>, DecompError> {
        if let Some(s) = sends.first() {
            return Err(DecompError::comm(s.peer, "NoComm cannot send messages"));
        }
        if let Some(r) = recvs.first() {
            return Err(DecompError::comm(r.peer, "NoComm cannot receive messages"));
        }
        Ok(Vec::new())
    }
}

// --- LocalComm: intra-process ranks, one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

struct Hub {
    size: usize,
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    signal: Condvar,
    aborted: AtomicBool,
    /// Set once a rank's closure in [`LocalComm::run`] has returned.
    finished: Vec<AtomicBool>,
}

/// In-process communicator: every rank is a thread sharing one mailbox.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    hub: Arc<Hub>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.hub.size)
            .finish()
    }
}

/// Marks a rank as finished when its closure returns or unwinds.
struct FinishGuard {
    hub: Arc<Hub>,
    rank: usize,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.hub.finished[self.rank].store(true, Ordering::Release);
        if std::thread::panicking() {
            self.hub.abort();
        } else {
            let _guard = self.hub.lock.lock();
            self.hub.signal.notify_all();
        }
    }
}

impl Hub {
    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.signal.notify_all();
    }
}

impl LocalComm {
    /// Create the communicators of a world with `size` ranks.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let hub = Arc::new(Hub {
            size,
            mailbox: DashMap::new(),
            lock: Mutex::new(()),
            signal: Condvar::new(),
            aborted: AtomicBool::new(false),
            finished: (0..size).map(|_| AtomicBool::new(false)).collect(),
        });
        (0..size)
            .map(|rank| LocalComm { rank, hub: hub.clone() })
            .collect()
    }

    /// Run `f` once per rank on its own thread and collect results by rank.
    ///
    /// A receive from a rank whose closure has already returned fails
    /// instead of blocking, so an error on one rank surfaces on its peers.
    /// If any rank panics the world is aborted and the panic is resumed on
    /// the calling thread.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalComm) -> T + Sync,
    {
        let comms = LocalComm::world(size);
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || {
                        let _guard = FinishGuard {
                            hub: comm.hub.clone(),
                            rank: comm.rank,
                        };
                        f(comm)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(v) => v,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    /// Fail every blocked and future receive in this world.
    pub fn abort(&self) {
        self.hub.abort();
    }

    fn deliver(&self, peer: usize, tag: CommTag, data: &[u8]) {
        self.hub
            .mailbox
            .entry((self.rank, peer, tag.as_u16()))
            .or_default()
            .push_back(Bytes::copy_from_slice(data));
        let _guard = self.hub.lock.lock();
        self.hub.signal.notify_all();
    }

    fn take(&self, peer: usize, tag: CommTag) -> Result<Bytes, DecompError> {
        let key = (peer, self.rank, tag.as_u16());
        let mut guard = self.hub.lock.lock();
        loop {
            let next = self
                .hub
                .mailbox
                .get_mut(&key)
                .and_then(|mut queue| queue.pop_front());
            if let Some(bytes) = next {
                return Ok(bytes);
            }
            if self.hub.aborted.load(Ordering::Acquire) {
                return Err(DecompError::comm(peer, "local world aborted"));
            }
            if self.hub.finished[peer].load(Ordering::Acquire) {
                return Err(DecompError::comm(peer, "rank exited without sending"));
            }
            self.hub.signal.wait(&mut guard);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.hub.size
    }

    fn exchange(
        &self,
        sends: &[Outbound<'_>],
        recvs: &[Inbound],
    ) -> Result<Vec<Vec<u8>>, DecompError> {
        for s in sends {
            if s.peer >= self.hub.size {
                return Err(DecompError::comm(s.peer, "send to rank outside the world"));
            }
            self.deliver(s.peer, s.tag, s.data);
        }
        let mut out = Vec::with_capacity(recvs.len());
        for r in recvs {
            if r.peer >= self.hub.size {
                return Err(DecompError::comm(r.peer, "receive from rank outside the world"));
            }
            let bytes = self.take(r.peer, r.tag)?;
            check_received_len(r, bytes.len())?;
            out.push(bytes.to_vec());
        }
        Ok(out)
    }
}

/// View of a communicator without its first rank.
///
/// Used when rank 0 is reserved for I/O and steering and must not take part
/// in the decomposition. Collectives fall back to the point-to-point default
/// implementations so the excluded rank is never involved.
pub struct ComputeGroup<'c, C: Communicator + ?Sized> {
    inner: &'c C,
}

impl<'c, C: Communicator + ?Sized> ComputeGroup<'c, C> {
    /// Returns `None` on the excluded rank.
    pub fn excluding_first(inner: &'c C) -> Option<Self> {
        (inner.rank() != 0).then_some(Self { inner })
    }

    pub fn to_global_rank(&self, rank: usize) -> usize {
        rank + 1
    }
}

impl<C: Communicator + ?Sized> Communicator for ComputeGroup<'_, C> {
    fn rank(&self) -> usize {
        self.inner.rank() - 1
    }
    fn size(&self) -> usize {
        self.inner.size() - 1
    }

    fn exchange(
        &self,
        sends: &[Outbound<'_>],
        recvs: &[Inbound],
    ) -> Result<Vec<Vec<u8>>, DecompError> {
        let sends: Vec<Outbound<'_>> = sends
            .iter()
            .map(|s| Outbound { peer: s.peer + 1, ..*s })
            .collect();
        let recvs: Vec<Inbound> = recvs
            .iter()
            .map(|r| Inbound { peer: r.peer + 1, ..*r })
            .collect();
        self.inner.exchange(&sends, &recvs).map_err(|e| match e {
            DecompError::CommError { neighbor, source } => DecompError::CommError {
                neighbor: neighbor.saturating_sub(1),
                source,
            },
            DecompError::BufferSizeMismatch { neighbor, expected, got } => {
                DecompError::BufferSizeMismatch {
                    neighbor: neighbor.saturating_sub(1),
                    expected,
                    got,
                }
            }
            other => other,
        })
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Count;
    use mpi::collective::SystemOperation;
    use mpi::datatype::PartitionMut;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives, Destination, Equivalence, Root, Source,
    };

    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, DecompError> {
            let universe = mpi::initialize()
                .ok_or_else(|| DecompError::comm(0, "MPI was already initialised"))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn exchange(
            &self,
            sends: &[Outbound<'_>],
            recvs: &[Inbound],
        ) -> Result<Vec<Vec<u8>>, DecompError> {
            let mut buffers: Vec<Vec<u8>> = recvs.iter().map(|r| vec![0u8; r.len]).collect();
            let received: Vec<usize> = mpi::request::scope(|scope| {
                let mut pending_recvs = Vec::with_capacity(recvs.len());
                for (inbound, buf) in recvs.iter().zip(buffers.iter_mut()) {
                    pending_recvs.push(
                        self.world
                            .process_at_rank(inbound.peer as i32)
                            .immediate_receive_into_with_tag(
                                scope,
                                &mut buf[..],
                                inbound.tag.as_u16() as i32,
                            ),
                    );
                }
                let mut pending_sends = Vec::with_capacity(sends.len());
                for outbound in sends {
                    pending_sends.push(
                        self.world
                            .process_at_rank(outbound.peer as i32)
                            .immediate_send_with_tag(
                                scope,
                                outbound.data,
                                outbound.tag.as_u16() as i32,
                            ),
                    );
                }
                let received = pending_recvs
                    .into_iter()
                    .map(|req| req.wait().count(u8::equivalent_datatype()).max(0) as usize)
                    .collect();
                for req in pending_sends {
                    req.wait();
                }
                received
            });
            // a short message would otherwise leave a zero-filled tail
            for (inbound, &got) in recvs.iter().zip(&received) {
                check_received_len(inbound, got)?;
            }
            Ok(buffers)
        }

        fn broadcast(&self, root: usize, buf: &mut Vec<u8>) -> Result<(), DecompError> {
            let root_process = self.world.process_at_rank(root as i32);
            let mut len = buf.len() as u64;
            root_process.broadcast_into(&mut len);
            buf.resize(len as usize, 0);
            root_process.broadcast_into(&mut buf[..]);
            Ok(())
        }

        fn all_gather(&self, local: &[u8]) -> Result<Vec<Vec<u8>>, DecompError> {
            let mut counts = vec![0 as Count; self.size];
            self.world
                .all_gather_into(&(local.len() as Count), &mut counts[..]);
            let displs: Vec<Count> = counts
                .iter()
                .scan(0 as Count, |acc, &c| {
                    let d = *acc;
                    *acc += c;
                    Some(d)
                })
                .collect();
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            let mut flat = vec![0u8; total];
            {
                let mut partition = PartitionMut::new(&mut flat[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut partition);
            }
            Ok(counts
                .iter()
                .zip(&displs)
                .map(|(&c, &d)| flat[d as usize..(d + c) as usize].to_vec())
                .collect())
        }

        fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), DecompError> {
            let local = values.to_vec();
            match op {
                ReduceOp::Min => {
                    self.world
                        .all_reduce_into(&local[..], values, SystemOperation::min())
                }
                ReduceOp::Max => {
                    self.world
                        .all_reduce_into(&local[..], values, SystemOperation::max())
                }
                ReduceOp::Sum => {
                    self.world
                        .all_reduce_into(&local[..], values, SystemOperation::sum())
                }
            }
            Ok(())
        }

        fn barrier(&self) -> Result<(), DecompError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
