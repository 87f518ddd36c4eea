//! Thin façade over intra-process (Rayon-style threads) or inter-process (MPI) message
//! passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: the exchange layer calls
//! `.wait()` before it trusts that the buffer is ready.
//!
//! Ordering: messages between one `(src, dst, tag)` triple are delivered in send
//! order, like MPI's non-overtaking rule. The registry relies on this when the same
//! tag is reused across collective calls.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::mesh_error::MeshError;

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

    /// Tag `n` slots above this one.
    pub const fn offset(self, n: u16) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

/// Tag reserved for the point-to-point fallback of [`Communicator::allreduce_sum`].
pub const REDUCE_TAG: CommTag = CommTag::new(0xFFF0);

/// Non-blocking communication interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process.
    fn rank(&self) -> usize;
    /// Number of processes in the communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive for a message of `buf.len()` bytes. The payload is returned by
    /// [`Wait::wait`]; `buf` only sizes the request.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// `true` for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Element-wise global sum, in place. Every rank must call this.
    ///
    /// The default implementation sends the local contribution to every peer and
    /// sums what it receives; backends with a native reduction override it.
    fn allreduce_sum(&self, values: &mut [u64]) -> Result<(), MeshError> {
        let (me, size) = (self.rank(), self.size());
        if size <= 1 || values.is_empty() {
            return Ok(());
        }
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let nbytes = payload.len();

        let mut recvs = Vec::with_capacity(size - 1);
        for peer in (0..size).filter(|&p| p != me) {
            let mut scratch = vec![0u8; nbytes];
            recvs.push((peer, self.irecv(peer, REDUCE_TAG.as_u16(), &mut scratch)));
        }
        let mut sends = Vec::with_capacity(size - 1);
        for peer in (0..size).filter(|&p| p != me) {
            sends.push(self.isend(peer, REDUCE_TAG.as_u16(), &payload));
        }

        let mut totals = values.to_vec();
        let mut maybe_err = None;
        for (peer, h) in recvs {
            match h.wait() {
                Some(data) if data.len() == nbytes => {
                    for (t, chunk) in totals.iter_mut().zip(data.chunks_exact(8)) {
                        let mut raw = [0u8; 8];
                        raw.copy_from_slice(chunk);
                        *t += u64::from_le_bytes(raw);
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(MeshError::BufferSizeMismatch {
                        neighbor: peer,
                        expected: nbytes,
                        got: data.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(MeshError::CommError {
                        neighbor: peer,
                        message: "no reduction contribution received".into(),
                    });
                }
                _ => {}
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }
        values.copy_from_slice(&totals);
        Ok(())
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs: one rank, nothing to exchange.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Receive handle of [`RayonComm`]; polls the shared mailbox on `wait`.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    timeout: Duration,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "RayonComm: receive from rank {} (tag {:#x}) timed out on rank {}",
                    self.key.0,
                    self.key.2,
                    self.key.1
                );
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// Multi-rank communicator for ranks that live on threads of one process.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

impl fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl RayonComm {
    /// A rank attached to the process-global mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&MAILBOX),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `size` ranks sharing a fresh, isolated mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox: Arc<Mailbox> = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }

    /// Give up waiting for a message after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            timeout: self.timeout,
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. Dropping it finalizes MPI.
    pub struct MpiComm {
        world: Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, MeshError> {
            let universe = mpi::initialize()
                .ok_or_else(|| MeshError::CommInit("MPI already initialized".into()))?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending immediate send; the leaked payload is reclaimed once the request completes.
    pub struct MpiSendHandle(Option<Box<dyn FnOnce()>>);

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(finish) = self.0.take() {
                finish();
            }
            None
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(finish) = self.0.take() {
                finish();
            }
        }
    }

    /// Receives are matched lazily: all sends are immediate, so a blocking receive at
    /// `wait` time cannot deadlock.
    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let owned: &'static [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, owned, tag as i32);
            MpiSendHandle(Some(Box::new(move || {
                req.wait();
                // SAFETY: `owned` came from `Box::leak` above and the request that
                // borrowed it has completed.
                unsafe { drop(Box::from_raw(owned as *const [u8] as *mut [u8])) };
            })))
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: Arc::clone(&self.world),
                peer: peer as i32,
                tag: tag as i32,
            }
        }

        fn allreduce_sum(&self, values: &mut [u64]) -> Result<(), MeshError> {
            let local = values.to_vec();
            self.world
                .all_reduce_into(&local[..], values, SystemOperation::sum());
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
