//! Registry of live connections and their sequencing state.
//!
//! [`ConnectionRegistry`] keeps, per [`ConnectionId`], the next sequence
//! number to hand out and the connection's [`ReassemblyBuffer`]. All of it
//! sits behind one lock: the I/O loop takes it to connect, disconnect and
//! drain; workers take it to claim sequence numbers and park completed
//! frames. Removing a connection therefore removes its counters and buffered
//! frames in a single critical section, and every later worker access for
//! that identity observes `None` and becomes a no-op.
//!
//! Socket handles are not stored here. They stay with the I/O loop, which is
//! the only code allowed to touch them.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;

use crate::reassembly::{Drained, InsertOutcome, ReassemblyBuffer, Slot};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

#[derive(Debug)]
struct ConnectionState {
    next_seq: u64,
    buffer: ReassemblyBuffer,
}

/// Snapshot of one connection's sequencing counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceState {
    /// Highest sequence number released to the socket.
    pub last_sent: u64,
    /// Next sequence number a worker will claim.
    pub next_seq: u64,
    /// Completed frames waiting behind a gap.
    pub pending: usize,
}

/// Process-wide connection table guarded by one lock.
#[derive(Debug)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    max_pending: NonZeroUsize,
    connections: Mutex<HashMap<ConnectionId, ConnectionState>>,
}

impl ConnectionRegistry {
    /// Create an empty registry whose buffers hold at most `max_pending`
    /// frames each.
    #[must_use]
    pub fn new(max_pending: NonZeroUsize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            max_pending,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new connection with `last_sent = 0` and `next_seq = 1`.
    pub fn connect(&self) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            id,
            ConnectionState {
                next_seq: 1,
                buffer: ReassemblyBuffer::new(self.max_pending),
            },
        );
        id
    }

    /// Remove a connection together with its counters and buffered frames.
    ///
    /// Returns the number of frames that were still buffered, or `None` if
    /// the connection was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> Option<usize> {
        self.lock()
            .remove(&id)
            .map(|state| state.buffer.pending())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.lock().len() }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Counters for `id`, if registered.
    #[must_use]
    pub fn sequence_state(&self, id: ConnectionId) -> Option<SequenceState> {
        self.lock().get(&id).map(|state| SequenceState {
            last_sent: state.buffer.last_sent(),
            next_seq: state.next_seq,
            pending: state.buffer.pending(),
        })
    }

    /// Claim the next sequence number for `id` (post-increment).
    ///
    /// Returns `None` if the connection is gone.
    pub fn assign_sequence(&self, id: ConnectionId) -> Option<u64> {
        let mut connections = self.lock();
        let state = connections.get_mut(&id)?;
        let seq = state.next_seq;
        state.next_seq += 1;
        Some(seq)
    }

    /// Park an encoded frame for `id`.
    ///
    /// Returns `None` if the connection is gone.
    pub fn complete(&self, id: ConnectionId, sequence: u64, frame: Bytes) -> Option<InsertOutcome> {
        self.insert(id, sequence, Slot::Ready(frame))
    }

    /// Record that `sequence` for `id` will never be produced.
    ///
    /// Returns `None` if the connection is gone.
    pub fn mark_lost(&self, id: ConnectionId, sequence: u64) -> Option<InsertOutcome> {
        self.insert(id, sequence, Slot::Lost)
    }

    /// Release the contiguous run of completed frames for `id`.
    ///
    /// Returns `None` if the connection is gone.
    pub fn drain_ready(&self, id: ConnectionId) -> Option<Drained> {
        self.lock().get_mut(&id).map(|state| state.buffer.drain())
    }

    fn insert(&self, id: ConnectionId, sequence: u64, slot: Slot) -> Option<InsertOutcome> {
        self.lock()
            .get_mut(&id)
            .map(|state| state.buffer.insert(sequence, slot))
    }

    // Each critical section leaves the table consistent, so a poisoned lock
    // is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionState>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
