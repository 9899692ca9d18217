//! Per-connection reorder buffer for completed frames.
//!
//! Workers finish frames in whatever order the engine allows. A
//! [`ReassemblyBuffer`] parks each completed frame under its sequence number
//! and releases the longest contiguous run after `last_sent` on every
//! [`drain`](ReassemblyBuffer::drain). Failed frames are recorded as
//! [`Slot::Lost`] so that the run continues past them instead of stalling.
//!
//! The buffer is bounded. Once more than `max_pending` entries wait behind a
//! gap, the lowest missing sequence numbers are abandoned so the run can move
//! on; anything that turns up later for an abandoned number is rejected as
//! [`InsertOutcome::Stale`].

use std::{collections::BTreeMap, num::NonZeroUsize};

use bytes::Bytes;

/// Default per-connection bound on buffered frames.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Contents of a buffered sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Encoded frame ready for the wire.
    Ready(Bytes),
    /// The frame was dropped after its number was assigned.
    Lost,
}

/// Result of inserting into a [`ReassemblyBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The slot was buffered.
    Accepted,
    /// The slot was buffered and `skipped` missing numbers were abandoned to
    /// respect the bound.
    Overflow { skipped: u64 },
    /// A slot with this number is already buffered.
    Duplicate,
    /// The number was already sent or abandoned.
    Stale,
}

/// Frames released by one [`ReassemblyBuffer::drain`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Ready frames in sequence order.
    pub frames: Vec<(u64, Bytes)>,
    /// Number of lost slots stepped over.
    pub lost: u64,
}

impl Drained {
    /// Whether the drain released nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.frames.is_empty() && self.lost == 0 }
}

/// Ordered holding area for one connection's completed frames.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    last_sent: u64,
    max_pending: NonZeroUsize,
    slots: BTreeMap<u64, Slot>,
}

impl ReassemblyBuffer {
    /// Create an empty buffer that has sent nothing.
    #[must_use]
    pub fn new(max_pending: NonZeroUsize) -> Self {
        Self {
            last_sent: 0,
            max_pending,
            slots: BTreeMap::new(),
        }
    }

    /// Highest sequence number released so far (`0` before the first drain).
    #[must_use]
    pub const fn last_sent(&self) -> u64 { self.last_sent }

    /// Number of buffered slots.
    #[must_use]
    pub fn pending(&self) -> usize { self.slots.len() }

    /// Buffer `slot` under `sequence`.
    ///
    /// Sequence numbers start at 1; `0` is always stale.
    pub fn insert(&mut self, sequence: u64, slot: Slot) -> InsertOutcome {
        if sequence <= self.last_sent {
            return InsertOutcome::Stale;
        }
        if self.slots.contains_key(&sequence) {
            return InsertOutcome::Duplicate;
        }
        self.slots.insert(sequence, slot);
        match self.enforce_bound() {
            0 => InsertOutcome::Accepted,
            skipped => InsertOutcome::Overflow { skipped },
        }
    }

    /// Release the contiguous run following `last_sent`.
    ///
    /// Each step advances `last_sent` by exactly one and removes the slot.
    /// Draining stops at the first missing number.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        while let Some(slot) = self.slots.remove(&(self.last_sent + 1)) {
            self.last_sent += 1;
            match slot {
                Slot::Ready(frame) => drained.frames.push((self.last_sent, frame)),
                Slot::Lost => drained.lost += 1,
            }
        }
        drained
    }

    /// Abandon missing numbers below the lowest buffered slot until the buffer
    /// fits its bound again. Returns how many numbers were abandoned.
    fn enforce_bound(&mut self) -> u64 {
        if self.slots.len() <= self.max_pending.get() {
            return 0;
        }
        let Some(&lowest) = self.slots.keys().next() else {
            return 0;
        };
        // Only numbers strictly below the lowest buffered slot are missing;
        // moving `last_sent` to just before it lets the next drain proceed.
        let skipped = lowest - self.last_sent - 1;
        self.last_sent = lowest - 1;
        skipped
    }
}
