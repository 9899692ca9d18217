//! Metric helpers for `framepipe`.
//!
//! This module defines metric names and small helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open WebSocket connections.
pub const CONNECTIONS_ACTIVE: &str = "framepipe_connections_active";
/// Name of the counter tracking frames received and sent.
pub const FRAMES_TOTAL: &str = "framepipe_frames_total";
/// Name of the counter tracking per-frame and per-worker failures.
pub const ERRORS_TOTAL: &str = "framepipe_errors_total";
/// Name of the counter tracking jobs evicted or rejected by the frame queue.
pub const QUEUE_DROPPED: &str = "framepipe_queue_dropped_total";

/// Direction of frame travel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames decoded from a client payload.
    Inbound,
    /// Frames written back to a client.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record `count` frames travelling in `direction`.
pub fn inc_frames(direction: Direction, count: u64) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(count);
    #[cfg(not(feature = "metrics"))]
    let _ = (direction, count);
}

/// Record an error of the given kind (see [`FrameError::kind`]).
///
/// [`FrameError::kind`]: crate::error::FrameError::kind
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record `count` jobs dropped by the frame queue.
pub fn inc_queue_dropped(count: u64) {
    #[cfg(feature = "metrics")]
    counter!(QUEUE_DROPPED).increment(count);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}
