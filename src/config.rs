//! Pipeline and transport configuration.
//!
//! [`PipelineConfig`] sizes the worker pool, the frame queue and the
//! reassembly buffers. [`TransportConfig`] bounds what the WebSocket layer
//! accepts and how long it waits. Both are plain data with defaults matching
//! the production server; [`validate`](PipelineConfig::validate) rejects
//! values the runtime cannot honour.

use std::{num::NonZeroUsize, time::Duration};

use thiserror::Error;

use crate::{
    queue::{DEFAULT_QUEUE_CAPACITY, OverflowPolicy},
    reassembly::DEFAULT_MAX_PENDING,
};

/// Worker count used when hardware parallelism cannot be detected.
pub const FALLBACK_WORKERS: usize = 4;
/// Largest accepted WebSocket message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;
/// Inactivity after which a connection is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Frames a connection may have waiting for its socket.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
/// How long a connection's socket may refuse writes before it is closed.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on completing the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Time workers get to drain the queue on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Invalid configuration values.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A count that must be positive was zero.
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    /// A timeout that must be positive was zero.
    #[error("{0} must be longer than zero")]
    ZeroDuration(&'static str),
}

/// Detected hardware parallelism, or [`FALLBACK_WORKERS`].
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(FALLBACK_WORKERS, NonZeroUsize::get)
}

/// Sizing of the processing side of the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of worker threads, each owning one engine.
    pub workers: usize,
    /// Capacity of the shared frame queue.
    pub queue_capacity: usize,
    /// What to do when the queue is full.
    pub overflow: OverflowPolicy,
    /// Per-connection bound on frames parked behind a gap.
    pub max_pending: usize,
    /// How long workers may keep draining the queue after shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            max_pending: DEFAULT_MAX_PENDING,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl PipelineConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for a zero worker count, queue capacity or
    /// pending bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("workers", self.workers)?;
        non_zero("queue_capacity", self.queue_capacity)?;
        non_zero("max_pending", self.max_pending)?;
        Ok(())
    }

    /// The pending bound as a [`NonZeroUsize`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] if `max_pending` is zero.
    pub fn max_pending(&self) -> Result<NonZeroUsize, ConfigError> {
        non_zero("max_pending", self.max_pending)
    }
}

/// Limits applied to WebSocket connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Largest accepted message (and frame), in bytes.
    pub max_message_size: usize,
    /// Close connections idle for this long; `None` disables the check.
    pub idle_timeout: Option<Duration>,
    /// Frames that may wait for a slow socket before the connection is
    /// closed.
    pub outbound_capacity: usize,
    /// How long a socket may stall with frames waiting.
    pub write_timeout: Duration,
    /// Bound on the HTTP upgrade.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a zero message size, a zero outbound
    /// capacity or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("max_message_size", self.max_message_size)?;
        non_zero("outbound_capacity", self.outbound_capacity)?;
        positive("write_timeout", self.write_timeout)?;
        positive("handshake_timeout", self.handshake_timeout)?;
        if let Some(idle) = self.idle_timeout {
            positive("idle_timeout", idle)?;
        }
        Ok(())
    }
}

fn non_zero(name: &'static str, value: usize) -> Result<NonZeroUsize, ConfigError> {
    NonZeroUsize::new(value).ok_or(ConfigError::Zero(name))
}

fn positive(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration(name));
    }
    Ok(())
}
