//! Canonical per-frame error taxonomy.
//!
//! Every failure that can befall a single frame on its way through the
//! pipeline is expressed as a [`FrameError`]. None of them are fatal to the
//! process or to other connections: the I/O loop and the workers log the
//! error, bump the matching metric and move on.

use thiserror::Error;

use crate::{
    codec::CodecError,
    engine::{EngineError, EngineInitError},
    queue::QueueError,
    session::ConnectionId,
};

/// Failure attached to one frame (or, for [`FrameError::EngineInit`], one
/// worker).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum FrameError {
    /// The inbound payload was not a decodable image.
    #[error("failed to decode frame from {connection}: {source}")]
    Decode {
        connection: ConnectionId,
        #[source]
        source: CodecError,
    },
    /// A worker could not construct its pipeline engine.
    #[error("worker {worker} failed to initialise its engine: {source}")]
    EngineInit {
        worker: usize,
        #[source]
        source: EngineInitError,
    },
    /// The engine rejected the frame.
    #[error("engine failed on frame {sequence} of {connection}: {source}")]
    Engine {
        connection: ConnectionId,
        sequence: u64,
        #[source]
        source: EngineError,
    },
    /// The processed image could not be serialised for the wire.
    #[error("failed to encode frame {sequence} of {connection}: {source}")]
    Encode {
        connection: ConnectionId,
        sequence: u64,
        #[source]
        source: CodecError,
    },
    /// The owning connection disappeared before the frame could be sent.
    #[error("{connection} vanished before dispatch")]
    Dispatch { connection: ConnectionId },
    /// The frame queue rejected or evicted a job.
    #[error("frame from {connection} dropped by the queue: {source}")]
    QueueOverflow {
        connection: ConnectionId,
        #[source]
        source: QueueError,
    },
}

impl FrameError {
    /// Short, stable label used for metrics and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::EngineInit { .. } => "engine_init",
            Self::Engine { .. } => "engine",
            Self::Encode { .. } => "encode",
            Self::Dispatch { .. } => "dispatch",
            Self::QueueOverflow { .. } => "queue_overflow",
        }
    }
}
