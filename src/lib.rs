#![doc(html_root_url = "https://docs.rs/framepipe/latest")]
//! Public API for the `framepipe` library.
//!
//! `framepipe` streams image frames from many WebSocket clients through a
//! pool of blocking pipeline engines and returns each processed frame to its
//! sender in the order it was sent, whatever order the workers finish in.
//!
//! The moving parts are a bounded [`FrameQueue`], a [`WorkerPool`] of OS
//! threads, a [`ConnectionRegistry`] holding per-connection sequence counters
//! and [`ReassemblyBuffer`]s, and a single I/O loop (inside [`server`]) that
//! owns every socket.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod panic;
pub mod queue;
pub mod reassembly;
#[cfg(not(loom))]
pub mod server;
pub mod session;
#[cfg(not(loom))]
pub mod worker;

pub use codec::{CodecError, ImageCodec, ImageFormatCodec, OutputFormat};
pub use config::{ConfigError, PipelineConfig, TransportConfig};
pub use engine::{EngineConfig, EngineError, EngineFactory, EngineInitError, EngineKind, PipelineEngine};
pub use error::FrameError;
pub use queue::{FrameJob, FrameQueue, OverflowPolicy, QueueError};
pub use reassembly::{InsertOutcome, ReassemblyBuffer, Slot};
#[cfg(not(loom))]
pub use server::{FrameServer, ServerError};
pub use session::{ConnectionId, ConnectionRegistry};
#[cfg(not(loom))]
pub use worker::WorkerPool;
