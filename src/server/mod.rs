//! WebSocket front end for the frame pipeline.
//!
//! `FrameServer` accepts TCP connections, upgrades them to WebSocket and hands
//! them to a single I/O loop. That loop owns every socket: it decodes inbound
//! frames onto the shared queue and writes processed frames back, in order,
//! whenever a worker signals that a connection's buffer has moved on.

use std::sync::Arc;

use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    codec::ImageCodec,
    config::{PipelineConfig, TransportConfig},
    engine::EngineFactory,
};

/// WebSocket server driving a [`WorkerPool`](crate::worker::WorkerPool).
///
/// The server carries a typestate `S` indicating whether it is [`Unbound`]
/// (not yet bound to a TCP listener) or [`Bound`]. New servers start
/// `Unbound` and must call [`bind`](FrameServer::bind) or
/// [`bind_existing_listener`](FrameServer::bind_existing_listener) before
/// running. Every worker thread receives its own engine from the factory.
pub struct FrameServer<F, S = Unbound>
where
    F: EngineFactory,
    S: ServerState,
{
    pub(crate) factory: F,
    pub(crate) codec: Arc<dyn ImageCodec>,
    pub(crate) pipeline: PipelineConfig,
    pub(crate) transport: TransportConfig,
    pub(crate) backoff_config: BackoffConfig,
    /// Channel used to notify when the server is ready.
    ///
    /// A `oneshot::Sender` can transmit only one readiness notification, so a
    /// new sender must be provided each time the server is started.
    pub(crate) ready_tx: Option<oneshot::Sender<()>>,
    /// Typestate tracking whether the server has been bound to a listener.
    pub(crate) state: S,
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    pub(crate) listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

mod config;
pub use config::binding;
mod connection;
pub mod error;
pub use error::ServerError;
mod io_loop;
mod runtime;

/// Re-exported configuration types for server backoff behaviour.
pub use runtime::BackoffConfig;

#[cfg(test)]
pub(crate) mod test_util;
