//! Configuration utilities for [`FrameServer`].

use std::{sync::Arc, time::Duration};

use tokio::sync::oneshot;

use super::{BackoffConfig, FrameServer, ServerState, Unbound};
use crate::{
    codec::{ImageCodec, ImageFormatCodec, OutputFormat},
    config::{PipelineConfig, TransportConfig},
    engine::EngineFactory,
    queue::OverflowPolicy,
};

pub mod binding;


impl<F> FrameServer<F, Unbound>
where
    F: EngineFactory,
{
    /// Create a new `FrameServer` from the given engine factory.
    ///
    /// The worker count defaults to the number of available CPU cores (or 4 if
    /// this cannot be determined) and frames are returned as JPEG. The TCP
    /// listener is unset; call [`bind`](Self::bind) before running the server.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            codec: Arc::new(ImageFormatCodec::default()),
            pipeline: PipelineConfig::default(),
            transport: TransportConfig::default(),
            backoff_config: BackoffConfig::default(),
            ready_tx: None,
            state: Unbound,
        }
    }
}

impl<F, S> FrameServer<F, S>
where
    F: EngineFactory,
    S: ServerState,
{
    /// Set the number of worker threads. Zero is raised to one.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.pipeline.workers = count.max(1);
        self
    }

    /// Set the capacity of the shared frame queue. Zero is raised to one.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.pipeline.queue_capacity = capacity.max(1);
        self
    }

    /// Choose what happens when a frame arrives at a full queue.
    #[must_use]
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.pipeline.overflow = policy;
        self
    }

    /// Bound the frames each connection may park behind a gap. Zero is raised
    /// to one.
    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.pipeline.max_pending = max_pending.max(1);
        self
    }

    /// Time workers get to drain queued frames on shutdown.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.pipeline.shutdown_grace = grace;
        self
    }

    /// Replace the whole pipeline configuration.
    ///
    /// Values are checked when the server is bound.
    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the whole transport configuration.
    ///
    /// Values are checked when the server is bound.
    #[must_use]
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Largest accepted WebSocket message in bytes. Zero is raised to one.
    #[must_use]
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.transport.max_message_size = bytes.max(1);
        self
    }

    /// Close connections that send nothing for `timeout`; `None` disables the
    /// check. Durations are clamped to at least 1 ms.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transport.idle_timeout = timeout.map(at_least_one_ms);
        self
    }

    /// Frames a connection may have waiting for its socket. Zero is raised to
    /// one.
    #[must_use]
    pub fn outbound_capacity(mut self, frames: usize) -> Self {
        self.transport.outbound_capacity = frames.max(1);
        self
    }

    /// How long a socket may refuse writes before its connection is closed.
    /// Clamped to at least 1 ms.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.transport.write_timeout = at_least_one_ms(timeout);
        self
    }

    /// Upper bound on the WebSocket upgrade. Clamped to at least 1 ms.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.transport.handshake_timeout = at_least_one_ms(timeout);
        self
    }

    /// Use `codec` for inbound decoding and outbound encoding.
    #[must_use]
    pub fn codec<C: ImageCodec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Encode outbound frames as `format` with the built-in codec.
    #[must_use]
    pub fn output_format(self, format: OutputFormat) -> Self {
        self.codec(ImageFormatCodec::new(format))
    }

    /// Configure accept-loop back-off. Values are normalised.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff_config = backoff.normalized();
        self
    }

    /// Configure a channel used to signal when the server is ready to accept
    /// connections.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Returns the configured number of worker threads.
    #[inline]
    #[must_use]
    pub const fn worker_count(&self) -> usize { self.pipeline.workers }

    /// Current pipeline configuration.
    #[must_use]
    pub const fn pipeline_config(&self) -> &PipelineConfig { &self.pipeline }

    /// Current transport configuration.
    #[must_use]
    pub const fn transport_config(&self) -> &TransportConfig { &self.transport }

    /// Current accept-loop back-off.
    #[must_use]
    pub const fn backoff(&self) -> BackoffConfig { self.backoff_config }
}

fn at_least_one_ms(duration: Duration) -> Duration { duration.max(Duration::from_millis(1)) }
