//! Runtime control for [`FrameServer`].

mod accept;
mod backoff;
#[cfg(test)]
mod tests;

use std::{num::NonZeroUsize, sync::Arc};

#[cfg(test)]
pub(super) use accept::MockAcceptListener;
pub(super) use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal, sync::mpsc, task::spawn_blocking};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    Bound,
    FrameServer,
    ServerError,
    connection::HandshakeOptions,
    io_loop::{IoLoop, IoLoopOptions},
};
use crate::{
    config::ConfigError,
    dispatch,
    engine::EngineFactory,
    queue::FrameQueue,
    session::ConnectionRegistry,
    worker::{WorkerContext, WorkerPool},
};

/// Upgraded connections waiting for the I/O loop to pick them up.
const ESTABLISHED_BACKLOG: usize = 64;

impl<F> FrameServer<F, Bound>
where
    F: EngineFactory,
{
    /// Run the server until Ctrl+C is received.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use framepipe::{engine::EngineConfig, server::FrameServer};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), framepipe::server::ServerError> {
    /// let server = FrameServer::new(EngineConfig::default()).bind(([127, 0, 0, 1], 8080).into())?;
    /// server.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// Attempting to run a server without binding fails to compile:
    ///
    /// ```compile_fail
    /// use framepipe::{engine::EngineConfig, server::FrameServer};
    ///
    /// async fn try_run() {
    ///     FrameServer::new(EngineConfig::default())
    ///         .run()
    ///         .await
    ///         .expect("unbound servers do not expose run()");
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`run_with_shutdown`](Self::run_with_shutdown).
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until the `shutdown` future resolves.
    ///
    /// Starts the worker pool, the I/O loop and the accept loop. On shutdown
    /// the accept loop stops, every connection is closed, workers drain the
    /// queue for at most the configured grace period and are joined.
    ///
    /// # Examples
    ///
    /// ```
    /// use framepipe::{engine::EngineConfig, server::FrameServer};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), framepipe::server::ServerError> {
    /// let server = FrameServer::new(EngineConfig::default())
    ///     .workers(2)
    ///     .bind(([127, 0, 0, 1], 0).into())?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(async move {
    ///     server
    ///         .run_with_shutdown(async {
    ///             let _ = rx.await;
    ///         })
    ///         .await
    /// });
    ///
    /// let _ = tx.send(());
    /// handle
    ///     .await
    ///     .expect("join server task")
    ///     .expect("server run failed");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Spawn`] if worker threads cannot be created and
    /// [`ServerError::Join`] if the pool cannot be joined. Accept failures are
    /// retried with exponential back-off and do not surface as errors.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let FrameServer {
            factory,
            codec,
            pipeline,
            transport,
            backoff_config,
            ready_tx,
            state: Bound { listener },
        } = self;

        let workers = NonZeroUsize::new(pipeline.workers).ok_or(ConfigError::Zero("workers"))?;
        let registry = Arc::new(ConnectionRegistry::new(pipeline.max_pending()?));
        let queue = Arc::new(
            FrameQueue::new(pipeline.queue_capacity, pipeline.overflow)
                .map_err(|_| ConfigError::Zero("queue_capacity"))?,
        );
        let (egress, egress_rx) = dispatch::channel();
        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            registry: Arc::clone(&registry),
            codec: Arc::clone(&codec),
            egress,
            factory: Arc::new(factory),
        };
        // Engine construction may block, so the pool starts off the runtime.
        // Workers still report through the caller's subscriber.
        let subscriber = tracing::dispatcher::get_default(Clone::clone);
        let pool = spawn_blocking(move || {
            tracing::dispatcher::with_default(&subscriber, || WorkerPool::spawn(workers, &ctx))
        })
        .await?
        .map_err(ServerError::Spawn)?;

        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (established_tx, established_rx) = mpsc::channel(ESTABLISHED_BACKLOG);

        tracker.spawn(
            IoLoop::new(IoLoopOptions {
                registry,
                queue,
                codec,
                egress: egress_rx,
                established: established_rx,
                transport,
                shutdown: shutdown_token.clone(),
                tracker: tracker.clone(),
            })
            .run(),
        );
        tracker.spawn(accept_loop(
            listener,
            AcceptLoopOptions {
                handshake: HandshakeOptions {
                    transport,
                    established: established_tx,
                    shutdown: shutdown_token.clone(),
                },
                shutdown: shutdown_token.clone(),
                tracker: tracker.clone(),
                backoff: backoff_config,
            },
        ));

        // Signal readiness after the pool and both loops are in place.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        info!("connections closed; stopping workers");

        let grace = pipeline.shutdown_grace;
        let report = spawn_blocking(move || pool.shutdown(grace)).await?;
        if report.panicked > 0 {
            warn!("worker threads panicked: count={}", report.panicked);
        }
        Ok(())
    }
}
