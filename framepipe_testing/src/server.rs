//! Spawn a [`FrameServer`] on an ephemeral port for the duration of a test.

use std::{net::SocketAddr, time::Duration};

use framepipe::{
    codec::OutputFormat,
    engine::EngineFactory,
    server::{FrameServer, ServerError},
};
use tokio::{sync::oneshot, task::JoinHandle, time::timeout};

use crate::client::FrameClient;

/// How long [`TestServer::stop`] waits for the server to finish.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Running server with a handle to stop it.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Start a two-worker PNG server on `127.0.0.1:0`.
    ///
    /// `configure` may adjust the builder further before it is bound. The
    /// call returns once the server reports ready.
    ///
    /// # Panics
    ///
    /// Panics if binding fails or the server exits before becoming ready.
    pub async fn start<F>(
        factory: F,
        configure: impl FnOnce(FrameServer<F>) -> FrameServer<F>,
    ) -> Self
    where
        F: EngineFactory,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let server = configure(
            FrameServer::new(factory)
                .workers(2)
                .output_format(OutputFormat::Png),
        )
        .ready_signal(ready_tx)
        .bind(([127, 0, 0, 1], 0).into())
        .expect("bind test server");
        let addr = server.local_addr().expect("bound address");

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_with_shutdown(async {
            let _ = shutdown_rx.await;
        }));
        ready_rx.await.expect("server ready");

        Self {
            addr,
            shutdown: Some(shutdown),
            handle,
        }
    }

    /// Address the server listens on.
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Open a new client connection.
    pub async fn connect(&self) -> FrameClient { FrameClient::connect(self.addr).await }

    /// Trigger shutdown and wait for the server to return.
    ///
    /// # Panics
    ///
    /// Panics if the server task panics or does not finish within
    /// [`STOP_TIMEOUT`].
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(STOP_TIMEOUT, &mut self.handle)
            .await
            .expect("server stopped in time")
            .expect("server task panicked")
    }
}
