//! WebSocket upgrade for accepted TCP connections.

use std::net::SocketAddr;

use futures::FutureExt;
use log::{debug, error, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{
    WebSocketStream,
    accept_async_with_config,
    tungstenite::protocol::WebSocketConfig,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{config::TransportConfig, panic::format_panic};

/// An upgraded connection on its way to the I/O loop.
pub(super) struct Established<S> {
    pub ws: WebSocketStream<S>,
    pub peer: SocketAddr,
}

/// Everything a handshake task needs besides the stream.
pub(super) struct HandshakeOptions<S> {
    pub transport: TransportConfig,
    pub established: mpsc::Sender<Established<S>>,
    pub shutdown: CancellationToken,
}

impl<S> Clone for HandshakeOptions<S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport,
            established: self.established.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// WebSocket limits derived from the transport configuration.
pub(super) fn websocket_config(transport: &TransportConfig) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(transport.max_message_size);
    config.max_frame_size = Some(transport.max_message_size);
    config
}

/// Spawn a task that upgrades `stream` and hands it to the I/O loop, logging
/// and discarding any panics.
///
/// Any request path is accepted.
pub(super) fn spawn_handshake<S>(
    stream: S,
    peer: SocketAddr,
    options: HandshakeOptions<S>,
    tracker: &TaskTracker,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tracker.spawn(async move {
        let fut = std::panic::AssertUnwindSafe(handshake(stream, peer, options)).catch_unwind();
        if let Err(panic) = fut.await {
            let panic_msg = format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("handshake task panicked: panic={panic_msg}, peer_addr={peer}");
            tracing::error!(panic = %panic_msg, %peer, "handshake task panicked");
        }
    });
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn handshake<S>(stream: S, peer: SocketAddr, options: HandshakeOptions<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let HandshakeOptions {
        transport,
        established,
        shutdown,
    } = options;
    let upgrade = accept_async_with_config(stream, Some(websocket_config(&transport)));
    let result = select! {
        biased;

        () = shutdown.cancelled() => {
            debug!("handshake abandoned for shutdown: peer_addr={peer}");
            return;
        }
        res = timeout(transport.handshake_timeout, upgrade) => res,
    };
    match result {
        Ok(Ok(ws)) => {
            if established.send(Established { ws, peer }).await.is_err() {
                debug!("I/O loop stopped; dropping upgraded connection: peer_addr={peer}");
            }
        }
        Ok(Err(e)) => warn!("websocket handshake failed: peer_addr={peer}, error={e}"),
        Err(_) => warn!(
            "websocket handshake timed out: peer_addr={peer}, timeout={:?}",
            transport.handshake_timeout
        ),
    }
}
