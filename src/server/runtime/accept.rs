//! Accept-loop utilities for server runtime.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::warn;
use tokio::{net::{TcpListener, TcpStream}, select, time::sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::backoff::{Backoff, BackoffConfig};
use crate::server::connection::{HandshakeOptions, spawn_handshake};

/// Abstraction for sources of incoming connections consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(in crate::server) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

pub(in crate::server) struct AcceptLoopOptions {
    pub handshake: HandshakeOptions<TcpStream>,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
}

/// Accepts incoming connections and spawns a WebSocket handshake for each.
///
/// Upgraded connections travel to the I/O loop through the channel in
/// `options.handshake`. Accept errors are retried after a delay taken from
/// `options.backoff`. The loop ends once `options.shutdown` is cancelled;
/// handshake tasks are tracked by `options.tracker`.
pub(in crate::server) async fn accept_loop<L>(listener: Arc<L>, options: AcceptLoopOptions)
where
    L: AcceptListener + 'static,
{
    let mut backoff = options.backoff.start();
    while accept_once(listener.as_ref(), &options, &mut backoff).await {}
}

/// Accept one connection or wait out one failure. Returns `false` on
/// shutdown, including shutdown during the back-off wait.
#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_once<L>(listener: &L, options: &AcceptLoopOptions, backoff: &mut Backoff) -> bool
where
    L: AcceptListener,
{
    select! {
        biased;

        () = options.shutdown.cancelled() => false,
        res = listener.accept() => match res {
            Ok((stream, peer)) => {
                backoff.reset();
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("failed to disable Nagle: peer_addr={peer}, error={e}");
                }
                spawn_handshake(stream, peer, options.handshake.clone(), &options.tracker);
                true
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                let wait = backoff.failed();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}, retry_in={wait:?}");
                select! {
                    () = options.shutdown.cancelled() => false,
                    () = sleep(wait) => true,
                }
            }
        },
    }
}
