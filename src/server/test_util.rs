//! Test helpers shared across server modules.

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};

use rstest::fixture;

use super::{Bound, FrameServer};
use crate::engine::{EngineConfig, EngineFactory};

#[fixture]
pub fn factory() -> EngineConfig { EngineConfig::default() }

#[fixture]
/// Returns a bound [`StdTcpListener`] on a free port for use in tests.
///
/// Keeping the listener bound prevents race conditions where another
/// process could claim the port between discovery and use.
pub fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

/// Extract the bound address from a listener.
#[must_use]
pub fn listener_addr(listener: &StdTcpListener) -> SocketAddr {
    listener
        .local_addr()
        .expect("failed to get listener address")
}

/// Bind a small two-worker server to `listener`.
pub fn bind_server<F>(factory: F, listener: StdTcpListener) -> FrameServer<F, Bound>
where
    F: EngineFactory,
{
    FrameServer::new(factory)
        .workers(2)
        .bind_existing_listener(listener)
        .expect("Failed to bind")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_addr_matches_local_addr() {
        let listener = free_listener();
        assert_eq!(
            listener_addr(&listener),
            listener.local_addr().expect("failed to get address")
        );
        assert_eq!(listener_addr(&listener).ip(), std::net::IpAddr::from(Ipv4Addr::LOCALHOST));
    }
}
