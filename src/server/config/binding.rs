//! Listener binding for [`FrameServer`].
//!
//! Configuration is validated here, so a bound server always carries values
//! the runtime can honour.

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use tokio::net::TcpListener;

use crate::{
    engine::EngineFactory,
    server::{Bound, FrameServer, ServerError, ServerState, Unbound},
};

impl<F, S> FrameServer<F, S>
where
    F: EngineFactory,
    S: ServerState,
{
    fn bind_to_listener(self, std_listener: StdTcpListener) -> Result<FrameServer<F, Bound>, ServerError> {
        let FrameServer {
            factory,
            codec,
            pipeline,
            transport,
            backoff_config,
            ready_tx,
            ..
        } = self;

        pipeline.validate()?;
        transport.validate()?;
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let tokio_listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;

        Ok(FrameServer {
            factory,
            codec,
            pipeline,
            transport,
            backoff_config,
            ready_tx,
            state: Bound {
                listener: Arc::new(tokio_listener),
            },
        })
    }
}

impl<F> FrameServer<F, Unbound>
where
    F: EngineFactory,
{
    /// Return `None` as the server is not bound.
    ///
    /// # Examples
    ///
    /// ```
    /// use framepipe::{engine::EngineConfig, server::FrameServer};
    ///
    /// assert!(FrameServer::new(EngineConfig::default()).local_addr().is_none());
    /// ```
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> { None }

    /// Bind to a fresh address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::net::{Ipv4Addr, SocketAddr};
    ///
    /// use framepipe::{engine::EngineConfig, server::FrameServer};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    /// let server = FrameServer::new(EngineConfig::default())
    ///     .bind(addr)
    ///     .expect("bind failed");
    /// assert!(server.local_addr().is_some());
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns a [`ServerError`] if the configuration is invalid or binding
    /// the listener fails.
    pub fn bind(self, addr: SocketAddr) -> Result<FrameServer<F, Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if the configuration is invalid or the
    /// listener cannot be configured.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<FrameServer<F, Bound>, ServerError> {
        self.bind_to_listener(std_listener)
    }
}

impl<F> FrameServer<F, Bound>
where
    F: EngineFactory,
{
    /// Returns the bound address, or `None` if retrieving it fails.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }

    /// Rebind to a fresh address.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if binding or configuring the listener fails.
    pub fn bind(self, addr: SocketAddr) -> Result<Self, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Rebind using an existing `StdTcpListener`.
    ///
    /// # Errors
    /// Returns a [`ServerError`] if configuring the listener fails.
    pub fn bind_existing_listener(self, std_listener: StdTcpListener) -> Result<Self, ServerError> {
        self.bind_to_listener(std_listener)
    }
}
