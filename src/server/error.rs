//! Errors raised by [`FrameServer`](super::FrameServer) operations.

use std::io;

use thiserror::Error;
use tokio::task::JoinError;

use crate::config::ConfigError;

/// Errors that may occur while binding or running the server.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// The pipeline or transport configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    /// Joining the worker pool failed.
    #[error("failed to join worker pool: {0}")]
    Join(#[from] JoinError),
}
