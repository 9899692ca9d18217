//! Utilities for driving a [`FrameServer`](framepipe::server::FrameServer)
//! end to end during tests.
//!
//! Frames built by [`tagged_png`] carry a script tag read by
//! [`ScriptedEngine`] and an identifier read back with [`read_id`], so tests
//! can control per-frame latency and failures and then check the order in
//! which frames come back.
//!
//! ```no_run
//! use framepipe_testing::{TestServer, scripted_factory, tagged_png};
//!
//! # async fn example() {
//! let server = TestServer::start(scripted_factory(), |s| s).await;
//! let mut client = server.connect().await;
//! client.send_frame(tagged_png(20, 1)).await;
//! assert_eq!(client.recv_ids(1).await, vec![1]);
//! # }
//! ```

pub mod client;
pub mod frames;
pub mod logging;
#[cfg(not(loom))]
pub mod server;

pub use client::FrameClient;
pub use frames::{
    FAIL,
    PANIC,
    ScriptedEngine,
    read_id,
    script_tag,
    scripted_factory,
    tagged_image,
    tagged_png,
};
pub use logging::{LoggerHandle, logger};
#[cfg(not(loom))]
pub use server::TestServer;
