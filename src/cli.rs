//! Command line interface for the `framepipe` server binary.
//!
//! Kept free of library types so `build.rs` can include it to render the
//! manual page.

use std::{net::SocketAddr, time::Duration};

use clap::{Parser, ValueEnum};

/// Built-in pipeline engines selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    /// Return frames unchanged.
    Identity,
    /// Convert frames to grayscale.
    Grayscale,
    /// Binarise frames at `--threshold`.
    Threshold,
}

/// Wire format for processed frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// JPEG at `--jpeg-quality`.
    Jpeg,
    /// Lossless PNG.
    Png,
}

/// Behaviour when the frame queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OverflowArg {
    /// Evict the oldest queued frame.
    DropOldest,
    /// Reject the incoming frame.
    DropNewest,
    /// Wait up to `--block-timeout-ms`, then reject.
    Block,
}

/// Command line arguments for the `framepipe` binary.
#[derive(Debug, Parser)]
#[command(
    name = "framepipe",
    version,
    about = "Ordered WebSocket image-processing server"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Worker threads; defaults to the number of CPUs (4 if unknown).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Pipeline engine run by every worker.
    #[arg(short, long, value_enum, default_value_t = EngineArg::Identity)]
    pub engine: EngineArg,

    /// Cut-off in [0, 1] for the threshold engine.
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f32,

    /// Output encoding.
    #[arg(long, value_enum, default_value_t = FormatArg::Jpeg)]
    pub format: FormatArg,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,

    /// Capacity of the shared frame queue.
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,

    /// Policy applied when the frame queue is full.
    #[arg(long, value_enum, default_value_t = OverflowArg::DropOldest)]
    pub overflow: OverflowArg,

    /// How long a blocked push may wait under `--overflow block`.
    #[arg(long, default_value_t = 50)]
    pub block_timeout_ms: u64,

    /// Frames each connection may hold behind a gap.
    #[arg(long, default_value_t = 1024)]
    pub max_pending: usize,

    /// Largest accepted message in bytes.
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    pub max_message_size: usize,

    /// Frames a connection may have waiting for a slow socket.
    #[arg(long, default_value_t = 64)]
    pub outbound_capacity: usize,

    /// Close connections idle for this many seconds; 0 disables.
    #[arg(long, default_value_t = 10)]
    pub idle_timeout_secs: u64,

    /// Seconds workers may keep draining on shutdown.
    #[arg(long, default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Idle timeout, or `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults_match_production_server() {
        let cli = Cli::parse_from(["framepipe"]);
        assert_eq!(cli.listen, "0.0.0.0:8080".parse().expect("addr parse"));
        assert_eq!(cli.engine, EngineArg::Identity);
        assert_eq!(cli.format, FormatArg::Jpeg);
        assert_eq!(cli.max_message_size, 50 * 1024 * 1024);
        assert_eq!(cli.idle_timeout(), Some(Duration::from_secs(10)));
        assert!(cli.workers.is_none());
    }

    #[test]
    fn parses_engine_and_overflow_options() {
        let cli = Cli::parse_from([
            "framepipe",
            "--engine",
            "threshold",
            "--threshold",
            "0.25",
            "--overflow",
            "drop-newest",
            "--idle-timeout-secs",
            "0",
            "-w",
            "3",
        ]);
        assert_eq!(cli.engine, EngineArg::Threshold);
        assert!((cli.threshold - 0.25).abs() < f32::EPSILON);
        assert_eq!(cli.overflow, OverflowArg::DropNewest);
        assert_eq!(cli.idle_timeout(), None);
        assert_eq!(cli.workers, Some(3));
    }
}
