//! `framepipe` server binary.
//!
//! Parses CLI arguments, installs logging (and optionally a Prometheus
//! endpoint) and runs a [`FrameServer`] until Ctrl+C. All socket I/O runs on
//! one thread; frame processing runs on the worker threads.

mod cli;

use std::time::Duration;

use clap::Parser;
use framepipe::{
    EngineConfig,
    EngineKind,
    FrameServer,
    OutputFormat,
    OverflowPolicy,
    PipelineConfig,
    TransportConfig,
    config::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_WRITE_TIMEOUT, default_workers},
};
use log::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, EngineArg, FormatArg, OverflowArg};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!("metrics endpoint listening: addr={addr}");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        log::warn!("--metrics-addr ignored: built without the metrics feature");
    }

    let engine = EngineConfig {
        kind: match cli.engine {
            EngineArg::Identity => EngineKind::Identity,
            EngineArg::Grayscale => EngineKind::Grayscale,
            EngineArg::Threshold => EngineKind::Threshold,
        },
        threshold: cli.threshold,
    };
    let format = match cli.format {
        FormatArg::Jpeg => OutputFormat::Jpeg {
            quality: cli.jpeg_quality,
        },
        FormatArg::Png => OutputFormat::Png,
    };
    let overflow = match cli.overflow {
        OverflowArg::DropOldest => OverflowPolicy::DropOldest,
        OverflowArg::DropNewest => OverflowPolicy::DropNewest,
        OverflowArg::Block => OverflowPolicy::Block {
            timeout: Duration::from_millis(cli.block_timeout_ms),
        },
    };
    let pipeline = PipelineConfig {
        workers: cli.workers.unwrap_or_else(default_workers),
        queue_capacity: cli.queue_capacity,
        overflow,
        max_pending: cli.max_pending,
        shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
    };
    let transport = TransportConfig {
        max_message_size: cli.max_message_size,
        idle_timeout: cli.idle_timeout(),
        outbound_capacity: cli.outbound_capacity,
        write_timeout: DEFAULT_WRITE_TIMEOUT,
        handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
    };

    info!(
        "starting framepipe: listen={}, engine={}, format={format}, workers={}",
        cli.listen, engine.kind, pipeline.workers
    );
    let server = FrameServer::new(engine)
        .pipeline(pipeline)
        .transport(transport)
        .output_format(format)
        .bind(cli.listen)?;
    server.run().await?;
    info!("framepipe stopped");
    Ok(())
}
