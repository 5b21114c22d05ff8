//! coach-service: live coaching over a UDP telemetry stream.
//!
//! Logging: `RUST_LOG` overrides; `--verbose` => debug; else info.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coach_ingest_udp::{UdpConfig, UdpJsonSource, UdpPublisher};
use coach_service::config::Config;
use coach_service::health::{self, Health};
use coach_service::session::Orchestrator;
use coach_service::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "coach-service", about = "Segment-based live driving coach")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();

    let config = Config::load_or_default(cli.config.as_deref())?;
    let store = Arc::new(MemoryStore::from_config(&config.reference).context("seeding reference data")?);

    let source = UdpJsonSource::bind(UdpConfig {
        bind_addr: config.stream.bind_addr.clone(),
        credentials: config.credentials(),
        ..Default::default()
    })
    .await?;
    info!(addr = %source.local_addr()?, "listening for telemetry");
    let publisher = Arc::new(UdpPublisher::connect(&config.stream.publish_addr).await?);

    let health = Arc::new(Health::default());
    let health_addr = config.health.bind_addr.clone();
    let probes = health.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(&health_addr, probes).await {
            error!(error = %e, "health endpoint failed");
        }
    });

    let orchestrator = Orchestrator::new(config, store, publisher, health);
    tokio::select! {
        r = orchestrator.run(source) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    }
}
