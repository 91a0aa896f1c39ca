//! Livehost - Virtual Host Decision Core
//! Pipeline: classified comments -> brain decision -> speak requests

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use livehost_core::bus::Bus;
use livehost_core::clock::MonotonicClock;
use livehost_core::config::Config;
use livehost_core::orchestrator::Orchestrator;

#[derive(Parser, Debug)]
#[command(name = "livehost", about = "Decision core for the livestream virtual host")]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Run the brain without sale flow phase tracking
    #[arg(long)]
    no_state_machine: bool,

    /// NATS server URL
    #[arg(long, env = "NATS_URL")]
    nats_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Contradictory thresholds are fatal here, before anything connects
    let mut config = Config::from_env()?;
    config.debug |= cli.debug;
    if cli.no_state_machine {
        config.enable_state_machine = false;
    }
    if let Some(url) = cli.nats_url {
        config.nats_url = url;
    }

    info!(
        input = %config.input_subject,
        output = %config.output_subject,
        state_machine = config.enable_state_machine,
        "livehost decision core starting"
    );

    let bus = Bus::connect(&config.nats_url).await;
    let consumer = bus.comment_consumer(&config.input_subject).await?;
    let publisher = bus.speak_publisher(&config.output_subject).await?;

    let clock = Arc::new(MonotonicClock::new());
    let orchestrator = Orchestrator::new(config, clock, Arc::new(publisher));

    orchestrator
        .run(consumer, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
