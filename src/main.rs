use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use poe_meter_agent::{AgentConfig, MeterAgent};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Bit-Earth smart meter reader
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "POE_AGENT_CONFIG")]
    config: PathBuf,

    /// Run the sensor diagnostic, print it as JSON and exit
    #[arg(long)]
    diagnostic: bool,

    /// Override the reading interval in seconds
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!("application failed: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<()> {
    let cfg = AgentConfig::load(&args.config)
        .and_then(|cfg| cfg.with_interval_override(args.interval))
        .with_context(|| format!("failed to load config {}", args.config.display()))?;

    let mut agent = MeterAgent::from_config(&cfg).context("failed to initialise agent")?;

    if args.diagnostic {
        let report = agent.diagnostic().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_signals(shutdown.clone()));

    agent.run(shutdown).await;
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C, or SIGTERM on Unix.
async fn forward_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown requested by user");
    shutdown.cancel();
}
