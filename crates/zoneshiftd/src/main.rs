//! zoneshiftd — the zoneshift daemon.
//!
//! Loads the simulation config, spawns the driver task, and serves the
//! REST API until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! zoneshiftd run --port 8080 --config zoneshift.toml --speed 2.0 --autostart
//! zoneshiftd config > zoneshift.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use zoneshift_core::{as_millis, SimConfig};
use zoneshift_engine::Simulation;

#[derive(Parser)]
#[command(name = "zoneshiftd", about = "zoneshift elastic scaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop and serve the API.
    Run {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Path to a zoneshift.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Logical seconds per wall-clock second (overrides clock.speed).
        #[arg(long)]
        speed: Option<f64>,

        /// Start the simulation immediately instead of waiting for
        /// POST /api/v1/control/start.
        #[arg(long)]
        autostart: bool,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,zoneshiftd=debug,zoneshift=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            config,
            speed,
            autostart,
        } => run(port, config, speed, autostart).await,
        Command::Config { config } => {
            let cfg = load_config(config.as_ref())?;
            print!("{}", cfg.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimConfig> {
    match path {
        Some(path) => SimConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(SimConfig::default()),
    }
}

async fn run(
    port: u16,
    config: Option<PathBuf>,
    speed: Option<f64>,
    autostart: bool,
) -> anyhow::Result<()> {
    let mut cfg = load_config(config.as_ref())?;
    if let Some(speed) = speed {
        cfg.clock.speed = speed;
        cfg.validate().context("invalid --speed")?;
    }
    info!(
        speed = cfg.clock.speed,
        tick_ms = as_millis(cfg.clock.tick_interval),
        "zoneshift daemon starting"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start the driver ───────────────────────────────────────

    let clock = cfg.clock.clone();
    let (cluster, driver) = zoneshift_engine::spawn(Simulation::new(cfg), clock, shutdown_rx);
    if autostart {
        cluster.start().await?;
        info!("simulation autostarted");
    }

    // ── Start API server ───────────────────────────────────────

    let router = zoneshift_api::build_router(cluster);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = driver.await;

    info!("zoneshift daemon stopped");
    Ok(())
}
