//! CLI entry for the router.
//!
//! Usable as a standalone binary or as a subcommand of the unified
//! rondo CLI.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::state::RouterState;
use crate::{run_with_shutdown, CancellationToken};
use rondo_config::{apply_overrides, load_config, validate_config, CliOverrides, LoggingConfig};

/// Router CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "rondo-router", version, about = "Rendezvous/relay router")]
pub struct RouterArgs {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run the router with the given arguments.
pub async fn run(args: RouterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match rondo_metrics::init_prometheus(listen) {
            Ok(()) => info!("metrics exporter listening on {}", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    // Set up graceful shutdown on SIGTERM/SIGINT
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    let state = Arc::new(RouterState::from_config(&config)?);
    info!(
        users = state.users.len(),
        "router state initialized from config"
    );

    run_with_shutdown(config, state, shutdown).await?;
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            // Fall back to waiting forever
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                // Fall back to waiting forever
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize tracing subscriber with the given logging configuration.
fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init();
    }
}
