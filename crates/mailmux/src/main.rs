//! mailmux - IMAP/SMTP session sidecar.
//!
//! Listens on a Unix socket and serves newline-delimited JSON requests
//! until interrupted.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;

use anyhow::Context;
use clap::Parser;
use mailmux_core::{Config, Router, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting mailmux");

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_default()
            .await
            .context("failed to load default config")?,
    };
    cli.apply(&mut config);

    let router = Router::new(config.command_deadline());
    let server = Server::bind(&config, router).with_context(|| {
        format!("failed to listen on {}", config.socket_path.display())
    })?;

    server
        .run(shutdown_signal())
        .await
        .context("server shutdown failed")?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => info!("received interrupt"),
        () = terminate => info!("received SIGTERM"),
    }
}
