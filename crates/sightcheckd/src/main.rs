//! Sightcheck HTTP service.
//!
//! Serves `/api/analyze`, `/api/proxy-image` and `/health` on top of a
//! single [`Classifier`] built from configuration at startup.

mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sightcheck_core::{Classifier, Config};
use tracing::{info, Level};

use crate::routes::{router, AppState};

#[derive(Parser)]
#[command(name = "sightcheckd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sightcheck classification service", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// TOML configuration file (default: build from environment variables)
    #[arg(short, long, env = "SIGHTCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configured one
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sightcheck_core::init_tracing(args.json, level);

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env().context("Failed to build config from environment")?,
    };
    for line in config.describe() {
        info!(provider = %line, "provider enabled");
    }
    if config.store.is_none() {
        info!("no artifact store configured; uploads will not be saved");
    }

    let classifier = Classifier::from_config(&config).context("Failed to initialise providers")?;
    let state = AppState {
        classifier: Arc::new(classifier),
    };
    let app = router(state, config.server.body_limit_bytes);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %bind, "sightcheckd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("sightcheckd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_accept_bind_override() {
        let args = Args::try_parse_from(["sightcheckd", "--bind", "0.0.0.0:9000", "--json"]).unwrap();
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000"));
        assert!(args.json);
        assert!(!args.verbose);
    }
}
