//! # pairchat
//!
//! Anonymous one-to-one chat server: pairs waiting users and relays chat
//! and WebRTC signaling between partners.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pairchat_server::ServerConfig;
use pairchat_telemetry::{init_telemetry, TelemetryConfig};
use tracing::Level;

/// Pairchat server.
#[derive(Parser, Debug)]
#[command(name = "pairchat", about = "Anonymous one-to-one chat server")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Directory served as the static site.
    #[arg(long, env = "PAIRCHAT_PUBLIC_DIR", default_value = "public")]
    public_dir: PathBuf,

    /// Directory uploaded media is stored in. Defaults to `<public-dir>/uploads`.
    #[arg(long, env = "PAIRCHAT_UPLOADS_DIR")]
    uploads_dir: Option<PathBuf>,

    /// Maximum upload size in bytes.
    #[arg(long, default_value = "10485760")]
    max_upload_bytes: usize,

    /// Path to the SQLite database for persisted warn+ logs.
    #[arg(long, env = "PAIRCHAT_LOG_DB")]
    log_db: Option<PathBuf>,

    /// Do not persist logs to SQLite.
    #[arg(long, env = "PAIRCHAT_NO_LOG_DB")]
    no_log_db: bool,

    /// Enable debug logging for the pairchat crates.
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn telemetry_config(&self) -> TelemetryConfig {
        let mut config = TelemetryConfig {
            log_to_sqlite: !self.no_log_db,
            ..TelemetryConfig::default()
        };
        if let Some(path) = &self.log_db {
            config.log_db_path = path.clone();
        }
        if self.verbose {
            config.module_levels = ["pairchat_engine", "pairchat_server"]
                .into_iter()
                .map(|module| (module.to_string(), Level::DEBUG))
                .collect();
        }
        config
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            uploads_dir: self
                .uploads_dir
                .clone()
                .unwrap_or_else(|| self.public_dir.join("uploads")),
            public_dir: self.public_dir.clone(),
            max_upload_bytes: self.max_upload_bytes,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = init_telemetry(cli.telemetry_config());

    let config = cli.server_config();
    tracing::info!(
        public_dir = %config.public_dir.display(),
        uploads_dir = %config.uploads_dir.display(),
        "starting pairchat"
    );

    let handle = pairchat_server::start(config, telemetry.metrics(), telemetry.logs())
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "pairchat ready");

    shutdown_signal().await;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
