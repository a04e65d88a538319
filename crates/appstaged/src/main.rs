//! appstage daemon - hosts apps and runs staging, promotion and sync

use anyhow::Result;
use appstage_core::{constants, ServerConfig};
use appstaged::Daemon;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appstaged=info,appstage_git=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("appstage daemon starting...");

    let home = constants::appstage_home();
    if !home.exists() {
        std::fs::create_dir_all(&home)?;
        info!("Created appstage home directory: {}", home.display());
    }

    let config_path = constants::config_path();
    let config = ServerConfig::load_or_default(&config_path)?;
    info!("Using config {}", config_path.display());

    let socket_path = config.socket_path();
    if socket_path.exists() {
        match tokio::net::UnixStream::connect(&socket_path).await {
            Ok(_) => {
                error!("Daemon is already running");
                std::process::exit(1);
            }
            Err(_) => {
                info!("Removing stale socket file");
                std::fs::remove_file(&socket_path)?;
            }
        }
    }

    let daemon = Daemon::new(config).await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!("Daemon error: {}", e);
                daemon.close().await;
                return Err(e.into());
            }
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    daemon.close().await;
    info!("Daemon shutdown complete");
    Ok(())
}
