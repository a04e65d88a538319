//! Command implementations

pub mod app;
pub mod apply;
pub mod daemon;
pub mod staged;
pub mod sync;
pub mod version;

use anyhow::{anyhow, bail, Result};
use appstage_core::{constants, is_git_url, ServerConfig, NO_SOURCE};
use appstage_ipc::{IpcClient, Request, Response};
use std::path::PathBuf;
use tracing::debug;

use crate::output::print_error;

/// Socket the daemon listens on, honoring the server config override
pub fn socket_path() -> Result<PathBuf> {
    let config = ServerConfig::load_or_default(&constants::config_path())?;
    Ok(config.socket_path())
}

/// Get the IPC client
pub fn get_client() -> Result<IpcClient> {
    Ok(IpcClient::new(socket_path()?))
}

/// Send a request, starting the daemon if needed; error responses become errors
pub async fn request(request: Request) -> Result<Response> {
    let client = get_client()?;
    debug!("Using daemon socket {}", client.socket_path().display());
    match client.send(&request).await? {
        Response::Error { message } => {
            print_error(&message);
            bail!(message)
        }
        response => Ok(response),
    }
}

pub fn unexpected() -> anyhow::Error {
    print_error("Unexpected response from daemon");
    anyhow!("Unexpected response")
}

/// Local sources and definition paths are sent to the daemon as absolute paths
pub fn absolute_path(path: &str) -> Result<String> {
    if path.is_empty() || path == NO_SOURCE || is_git_url(path) || path.starts_with('~') {
        return Ok(path.to_string());
    }
    let p = PathBuf::from(path);
    if p.is_absolute() {
        return Ok(path.to_string());
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(p).to_string_lossy().to_string())
}

pub fn dry_run_prefix(dry_run: bool) -> &'static str {
    if dry_run {
        "(dry run) "
    } else {
        ""
    }
}
