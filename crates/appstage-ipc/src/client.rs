//! IPC Client - Unix socket client used by the CLI

use appstage_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::protocol::{Request, Response};

const DAEMON_BINARY: &str = "appstaged";

/// IPC Client for CLI communication with daemon
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect to daemon (without auto-start)
    pub async fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(Error::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    Error::DaemonNotRunning
                }
                _ => Error::IpcConnectionFailed(e.to_string()),
            })
    }

    /// Connect to daemon, starting it if necessary
    pub async fn connect_or_start(&self) -> Result<UnixStream> {
        match self.connect().await {
            Ok(stream) => Ok(stream),
            Err(Error::DaemonNotRunning) => {
                info!("Daemon not running, starting...");
                self.start_daemon()?;

                // Wait for daemon to be ready (up to 5 seconds)
                for i in 0..50 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if let Ok(stream) = self.connect().await {
                        info!("Connected to daemon after {}ms", (i + 1) * 100);
                        return Ok(stream);
                    }
                }

                Err(Error::IpcError(
                    "Daemon failed to start within timeout".to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Spawn the daemon binary installed next to the CLI, else from PATH
    pub fn start_daemon(&self) -> Result<()> {
        let exe = std::env::current_exe()?;
        let exe_dir = exe.parent().ok_or_else(|| {
            Error::IpcError("Cannot determine executable directory".to_string())
        })?;

        let daemon_path = exe_dir.join(DAEMON_BINARY);
        let daemon_exe = if daemon_path.exists() {
            daemon_path
        } else {
            warn!(
                "{} not found at {}, trying PATH",
                DAEMON_BINARY,
                daemon_path.display()
            );
            PathBuf::from(DAEMON_BINARY)
        };

        info!("Starting daemon: {}", daemon_exe.display());
        Command::new(&daemon_exe)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::IpcError(format!("Failed to start daemon: {}", e)))?;

        Ok(())
    }

    /// Send a request, starting the daemon when needed
    pub async fn send(&self, request: &Request) -> Result<Response> {
        let stream = self.connect_or_start().await?;
        exchange(stream, request).await
    }

    /// Send a request to an already running daemon
    pub async fn send_existing(&self, request: &Request) -> Result<Response> {
        let stream = self.connect().await?;
        exchange(stream, request).await
    }

    /// Ping the daemon without starting it
    pub async fn ping(&self) -> Result<bool> {
        match self.send_existing(&Request::Ping).await {
            Ok(Response::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(Error::DaemonNotRunning) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

async fn exchange(mut stream: UnixStream, request: &Request) -> Result<Response> {
    let mut json = serde_json::to_string(request)?;
    json.push('\n');

    stream
        .write_all(json.as_bytes())
        .await
        .map_err(|e| Error::IpcError(format!("Write error: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::IpcError(format!("Flush error: {}", e)))?;
    debug!("Sent request: {:?}", request);

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| Error::IpcError(format!("Read error: {}", e)))?;
    if read == 0 {
        return Err(Error::IpcError(
            "Daemon closed the connection without a response".to_string(),
        ));
    }

    let response: Response = serde_json::from_str(line.trim())
        .map_err(|e| Error::IpcError(format!("Invalid response: {}", e)))?;
    debug!("Received response: {:?}", response);
    Ok(response)
}
