//! IPC Server - Unix socket listener of the daemon

use appstage_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use crate::protocol::{Request, Response};

/// Largest accepted request line (10MB)
const MAX_MESSAGE_SIZE: u64 = 10 * 1024 * 1024;

/// Listening socket; the socket file is removed on drop
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl IpcServer {
    /// Bind to a Unix socket, replacing a stale socket file
    pub async fn bind(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| Error::IpcError(format!("Failed to bind socket: {}", e)))?;

        // Owner-only access: every request runs with the daemon's rights
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::IpcError(format!("Failed to set socket permissions: {}", e)))?;
        }

        info!("IPC server listening on {}", socket_path.display());
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
        })
    }

    pub async fn accept(&self) -> Result<IpcConnection> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::IpcError(format!("Accept failed: {}", e)))?;

        debug!("Accepted IPC connection");
        Ok(IpcConnection::new(stream))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                error!("Failed to remove socket file: {}", e);
            }
        }
    }
}

/// One client connection, carrying any number of request/response pairs
pub struct IpcConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl IpcConnection {
    pub fn new(stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Next request, `None` once the client hangs up
    pub async fn read_request(&mut self) -> Result<Option<Request>> {
        let mut line = String::new();
        let read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE)
            .read_line(&mut line)
            .await
            .map_err(|e| Error::IpcError(format!("Read error: {}", e)))?;
        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && read as u64 >= MAX_MESSAGE_SIZE {
            return Err(Error::IpcError(format!(
                "Request exceeds {} bytes",
                MAX_MESSAGE_SIZE
            )));
        }

        let request: Request = serde_json::from_str(line.trim())
            .map_err(|e| Error::IpcError(format!("Invalid request: {}", e)))?;
        debug!("Received request: {:?}", request);
        Ok(Some(request))
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<()> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| Error::IpcError(format!("Write error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::IpcError(format!("Flush error: {}", e)))?;

        debug!("Sent response: {:?}", response);
        Ok(())
    }
}
