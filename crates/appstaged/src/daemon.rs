//! Main daemon orchestration

use appstage_core::{Result, ServerConfig};
use appstage_db::Database;
use appstage_ipc::{IpcConnection, IpcServer};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::handlers::RequestHandler;
use crate::server::Server;

/// Main daemon struct
pub struct Daemon {
    ipc: IpcServer,
    server: Arc<Server>,
    handler: RequestHandler,
    shutdown: Arc<Notify>,
}

impl Daemon {
    /// Open the database and bind the socket named by the config
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::new(&db_path).await?;
        info!("Database initialized at {}", db_path.display());

        let socket_path = config.socket_path();
        let server = Arc::new(Server::new(db, config));
        let ipc = IpcServer::bind(&socket_path).await?;

        let shutdown = Arc::new(Notify::new());
        let handler = RequestHandler::new(server.clone(), shutdown.clone());
        Ok(Self {
            ipc,
            server,
            handler,
            shutdown,
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Serve connections until a shutdown request arrives
    pub async fn run(&self) -> Result<()> {
        let runner = tokio::spawn(self.server.clone().sync_runner());
        info!("Daemon running, waiting for connections...");

        tokio::select! {
            _ = self.accept_loop() => {}
            _ = self.shutdown.notified() => {
                info!("Shutdown request received");
            }
        }

        runner.abort();
        Ok(())
    }

    async fn accept_loop(&self) {
        loop {
            match self.ipc.accept().await {
                Ok(conn) => {
                    let handler = self.handler.clone();
                    tokio::spawn(serve_connection(conn, handler));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Close loaded apps and the database
    pub async fn close(&self) {
        self.server.close_apps().await;
        self.server.db().close().await;
    }
}

async fn serve_connection(mut conn: IpcConnection, handler: RequestHandler) {
    loop {
        match conn.read_request().await {
            Ok(Some(request)) => {
                let response = handler.handle(request).await;
                if let Err(e) = conn.send_response(&response).await {
                    error!("Failed to send response: {}", e);
                    break;
                }
            }
            // connection closed
            Ok(None) => break,
            Err(e) => {
                error!("Error reading request: {}", e);
                break;
            }
        }
    }
}
