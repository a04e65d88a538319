//! Daemon control commands

use anyhow::Result;
use appstage_core::Error;
use appstage_ipc::{Request, Response};
use serde::Serialize;

use super::{get_client, unexpected};
use crate::cli::DaemonCommand;
use crate::output::{is_json_mode, print_error, print_info, print_json, print_success};

#[derive(Serialize)]
struct DaemonStatus {
    running: bool,
    socket_path: String,
}

pub async fn execute(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => start().await,
        DaemonCommand::Stop => stop().await,
        DaemonCommand::Status => status().await,
    }
}

async fn start() -> Result<()> {
    let client = get_client()?;
    if client.ping().await? {
        print_info("Daemon is already running");
        return Ok(());
    }
    client.connect_or_start().await?;
    print_success("Daemon started");
    Ok(())
}

async fn stop() -> Result<()> {
    let client = get_client()?;
    match client.send_existing(&Request::Shutdown).await {
        Ok(Response::Ok { message }) => {
            print_success(&message);
            Ok(())
        }
        Ok(Response::Error { message }) => {
            print_error(&message);
            anyhow::bail!(message)
        }
        Ok(_) => Err(unexpected()),
        Err(Error::DaemonNotRunning) => {
            print_info("Daemon is not running");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn status() -> Result<()> {
    let client = get_client()?;
    let running = client.ping().await?;
    let socket_path = client.socket_path().display().to_string();

    if is_json_mode() {
        print_json(&DaemonStatus {
            running,
            socket_path,
        });
    } else if running {
        print_success(&format!("Daemon is running ({})", socket_path));
    } else {
        print_info(&format!("Daemon is not running ({})", socket_path));
    }
    Ok(())
}
