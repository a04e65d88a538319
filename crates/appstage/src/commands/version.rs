//! Version list, files and switch commands

use anyhow::Result;
use appstage_ipc::{Request, Response};

use super::{dry_run_prefix, request, unexpected};
use crate::cli::VersionCommand;
use crate::output::{is_json_mode, print_files, print_json, print_success, print_versions};

pub async fn execute(command: VersionCommand) -> Result<()> {
    match command {
        VersionCommand::List { path } => match request(Request::VersionList { path }).await? {
            Response::Versions { versions } => {
                print_versions(&versions);
                Ok(())
            }
            _ => Err(unexpected()),
        },

        VersionCommand::Files { path, version } => {
            match request(Request::VersionFiles { path, version }).await? {
                Response::Files { version, files } => {
                    print_files(version, &files);
                    Ok(())
                }
                _ => Err(unexpected()),
            }
        }

        VersionCommand::Switch {
            path,
            target,
            dry_run,
        } => {
            let response = request(Request::VersionSwitch {
                path: path.clone(),
                dry_run,
                target,
            })
            .await?;
            match response {
                Response::VersionSwitched(switched) => {
                    if is_json_mode() {
                        print_json(&switched);
                        return Ok(());
                    }
                    print_success(&format!(
                        "{}Switched {} from version {} to {}",
                        dry_run_prefix(switched.dry_run),
                        path,
                        switched.from_version,
                        switched.to_version
                    ));
                    Ok(())
                }
                _ => Err(unexpected()),
            }
        }
    }
}
