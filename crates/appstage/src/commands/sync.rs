//! Sync entry commands

use anyhow::Result;
use appstage_core::SyncMetadata;
use appstage_ipc::{Request, Response};

use super::{absolute_path, dry_run_prefix, request, unexpected};
use crate::cli::{SyncCommand, SyncCreateArgs};
use crate::output::{
    is_json_mode, print_json, print_success, print_success_json, print_sync_status, print_syncs,
};

pub async fn execute(command: SyncCommand) -> Result<()> {
    match command {
        SyncCommand::Create(args) => create(args).await,

        SyncCommand::List => match request(Request::SyncList).await? {
            Response::Syncs { entries } => {
                print_syncs(&entries);
                Ok(())
            }
            _ => Err(unexpected()),
        },

        SyncCommand::Delete { id, dry_run } => {
            match request(Request::SyncDelete { id, dry_run }).await? {
                Response::SyncDeleted { id, dry_run } => {
                    print_success_json(
                        &format!("{}Deleted sync {}", dry_run_prefix(dry_run), id),
                        Some(id.clone()),
                    );
                    Ok(())
                }
                _ => Err(unexpected()),
            }
        }

        SyncCommand::Run { id } => match request(Request::SyncRun { id }).await? {
            Response::SyncRan { entry } => {
                if is_json_mode() {
                    print_json(&entry);
                    return Ok(());
                }
                print_success(&format!("Ran sync {}", entry.id));
                print_sync_status(&entry.status);
                Ok(())
            }
            _ => Err(unexpected()),
        },
    }
}

async fn create(args: SyncCreateArgs) -> Result<()> {
    let metadata = SyncMetadata {
        git_branch: args.branch,
        git_auth: args.git_auth,
        promote: args.promote,
        approve: args.approve,
        reload: args.reload,
        clobber: args.clobber,
        force_reload: args.force_reload,
        schedule_frequency: args.minutes,
    };

    let response = request(Request::SyncCreate {
        path: absolute_path(&args.path)?,
        scheduled: args.scheduled,
        dry_run: args.dry_run,
        metadata,
    })
    .await?;

    match response {
        Response::SyncCreated(created) => {
            if is_json_mode() {
                print_json(&created);
                return Ok(());
            }
            let schedule = if args.scheduled {
                format!(", every {} minutes", created.schedule_frequency)
            } else {
                String::new()
            };
            print_success(&format!(
                "{}Created sync {}{}",
                dry_run_prefix(created.dry_run),
                created.id,
                schedule
            ));
            print_sync_status(&created.status);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}
