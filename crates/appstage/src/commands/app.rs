//! App lifecycle commands: create, list, delete, reload, promote, approve

use anyhow::Result;
use appstage_core::{CreateAppRequest, StagedUpdate};
use appstage_ipc::{Request, Response};

use super::{absolute_path, dry_run_prefix, request, unexpected};
use crate::cli::{AppCommand, CreateArgs, ReloadArgs};
use crate::output::{
    is_json_mode, print_approve_results, print_apps, print_info, print_json, print_paths,
    print_reload, print_success,
};

pub async fn execute(command: AppCommand) -> Result<()> {
    match command {
        AppCommand::Create(args) => create(args).await,
        AppCommand::List { glob, internal } => list(glob, internal).await,
        AppCommand::Delete { glob, dry_run } => delete(glob, dry_run).await,
        AppCommand::Reload(args) => reload(args).await,
        AppCommand::Promote { glob, dry_run } => promote(glob, dry_run).await,
        AppCommand::Approve {
            glob,
            dry_run,
            promote,
        } => approve(glob, dry_run, promote).await,
    }
}

async fn create(args: CreateArgs) -> Result<()> {
    let request_body = CreateAppRequest {
        source_url: absolute_path(&args.source)?,
        is_dev: args.dev,
        app_authn: args.auth,
        git_branch: args.branch,
        git_commit: args.commit,
        git_auth_name: args.git_auth,
        spec: args.spec,
        param_values: args.params.into_iter().collect(),
        ..Default::default()
    };

    let response = request(Request::CreateApp {
        path: args.path.clone(),
        approve: args.approve,
        dry_run: args.dry_run,
        request: request_body,
    })
    .await?;

    match response {
        Response::Created(created) => {
            if is_json_mode() {
                print_json(&created);
                return Ok(());
            }
            print_success(&format!(
                "{}App {} created",
                dry_run_prefix(created.dry_run),
                args.path
            ));
            print_approve_results(&created.approve_results);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}

async fn list(glob: String, internal: bool) -> Result<()> {
    match request(Request::ListApps { glob, internal }).await? {
        Response::Apps { apps } => {
            print_apps(&apps);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}

async fn delete(glob: String, dry_run: bool) -> Result<()> {
    match request(Request::DeleteApps { glob, dry_run }).await? {
        Response::Deleted(deleted) => {
            if is_json_mode() {
                print_json(&deleted);
                return Ok(());
            }
            if deleted.delete_results.is_empty() {
                print_info("No apps matched");
            } else {
                print_success(&format!(
                    "{}Deleted {} app(s)",
                    dry_run_prefix(deleted.dry_run),
                    deleted.delete_results.len()
                ));
                print_paths("deleted", &deleted.delete_results);
            }
            Ok(())
        }
        _ => Err(unexpected()),
    }
}

async fn reload(args: ReloadArgs) -> Result<()> {
    let response = request(Request::Reload {
        glob: args.glob,
        approve: args.approve,
        dry_run: args.dry_run,
        promote: args.promote,
        branch: args.branch,
        commit: args.commit,
        git_auth: args.git_auth,
        force_reload: args.force_reload,
    })
    .await?;

    match response {
        Response::Reloaded(reloaded) => {
            if !is_json_mode() {
                print_success(&format!(
                    "{}Reloaded {} app(s)",
                    dry_run_prefix(reloaded.dry_run),
                    reloaded.reload_results.len()
                ));
            }
            print_reload(&reloaded);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}

async fn promote(glob: String, dry_run: bool) -> Result<()> {
    match request(Request::Promote { glob, dry_run }).await? {
        Response::Promoted(promoted) => {
            if is_json_mode() {
                print_json(&promoted);
                return Ok(());
            }
            if promoted.promote_results.is_empty() {
                print_info("Nothing to promote");
            } else {
                print_success(&format!(
                    "{}Promoted {} app(s)",
                    dry_run_prefix(promoted.dry_run),
                    promoted.promote_results.len()
                ));
                print_paths("promoted", &promoted.promote_results);
            }
            Ok(())
        }
        _ => Err(unexpected()),
    }
}

async fn approve(glob: String, dry_run: bool, promote: bool) -> Result<()> {
    let response = request(Request::StagedUpdate {
        glob,
        dry_run,
        promote,
        update: StagedUpdate::Audit { approve: true },
    })
    .await?;

    match response {
        Response::StagedUpdated(updated) => {
            if is_json_mode() {
                print_json(&updated);
                return Ok(());
            }
            print_success(&format!(
                "{}Approved {} app(s)",
                dry_run_prefix(updated.dry_run),
                updated.staged_update_results.len()
            ));
            print_paths("approved", &updated.staged_update_results);
            print_paths("promoted", &updated.promote_results);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}
