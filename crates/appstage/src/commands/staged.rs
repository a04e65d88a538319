//! Staged updates (params, config, account links) and settings changes

use anyhow::Result;
use appstage_core::{SettingsUpdate, StagedUpdate};
use appstage_ipc::{Request, Response};

use super::{dry_run_prefix, request, unexpected};
use crate::cli::{AccountCommand, ConfigCommand, ParamCommand, SettingsCommand, StageArgs};
use crate::output::{
    is_json_mode, print_approve_results, print_info, print_json, print_paths, print_success,
};

pub async fn param(command: ParamCommand) -> Result<()> {
    match command {
        ParamCommand::Set { key, value, stage } => {
            staged_update(stage, StagedUpdate::UpdateParam { key, value }).await
        }
    }
}

pub async fn config(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Set {
            config_type,
            entries,
            stage,
        } => staged_update(stage, StagedUpdate::UpdateMetadata { config_type, entries }).await,
    }
}

pub async fn account(command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Link {
            plugin,
            account,
            stage,
        } => {
            let update = StagedUpdate::AccountLink {
                plugin,
                account_name: account,
            };
            staged_update(stage, update).await
        }
    }
}

async fn staged_update(stage: StageArgs, update: StagedUpdate) -> Result<()> {
    let name = update.name();
    let response = request(Request::StagedUpdate {
        glob: stage.glob,
        dry_run: stage.dry_run,
        promote: stage.promote,
        update,
    })
    .await?;

    match response {
        Response::StagedUpdated(updated) => {
            if is_json_mode() {
                print_json(&updated);
                return Ok(());
            }
            if updated.staged_update_results.is_empty() {
                print_info("No apps matched");
                return Ok(());
            }
            print_success(&format!(
                "{}Applied {} to {} app(s)",
                dry_run_prefix(updated.dry_run),
                name,
                updated.staged_update_results.len()
            ));
            print_paths("staged", &updated.staged_update_results);
            print_paths("promoted", &updated.promote_results);
            print_approve_results(&updated.approve_results);
            Ok(())
        }
        _ => Err(unexpected()),
    }
}

pub async fn settings(command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Update {
            glob,
            auth,
            git_auth,
            stage_write_access,
            preview_write_access,
            dry_run,
        } => {
            let update = SettingsUpdate {
                authn_type: auth,
                git_auth_name: git_auth,
                stage_write_access,
                preview_write_access,
            };
            if update == SettingsUpdate::default() {
                anyhow::bail!("No settings to update");
            }

            match request(Request::UpdateSettings {
                glob,
                dry_run,
                update,
            })
            .await?
            {
                Response::SettingsUpdated(updated) => {
                    if is_json_mode() {
                        print_json(&updated);
                        return Ok(());
                    }
                    print_success(&format!(
                        "{}Updated settings of {} app(s)",
                        dry_run_prefix(updated.dry_run),
                        updated.updated.len()
                    ));
                    print_paths("updated", &updated.updated);
                    Ok(())
                }
                _ => Err(unexpected()),
            }
        }
    }
}
