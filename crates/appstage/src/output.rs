//! Table and JSON output formatting

use appstage_core::{
    AppApplyResponse, AppEntry, AppFile, AppPathDomain, AppReloadResponse, AppVersion,
    ApproveResult, SyncEntry, SyncJobStatus, SyncState,
};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Global flag for JSON output mode
static JSON_MODE: AtomicBool = AtomicBool::new(false);

/// Enable or disable JSON output mode
pub fn set_json_mode(enabled: bool) {
    JSON_MODE.store(enabled, Ordering::SeqCst);
}

/// Check if JSON output mode is enabled
pub fn is_json_mode() -> bool {
    JSON_MODE.load(Ordering::SeqCst)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing to JSON: {}", e),
    }
}

#[derive(Tabled)]
pub struct AppRow {
    #[tabled(rename = "path")]
    pub path: String,
    #[tabled(rename = "type")]
    pub kind: String,
    #[tabled(rename = "version")]
    pub version: String,
    #[tabled(rename = "source")]
    pub source: String,
    #[tabled(rename = "commit")]
    pub commit: String,
    #[tabled(rename = "auth")]
    pub auth: String,
    #[tabled(rename = "approval")]
    pub approval: String,
}

impl From<&AppEntry> for AppRow {
    fn from(entry: &AppEntry) -> Self {
        let kind = if entry.is_dev {
            "dev".cyan().to_string()
        } else if entry.is_stage() {
            "stage".yellow().to_string()
        } else {
            "prod".green().to_string()
        };
        let vm = &entry.metadata.version_metadata;
        let commit = if vm.git_commit.is_empty() {
            "-".to_string()
        } else {
            short_sha(&vm.git_commit)
        };
        let approval = if entry.metadata.loads.is_empty() && entry.metadata.permissions.is_empty()
        {
            "-".to_string()
        } else {
            format!(
                "{} loads, {} perms",
                entry.metadata.loads.len(),
                entry.metadata.permissions.len()
            )
        };

        AppRow {
            path: entry.app_path_domain().to_string(),
            kind,
            version: if entry.is_dev {
                "-".to_string()
            } else {
                entry.version().to_string()
            },
            source: entry.source_url.clone(),
            commit,
            auth: entry.settings.authn_type.to_string(),
            approval,
        }
    }
}

pub fn print_apps(apps: &[AppEntry]) {
    if is_json_mode() {
        print_json(apps);
        return;
    }

    if apps.is_empty() {
        println!("No apps found");
        return;
    }

    let rows: Vec<AppRow> = apps.iter().map(AppRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Print one labeled list of app paths, nothing when empty
pub fn print_paths(label: &str, paths: &[AppPathDomain]) {
    if paths.is_empty() {
        return;
    }
    let joined: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    println!("  {} │ {}", format!("{:<9}", label).bold(), joined.join(", "));
}

pub fn print_approve_results(results: &[ApproveResult]) {
    for result in results {
        if !result.needs_approval {
            continue;
        }
        println!(
            "{} {} needs approval",
            "!".yellow().bold(),
            result.app_path_domain
        );
        for load in &result.new_loads {
            println!("    load       {}", load);
        }
        for perm in &result.new_permissions {
            println!("    permission {}", perm);
        }
    }
}

pub fn print_apply(response: &AppApplyResponse) {
    if is_json_mode() {
        print_json(response);
        return;
    }

    if response.skipped_apply {
        print_info(&format!(
            "No changes since commit {}, apply skipped",
            short_sha(&response.commit_id)
        ));
    }
    print_paths("created", &response.create_results);
    print_paths("updated", &response.update_results);
    print_paths("reloaded", &response.reload_results);
    print_paths("skipped", &response.skipped_results);
    print_paths("promoted", &response.promote_results);
    print_approve_results(&response.approve_results);
    if !response.commit_id.is_empty() && !response.skipped_apply {
        println!("  {} │ {}", format!("{:<9}", "commit").bold(), response.commit_id);
    }
}

pub fn print_reload(response: &AppReloadResponse) {
    if is_json_mode() {
        print_json(response);
        return;
    }

    print_paths("reloaded", &response.reload_results);
    print_paths("skipped", &response.skipped_results);
    print_paths("promoted", &response.promote_results);
    print_approve_results(&response.approve_results);
}

#[derive(Tabled)]
pub struct VersionRow {
    #[tabled(rename = "")]
    pub active: String,
    #[tabled(rename = "version")]
    pub version: i64,
    #[tabled(rename = "previous")]
    pub previous: i64,
    #[tabled(rename = "user")]
    pub user: String,
    #[tabled(rename = "created")]
    pub created: String,
    #[tabled(rename = "commit")]
    pub commit: String,
    #[tabled(rename = "message")]
    pub message: String,
}

impl From<&AppVersion> for VersionRow {
    fn from(v: &AppVersion) -> Self {
        let vm = &v.metadata.version_metadata;
        VersionRow {
            active: if v.active { "*".green().to_string() } else { String::new() },
            version: v.version,
            previous: v.previous_version,
            user: v.user_id.clone(),
            created: format_age(v.create_time, Utc::now()),
            commit: if vm.git_commit.is_empty() {
                "-".to_string()
            } else {
                short_sha(&vm.git_commit)
            },
            message: vm.git_message.lines().next().unwrap_or_default().to_string(),
        }
    }
}

pub fn print_versions(versions: &[AppVersion]) {
    if is_json_mode() {
        print_json(versions);
        return;
    }

    let rows: Vec<VersionRow> = versions.iter().map(VersionRow::from).collect();
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(1)).with(Alignment::right()))
        .to_string();
    println!("{}", table);
}

#[derive(Tabled)]
pub struct FileRow {
    #[tabled(rename = "name")]
    pub name: String,
    #[tabled(rename = "size")]
    pub size: String,
    #[tabled(rename = "sha")]
    pub sha: String,
}

pub fn print_files(version: i64, files: &[AppFile]) {
    if is_json_mode() {
        #[derive(Serialize)]
        struct FilesJson<'a> {
            version: i64,
            files: &'a [AppFile],
        }
        print_json(&FilesJson { version, files });
        return;
    }

    println!("Version {} ({} files)", version, files.len());
    let rows: Vec<FileRow> = files
        .iter()
        .map(|f| FileRow {
            name: f.name.clone(),
            size: format_bytes(f.size.max(0) as u64),
            sha: short_sha(&f.sha),
        })
        .collect();
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(1)).with(Alignment::right()))
        .to_string();
    println!("{}", table);
}

#[derive(Tabled)]
pub struct SyncRow {
    #[tabled(rename = "id")]
    pub id: String,
    #[tabled(rename = "path")]
    pub path: String,
    #[tabled(rename = "schedule")]
    pub schedule: String,
    #[tabled(rename = "state")]
    pub state: String,
    #[tabled(rename = "last run")]
    pub last_run: String,
    #[tabled(rename = "failures")]
    pub failures: u32,
    #[tabled(rename = "commit")]
    pub commit: String,
}

impl From<&SyncEntry> for SyncRow {
    fn from(entry: &SyncEntry) -> Self {
        let status = &entry.status;
        SyncRow {
            id: entry.id.clone(),
            path: entry.path.clone(),
            schedule: if entry.is_scheduled {
                format!("every {}m", entry.metadata.schedule_frequency)
            } else {
                "manual".to_string()
            },
            state: format_state(status.state),
            last_run: status
                .last_execution_time
                .map(|t| format_age(t, Utc::now()))
                .unwrap_or_else(|| "-".to_string()),
            failures: status.failure_count,
            commit: if status.commit_id.is_empty() {
                "-".to_string()
            } else {
                short_sha(&status.commit_id)
            },
        }
    }
}

pub fn print_syncs(entries: &[SyncEntry]) {
    if is_json_mode() {
        print_json(entries);
        return;
    }

    if entries.is_empty() {
        println!("No sync entries");
        return;
    }

    let rows: Vec<SyncRow> = entries.iter().map(SyncRow::from).collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_sync_status(status: &SyncJobStatus) {
    println!("  {} │ {}", format!("{:<9}", "state").bold(), format_state(status.state));
    if !status.error.is_empty() {
        println!("  {} │ {}", format!("{:<9}", "error").bold(), status.error.red());
    }
    print_apply(&status.apply_response);
}

fn format_state(state: SyncState) -> String {
    match state {
        SyncState::Success => "success".green().to_string(),
        SyncState::Failed => "failed".red().bold().to_string(),
        SyncState::Pending => "pending".yellow().to_string(),
    }
}

pub fn short_sha(sha: &str) -> String {
    sha.chars().take(8).collect()
}

/// Time elapsed since `time`, as "5m 2s ago"
pub fn format_age(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(time).num_seconds().max(0) as u64;
    format!("{} ago", format_duration(secs))
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1}G", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1}M", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.0}K", bytes as f64 / 1024.0)
    } else if bytes > 0 {
        format!("{}B", bytes)
    } else {
        "0B".to_string()
    }
}

pub fn format_duration(secs: u64) -> String {
    if secs >= 86400 {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, hours)
    } else if secs >= 3600 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else if secs >= 60 {
        let mins = secs / 60;
        let s = secs % 60;
        format!("{}m {}s", mins, s)
    } else {
        format!("{}s", secs)
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// JSON wrapper for plain message responses
#[derive(Serialize)]
pub struct ResponseJson<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Print a success message, with its data in JSON mode
pub fn print_success_json<T: Serialize>(message: &str, data: Option<T>) {
    if is_json_mode() {
        print_json(&ResponseJson {
            success: true,
            message: Some(message.to_string()),
            data,
        });
    } else {
        print_success(message);
    }
}
