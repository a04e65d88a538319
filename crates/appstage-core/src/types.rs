//! Core types for appstage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::constants::*;
use crate::error::{Error, Result};

/// String key/value configuration map
pub type ConfigMap = BTreeMap<String, String>;

/// Opaque app identifier, prefixed by role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AppId(pub String);

impl AppId {
    /// Generate a fresh id for a production or dev app
    pub fn generate(is_dev: bool) -> Self {
        let prefix = if is_dev { ID_PREFIX_DEV } else { ID_PREFIX_PROD };
        AppId(format!("{}{}", prefix, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_prod(&self) -> bool {
        self.0.starts_with(ID_PREFIX_PROD)
    }

    pub fn is_stage(&self) -> bool {
        self.0.starts_with(ID_PREFIX_STAGE)
    }

    pub fn is_dev(&self) -> bool {
        self.0.starts_with(ID_PREFIX_DEV)
    }

    /// Staging id derived from a production id, keeping the random suffix
    pub fn stage_id(&self) -> Result<AppId> {
        self.0
            .strip_prefix(ID_PREFIX_PROD)
            .map(|rest| AppId(format!("{}{}", ID_PREFIX_STAGE, rest)))
            .ok_or_else(|| Error::consistency(format!("{} is not a production app id", self.0)))
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        AppId(s.to_string())
    }
}

/// Unique (domain, path) key of an app
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct AppPathDomain {
    #[serde(default)]
    pub domain: String,
    pub path: String,
}

impl AppPathDomain {
    pub fn new(domain: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            path: path.into(),
        }
    }

    /// Key of the linked staging app
    pub fn stage_path(&self) -> AppPathDomain {
        AppPathDomain::new(self.domain.clone(), format!("{}{}", self.path, STAGE_SUFFIX))
    }
}

impl std::fmt::Display for AppPathDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.domain, self.path)
        }
    }
}

/// Authentication applied to requests for an app
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppAuthnType {
    #[default]
    Default,
    None,
    System,
}

impl AppAuthnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppAuthnType::Default => "default",
            AppAuthnType::None => "none",
            AppAuthnType::System => "system",
        }
    }
}

impl FromStr for AppAuthnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "" | "default" => Ok(AppAuthnType::Default),
            "none" => Ok(AppAuthnType::None),
            "system" => Ok(AppAuthnType::System),
            _ => Err(Error::config(format!("Invalid authentication type: {}", s))),
        }
    }
}

impl std::fmt::Display for AppAuthnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-versioned app settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub authn_type: AppAuthnType,
    #[serde(default)]
    pub git_auth_name: String,
    #[serde(default)]
    pub stage_write_access: bool,
    #[serde(default)]
    pub preview_write_access: bool,
}

/// Metadata that is versioned and replaced wholesale on promotion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VersionMetadata {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub previous_version: i64,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub git_commit_requested: String,
    #[serde(default)]
    pub git_message: String,
}

/// A capability the app uses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Permission {
    pub plugin: String,
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.plugin, self.method)?;
        if !self.arguments.is_empty() {
            write!(f, "({})", self.arguments.join(", "))?;
        }
        Ok(())
    }
}

/// Link between a plugin and an account name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountLink {
    pub plugin: String,
    pub account_name: String,
}

/// Full metadata record of an app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version_metadata: VersionMetadata,
    #[serde(default)]
    pub apply_info: Option<CreateAppRequest>,
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub param_values: ConfigMap,
    #[serde(default)]
    pub app_config: ConfigMap,
    #[serde(default)]
    pub container_options: ConfigMap,
    #[serde(default)]
    pub container_args: ConfigMap,
    #[serde(default)]
    pub container_volumes: Vec<String>,
    #[serde(default)]
    pub loads: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub accounts: Vec<AccountLink>,
}

/// One logical app deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppEntry {
    pub id: AppId,
    pub path: String,
    #[serde(default)]
    pub domain: String,
    pub source_url: String,
    #[serde(default)]
    pub is_dev: bool,
    #[serde(default)]
    pub main_app: AppId,
    #[serde(default)]
    pub user_id: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub settings: AppSettings,
    #[serde(default)]
    pub metadata: AppMetadata,
}

impl AppEntry {
    pub fn app_path_domain(&self) -> AppPathDomain {
        AppPathDomain::new(self.domain.clone(), self.path.clone())
    }

    pub fn is_stage(&self) -> bool {
        self.id.is_stage()
    }

    pub fn version(&self) -> i64 {
        self.metadata.version_metadata.version
    }

    pub fn is_git_source(&self) -> bool {
        is_git_url(&self.source_url)
    }
}

/// Whether a source location refers to a git repository rather than a local path
pub fn is_git_url(url: &str) -> bool {
    if url.is_empty() || url.starts_with('/') || url.starts_with('.') || url.starts_with('~') {
        return false;
    }
    if url.starts_with("git@") || url.starts_with("http://") || url.starts_with("https://") {
        return true;
    }
    let parts: Vec<&str> = url.split('/').collect();
    parts.len() >= 3 && parts[0].contains('.')
}

/// Desired state of one app, as declared or requested
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CreateAppRequest {
    #[serde(default, alias = "source")]
    pub source_url: String,
    #[serde(default, alias = "dev")]
    pub is_dev: bool,
    #[serde(default, alias = "auth")]
    pub app_authn: AppAuthnType,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default, alias = "git_auth")]
    pub git_auth_name: String,
    #[serde(default)]
    pub spec: String,
    #[serde(default, alias = "params")]
    pub param_values: ConfigMap,
    #[serde(default)]
    pub app_config: ConfigMap,
    #[serde(default)]
    pub container_options: ConfigMap,
    #[serde(default)]
    pub container_args: ConfigMap,
    #[serde(default)]
    pub container_volumes: Vec<String>,
}

/// Outcome of auditing an app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApproveResult {
    pub id: AppId,
    pub app_path_domain: AppPathDomain,
    pub new_loads: Vec<String>,
    pub new_permissions: Vec<Permission>,
    pub approved_loads: Vec<String>,
    pub approved_permissions: Vec<Permission>,
    pub needs_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppCreateResponse {
    pub dry_run: bool,
    pub approve_results: Vec<ApproveResult>,
}

/// Result of reloading a single app
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppReloadResult {
    pub reload_results: Vec<AppPathDomain>,
    pub skipped_results: Vec<AppPathDomain>,
    pub approve_result: Option<ApproveResult>,
    pub promote_results: Vec<AppPathDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppReloadResponse {
    pub dry_run: bool,
    pub reload_results: Vec<AppPathDomain>,
    pub skipped_results: Vec<AppPathDomain>,
    pub approve_results: Vec<ApproveResult>,
    pub promote_results: Vec<AppPathDomain>,
}

impl AppReloadResponse {
    pub fn add(&mut self, result: AppReloadResult) {
        self.reload_results.extend(result.reload_results);
        self.skipped_results.extend(result.skipped_results);
        self.approve_results.extend(result.approve_result);
        self.promote_results.extend(result.promote_results);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppPromoteResponse {
    pub dry_run: bool,
    pub promote_results: Vec<AppPathDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppDeleteResponse {
    pub dry_run: bool,
    pub delete_results: Vec<AppPathDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppStagedUpdateResponse {
    pub dry_run: bool,
    pub staged_update_results: Vec<AppPathDomain>,
    pub approve_results: Vec<ApproveResult>,
    pub promote_results: Vec<AppPathDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppSettingsResponse {
    pub dry_run: bool,
    pub updated: Vec<AppPathDomain>,
}

/// Evidence of what one reconciliation pass did
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppApplyResponse {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub create_results: Vec<AppPathDomain>,
    #[serde(default)]
    pub update_results: Vec<AppPathDomain>,
    #[serde(default)]
    pub approve_results: Vec<ApproveResult>,
    #[serde(default)]
    pub promote_results: Vec<AppPathDomain>,
    #[serde(default)]
    pub reload_results: Vec<AppPathDomain>,
    #[serde(default)]
    pub skipped_results: Vec<AppPathDomain>,
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub skipped_apply: bool,
    #[serde(default)]
    pub filtered_apps: Vec<AppPathDomain>,
}

/// Which apps an apply pass reloads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadOption {
    None,
    #[default]
    Updated,
    Matched,
}

impl ReloadOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReloadOption::None => "none",
            ReloadOption::Updated => "updated",
            ReloadOption::Matched => "matched",
        }
    }
}

impl FromStr for ReloadOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ReloadOption::None),
            "" | "updated" => Ok(ReloadOption::Updated),
            "matched" => Ok(ReloadOption::Matched),
            _ => Err(Error::config(format!(
                "Invalid reload option: {}. Expected none, updated or matched",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ReloadOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller options for an apply pass
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApplyOptions {
    #[serde(default)]
    pub approve: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub promote: bool,
    #[serde(default)]
    pub reload: ReloadOption,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub git_auth: String,
    #[serde(default)]
    pub clobber: bool,
    #[serde(default)]
    pub force_reload: bool,
}

/// Mergeable metadata section targeted by a metadata update
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    ContainerOptions,
    ContainerArgs,
    ContainerVolumes,
    AppConfig,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::ContainerOptions => "container_options",
            ConfigType::ContainerArgs => "container_args",
            ConfigType::ContainerVolumes => "container_volumes",
            ConfigType::AppConfig => "app_config",
        }
    }
}

impl FromStr for ConfigType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "container_options" | "copt" => Ok(ConfigType::ContainerOptions),
            "container_args" | "carg" => Ok(ConfigType::ContainerArgs),
            "container_volumes" | "cvol" => Ok(ConfigType::ContainerVolumes),
            "app_config" | "conf" => Ok(ConfigType::AppConfig),
            _ => Err(Error::config(format!("Invalid config type: {}", s))),
        }
    }
}

/// A versioned change applied to staging before optional promotion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagedUpdate {
    Audit { approve: bool },
    AccountLink { plugin: String, account_name: String },
    UpdateParam { key: String, value: String },
    UpdateMetadata { config_type: ConfigType, entries: Vec<String> },
}

impl StagedUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            StagedUpdate::Audit { .. } => "approve",
            StagedUpdate::AccountLink { .. } => "account_link",
            StagedUpdate::UpdateParam { .. } => "update_param",
            StagedUpdate::UpdateMetadata { .. } => "update_metadata",
        }
    }
}

/// Requested settings change; unset fields are left alone
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub authn_type: Option<AppAuthnType>,
    #[serde(default)]
    pub git_auth_name: Option<String>,
    #[serde(default)]
    pub stage_write_access: Option<bool>,
    #[serde(default)]
    pub preview_write_access: Option<bool>,
}

/// One stored version of an app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppVersion {
    pub version: i64,
    pub previous_version: i64,
    pub user_id: String,
    pub create_time: DateTime<Utc>,
    pub metadata: AppMetadata,
    #[serde(default)]
    pub active: bool,
}

/// One file of a stored version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppFile {
    pub name: String,
    pub sha: String,
    pub size: i64,
}

/// Target of a version switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionTarget {
    Previous,
    Next,
    Revert,
    Version(i64),
}

impl FromStr for VersionTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "previous" => Ok(VersionTarget::Previous),
            "next" => Ok(VersionTarget::Next),
            "revert" => Ok(VersionTarget::Revert),
            other => other
                .parse::<i64>()
                .map(VersionTarget::Version)
                .map_err(|_| Error::InvalidVersion(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VersionSwitchResponse {
    pub dry_run: bool,
    pub from_version: i64,
    pub to_version: i64,
}

/// Settings of a sync entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncMetadata {
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub git_auth: String,
    #[serde(default)]
    pub promote: bool,
    #[serde(default)]
    pub approve: bool,
    #[serde(default)]
    pub reload: ReloadOption,
    #[serde(default)]
    pub clobber: bool,
    #[serde(default)]
    pub force_reload: bool,
    #[serde(default)]
    pub schedule_frequency: i64,
}

/// Outcome state of the last sync run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Pending,
    Success,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Success => "success",
            SyncState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of the last sync run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncJobStatus {
    #[serde(default)]
    pub last_execution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub state: SyncState,
    #[serde(default)]
    pub apply_response: AppApplyResponse,
}

/// A recurring apply job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEntry {
    pub id: String,
    pub path: String,
    pub is_scheduled: bool,
    #[serde(default)]
    pub user_id: String,
    pub create_time: DateTime<Utc>,
    pub metadata: SyncMetadata,
    #[serde(default)]
    pub status: SyncJobStatus,
}

impl SyncEntry {
    /// Whether the entry should run at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_scheduled || self.metadata.schedule_frequency <= 0 {
            return false;
        }
        match self.status.last_execution_time {
            None => true,
            Some(last) => {
                now.signed_duration_since(last).num_minutes() >= self.metadata.schedule_frequency
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncCreateResponse {
    pub id: String,
    pub dry_run: bool,
    pub schedule_frequency: i64,
    pub status: SyncJobStatus,
}
