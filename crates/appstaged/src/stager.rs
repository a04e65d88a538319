//! Staging state machine: create, load, audit, reload and promote
//!
//! Every non-dev app is a production entry plus a linked staging entry.
//! Source changes and staged updates land on the staging entry as a new
//! version; promotion copies staging's metadata and version onto
//! production. Dev apps have no staging entry and read from disk.

use appstage_core::{
    is_git_url, parse_app_path, validate_path_for_create, AccountLink, AppCreateResponse,
    AppDeleteResponse, AppEntry, AppId, AppMetadata, AppPathDomain, AppPromoteResponse,
    AppReloadResponse, AppReloadResult, AppSettings, AppSettingsResponse,
    AppStagedUpdateResponse, ApproveResult, ConfigType, CreateAppRequest, Error, Result,
    SettingsUpdate, StagedUpdate, VersionMetadata, ADMIN_USER, DEFAULT_GIT_BRANCH, NO_SOURCE,
    STAR_BASE_KEY,
};
use appstage_db::VersionStore;
use appstage_git::RepoCache;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::server::{Operation, Server};

/// Options of a reload
#[derive(Debug, Clone, Default)]
pub struct ReloadParams {
    pub approve: bool,
    pub promote: bool,
    pub branch: String,
    pub commit: String,
    pub git_auth: String,
    pub force_reload: bool,
}

impl Server {
    /// Create an app at `path` and load its first version
    pub async fn create_app(
        &self,
        path: &str,
        approve: bool,
        dry_run: bool,
        request: CreateAppRequest,
    ) -> Result<AppCreateResponse> {
        let apd = parse_app_path(path)?;
        let mut cache = self.repo_cache()?;

        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        let response = self
            .create_app_tx(&mut op, &mut cache, &apd, approve, dry_run, request)
            .await?;
        let paths = [apd.stage_path(), apd];
        self.complete_transaction(op, &paths, dry_run).await?;
        Ok(response)
    }

    pub(crate) async fn create_app_tx(
        &self,
        op: &mut Operation,
        cache: &mut RepoCache,
        apd: &AppPathDomain,
        approve: bool,
        dry_run: bool,
        mut request: CreateAppRequest,
    ) -> Result<AppCreateResponse> {
        validate_path_for_create(&apd.path)?;
        if self.db.apps().get(&mut op.tx, apd).await?.is_some() {
            return Err(Error::AppAlreadyExists(apd.to_string()));
        }
        normalize_request(&mut request)?;

        let now = Utc::now();
        let mut prod = AppEntry {
            id: AppId::generate(request.is_dev),
            path: apd.path.clone(),
            domain: apd.domain.clone(),
            source_url: request.source_url.clone(),
            is_dev: request.is_dev,
            main_app: AppId::default(),
            user_id: ADMIN_USER.to_string(),
            create_time: now,
            update_time: now,
            settings: AppSettings {
                authn_type: request.app_authn,
                git_auth_name: request.git_auth_name.clone(),
                stage_write_access: self.config.security.stage_enable_write_access,
                preview_write_access: false,
            },
            metadata: AppMetadata {
                version_metadata: VersionMetadata {
                    git_branch: request.git_branch.clone(),
                    git_commit_requested: request.git_commit.clone(),
                    ..Default::default()
                },
                spec: request.spec.clone(),
                param_values: request.param_values.clone(),
                app_config: request.app_config.clone(),
                container_options: request.container_options.clone(),
                container_args: request.container_args.clone(),
                container_volumes: request.container_volumes.clone(),
                apply_info: Some(request.clone()),
                ..Default::default()
            },
        };
        self.db.apps().insert(&mut op.tx, &prod).await?;

        let mut work = if prod.is_dev {
            prod.clone()
        } else {
            let mut stage = prod.clone();
            stage.id = prod.id.stage_id()?;
            stage.path = apd.stage_path().path;
            stage.main_app = prod.id.clone();
            stage.metadata.version_metadata.version = 1;
            self.db.apps().insert(&mut op.tx, &stage).await?;
            stage
        };

        if work.is_git_source() {
            let source = work.source_url.clone();
            self.load_source_from_git(
                op,
                cache,
                &mut work,
                &request.git_branch,
                &request.git_commit,
                &request.git_auth_name,
            )
            .await
            .map_err(|e| {
                Error::git(format!(
                    "failed to load source {} from git: {}. Use --git-auth for private repos, \
                     --branch to change branch",
                    source, e
                ))
            })?;
        } else if !work.is_dev {
            self.load_source_from_disk(op, &mut work).await?;
        }

        let mut approve_results = vec![self.audit_app(op, &mut work, approve).await?];
        self.db.apps().update_settings(&mut op.tx, &work).await?;

        if !work.is_dev {
            self.promote_app(op, &work, &mut prod).await?;
            approve_results.push(self.audit_app(op, &mut prod, approve).await?);
        }

        info!("Created app {} ({})", apd, prod.id);
        Ok(AppCreateResponse {
            dry_run,
            approve_results,
        })
    }

    /// Snapshot a git checkout of the app's source as a new version
    pub(crate) async fn load_source_from_git(
        &self,
        op: &mut Operation,
        cache: &mut RepoCache,
        work: &mut AppEntry,
        branch: &str,
        commit: &str,
        git_auth: &str,
    ) -> Result<()> {
        let git_auth = non_empty(git_auth, &work.settings.git_auth_name).to_string();
        let branch = resolve_branch(branch, &work.metadata.version_metadata.git_branch);
        let checkout = cache
            .checkout_repo(&work.source_url, &branch, commit, &git_auth)
            .await?;

        let vm = &mut work.metadata.version_metadata;
        vm.git_commit = checkout.hash.clone();
        vm.git_message = checkout.commit_message.clone();
        vm.git_branch = branch;
        vm.git_commit_requested = commit.to_string();
        work.settings.git_auth_name = git_auth;

        VersionStore::new(work.id.clone())
            .add_app_version(&mut op.tx, &mut work.metadata, &checkout.source_dir(), ADMIN_USER)
            .await?;
        info!(
            "Loaded {} at commit {} as version {}",
            work.app_path_domain(),
            checkout.hash,
            work.version()
        );
        Ok(())
    }

    /// Snapshot the app's local source directory as a new version
    pub(crate) async fn load_source_from_disk(
        &self,
        op: &mut Operation,
        work: &mut AppEntry,
    ) -> Result<()> {
        let vm = &mut work.metadata.version_metadata;
        vm.git_branch.clear();
        vm.git_commit.clear();
        vm.git_commit_requested.clear();
        vm.git_message.clear();
        work.settings.git_auth_name.clear();

        let source = PathBuf::from(&work.source_url);
        VersionStore::new(work.id.clone())
            .add_app_version(&mut op.tx, &mut work.metadata, &source, ADMIN_USER)
            .await?;
        debug!(
            "Loaded {} from {} as version {}",
            work.app_path_domain(),
            source.display(),
            work.version()
        );
        Ok(())
    }

    /// Audit an app; approval records the discovered loads and permissions
    pub(crate) async fn audit_app(
        &self,
        op: &mut Operation,
        entry: &mut AppEntry,
        approve: bool,
    ) -> Result<ApproveResult> {
        let app = self.setup_app(&mut op.tx, entry).await?;
        let result = app.audit()?;
        if approve {
            entry.metadata.loads = result.new_loads.clone();
            entry.metadata.permissions = result.new_permissions.clone();
            info!(
                "Approved app {}: loads {:?}, {} permissions",
                entry.app_path_domain(),
                result.new_loads,
                result.new_permissions.len()
            );
        }

        self.db.apps().update_metadata(&mut op.tx, entry).await?;
        Ok(result)
    }

    /// Copy staging's metadata and version onto production
    ///
    /// Returns false when both were already at the same version, other than
    /// the first one. Production metadata is persisted either way.
    pub(crate) async fn promote_app(
        &self,
        op: &mut Operation,
        stage: &AppEntry,
        prod: &mut AppEntry,
    ) -> Result<bool> {
        let prev_version = prod.version();
        let new_version = stage.version();
        let existing = VersionStore::new(prod.id.clone())
            .get_app_version(&mut op.tx, new_version)
            .await?;

        prod.metadata = stage.metadata.clone();
        if prev_version != new_version {
            prod.metadata.version_metadata.previous_version = prev_version;
            prod.metadata.version_metadata.version = new_version;
            if existing.is_none() {
                VersionStore::new(stage.id.clone())
                    .promote_app(&mut op.tx, &prod.id, &prod.metadata, ADMIN_USER)
                    .await?;
            }
        }
        self.db.apps().update_metadata(&mut op.tx, prod).await?;

        let promoted = prev_version != new_version || new_version == 1;
        if promoted {
            info!(
                "Promoted {} from version {} to {}",
                prod.app_path_domain(),
                prev_version,
                new_version
            );
        }
        Ok(promoted)
    }

    /// Working entry of an app and, for non-dev apps, the production entry
    async fn working_entry(
        &self,
        op: &mut Operation,
        entry: AppEntry,
    ) -> Result<(AppEntry, Option<AppEntry>)> {
        if entry.is_dev {
            return Ok((entry, None));
        }
        let stage = self.get_stage_app(&mut op.tx, &entry).await?;
        Ok((stage, Some(entry)))
    }

    /// Load new code into the working entry; false when the source is unchanged
    async fn load_app_code(
        &self,
        op: &mut Operation,
        cache: &mut RepoCache,
        work: &mut AppEntry,
        params: &ReloadParams,
    ) -> Result<bool> {
        if !work.is_git_source() {
            if !work.is_dev {
                self.load_source_from_disk(op, work).await?;
            }
            return Ok(true);
        }

        let vm = &work.metadata.version_metadata;
        let current = vm.git_commit.clone();
        let commit = non_empty(&params.commit, &vm.git_commit_requested).to_string();
        let branch = resolve_branch(&params.branch, &vm.git_branch);
        let git_auth = non_empty(&params.git_auth, &work.settings.git_auth_name).to_string();

        if !params.force_reload && !current.is_empty() {
            if current == commit {
                debug!("{} already at commit {}", work.app_path_domain(), current);
                return Ok(false);
            }
            if commit.is_empty() {
                let sha = cache
                    .get_sha(&work.source_url, &branch, &git_auth)
                    .await
                    .map_err(|e| {
                        Error::git(format!(
                            "error getting git commit sha for {}: {}",
                            work.app_path_domain(),
                            e
                        ))
                    })?;
                if sha == current {
                    debug!(
                        "{} branch {} unchanged at {}",
                        work.app_path_domain(),
                        branch,
                        sha
                    );
                    return Ok(false);
                }
            }
        }

        self.load_source_from_git(op, cache, work, &branch, &commit, &git_auth)
            .await?;
        Ok(true)
    }

    /// Reload one main app from its source
    pub(crate) async fn reload_app(
        &self,
        op: &mut Operation,
        cache: &mut RepoCache,
        entry: AppEntry,
        params: &ReloadParams,
    ) -> Result<AppReloadResult> {
        let main_path = entry.app_path_domain();
        let (mut work, mut prod) = self.working_entry(op, entry).await?;
        let mut result = AppReloadResult::default();

        if !self.load_app_code(op, cache, &mut work, params).await? {
            result.skipped_results.push(work.app_path_domain());
            // staging may still hold merged changes production has not seen
            if params.promote {
                if let Some(prod) = prod.as_mut().filter(|p| p.version() != work.version()) {
                    self.promote_app(op, &work, prod).await?;
                    result.promote_results.push(prod.app_path_domain());
                    self.load_app(op, prod).await?;
                    result.reload_results.push(prod.app_path_domain());
                }
            }
            return Ok(result);
        }
        self.db.apps().update_settings(&mut op.tx, &work).await?;

        let audit = self.audit_app(op, &mut work, params.approve).await?;
        if audit.needs_approval {
            if !params.approve {
                return Err(Error::ApprovalRequired(main_path.to_string()));
            }
            result.approve_result = Some(audit);
        }

        self.load_app(op, &work).await?;
        result.reload_results.push(work.app_path_domain());

        if params.promote {
            if let Some(prod) = prod.as_mut() {
                if self.promote_app(op, &work, prod).await? {
                    result.promote_results.push(prod.app_path_domain());
                }
                self.load_app(op, prod).await?;
                result.reload_results.push(prod.app_path_domain());
            }
        }
        Ok(result)
    }

    /// Reload every main app matching `glob`
    pub async fn reload_apps(
        &self,
        glob: &str,
        dry_run: bool,
        params: ReloadParams,
    ) -> Result<AppReloadResponse> {
        let mut cache = self.repo_cache()?;
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;

        let mut response = AppReloadResponse {
            dry_run,
            ..Default::default()
        };
        for app in self.filter_apps(&mut op.tx, glob, false).await? {
            let result = self.reload_app(&mut op, &mut cache, app, &params).await?;
            response.add(result);
        }

        let paths = response.reload_results.clone();
        self.complete_transaction(op, &paths, dry_run).await?;
        info!(
            "Reloaded {} apps, skipped {}",
            response.reload_results.len(),
            response.skipped_results.len()
        );
        Ok(response)
    }

    /// Promote the staging app of every matched production app
    pub async fn promote_apps(&self, glob: &str, dry_run: bool) -> Result<AppPromoteResponse> {
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;

        let mut response = AppPromoteResponse {
            dry_run,
            ..Default::default()
        };
        let mut touched = Vec::new();
        for mut prod in self.filter_apps(&mut op.tx, glob, false).await? {
            if prod.is_dev {
                debug!("Skipping promote of dev app {}", prod.app_path_domain());
                continue;
            }
            let stage = self.get_stage_app(&mut op.tx, &prod).await?;
            if self.promote_app(&mut op, &stage, &mut prod).await? {
                response.promote_results.push(prod.app_path_domain());
            }
            self.load_app(&mut op, &prod).await?;
            touched.push(prod.app_path_domain());
        }

        self.complete_transaction(op, &touched, dry_run).await?;
        Ok(response)
    }

    /// Apply a versioned change to staging, optionally promoting it
    pub async fn staged_update(
        &self,
        glob: &str,
        dry_run: bool,
        promote: bool,
        update: StagedUpdate,
    ) -> Result<AppStagedUpdateResponse> {
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;

        let mut response = AppStagedUpdateResponse {
            dry_run,
            ..Default::default()
        };
        let mut touched = Vec::new();
        for app in self.filter_apps(&mut op.tx, glob, false).await? {
            let (mut work, mut prod) = self.working_entry(&mut op, app).await?;
            if !work.is_dev {
                VersionStore::new(work.id.clone())
                    .increment_app_version(&mut op.tx, &mut work.metadata, ADMIN_USER)
                    .await?;
            }

            match &update {
                StagedUpdate::Audit { approve } => {
                    let result = self.audit_app(&mut op, &mut work, *approve).await?;
                    response.approve_results.push(result);
                }
                StagedUpdate::AccountLink {
                    plugin,
                    account_name,
                } => link_account(&mut work.metadata, plugin, account_name),
                StagedUpdate::UpdateParam { key, value } => {
                    update_param(&mut work.metadata, key, value)
                }
                StagedUpdate::UpdateMetadata {
                    config_type,
                    entries,
                } => update_config(&mut work.metadata, *config_type, entries)?,
            }
            self.db.apps().update_metadata(&mut op.tx, &work).await?;

            if promote {
                if let Some(prod) = prod.as_mut() {
                    self.promote_app(&mut op, &work, prod).await?;
                    response.promote_results.push(prod.app_path_domain());
                    touched.push(prod.app_path_domain());
                }
            }
            touched.push(work.app_path_domain());
            response.staged_update_results.push(work.app_path_domain());
        }

        self.complete_transaction(op, &touched, dry_run).await?;
        info!(
            "Applied {} to {} apps",
            update.name(),
            response.staged_update_results.len()
        );
        Ok(response)
    }

    /// Change non-versioned settings of matched apps and their linked apps
    pub async fn update_app_settings(
        &self,
        glob: &str,
        dry_run: bool,
        update: SettingsUpdate,
    ) -> Result<AppSettingsResponse> {
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        let repo = self.db.apps();

        let mut response = AppSettingsResponse {
            dry_run,
            ..Default::default()
        };
        for app in self.filter_apps(&mut op.tx, glob, false).await? {
            let mut entries = repo.get_linked_apps(&mut op.tx, &app.id).await?;
            entries.push(app);
            for mut entry in entries {
                apply_settings(&mut entry.settings, &update);
                repo.update_settings(&mut op.tx, &entry).await?;
                response.updated.push(entry.app_path_domain());
            }
        }

        self.complete_transaction(op, &response.updated, dry_run)
            .await?;
        Ok(response)
    }

    /// Delete matched apps along with their linked apps
    pub async fn delete_apps(&self, glob: &str, dry_run: bool) -> Result<AppDeleteResponse> {
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        let repo = self.db.apps();

        let mut response = AppDeleteResponse {
            dry_run,
            ..Default::default()
        };
        let mut touched = Vec::new();
        for app in self.filter_apps(&mut op.tx, glob, false).await? {
            for linked in repo.get_linked_apps(&mut op.tx, &app.id).await? {
                repo.delete(&mut op.tx, &linked.id).await?;
                touched.push(linked.app_path_domain());
            }
            repo.delete(&mut op.tx, &app.id).await?;
            touched.push(app.app_path_domain());
            response.delete_results.push(app.app_path_domain());
        }

        self.complete_transaction(op, &touched, dry_run).await?;
        info!("Deleted {} apps", response.delete_results.len());
        Ok(response)
    }

    /// Main apps matching `glob`, with their staging apps when `internal` is set
    pub async fn list_apps(&self, glob: &str, internal: bool) -> Result<Vec<AppEntry>> {
        let mut op = self.begin().await?;
        let apps = self.filter_apps(&mut op.tx, glob, internal).await?;
        Ok(apps)
    }
}

/// Split off the `#` base suffix and check the source location
pub(crate) fn normalize_request(request: &mut CreateAppRequest) -> Result<()> {
    if let Some((source, base)) = request.source_url.split_once('#') {
        let (source, base) = (source.to_string(), base.to_string());
        request.source_url = source;
        request
            .app_config
            .insert(STAR_BASE_KEY.to_string(), format!("\"{}\"", base));
    }

    if is_git_url(&request.source_url) {
        if request.is_dev {
            return Err(Error::DevAppUnsupported(format!(
                "from git source {}, check out the repo and use the local path",
                request.source_url
            )));
        }
        return Ok(());
    }

    if request.source_url.is_empty() || request.source_url == NO_SOURCE {
        return Err(Error::InvalidPath(
            "cannot create app with no source url".to_string(),
        ));
    }
    request.source_url = absolute_source(&request.source_url)?;
    Ok(())
}

pub(crate) fn absolute_source(source: &str) -> Result<String> {
    let path = match source.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .ok_or_else(|| Error::InvalidPath(format!("cannot expand {}", source)))?
            .join(rest),
        None => PathBuf::from(source),
    };
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(clean_path(&path).to_string_lossy().to_string())
}

/// Drop `.` components and a trailing separator
fn clean_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Requested branch, else the recorded one, else the default
fn resolve_branch(requested: &str, recorded: &str) -> String {
    non_empty(non_empty(requested, recorded), DEFAULT_GIT_BRANCH).to_string()
}

fn link_account(metadata: &mut AppMetadata, plugin: &str, account_name: &str) {
    let existing = metadata.accounts.iter().position(|a| a.plugin == plugin);
    match (existing, account_name) {
        (Some(pos), NO_SOURCE) => {
            metadata.accounts.remove(pos);
        }
        (Some(pos), name) => metadata.accounts[pos].account_name = name.to_string(),
        (None, NO_SOURCE) => {}
        (None, name) => metadata.accounts.push(AccountLink {
            plugin: plugin.to_string(),
            account_name: name.to_string(),
        }),
    }
}

fn update_param(metadata: &mut AppMetadata, key: &str, value: &str) {
    let value = strip_quotes(value.trim());
    if value == NO_SOURCE {
        metadata.param_values.remove(key);
    } else {
        metadata
            .param_values
            .insert(key.to_string(), value.to_string());
    }
}

fn update_config(metadata: &mut AppMetadata, config_type: ConfigType, entries: &[String]) -> Result<()> {
    let map = match config_type {
        ConfigType::ContainerVolumes => {
            metadata.container_volumes = entries
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            return Ok(());
        }
        ConfigType::ContainerOptions => &mut metadata.container_options,
        ConfigType::ContainerArgs => &mut metadata.container_args,
        ConfigType::AppConfig => &mut metadata.app_config,
    };

    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = match entry.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None if config_type == ConfigType::ContainerOptions => (entry, ""),
            None => {
                return Err(Error::config(format!(
                    "invalid {} entry {}, expected key=value",
                    config_type.as_str(),
                    entry
                )))
            }
        };
        // app config values are kept verbatim, they are parsed as expressions
        let value = if config_type == ConfigType::AppConfig {
            value
        } else {
            strip_quotes(value)
        };

        if value == NO_SOURCE {
            map.remove(key);
        } else {
            map.insert(key.to_string(), value.to_string());
        }
    }
    Ok(())
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn apply_settings(settings: &mut AppSettings, update: &SettingsUpdate) {
    if let Some(authn) = update.authn_type {
        settings.authn_type = authn;
    }
    if let Some(git_auth) = &update.git_auth_name {
        settings.git_auth_name = if git_auth == NO_SOURCE {
            String::new()
        } else {
            git_auth.clone()
        };
    }
    if let Some(access) = update.stage_write_access {
        settings.stage_write_access = access;
    }
    if let Some(access) = update.preview_write_access {
        settings.preview_write_access = access;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::*;
    use appstage_core::AppAuthnType;
    use std::collections::BTreeMap;

    fn local(source: &Path) -> CreateAppRequest {
        CreateAppRequest {
            source_url: source.to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    async fn get(server: &Server, path: &str) -> AppEntry {
        let mut op = server.begin().await.unwrap();
        server
            .db
            .apps()
            .require(op.conn(), &parse_app_path(path).unwrap())
            .await
            .unwrap()
    }

    async fn files(server: &Server, entry: &AppEntry) -> BTreeMap<String, Vec<u8>> {
        let mut op = server.begin().await.unwrap();
        VersionStore::new(entry.id.clone())
            .load_files(op.conn(), entry.version())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_prod_app() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);

        let response = server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap();
        assert_eq!(response.approve_results.len(), 2);
        assert!(response.approve_results.iter().all(|r| !r.needs_approval));

        let prod = get(&server, "/blog").await;
        let stage = get(&server, "/blog_cl_stage").await;
        assert!(prod.id.is_prod());
        assert!(stage.id.is_stage());
        assert_eq!(stage.main_app, prod.id);
        assert_eq!(prod.version(), 1);
        assert_eq!(stage.version(), 1);
        assert_eq!(prod.metadata.version_metadata.previous_version, 0);
        assert_eq!(files(&server, &prod).await, files(&server, &stage).await);
        assert_eq!(
            stage.metadata.apply_info.as_ref().unwrap().source_url,
            source.to_string_lossy()
        );
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);
        server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap();

        let err = server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AppAlreadyExists(_)));

        let err = server
            .create_app("/x_cl_y", false, false, local(&source))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));

        let git_dev = CreateAppRequest {
            source_url: "github.com/org/repo/app".to_string(),
            is_dev: true,
            ..Default::default()
        };
        let err = server.create_app("/dev", false, false, git_dev).await.unwrap_err();
        assert!(matches!(err, Error::DevAppUnsupported(_)));

        let no_source = CreateAppRequest {
            source_url: NO_SOURCE.to_string(),
            ..Default::default()
        };
        assert!(server.create_app("/none", false, false, no_source).await.is_err());

        let empty = dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        let err = server
            .create_app("/empty", false, false, local(&empty))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceEmpty(_)));
        // the failed create left nothing behind
        assert_eq!(server.list_apps("all", true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_dry_run_rolls_back() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);

        let response = server
            .create_app("/blog", false, true, local(&source))
            .await
            .unwrap();
        assert!(response.dry_run);
        assert!(server.list_apps("all", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_star_base_and_settings() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);
        let mut request = local(&source);
        request.source_url = format!("{}#site", request.source_url);
        request.app_authn = AppAuthnType::None;

        server.create_app("/blog", false, false, request).await.unwrap();
        let prod = get(&server, "/blog").await;
        assert_eq!(prod.source_url, source.to_string_lossy());
        assert_eq!(
            prod.metadata.app_config.get(STAR_BASE_KEY).map(String::as_str),
            Some("\"site\"")
        );
        assert_eq!(prod.settings.authn_type, AppAuthnType::None);
    }

    #[tokio::test]
    async fn test_dev_app_reads_from_disk() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "dev", OPEN_MANIFEST);
        let mut request = local(&source);
        request.is_dev = true;

        let response = server.create_app("/dev", false, false, request).await.unwrap();
        assert_eq!(response.approve_results.len(), 1);

        let apps = server.list_apps("all", true).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert!(apps[0].id.is_dev());
        assert_eq!(apps[0].version(), 0);

        let reload = server
            .reload_apps("/dev", false, ReloadParams::default())
            .await
            .unwrap();
        assert_eq!(reload.reload_results, vec![AppPathDomain::new("", "/dev")]);
        assert!(server.cached_app(&AppPathDomain::new("", "/dev")).is_some());
    }

    #[tokio::test]
    async fn test_approval_gate() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "files", FS_MANIFEST);

        let response = server
            .create_app("/files", false, false, local(&source))
            .await
            .unwrap();
        assert!(response.approve_results[0].needs_approval);
        assert!(get(&server, "/files").await.metadata.loads.is_empty());

        let err = server
            .reload_apps("/files", false, ReloadParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "app /files needs approval");

        let response = server
            .reload_apps(
                "/files",
                false,
                ReloadParams {
                    approve: true,
                    promote: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.approve_results.len(), 1);
        assert_eq!(response.promote_results, vec![AppPathDomain::new("", "/files")]);
        let prod = get(&server, "/files").await;
        assert_eq!(prod.metadata.loads, vec!["fs.in"]);
        assert_eq!(prod.metadata.permissions.len(), 1);
        assert!(server.cached_app(&AppPathDomain::new("", "/files")).is_some());
    }

    #[tokio::test]
    async fn test_approve_through_staged_update() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "files", FS_MANIFEST);
        server
            .create_app("/files", false, false, local(&source))
            .await
            .unwrap();

        let response = server
            .staged_update("/files", false, true, StagedUpdate::Audit { approve: true })
            .await
            .unwrap();
        assert_eq!(response.approve_results.len(), 1);
        assert!(response.approve_results[0].needs_approval);

        let stage = get(&server, "/files_cl_stage").await;
        let prod = get(&server, "/files").await;
        assert_eq!(stage.version(), 2);
        assert_eq!(prod.version(), 2);
        assert_eq!(prod.metadata.loads, vec!["fs.in"]);

        // approved now, a reload passes the gate
        server
            .reload_apps("/files", false, ReloadParams::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_promotion_idempotence() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);
        server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap();

        server
            .staged_update(
                "/blog",
                false,
                false,
                StagedUpdate::UpdateParam {
                    key: "title".to_string(),
                    value: "\"Hello\"".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(get(&server, "/blog").await.version(), 1);

        let first = server.promote_apps("/blog", false).await.unwrap();
        assert_eq!(first.promote_results, vec![AppPathDomain::new("", "/blog")]);
        let prod = get(&server, "/blog").await;
        let stage = get(&server, "/blog_cl_stage").await;
        assert_eq!(prod.version(), stage.version());
        assert_eq!(prod.version(), 2);
        assert_eq!(prod.metadata.version_metadata.previous_version, 1);
        assert_eq!(prod.metadata.param_values.get("title").unwrap(), "Hello");

        let second = server.promote_apps("/blog", false).await.unwrap();
        assert!(second.promote_results.is_empty());
        assert_eq!(get(&server, "/blog").await.version(), 2);
    }

    #[tokio::test]
    async fn test_local_reload_adds_version() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);
        server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap();

        std::fs::write(source.join("static/index.html"), "<h1>v2</h1>").unwrap();
        let response = server
            .reload_apps("/blog", false, ReloadParams::default())
            .await
            .unwrap();
        assert_eq!(
            response.reload_results,
            vec![AppPathDomain::new("", "/blog_cl_stage")]
        );
        assert!(response.promote_results.is_empty());

        let stage = get(&server, "/blog_cl_stage").await;
        assert_eq!(stage.version(), 2);
        assert_eq!(
            files(&server, &stage).await.get("static/index.html").unwrap(),
            b"<h1>v2</h1>"
        );
        assert_eq!(get(&server, "/blog").await.version(), 1);

        let dry = server
            .reload_apps(
                "/blog",
                true,
                ReloadParams {
                    promote: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(dry.dry_run);
        assert_eq!(get(&server, "/blog").await.version(), 1);
    }

    #[tokio::test]
    async fn test_git_reload_follows_branch_head() {
        let (server, dir) = setup_git_server().await;
        let repo = GitRepo::init(dir.path(), "apps");
        write_app(repo.dir(), "blog", OPEN_MANIFEST);
        let first = repo.commit_all("first");
        let request = CreateAppRequest {
            source_url: repo.source("blog"),
            ..Default::default()
        };
        server.create_app("/blog", false, false, request).await.unwrap();
        let stage_path = AppPathDomain::new("", "/blog_cl_stage");
        let prod_path = AppPathDomain::new("", "/blog");

        let stage = get(&server, "/blog_cl_stage").await;
        let vm = &stage.metadata.version_metadata;
        assert_eq!(vm.git_commit, first);
        assert_eq!(vm.git_branch, "main");
        assert_eq!(vm.git_message, "first");

        // branch head unchanged
        let response = server
            .reload_apps("/blog", false, ReloadParams::default())
            .await
            .unwrap();
        assert!(response.reload_results.is_empty());
        assert_eq!(response.skipped_results, vec![stage_path.clone()]);
        assert_eq!(get(&server, "/blog_cl_stage").await.version(), 1);

        let forced = ReloadParams {
            force_reload: true,
            ..Default::default()
        };
        let response = server.reload_apps("/blog", false, forced).await.unwrap();
        assert_eq!(response.reload_results, vec![stage_path.clone()]);
        assert!(response.skipped_results.is_empty());
        let stage = get(&server, "/blog_cl_stage").await;
        assert_eq!(stage.version(), 2);
        assert_eq!(stage.metadata.version_metadata.git_commit, first);

        // nothing new to load, staging still gets promoted
        let promote = ReloadParams {
            promote: true,
            ..Default::default()
        };
        let response = server
            .reload_apps("/blog", false, promote.clone())
            .await
            .unwrap();
        assert_eq!(response.skipped_results, vec![stage_path.clone()]);
        assert_eq!(response.promote_results, vec![prod_path.clone()]);
        assert_eq!(response.reload_results, vec![prod_path.clone()]);
        assert_eq!(get(&server, "/blog").await.version(), 2);
        assert!(server.cached_app(&prod_path).is_some());

        let response = server
            .reload_apps("/blog", false, promote.clone())
            .await
            .unwrap();
        assert_eq!(response.skipped_results, vec![stage_path.clone()]);
        assert!(response.promote_results.is_empty());
        assert!(response.reload_results.is_empty());

        std::fs::write(repo.dir().join("blog/static/index.html"), "<h1>v3</h1>").unwrap();
        let second = repo.commit_all("second");
        let response = server.reload_apps("/blog", false, promote).await.unwrap();
        assert_eq!(response.reload_results, vec![stage_path, prod_path.clone()]);
        assert_eq!(response.promote_results, vec![prod_path]);

        let prod = get(&server, "/blog").await;
        assert_eq!(prod.version(), 3);
        assert_eq!(prod.metadata.version_metadata.git_commit, second);
        assert_eq!(prod.metadata.version_metadata.git_message, "second");
        assert_eq!(
            files(&server, &prod).await.get("static/index.html").unwrap(),
            b"<h1>v3</h1>"
        );
    }

    #[tokio::test]
    async fn test_staged_metadata_updates() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);
        server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap();

        let update = StagedUpdate::UpdateMetadata {
            config_type: ConfigType::ContainerOptions,
            entries: vec!["cpus=\"2\"".to_string(), "privileged".to_string()],
        };
        server.staged_update("all", false, false, update).await.unwrap();

        let update = StagedUpdate::UpdateMetadata {
            config_type: ConfigType::AppConfig,
            entries: vec!["theme=\"dark\"".to_string(), " ".to_string()],
        };
        server.staged_update("all", false, false, update).await.unwrap();

        let update = StagedUpdate::AccountLink {
            plugin: "db.in".to_string(),
            account_name: "main".to_string(),
        };
        let response = server.staged_update("all", false, true, update).await.unwrap();
        assert_eq!(response.promote_results, vec![AppPathDomain::new("", "/blog")]);

        let prod = get(&server, "/blog").await;
        assert_eq!(prod.version(), 4);
        assert_eq!(prod.metadata.container_options.get("cpus").unwrap(), "2");
        assert_eq!(prod.metadata.container_options.get("privileged").unwrap(), "");
        assert_eq!(prod.metadata.app_config.get("theme").unwrap(), "\"dark\"");
        assert_eq!(prod.metadata.accounts[0].account_name, "main");

        let bad = StagedUpdate::UpdateMetadata {
            config_type: ConfigType::ContainerArgs,
            entries: vec!["novalue".to_string()],
        };
        assert!(server.staged_update("all", false, false, bad).await.is_err());
        assert_eq!(get(&server, "/blog_cl_stage").await.version(), 4);
    }

    #[test]
    fn test_update_helpers() {
        let mut metadata = AppMetadata::default();
        update_param(&mut metadata, "a", " \"1\" ");
        update_param(&mut metadata, "b", "2");
        update_param(&mut metadata, "b", "-");
        assert_eq!(metadata.param_values.len(), 1);
        assert_eq!(metadata.param_values.get("a").unwrap(), "1");

        link_account(&mut metadata, "db.in", "one");
        link_account(&mut metadata, "db.in", "two");
        assert_eq!(metadata.accounts.len(), 1);
        assert_eq!(metadata.accounts[0].account_name, "two");
        link_account(&mut metadata, "db.in", "-");
        assert!(metadata.accounts.is_empty());

        update_config(
            &mut metadata,
            ConfigType::ContainerVolumes,
            &["/data:/data".to_string(), "".to_string()],
        )
        .unwrap();
        assert_eq!(metadata.container_volumes, vec!["/data:/data"]);

        update_config(&mut metadata, ConfigType::ContainerArgs, &["k=v".to_string()]).unwrap();
        update_config(&mut metadata, ConfigType::ContainerArgs, &["k=-".to_string()]).unwrap();
        assert!(metadata.container_args.is_empty());
    }

    #[tokio::test]
    async fn test_update_settings_and_delete() {
        let (server, dir) = setup_server().await;
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);
        server
            .create_app("/blog", false, false, local(&source))
            .await
            .unwrap();
        let version = get(&server, "/blog").await.version();

        let response = server
            .update_app_settings(
                "/blog",
                false,
                SettingsUpdate {
                    authn_type: Some(AppAuthnType::System),
                    git_auth_name: Some("deploy".to_string()),
                    stage_write_access: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.updated.len(), 2);

        let prod = get(&server, "/blog").await;
        let stage = get(&server, "/blog_cl_stage").await;
        assert_eq!(prod.settings.authn_type, AppAuthnType::System);
        assert_eq!(stage.settings.git_auth_name, "deploy");
        assert!(stage.settings.stage_write_access);
        assert_eq!(prod.version(), version);

        server
            .update_app_settings(
                "/blog",
                false,
                SettingsUpdate {
                    git_auth_name: Some("-".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(get(&server, "/blog").await.settings.git_auth_name.is_empty());

        let dry = server.delete_apps("/blog", true).await.unwrap();
        assert_eq!(dry.delete_results.len(), 1);
        assert_eq!(server.list_apps("all", true).await.unwrap().len(), 2);

        server.delete_apps("/blog", false).await.unwrap();
        assert!(server.list_apps("all", true).await.unwrap().is_empty());
    }

    #[test]
    fn test_normalize_request() {
        let mut request = CreateAppRequest {
            source_url: "github.com/org/repo/app#base".to_string(),
            ..Default::default()
        };
        normalize_request(&mut request).unwrap();
        assert_eq!(request.source_url, "github.com/org/repo/app");
        assert_eq!(request.app_config.get(STAR_BASE_KEY).unwrap(), "\"base\"");

        let mut request = CreateAppRequest {
            source_url: "/srv/./app/".to_string(),
            ..Default::default()
        };
        normalize_request(&mut request).unwrap();
        assert_eq!(request.source_url, "/srv/app");

        assert_eq!(resolve_branch("", ""), "main");
        assert_eq!(resolve_branch("", "dev"), "dev");
        assert_eq!(resolve_branch("feature", "dev"), "feature");
    }
}
