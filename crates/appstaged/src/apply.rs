//! Declarative apply: reconcile apps with definition files
//!
//! Definitions come from a local file, directory or glob, or from a folder
//! of a git repository. Declared apps that do not exist are created; for
//! existing apps the declaration is three-way merged into the staging app
//! using the previously applied declaration as the base.

use appstage_core::merge::{check_property_changed, merge_map, merge_slice};
use appstage_core::{
    is_git_url, parse_app_path, AppApplyResponse, AppEntry, AppGlob, AppPathDomain, ApplyOptions,
    CreateAppRequest, Error, ReloadOption, Result, ADMIN_USER, DEFAULT_GIT_BRANCH,
    DEFINITION_GLOB,
};
use appstage_db::VersionStore;
use appstage_git::RepoCache;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::server::{Operation, Server};
use crate::stager::{absolute_source, normalize_request, ReloadParams};

/// Definition files gathered for one apply pass
#[derive(Debug, Default)]
pub(crate) struct DefinitionSet {
    /// Commit the definitions were read at, empty for local definitions
    pub commit_id: String,
    /// Set when the definitions repo has not moved since the last run
    pub skipped: bool,
    /// Whether the files were read from the local filesystem
    pub local: bool,
    pub files: Vec<(PathBuf, Vec<u8>)>,
}

impl Server {
    /// Apply the definitions at `apply_path` to the apps matching `glob`
    pub async fn apply(
        &self,
        apply_path: &str,
        glob: &str,
        opts: ApplyOptions,
    ) -> Result<AppApplyResponse> {
        let mut cache = self.repo_cache()?;
        let set = self
            .resolve_definitions(apply_path, &opts, "", &mut cache)
            .await?;

        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        let (response, paths) = self
            .apply_tx(&mut op, &mut cache, &set, glob, &opts)
            .await?;
        self.complete_transaction(op, &paths, opts.dry_run).await?;
        cache.cleanup();

        info!(
            "Applied {}: {} created, {} updated, {} reloaded",
            apply_path,
            response.create_results.len(),
            response.update_results.len(),
            response.reload_results.len()
        );
        Ok(response)
    }

    /// Read the definition files, checking out the repo for git paths
    ///
    /// With a previous commit and no pinned commit, an unchanged branch head
    /// yields a skipped set without checking anything out.
    pub(crate) async fn resolve_definitions(
        &self,
        apply_path: &str,
        opts: &ApplyOptions,
        last_commit_id: &str,
        cache: &mut RepoCache,
    ) -> Result<DefinitionSet> {
        let mut set = DefinitionSet::default();
        let root = if is_git_url(apply_path) {
            let branch = if opts.branch.is_empty() {
                DEFAULT_GIT_BRANCH
            } else {
                opts.branch.as_str()
            };

            if opts.commit.is_empty() && !last_commit_id.is_empty() {
                let sha = cache.get_sha(apply_path, branch, &opts.git_auth).await?;
                if sha == last_commit_id {
                    debug!("Definitions at {} unchanged at {}", apply_path, sha);
                    set.commit_id = sha;
                    set.skipped = true;
                    return Ok(set);
                }
            }

            let checkout = cache
                .checkout_repo(apply_path, branch, &opts.commit, &opts.git_auth)
                .await?;
            set.commit_id = checkout.hash.clone();
            checkout.dir.join(checkout.folder.trim_end_matches('/'))
        } else {
            set.local = true;
            PathBuf::from(absolute_source(apply_path)?)
        };

        for path in expand_definition_files(&root)? {
            let content = tokio::fs::read(&path).await?;
            set.files.push((path, content));
        }
        Ok(set)
    }

    /// Reconcile the apps against a definition set inside an operation
    ///
    /// Returns the response and the app paths whose cached apps are stale.
    pub(crate) async fn apply_tx(
        &self,
        op: &mut Operation,
        cache: &mut RepoCache,
        set: &DefinitionSet,
        glob: &str,
        opts: &ApplyOptions,
    ) -> Result<(AppApplyResponse, Vec<AppPathDomain>)> {
        let mut response = AppApplyResponse {
            dry_run: opts.dry_run,
            commit_id: set.commit_id.clone(),
            ..Default::default()
        };
        if set.skipped {
            response.skipped_apply = true;
            return Ok((response, Vec::new()));
        }

        let glob = AppGlob::parse(glob)?;
        let mut seen = HashSet::new();
        let mut declared = Vec::new();
        for (path, content) in &set.files {
            for def in self.evaluator.evaluate(path, content)? {
                let apd = parse_app_path(&def.path)?;
                if !seen.insert(apd.clone()) {
                    return Err(Error::DuplicateApp(apd.to_string()));
                }
                if !glob.matches(&apd) {
                    continue;
                }
                let mut request = def.request;
                if set.local {
                    resolve_relative_source(&mut request, path);
                }
                declared.push((apd, request));
            }
        }
        response.filtered_apps = declared.iter().map(|(apd, _)| apd.clone()).collect();

        for (apd, request) in declared {
            let existing = self.db.apps().get(&mut op.tx, &apd).await?;
            match existing {
                None => {
                    let created = self
                        .create_app_tx(op, cache, &apd, opts.approve, opts.dry_run, request)
                        .await?;
                    response.approve_results.extend(created.approve_results);
                    response.create_results.push(apd);
                }
                Some(entry) => {
                    if self.merge_app(op, entry, request, opts, &mut response).await? {
                        response.update_results.push(apd);
                    }
                }
            }
        }

        let to_reload: Vec<AppPathDomain> = match opts.reload {
            ReloadOption::None => Vec::new(),
            ReloadOption::Updated => response.update_results.clone(),
            ReloadOption::Matched => response
                .filtered_apps
                .iter()
                .filter(|apd| !response.create_results.contains(apd))
                .cloned()
                .collect(),
        };
        let params = ReloadParams {
            approve: opts.approve,
            promote: opts.promote,
            force_reload: opts.force_reload,
            ..Default::default()
        };
        for apd in to_reload {
            let entry = self.db.apps().require(&mut op.tx, &apd).await?;
            let result = self.reload_app(op, cache, entry, &params).await?;
            response.reload_results.extend(result.reload_results);
            response.skipped_results.extend(result.skipped_results);
            response.approve_results.extend(result.approve_result);
            response.promote_results.extend(result.promote_results);
        }

        let paths = response
            .filtered_apps
            .iter()
            .flat_map(|apd| [apd.clone(), apd.stage_path()])
            .collect();
        Ok((response, paths))
    }

    /// Merge one declaration into an existing app; true when it changed
    async fn merge_app(
        &self,
        op: &mut Operation,
        entry: AppEntry,
        mut request: CreateAppRequest,
        opts: &ApplyOptions,
        response: &mut AppApplyResponse,
    ) -> Result<bool> {
        let apd = entry.app_path_domain();
        if !entry.main_app.is_empty() {
            return Err(Error::InvalidPath(format!(
                "{} is a staging app, it cannot be declared",
                apd
            )));
        }
        normalize_request(&mut request)?;
        if request.source_url != entry.source_url {
            return Err(Error::ImmutableProperty(format!(
                "cannot change source url of app {} from {} to {}, delete and recreate the app",
                apd, entry.source_url, request.source_url
            )));
        }
        if request.is_dev != entry.is_dev {
            return Err(Error::ImmutableProperty(format!(
                "cannot change dev mode of app {}, delete and recreate the app",
                apd
            )));
        }

        let mut prod = None;
        let mut work = if entry.is_dev {
            entry
        } else {
            let stage = self.get_stage_app(&mut op.tx, &entry).await?;
            prod = Some(entry);
            stage
        };

        let old = work.metadata.apply_info.clone();
        let force = opts.clobber;
        if check_property_changed(
            old.as_ref().map(|o| &o.app_authn),
            &request.app_authn,
            &work.settings.authn_type,
            force,
        ) {
            return Err(Error::ImmutableProperty(format!(
                "authentication type of app {} differs from the definition, \
                 use settings update to change it",
                apd
            )));
        }
        if check_property_changed(
            old.as_ref().map(|o| o.git_auth_name.as_str()),
            request.git_auth_name.as_str(),
            work.settings.git_auth_name.as_str(),
            force,
        ) {
            return Err(Error::ImmutableProperty(format!(
                "git auth of app {} differs from the definition, use settings update to change it",
                apd
            )));
        }

        let mut changed = false;
        let metadata = &mut work.metadata;
        if check_property_changed(
            old.as_ref().map(|o| o.spec.as_str()),
            request.spec.as_str(),
            metadata.spec.as_str(),
            force,
        ) {
            metadata.spec = request.spec.clone();
            changed = true;
        }

        // an unset branch of a git app means the default branch
        let git_source = is_git_url(&request.source_url);
        let declared_branch = |branch: &str| {
            if git_source && branch.is_empty() {
                DEFAULT_GIT_BRANCH.to_string()
            } else {
                branch.to_string()
            }
        };
        let new_branch = declared_branch(&request.git_branch);
        let old_branch = old.as_ref().map(|o| declared_branch(&o.git_branch));
        let vm = &mut metadata.version_metadata;
        if check_property_changed(
            old_branch.as_deref(),
            new_branch.as_str(),
            vm.git_branch.as_str(),
            force,
        ) {
            vm.git_branch = new_branch;
            changed = true;
        }
        if check_property_changed(
            old.as_ref().map(|o| o.git_commit.as_str()),
            request.git_commit.as_str(),
            vm.git_commit_requested.as_str(),
            force,
        ) {
            vm.git_commit_requested = request.git_commit.clone();
            changed = true;
        }

        changed |= merge_map(
            old.as_ref().map(|o| &o.param_values),
            &request.param_values,
            &mut metadata.param_values,
            force,
        );
        changed |= merge_map(
            old.as_ref().map(|o| &o.container_options),
            &request.container_options,
            &mut metadata.container_options,
            force,
        );
        changed |= merge_map(
            old.as_ref().map(|o| &o.container_args),
            &request.container_args,
            &mut metadata.container_args,
            force,
        );
        changed |= merge_map(
            old.as_ref().map(|o| &o.app_config),
            &request.app_config,
            &mut metadata.app_config,
            force,
        );
        changed |= merge_slice(
            old.as_ref().map(|o| o.container_volumes.as_slice()),
            &request.container_volumes,
            &mut metadata.container_volumes,
            force,
        );

        if !changed {
            if old.as_ref() != Some(&request) {
                work.metadata.apply_info = Some(request);
                self.db.apps().update_metadata(&mut op.tx, &work).await?;
            }
            debug!("App {} matches its definition", apd);
            return Ok(false);
        }

        if !work.is_dev {
            VersionStore::new(work.id.clone())
                .increment_app_version(&mut op.tx, &mut work.metadata, ADMIN_USER)
                .await?;
        }
        work.metadata.apply_info = Some(request);
        self.db.apps().update_metadata(&mut op.tx, &work).await?;
        info!("Updated {} from its definition", work.app_path_domain());

        if opts.reload == ReloadOption::None && opts.promote {
            if let Some(prod) = prod.as_mut() {
                if self.promote_app(op, &work, prod).await? {
                    response.promote_results.push(prod.app_path_domain());
                }
            }
        }
        Ok(true)
    }
}

/// Definition files under a glob, a directory or a single file, sorted
pub(crate) fn expand_definition_files(root: &Path) -> Result<Vec<PathBuf>> {
    let display = root.to_string_lossy();
    let mut files = if display.contains(['*', '?', '[']) {
        glob_files(&display)?
    } else if root.is_dir() {
        glob_files(&root.join(DEFINITION_GLOB).to_string_lossy())?
    } else if root.is_file() {
        vec![root.to_path_buf()]
    } else {
        return Err(Error::config(format!(
            "definition path {} does not exist",
            root.display()
        )));
    };

    files.sort();
    if files.is_empty() {
        return Err(Error::config(format!(
            "no definition files found at {}",
            root.display()
        )));
    }
    Ok(files)
}

fn glob_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::config(format!("invalid definition glob {}: {}", pattern, e)))?;
    Ok(paths
        .filter_map(|p| p.ok())
        .filter(|p| p.is_file())
        .collect())
}

/// Relative local sources are relative to their definition file
fn resolve_relative_source(request: &mut CreateAppRequest, definition: &Path) {
    let source = request.source_url.as_str();
    if source.is_empty() || is_git_url(source) || source.starts_with('~') {
        return;
    }
    if Path::new(source).is_absolute() {
        return;
    }
    if let Some(dir) = definition.parent() {
        request.source_url = dir.join(source).to_string_lossy().to_string();
    }
}
