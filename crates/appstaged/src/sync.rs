//! Sync entries: recurring apply jobs and the runner that schedules them

use appstage_core::{
    is_git_url, AppApplyResponse, ApplyOptions, Error, ReloadOption, Result, SyncCreateResponse,
    SyncEntry, SyncJobStatus, SyncMetadata, SyncState, ADMIN_USER, SYNC_ID_PREFIX,
};
use appstage_git::RepoCache;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::server::Server;
use crate::stager::{absolute_source, ReloadParams};

enum SyncAttempt {
    Done(SyncJobStatus),
    /// An app of the last run is gone, run again without the commit check
    Rerun,
}

impl Server {
    /// Create a sync entry and run it once
    ///
    /// A first run that fails leaves nothing behind.
    pub async fn create_sync(
        &self,
        path: &str,
        scheduled: bool,
        dry_run: bool,
        mut metadata: SyncMetadata,
    ) -> Result<SyncCreateResponse> {
        if metadata.schedule_frequency <= 0 {
            metadata.schedule_frequency = self.config.system.default_schedule_mins;
        }
        let path = if is_git_url(path) {
            path.to_string()
        } else {
            absolute_source(path)?
        };

        let entry = SyncEntry {
            id: format!("{}{}", SYNC_ID_PREFIX, uuid::Uuid::new_v4().simple()),
            path,
            is_scheduled: scheduled,
            user_id: ADMIN_USER.to_string(),
            create_time: Utc::now(),
            metadata,
            status: SyncJobStatus::default(),
        };

        let mut cache = self.repo_cache()?;
        let status = self
            .run_sync_job(&entry, false, &mut cache, dry_run, true)
            .await?;
        cache.cleanup();

        info!("Created sync {} for {}", entry.id, entry.path);
        Ok(SyncCreateResponse {
            id: entry.id,
            dry_run,
            schedule_frequency: entry.metadata.schedule_frequency,
            status,
        })
    }

    pub async fn list_syncs(&self) -> Result<Vec<SyncEntry>> {
        self.db.syncs().list().await
    }

    pub async fn delete_sync(&self, id: &str, dry_run: bool) -> Result<()> {
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        self.db.syncs().delete(&mut op.tx, id).await?;
        self.complete_transaction(op, &[], dry_run).await?;
        info!("Deleted sync {}", id);
        Ok(())
    }

    /// Run one sync entry now and return it with its new status
    pub async fn run_sync(&self, id: &str) -> Result<SyncEntry> {
        let mut op = self.begin().await?;
        let entry = self.db.syncs().get(&mut op.tx, id).await?;
        drop(op);

        let mut cache = self.repo_cache()?;
        self.run_sync_job(&entry, true, &mut cache, false, false)
            .await?;
        cache.cleanup();

        let mut op = self.begin().await?;
        let entry = self.db.syncs().get(&mut op.tx, id).await?;
        Ok(entry)
    }

    /// Run a sync entry, recording its status
    ///
    /// With `check_commit_hash`, an unchanged definitions repo skips the
    /// apply. Failures of existing entries are recorded before the error is
    /// returned.
    pub(crate) async fn run_sync_job(
        &self,
        entry: &SyncEntry,
        check_commit_hash: bool,
        cache: &mut RepoCache,
        dry_run: bool,
        create: bool,
    ) -> Result<SyncJobStatus> {
        let mut check = check_commit_hash;
        loop {
            match self.try_sync_job(entry, check, cache, dry_run, create).await {
                Ok(SyncAttempt::Done(status)) => return Ok(status),
                Ok(SyncAttempt::Rerun) => {
                    warn!("Apps of sync {} changed, rerunning without commit check", entry.id);
                    check = false;
                }
                Err(e) => {
                    error!("Sync {} failed: {}", entry.id, e);
                    if !create {
                        self.record_sync_failure(entry, &e, dry_run).await?;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn try_sync_job(
        &self,
        entry: &SyncEntry,
        check: bool,
        cache: &mut RepoCache,
        dry_run: bool,
        create: bool,
    ) -> Result<SyncAttempt> {
        let metadata = &entry.metadata;
        let last_commit_id = if check {
            entry.status.commit_id.as_str()
        } else {
            ""
        };
        let opts = ApplyOptions {
            approve: metadata.approve,
            dry_run,
            promote: metadata.promote,
            reload: metadata.reload,
            branch: metadata.git_branch.clone(),
            commit: String::new(),
            git_auth: metadata.git_auth.clone(),
            clobber: metadata.clobber,
            force_reload: metadata.force_reload,
        };
        let set = self
            .resolve_definitions(&entry.path, &opts, last_commit_id, cache)
            .await?;

        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        if create {
            self.db.syncs().create(&mut op.tx, entry).await?;
        }

        let (mut response, mut paths) = self.apply_tx(&mut op, cache, &set, "all", &opts).await?;
        if response.skipped_apply && metadata.reload == ReloadOption::Matched {
            // definitions unchanged, the apps may still have new commits
            let last_apps = entry.status.apply_response.filtered_apps.clone();
            let mut apps = Vec::with_capacity(last_apps.len());
            for apd in &last_apps {
                match self.db.apps().get(&mut op.tx, apd).await? {
                    Some(app) => apps.push(app),
                    None if check => return Ok(SyncAttempt::Rerun),
                    None => {
                        return Err(Error::consistency(format!(
                            "app {} of sync {} not found",
                            apd, entry.id
                        )))
                    }
                }
            }

            let params = ReloadParams {
                approve: metadata.approve,
                promote: metadata.promote,
                force_reload: metadata.force_reload,
                ..Default::default()
            };
            for app in apps {
                let result = self.reload_app(&mut op, cache, app, &params).await?;
                response.reload_results.extend(result.reload_results);
                response.skipped_results.extend(result.skipped_results);
                response.approve_results.extend(result.approve_result);
                response.promote_results.extend(result.promote_results);
            }
            paths = last_apps
                .iter()
                .flat_map(|apd| [apd.clone(), apd.stage_path()])
                .collect();
            response.filtered_apps = last_apps;
        }

        let status = SyncJobStatus {
            last_execution_time: Some(Utc::now()),
            error: String::new(),
            commit_id: response.commit_id.clone(),
            failure_count: 0,
            state: SyncState::Success,
            apply_response: response,
        };
        self.db
            .syncs()
            .update_status(&mut op.tx, &entry.id, &status)
            .await?;
        self.complete_transaction(op, &paths, dry_run).await?;
        debug!(
            "Sync {} done at commit {:?}, skipped {}",
            entry.id, status.commit_id, status.apply_response.skipped_apply
        );
        Ok(SyncAttempt::Done(status))
    }

    async fn record_sync_failure(&self, entry: &SyncEntry, err: &Error, dry_run: bool) -> Result<()> {
        let status = SyncJobStatus {
            last_execution_time: Some(Utc::now()),
            error: err.to_string(),
            commit_id: entry.status.commit_id.clone(),
            failure_count: entry.status.failure_count + 1,
            state: SyncState::Failed,
            apply_response: AppApplyResponse {
                filtered_apps: entry.status.apply_response.filtered_apps.clone(),
                ..Default::default()
            },
        };

        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        self.db
            .syncs()
            .update_status(&mut op.tx, &entry.id, &status)
            .await?;
        self.complete_transaction(op, &[], dry_run).await
    }

    /// Run every due sync entry once; returns how many succeeded
    pub async fn run_sync_jobs(&self) -> Result<usize> {
        let entries = self.db.syncs().list().await?;
        let now = Utc::now();
        let max_failures = self.config.system.max_sync_failure_count;

        let mut cache = self.repo_cache()?;
        let mut succeeded = 0;
        for entry in entries {
            if !entry.is_due(now) {
                continue;
            }
            if entry.status.failure_count >= max_failures {
                debug!(
                    "Sync {} disabled after {} failures",
                    entry.id, entry.status.failure_count
                );
                continue;
            }

            match self.run_sync_job(&entry, true, &mut cache, false, false).await {
                Ok(status) => {
                    succeeded += 1;
                    debug!("Sync {} ran, commit {}", entry.id, status.commit_id);
                }
                // already recorded on the entry
                Err(_) => continue,
            }
        }
        cache.cleanup();
        Ok(succeeded)
    }

    /// Periodically run due sync entries until the task is dropped
    pub async fn sync_runner(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.system.sync_tick_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Sync runner started, checking every {:?}", period);

        loop {
            interval.tick().await;
            if let Err(e) = self.run_sync_jobs().await {
                error!("Sync tick failed: {}", e);
            }
        }
    }
}
