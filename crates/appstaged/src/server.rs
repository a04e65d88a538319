//! Server context shared by every request

use appstage_core::{
    AppEntry, AppGlob, AppPathDomain, DefinitionEvaluator, Error, FileDefinitionEvaluator, Result,
    ServerConfig,
};
use appstage_db::{commit, Database, SqliteConnection, Tx, VersionStore};
use appstage_git::{GitAuthConfig, RepoCache};
use appstage_runtime::{AppRuntime, Application, DbFs, DiskFs, ManifestRuntime, SourceFs};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

/// One mutating operation: its transaction and the apps it loaded
///
/// Dropping an operation rolls the transaction back and closes the
/// loaded apps.
pub struct Operation {
    pub(crate) tx: Tx,
    loaded: LoadedApps,
}

impl Operation {
    pub fn new(tx: Tx) -> Self {
        Self {
            tx,
            loaded: LoadedApps::default(),
        }
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Remember an app loaded inside this operation, replacing an earlier load
    pub(crate) fn loaded(&mut self, app: Arc<dyn Application>) {
        if let Some(old) = self.loaded.0.insert(app.entry().app_path_domain(), app) {
            spawn_close(vec![old]);
        }
    }
}

/// Apps loaded by an operation and not yet handed to the cache
#[derive(Default)]
struct LoadedApps(HashMap<AppPathDomain, Arc<dyn Application>>);

impl LoadedApps {
    fn take(&mut self) -> Vec<Arc<dyn Application>> {
        self.0.drain().map(|(_, app)| app).collect()
    }
}

impl Drop for LoadedApps {
    fn drop(&mut self) {
        if !self.0.is_empty() {
            spawn_close(self.take());
        }
    }
}

async fn close_all(apps: Vec<Arc<dyn Application>>) {
    for app in apps {
        if let Err(e) = app.close().await {
            warn!("Failed to close app {}: {}", app.entry().app_path_domain(), e);
        }
    }
}

/// Close apps from a synchronous context
fn spawn_close(apps: Vec<Arc<dyn Application>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close_all(apps));
        }
        Err(_) => warn!("No runtime to close {} discarded apps", apps.len()),
    }
}

pub struct Server {
    pub(crate) db: Database,
    pub(crate) config: ServerConfig,
    git_config: GitAuthConfig,
    pub(crate) evaluator: Arc<dyn DefinitionEvaluator>,
    runtime: Arc<dyn AppRuntime>,
    apps: RwLock<HashMap<AppPathDomain, Arc<dyn Application>>>,
    write_lock: Mutex<()>,
}

impl Server {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self::with_components(
            db,
            config,
            Arc::new(FileDefinitionEvaluator),
            Arc::new(ManifestRuntime),
        )
    }

    pub fn with_components(
        db: Database,
        config: ServerConfig,
        evaluator: Arc<dyn DefinitionEvaluator>,
        runtime: Arc<dyn AppRuntime>,
    ) -> Self {
        let git_config = GitAuthConfig::from(&config);
        Self {
            db,
            config,
            git_config,
            evaluator,
            runtime,
            apps: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Fresh git cache for one request or one sync tick
    pub fn repo_cache(&self) -> Result<RepoCache> {
        RepoCache::new(self.git_config.clone())
    }

    /// Serializes mutating transitions
    pub(crate) async fn write_gate(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) async fn begin(&self) -> Result<Operation> {
        Ok(Operation::new(self.db.begin().await?))
    }

    /// Build the in-memory app for an entry
    ///
    /// Dev apps read their source directory; every other app reads the
    /// stored snapshot of its current version.
    pub(crate) async fn setup_app(
        &self,
        conn: &mut SqliteConnection,
        entry: &AppEntry,
    ) -> Result<Arc<dyn Application>> {
        let fs: Arc<dyn SourceFs> = if entry.is_dev {
            Arc::new(DiskFs::new(&entry.source_url))
        } else {
            let files = VersionStore::new(entry.id.clone())
                .load_files(conn, entry.version())
                .await?;
            if files.is_empty() {
                let e = Error::consistency(format!(
                    "no files stored for app {} version {}",
                    entry.app_path_domain(),
                    entry.version()
                ));
                error!("{}", e);
                return Err(e);
            }
            Arc::new(DbFs::new(files))
        };

        self.runtime.setup(entry.clone(), fs).await
    }

    /// Set up and fully load an app, keeping it for the cache on commit
    pub(crate) async fn load_app(&self, op: &mut Operation, entry: &AppEntry) -> Result<()> {
        let app = self.setup_app(&mut op.tx, entry).await?;
        app.reload(true, true).await?;
        op.loaded(app);
        Ok(())
    }

    /// Staging entry of a production app
    pub(crate) async fn get_stage_app(
        &self,
        conn: &mut SqliteConnection,
        entry: &AppEntry,
    ) -> Result<AppEntry> {
        let path = entry.app_path_domain();
        if entry.is_dev {
            return Err(Error::DevAppUnsupported(path.to_string()));
        }
        if entry.is_stage() || !entry.main_app.is_empty() {
            return Err(Error::InvalidPath(format!("{} is already a staging app", path)));
        }

        let stage = self
            .db
            .apps()
            .get(conn, &path.stage_path())
            .await?
            .ok_or_else(|| {
                let e = Error::consistency(format!("staging app missing for {}", path));
                error!("{}", e);
                e
            })?;
        if stage.main_app != entry.id {
            let e = Error::consistency(format!(
                "staging app {} belongs to {}, expected {}",
                stage.app_path_domain(),
                stage.main_app,
                entry.id
            ));
            error!("{}", e);
            return Err(e);
        }
        Ok(stage)
    }

    /// Main apps matching `glob`, each followed by its linked apps when `internal` is set
    pub(crate) async fn filter_apps(
        &self,
        conn: &mut SqliteConnection,
        glob: &str,
        internal: bool,
    ) -> Result<Vec<AppEntry>> {
        let glob = AppGlob::parse(glob)?;
        let repo = self.db.apps();
        let mut result = Vec::new();
        for app in repo.get_all_tx(conn, false).await? {
            if !glob.matches(&app.app_path_domain()) {
                continue;
            }
            let linked = if internal {
                repo.get_linked_apps(conn, &app.id).await?
            } else {
                Vec::new()
            };
            result.push(app);
            result.extend(linked);
        }
        Ok(result)
    }

    /// Commit an operation, then refresh the app cache
    ///
    /// A dry run drops the operation, which rolls it back. Cached apps for
    /// `paths` are closed; apps loaded by the operation replace them.
    pub async fn complete_transaction(
        &self,
        op: Operation,
        paths: &[AppPathDomain],
        dry_run: bool,
    ) -> Result<()> {
        let Operation { tx, mut loaded } = op;
        if dry_run {
            debug!("Dry run, rolling back {} app changes", paths.len());
            drop(tx);
            close_all(loaded.take()).await;
            return Ok(());
        }

        commit(tx).await?;

        let mut stale = Vec::new();
        {
            let mut apps = self.apps.write();
            for path in paths {
                if let Some(app) = apps.remove(path) {
                    stale.push(app);
                }
            }
            for app in loaded.take() {
                if let Some(old) = apps.insert(app.entry().app_path_domain(), app) {
                    stale.push(old);
                }
            }
        }

        close_all(stale).await;
        Ok(())
    }

    /// Loaded app for a path, if one is cached
    pub fn cached_app(&self, path: &AppPathDomain) -> Option<Arc<dyn Application>> {
        self.apps.read().get(path).cloned()
    }

    /// Close every cached app
    pub async fn close_apps(&self) {
        let apps: Vec<_> = self.apps.write().drain().map(|(_, app)| app).collect();
        close_all(apps).await;
    }
}
