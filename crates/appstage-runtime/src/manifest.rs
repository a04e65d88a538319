//! Apps described by an `app.toml` manifest
//!
//! ```toml
//! name = "Blog"
//! loads = ["fs.in", "http.in"]
//!
//! [[permissions]]
//! plugin = "fs.in"
//! method = "list"
//! arguments = ["/data"]
//! ```

use appstage_core::{AppEntry, ApproveResult, Error, Permission, Result, APP_MANIFEST_FILE};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::traits::{AppRuntime, Application, SourceFs};

/// Declared name, plugin loads and permissions of an app
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub loads: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Manifest {
    pub fn parse(content: &[u8]) -> Result<Self> {
        let content = std::str::from_utf8(content)
            .map_err(|e| Error::app(format!("{} is not valid UTF-8: {}", APP_MANIFEST_FILE, e)))?;
        let mut manifest: Manifest = toml::from_str(content)
            .map_err(|e| Error::app(format!("parsing {} failed: {}", APP_MANIFEST_FILE, e)))?;

        let mut seen = BTreeSet::new();
        manifest.loads.retain(|load| seen.insert(load.clone()));
        Ok(manifest)
    }
}

fn same_set<T: Ord>(a: &[T], b: &[T]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// App backed by a manifest in its source files
pub struct ManifestApp {
    entry: AppEntry,
    fs: Arc<dyn SourceFs>,
    loaded: RwLock<Option<Manifest>>,
}

impl ManifestApp {
    pub fn new(entry: AppEntry, fs: Arc<dyn SourceFs>) -> Self {
        Self {
            entry,
            fs,
            loaded: RwLock::new(None),
        }
    }

    fn read_manifest(&self) -> Result<Manifest> {
        let content = self.fs.read_file(APP_MANIFEST_FILE).map_err(|e| {
            Error::app(format!(
                "app {} has no usable {}: {}",
                self.entry.app_path_domain(),
                APP_MANIFEST_FILE,
                e
            ))
        })?;
        Manifest::parse(&content)
    }

    /// Manifest of the last load, if any
    pub fn manifest(&self) -> Option<Manifest> {
        self.loaded.read().clone()
    }
}

#[async_trait]
impl Application for ManifestApp {
    fn entry(&self) -> &AppEntry {
        &self.entry
    }

    fn audit(&self) -> Result<ApproveResult> {
        let manifest = self.read_manifest()?;
        let approved_loads = self.entry.metadata.loads.clone();
        let approved_permissions = self.entry.metadata.permissions.clone();
        let needs_approval = !same_set(&manifest.loads, &approved_loads)
            || !same_set(&manifest.permissions, &approved_permissions);

        Ok(ApproveResult {
            id: self.entry.id.clone(),
            app_path_domain: self.entry.app_path_domain(),
            new_loads: manifest.loads,
            new_permissions: manifest.permissions,
            approved_loads,
            approved_permissions,
            needs_approval,
        })
    }

    async fn reload(&self, force: bool, immediate: bool) -> Result<bool> {
        if !immediate {
            *self.loaded.write() = None;
            return Ok(false);
        }
        if !force && self.loaded.read().is_some() {
            return Ok(false);
        }

        let audit = self.audit()?;
        if audit.needs_approval {
            return Err(Error::ApprovalRequired(
                self.entry.app_path_domain().to_string(),
            ));
        }

        let manifest = self.read_manifest()?;
        info!(
            "Loaded app {} version {} with {} permissions",
            self.entry.app_path_domain(),
            self.entry.version(),
            manifest.permissions.len()
        );
        *self.loaded.write() = Some(manifest);
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing app {}", self.entry.app_path_domain());
        *self.loaded.write() = None;
        Ok(())
    }
}

/// Runtime building [`ManifestApp`]s
#[derive(Debug, Clone, Default)]
pub struct ManifestRuntime;

#[async_trait]
impl AppRuntime for ManifestRuntime {
    async fn setup(&self, entry: AppEntry, fs: Arc<dyn SourceFs>) -> Result<Arc<dyn Application>> {
        let app = ManifestApp::new(entry, fs);
        // fail early on a broken manifest
        app.read_manifest()?;
        Ok(Arc::new(app))
    }
}
