//! Seams between the control plane and the app runtime

use appstage_core::{AppEntry, ApproveResult, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Read-only view of an app's source files
pub trait SourceFs: Send + Sync {
    /// Content of the file `name`, relative to the source root
    fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Relative names of the files matching `pattern`, sorted
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;
}

/// A loaded app
#[async_trait]
pub trait Application: Send + Sync {
    /// Entry the app was set up from
    fn entry(&self) -> &AppEntry;

    /// Compare what the source declares against what has been approved
    fn audit(&self) -> Result<ApproveResult>;

    /// Load the source again. Without `immediate` the app is only marked
    /// stale. Returns whether a load happened.
    async fn reload(&self, force: bool, immediate: bool) -> Result<bool>;

    /// Release anything held by the app
    async fn close(&self) -> Result<()>;
}

/// Builds applications from entries and their sources
#[async_trait]
pub trait AppRuntime: Send + Sync {
    async fn setup(&self, entry: AppEntry, fs: Arc<dyn SourceFs>) -> Result<Arc<dyn Application>>;
}
