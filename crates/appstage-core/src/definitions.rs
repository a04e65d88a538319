//! Declarative app definition files
//!
//! A definition file lists apps under `apps`:
//!
//! ```toml
//! [[apps]]
//! path = "example.com:/blog"
//! source = "github.com/org/repo/blog"
//! git_branch = "main"
//!
//! [apps.params]
//! title = "Blog"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ConfigFormat;
use crate::error::{Error, Result};
use crate::types::CreateAppRequest;

/// One declared app: its `domain:path` plus desired state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppDefinition {
    pub path: String,
    #[serde(flatten)]
    pub request: CreateAppRequest,
}

/// Turns the bytes of a definition file into app definitions
pub trait DefinitionEvaluator: Send + Sync {
    fn evaluate(&self, path: &Path, content: &[u8]) -> Result<Vec<AppDefinition>>;
}

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    apps: Vec<AppDefinition>,
}

/// Evaluator for TOML, YAML and JSON definition files, chosen by extension
#[derive(Debug, Clone, Default)]
pub struct FileDefinitionEvaluator;

impl DefinitionEvaluator for FileDefinitionEvaluator {
    fn evaluate(&self, path: &Path, content: &[u8]) -> Result<Vec<AppDefinition>> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::config(format!(
                "Unsupported definition file extension: {}",
                path.display()
            ))
        })?;
        let content = std::str::from_utf8(content)
            .map_err(|e| Error::config(format!("{} is not valid UTF-8: {}", path.display(), e)))?;
        let file: DefinitionFile = format
            .parse(content)
            .map_err(|e| Error::config(format!("Error evaluating {}: {}", path.display(), e)))?;
        Ok(file.apps)
    }
}
