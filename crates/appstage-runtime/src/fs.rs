//! Source readers: a directory on disk, or a version snapshot loaded from storage

use appstage_core::{Error, Result};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::traits::SourceFs;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Source files read straight from a directory; used by dev apps
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceFs for DiskFs {
    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name.trim_start_matches('/'));
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::app(format!("{} not found in {}", name, self.root.display()))
            } else {
                Error::IoError(e)
            }
        })
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let full = format!(
            "{}/{}",
            Pattern::escape(&self.root.to_string_lossy()),
            pattern.trim_start_matches('/')
        );
        let paths = glob::glob_with(&full, MATCH_OPTIONS)
            .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;

        let mut names = Vec::new();
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.root) {
                names.push(relative.to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Source files of one stored version
#[derive(Debug, Clone, Default)]
pub struct DbFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl DbFs {
    pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl SourceFs for DbFs {
    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .get(name.trim_start_matches('/'))
            .cloned()
            .ok_or_else(|| Error::app(format!("{} not found in stored version", name)))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = Pattern::new(pattern.trim_start_matches('/'))
            .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        Ok(self
            .files
            .keys()
            .filter(|name| pattern.matches_with(name, MATCH_OPTIONS))
            .cloned()
            .collect())
    }
}
