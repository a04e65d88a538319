//! Error types for appstage

use std::path::PathBuf;

/// appstage error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("App already exists: {0}")]
    AppAlreadyExists(String),

    #[error("Invalid app path: {0}")]
    InvalidPath(String),

    #[error("Invalid path glob: {0}")]
    InvalidGlob(String),

    #[error("Duplicate app {0} declared in definitions")]
    DuplicateApp(String),

    #[error("{0}")]
    ImmutableProperty(String),

    #[error("app {0} needs approval")]
    ApprovalRequired(String),

    #[error("Operation not supported for dev app {0}")]
    DevAppUnsupported(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("No files found in source {0}")]
    SourceEmpty(PathBuf),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Data consistency error: {0}")]
    Consistency(String),

    #[error("Sync entry not found: {0}")]
    SyncNotFound(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("IPC connection failed: {0}")]
    IpcConnectionFailed(String),

    #[error("Database error: {0}")]
    DbError(String),

    #[error("App error: {0}")]
    AppError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type alias for appstage
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::ConfigError(msg.into())
    }

    pub fn ipc<S: Into<String>>(msg: S) -> Self {
        Error::IpcError(msg.into())
    }

    pub fn db<S: Into<String>>(msg: S) -> Self {
        Error::DbError(msg.into())
    }

    pub fn git<S: Into<String>>(msg: S) -> Self {
        Error::Git(msg.into())
    }

    pub fn consistency<S: Into<String>>(msg: S) -> Self {
        Error::Consistency(msg.into())
    }

    pub fn app<S: Into<String>>(msg: S) -> Self {
        Error::AppError(msg.into())
    }

    /// Errors caused by the request itself; retrying will not help
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::AppNotFound(_)
                | Error::AppAlreadyExists(_)
                | Error::InvalidPath(_)
                | Error::InvalidGlob(_)
                | Error::DuplicateApp(_)
                | Error::ImmutableProperty(_)
                | Error::ApprovalRequired(_)
                | Error::DevAppUnsupported(_)
                | Error::InvalidVersion(_)
                | Error::SyncNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AppNotFound("/myapp".to_string());
        assert_eq!(err.to_string(), "App not found: /myapp");

        let err = Error::ApprovalRequired("example.com:/app".to_string());
        assert_eq!(err.to_string(), "app example.com:/app needs approval");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_user_error_classification() {
        assert!(Error::DuplicateApp("/a".into()).is_user_error());
        assert!(Error::ImmutableProperty("x".into()).is_user_error());
        assert!(!Error::git("clone failed").is_user_error());
        assert!(!Error::consistency("missing staging app").is_user_error());
    }
}
