//! Constants and default values for appstage

use std::path::PathBuf;

/// Default appstage home directory name
pub const APPSTAGE_DIR: &str = ".appstage";

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "APPSTAGE_HOME";

/// Environment variable overriding the server config file
pub const CONFIG_ENV: &str = "APPSTAGE_CONFIG";

/// Default socket file name
pub const SOCKET_FILE: &str = "appstaged.sock";

/// Default database file name
pub const DB_FILE: &str = "appstage.db";

/// Default server config file name
pub const CONFIG_FILE: &str = "appstage.toml";

/// Suffix appended to a production app path to form its staging path
pub const STAGE_SUFFIX: &str = "_cl_stage";

/// Reserved marker that may not appear in the last segment of a user app path
pub const RESERVED_PATH_MARKER: &str = "_cl_";

/// Value meaning "no source" or "clear this setting"
pub const NO_SOURCE: &str = "-";

/// App id prefixes by role
pub const ID_PREFIX_PROD: &str = "app_prd_";
pub const ID_PREFIX_STAGE: &str = "app_stg_";
pub const ID_PREFIX_DEV: &str = "app_dev_";

/// Sync entry id prefix
pub const SYNC_ID_PREFIX: &str = "cl_syn_";

/// User recorded on changes made through the local socket
pub const ADMIN_USER: &str = "admin";

/// Config key set from the `#` suffix of a source url
pub const STAR_BASE_KEY: &str = "star_base";

/// Default git branch when none is recorded or requested
pub const DEFAULT_GIT_BRANCH: &str = "main";

/// Default SSH user for git auth profiles
pub const DEFAULT_GIT_USER: &str = "git";

/// Files larger than this are stored gzip-compressed
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Directory skipped when snapshotting a source tree
pub const GIT_DIR: &str = ".git";

/// App manifest file read by the default runtime
pub const APP_MANIFEST_FILE: &str = "app.toml";

/// Glob used for definition files inside a directory
pub const DEFINITION_GLOB: &str = "*.toml";

/// Default sync schedule in minutes
pub const DEFAULT_SCHEDULE_MINS: i64 = 5;

/// Default sync runner tick in seconds
pub const DEFAULT_SYNC_TICK_SECS: u64 = 60;

/// Consecutive failures after which a scheduled sync stops running
pub const DEFAULT_MAX_SYNC_FAILURES: u32 = 5;

/// Default timeout for a single git network operation
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 120;

/// Get the appstage home directory
pub fn appstage_home() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    dirs::home_dir()
        .map(|h| h.join(APPSTAGE_DIR))
        .unwrap_or_else(|| PathBuf::from(APPSTAGE_DIR))
}

/// Get the socket path
pub fn socket_path() -> PathBuf {
    appstage_home().join(SOCKET_FILE)
}

/// Get the database path
pub fn db_path() -> PathBuf {
    appstage_home().join(DB_FILE)
}

/// Get the server config path
pub fn config_path() -> PathBuf {
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => appstage_home().join(CONFIG_FILE),
    }
}
