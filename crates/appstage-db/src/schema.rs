//! Database schema for appstage

/// SQLite schema initialization
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS apps (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    domain TEXT NOT NULL DEFAULT '',
    source_url TEXT NOT NULL,
    is_dev INTEGER NOT NULL DEFAULT 0,
    main_app TEXT NOT NULL DEFAULT '',
    user_id TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    update_time TEXT NOT NULL,
    settings TEXT NOT NULL DEFAULT '{}',
    metadata TEXT NOT NULL DEFAULT '{}',
    UNIQUE (path, domain)
);

CREATE INDEX IF NOT EXISTS idx_apps_main_app ON apps(main_app);

CREATE TABLE IF NOT EXISTS app_versions (
    appid TEXT NOT NULL,
    version INTEGER NOT NULL,
    previous_version INTEGER NOT NULL DEFAULT 0,
    user_id TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT '{}',
    create_time TEXT NOT NULL,
    PRIMARY KEY (appid, version)
);

CREATE TABLE IF NOT EXISTS files (
    sha TEXT PRIMARY KEY,
    compression_type TEXT NOT NULL DEFAULT '',
    content BLOB NOT NULL,
    create_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS app_files (
    appid TEXT NOT NULL,
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    sha TEXT NOT NULL,
    uncompressed_size INTEGER NOT NULL,
    create_time TEXT NOT NULL,
    PRIMARY KEY (appid, version, name)
);

CREATE TABLE IF NOT EXISTS sync (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    is_scheduled INTEGER NOT NULL DEFAULT 0,
    user_id TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT '{}'
);
"#;
