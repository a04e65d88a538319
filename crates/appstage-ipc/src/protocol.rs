//! IPC Protocol - Request/Response types

use appstage_core::{
    AppApplyResponse, AppCreateResponse, AppDeleteResponse, AppEntry, AppFile,
    AppPromoteResponse, AppReloadResponse, AppSettingsResponse, AppStagedUpdateResponse,
    AppVersion, ApplyOptions, CreateAppRequest, SettingsUpdate, StagedUpdate, SyncCreateResponse,
    SyncEntry, SyncMetadata, VersionSwitchResponse, VersionTarget,
};
use serde::{Deserialize, Serialize};

/// IPC Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Check if daemon is alive
    Ping,

    /// Create an app at `domain:path`
    CreateApp {
        path: String,
        approve: bool,
        dry_run: bool,
        request: CreateAppRequest,
    },

    /// List apps matching a glob
    ListApps { glob: String, internal: bool },

    /// Delete apps matching a glob, with their staging apps
    DeleteApps { glob: String, dry_run: bool },

    /// Reload apps from source
    Reload {
        glob: String,
        approve: bool,
        dry_run: bool,
        promote: bool,
        #[serde(default)]
        branch: String,
        #[serde(default)]
        commit: String,
        #[serde(default)]
        git_auth: String,
        #[serde(default)]
        force_reload: bool,
    },

    /// Promote staging to production
    Promote { glob: String, dry_run: bool },

    /// Versioned change to staging (approval, params, metadata, accounts)
    StagedUpdate {
        glob: String,
        dry_run: bool,
        promote: bool,
        update: StagedUpdate,
    },

    /// Change non-versioned settings
    UpdateSettings {
        glob: String,
        dry_run: bool,
        update: SettingsUpdate,
    },

    /// Reconcile apps against definition files
    Apply {
        apply_path: String,
        glob: String,
        options: ApplyOptions,
    },

    /// Versions of an app
    VersionList { path: String },

    /// Files of an app version, the active one when unset
    VersionFiles { path: String, version: Option<i64> },

    /// Make another stored version active
    VersionSwitch {
        path: String,
        dry_run: bool,
        target: VersionTarget,
    },

    /// Register a sync entry and run it once
    SyncCreate {
        path: String,
        scheduled: bool,
        dry_run: bool,
        metadata: SyncMetadata,
    },

    SyncList,

    SyncDelete { id: String, dry_run: bool },

    /// Run a sync entry now
    SyncRun { id: String },

    /// Stop the daemon
    Shutdown,
}

/// IPC Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Ping response
    Pong,

    /// Success with message
    Ok { message: String },

    /// Error with message
    Error { message: String },

    Created(AppCreateResponse),

    Apps { apps: Vec<AppEntry> },

    Deleted(AppDeleteResponse),

    Reloaded(AppReloadResponse),

    Promoted(AppPromoteResponse),

    StagedUpdated(AppStagedUpdateResponse),

    SettingsUpdated(AppSettingsResponse),

    Applied(AppApplyResponse),

    Versions { versions: Vec<AppVersion> },

    Files { version: i64, files: Vec<AppFile> },

    VersionSwitched(VersionSwitchResponse),

    SyncCreated(SyncCreateResponse),

    Syncs { entries: Vec<SyncEntry> },

    SyncDeleted { id: String, dry_run: bool },

    /// Entry after a manual run, with its recorded status
    SyncRan { entry: SyncEntry },
}

impl Response {
    pub fn ok<S: Into<String>>(message: S) -> Self {
        Response::Ok {
            message: message.into(),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Response::Error { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appstage_core::{AppPathDomain, ConfigType, ReloadOption};

    #[test]
    fn test_create_request_wire_format() {
        let req = Request::CreateApp {
            path: "example.com:/blog".to_string(),
            approve: true,
            dry_run: false,
            request: CreateAppRequest {
                source_url: "github.com/org/repo/blog".to_string(),
                ..Default::default()
            },
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"create_app""#));
        assert!(json.contains("github.com/org/repo/blog"));
    }

    #[test]
    fn test_staged_update_request() {
        let req = Request::StagedUpdate {
            glob: "all".to_string(),
            dry_run: false,
            promote: true,
            update: StagedUpdate::UpdateMetadata {
                config_type: ConfigType::ContainerOptions,
                entries: vec!["cpus=2".to_string()],
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();
        match parsed {
            Request::StagedUpdate { update, promote, .. } => {
                assert!(promote);
                assert_eq!(update.name(), "update_metadata");
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_reload_defaults_optional_fields() {
        let json = r#"{"type":"reload","glob":"/blog","approve":false,"dry_run":true,"promote":false}"#;
        match serde_json::from_str::<Request>(json).unwrap() {
            Request::Reload {
                dry_run,
                branch,
                force_reload,
                ..
            } => {
                assert!(dry_run);
                assert!(branch.is_empty());
                assert!(!force_reload);
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_newtype_response() {
        let resp = Response::Applied(AppApplyResponse {
            create_results: vec![AppPathDomain::new("", "/blog")],
            commit_id: "abc".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"applied""#));

        match serde_json::from_str::<Response>(&json).unwrap() {
            Response::Applied(apply) => {
                assert_eq!(apply.commit_id, "abc");
                assert_eq!(apply.create_results[0].path, "/blog");
            }
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_sync_create_request() {
        let req = Request::SyncCreate {
            path: "github.com/org/defs".to_string(),
            scheduled: true,
            dry_run: false,
            metadata: SyncMetadata {
                reload: ReloadOption::Matched,
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""reload":"matched""#));
    }

    #[test]
    fn test_error_response() {
        let resp = Response::error("app /blog needs approval");
        assert!(resp.is_error());
        assert_eq!(resp.error_message(), Some("app /blog needs approval"));
        assert!(Response::ok("done").error_message().is_none());
    }
}
