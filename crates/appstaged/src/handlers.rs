//! IPC request handlers

use appstage_core::{Error, Result};
use appstage_ipc::{Request, Response};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::server::Server;
use crate::stager::ReloadParams;

/// Maps IPC requests onto server operations
#[derive(Clone)]
pub struct RequestHandler {
    server: Arc<Server>,
    shutdown: Arc<Notify>,
}

impl RequestHandler {
    pub fn new(server: Arc<Server>, shutdown: Arc<Notify>) -> Self {
        Self { server, shutdown }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let server = &self.server;
        match request {
            Request::Ping => Response::Pong,

            Request::CreateApp {
                path,
                approve,
                dry_run,
                request,
            } => {
                info!("Handling create request for {}", path);
                respond(
                    "create",
                    server.create_app(&path, approve, dry_run, request).await,
                    Response::Created,
                )
            }

            Request::ListApps { glob, internal } => respond(
                "list",
                server.list_apps(&glob, internal).await,
                |apps| Response::Apps { apps },
            ),

            Request::DeleteApps { glob, dry_run } => {
                info!("Handling delete request for {}", glob);
                respond(
                    "delete",
                    server.delete_apps(&glob, dry_run).await,
                    Response::Deleted,
                )
            }

            Request::Reload {
                glob,
                approve,
                dry_run,
                promote,
                branch,
                commit,
                git_auth,
                force_reload,
            } => {
                info!("Handling reload request for {}", glob);
                let params = ReloadParams {
                    approve,
                    promote,
                    branch,
                    commit,
                    git_auth,
                    force_reload,
                };
                respond(
                    "reload",
                    server.reload_apps(&glob, dry_run, params).await,
                    Response::Reloaded,
                )
            }

            Request::Promote { glob, dry_run } => {
                info!("Handling promote request for {}", glob);
                respond(
                    "promote",
                    server.promote_apps(&glob, dry_run).await,
                    Response::Promoted,
                )
            }

            Request::StagedUpdate {
                glob,
                dry_run,
                promote,
                update,
            } => {
                let name = update.name();
                info!("Handling {} request for {}", name, glob);
                respond(
                    name,
                    server.staged_update(&glob, dry_run, promote, update).await,
                    Response::StagedUpdated,
                )
            }

            Request::UpdateSettings {
                glob,
                dry_run,
                update,
            } => respond(
                "settings update",
                server.update_app_settings(&glob, dry_run, update).await,
                Response::SettingsUpdated,
            ),

            Request::Apply {
                apply_path,
                glob,
                options,
            } => {
                info!("Handling apply request for {} ({})", apply_path, glob);
                respond(
                    "apply",
                    server.apply(&apply_path, &glob, options).await,
                    Response::Applied,
                )
            }

            Request::VersionList { path } => respond(
                "version list",
                server.version_list(&path).await,
                |versions| Response::Versions { versions },
            ),

            Request::VersionFiles { path, version } => respond(
                "version files",
                server.version_files(&path, version).await,
                |(version, files)| Response::Files { version, files },
            ),

            Request::VersionSwitch {
                path,
                dry_run,
                target,
            } => respond(
                "version switch",
                server.version_switch(&path, dry_run, target).await,
                Response::VersionSwitched,
            ),

            Request::SyncCreate {
                path,
                scheduled,
                dry_run,
                metadata,
            } => {
                info!("Handling sync create request for {}", path);
                respond(
                    "sync create",
                    server.create_sync(&path, scheduled, dry_run, metadata).await,
                    Response::SyncCreated,
                )
            }

            Request::SyncList => respond("sync list", server.list_syncs().await, |entries| {
                Response::Syncs { entries }
            }),

            Request::SyncDelete { id, dry_run } => respond(
                "sync delete",
                server.delete_sync(&id, dry_run).await,
                |()| Response::SyncDeleted { id, dry_run },
            ),

            Request::SyncRun { id } => {
                info!("Handling sync run request for {}", id);
                respond("sync run", server.run_sync(&id).await, |entry| {
                    Response::SyncRan { entry }
                })
            }

            Request::Shutdown => {
                info!("Shutdown requested");
                self.shutdown.notify_one();
                Response::ok("Daemon shutting down")
            }
        }
    }
}

/// Turn an operation result into a response, logging failures
fn respond<T>(what: &str, result: Result<T>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            log_failure(what, &e);
            Response::error(e.to_string())
        }
    }
}

fn log_failure(what: &str, e: &Error) {
    if e.is_user_error() {
        warn!("{} rejected: {}", what, e);
    } else {
        error!("{} failed: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::*;
    use appstage_core::{AppPathDomain, CreateAppRequest, VersionTarget};

    #[tokio::test]
    async fn test_handle_app_lifecycle() {
        let (server, dir) = setup_server().await;
        let handler = RequestHandler::new(server, Arc::new(Notify::new()));
        let source = write_app(dir.path(), "blog", OPEN_MANIFEST);

        assert!(matches!(handler.handle(Request::Ping).await, Response::Pong));

        let response = handler
            .handle(Request::CreateApp {
                path: "/blog".to_string(),
                approve: false,
                dry_run: false,
                request: CreateAppRequest {
                    source_url: source.to_string_lossy().to_string(),
                    ..Default::default()
                },
            })
            .await;
        assert!(matches!(response, Response::Created(_)));

        match handler
            .handle(Request::ListApps {
                glob: "all".to_string(),
                internal: true,
            })
            .await
        {
            Response::Apps { apps } => assert_eq!(apps.len(), 2),
            other => panic!("unexpected response {:?}", other),
        }

        match handler
            .handle(Request::Reload {
                glob: "/blog".to_string(),
                approve: false,
                dry_run: false,
                promote: true,
                branch: String::new(),
                commit: String::new(),
                git_auth: String::new(),
                force_reload: false,
            })
            .await
        {
            Response::Reloaded(reload) => {
                assert_eq!(reload.promote_results, vec![AppPathDomain::new("", "/blog")])
            }
            other => panic!("unexpected response {:?}", other),
        }

        match handler
            .handle(Request::VersionSwitch {
                path: "/blog".to_string(),
                dry_run: false,
                target: VersionTarget::Revert,
            })
            .await
        {
            Response::VersionSwitched(switch) => assert_eq!(switch.to_version, 1),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_errors_become_error_responses() {
        let (server, _dir) = setup_server().await;
        let handler = RequestHandler::new(server, Arc::new(Notify::new()));

        let response = handler
            .handle(Request::VersionList {
                path: "/missing".to_string(),
            })
            .await;
        assert!(response.is_error());

        let response = handler
            .handle(Request::DeleteApps {
                glob: "a:b:c".to_string(),
                dry_run: false,
            })
            .await;
        assert!(response
            .error_message()
            .unwrap()
            .contains("domain:path"));
    }

    #[tokio::test]
    async fn test_shutdown_notifies() {
        let (server, _dir) = setup_server().await;
        let shutdown = Arc::new(Notify::new());
        let handler = RequestHandler::new(server, shutdown.clone());

        let response = handler.handle(Request::Shutdown).await;
        assert!(matches!(response, Response::Ok { .. }));
        // notify_one stores a permit for the next waiter
        shutdown.notified().await;
    }
}
