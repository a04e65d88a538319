//! appstage daemon: server context, staging state machine, apply and sync

pub mod apply;
pub mod daemon;
pub mod handlers;
pub mod server;
pub mod stager;
pub mod sync;
pub mod versions;

pub use daemon::Daemon;
pub use handlers::RequestHandler;
pub use server::{Operation, Server};
pub use stager::ReloadParams;
