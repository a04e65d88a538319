//! appstage runtime - loading app sources and auditing their permissions

pub mod fs;
pub mod manifest;
pub mod traits;

pub use fs::{DbFs, DiskFs};
pub use manifest::{Manifest, ManifestApp, ManifestRuntime};
pub use traits::{AppRuntime, Application, SourceFs};
