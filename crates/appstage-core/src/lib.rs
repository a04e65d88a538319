//! appstage core - shared types, configuration, merge rules and error handling

pub mod config;
pub mod constants;
pub mod definitions;
pub mod error;
pub mod merge;
pub mod pathglob;
pub mod types;

pub use config::*;
pub use constants::*;
pub use definitions::{AppDefinition, DefinitionEvaluator, FileDefinitionEvaluator};
pub use error::{Error, Result};
pub use pathglob::{parse_app_path, validate_path_for_create, AppGlob};
pub use types::*;
