//! Service layer for tmc.
//!
//! Loads the repository configuration, opens configured repositories of any
//! backend, federates reads over several of them with [`Union`], and runs the
//! import pipeline (validation, digest, id derivation) in [`Catalog`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod repo;
pub mod signal;
pub mod union;
pub mod validate;

pub use catalog::{prepare_import, restore_original_id, Catalog, FileImport, RepoCheck};
pub use config::{validate_repo_name, Config, RepoConfig, RepoKind, CONFIG_ENV};
pub use error::CoreError;
pub use repo::Repo;
pub use signal::{install_signal_handler, shutdown_requested};
pub use union::{ChildError, Partial, Union};
pub use validate::validate_tm;
