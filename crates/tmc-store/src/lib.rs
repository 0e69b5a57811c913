//! Index-backed Thing Model repositories for tmc.
//!
//! `IndexedRepo` implements the `Repository` contract over any `Storage`:
//! `FsStorage` keeps TMs in a local directory guarded by an advisory file lock,
//! `ObjectStorage` keeps them in an S3 bucket (or any `object_store` backend).
//! Both share the on-disk layout in [`layout`], `.tmignore` handling, and the
//! integrity check.

pub mod fs;
pub mod integrity;
pub mod layout;
pub mod object;
pub mod repo;
pub mod storage;
pub mod tmignore;

pub use fs::{FsStorage, DEFAULT_LOCK_TIMEOUT};
pub use object::{ObjectStorage, S3Config};
pub use repo::{ExistingId, FileRepo, IndexedRepo, ObjectRepo};
pub use storage::{DirEntry, Storage, StorageLock};
pub use tmignore::TmIgnore;

use std::path::Path;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}
