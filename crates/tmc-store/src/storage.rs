use std::fs::File;
use std::sync::MutexGuard;
use tmc_model::{CancelToken, RepoError};

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Exclusive hold on a repository's index. Released on drop.
pub enum StorageLock<'a> {
    File(File),
    Process(MutexGuard<'a, ()>),
}

impl Drop for StorageLock<'_> {
    fn drop(&mut self) {
        if let StorageLock::File(f) = self {
            let _ = fs2::FileExt::unlock(f);
        }
    }
}

/// Flat byte storage addressed by `/`-separated relative paths.
///
/// Directories are implicit: writing a file creates its parents, and
/// backends without real directories treat every key prefix as one.
pub trait Storage: Send + Sync {
    /// Human-readable location, for logs and errors.
    fn describe(&self) -> String;

    /// Contents of `path`, `None` if it does not exist.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, RepoError>;

    /// Replace `path` atomically.
    fn write(&self, path: &str, data: &[u8]) -> Result<(), RepoError>;

    /// Remove a file. Returns whether it existed.
    fn remove(&self, path: &str) -> Result<bool, RepoError>;

    /// Remove every file below `dir`.
    fn remove_tree(&self, dir: &str) -> Result<(), RepoError>;

    fn exists(&self, path: &str) -> Result<bool, RepoError>;

    /// Immediate children of `dir`, sorted by name. Empty if `dir` does not exist.
    fn list_dir(&self, dir: &str) -> Result<Vec<DirEntry>, RepoError>;

    /// Every file in the repository, sorted.
    fn walk(&self) -> Result<Vec<String>, RepoError>;

    /// Remove empty directories from `dir` upwards, stopping below `stop_at`.
    fn prune_empty_dirs(&self, dir: &str, stop_at: &str) -> Result<(), RepoError>;

    /// Exclusive hold on the index. Waiting gives up once `ctx` is cancelled.
    fn lock(&self, ctx: &CancelToken) -> Result<StorageLock<'_>, RepoError>;
}
