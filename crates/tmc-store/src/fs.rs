use crate::layout::{check_relative, parent, LOCK_FILE};
use crate::storage::{DirEntry, Storage, StorageLock};
use crate::fsync_dir;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tmc_model::{CancelToken, RepoError};
use tracing::debug;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(13);

/// A repository rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, path: &str) -> Result<PathBuf, RepoError> {
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        check_relative(path)?;
        Ok(self.root.join(path))
    }
}

fn relative_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    parts.map(|p| p.join("/"))
}

impl Storage for FsStorage {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, RepoError> {
        match fs::read(self.full(path)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), RepoError> {
        let dest = self.full(path)?;
        let dir = dest
            .parent()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| RepoError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<bool, RepoError> {
        match fs::remove_file(self.full(path)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_tree(&self, dir: &str) -> Result<(), RepoError> {
        check_relative(dir)?;
        match fs::remove_dir_all(self.root.join(dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> Result<bool, RepoError> {
        Ok(self.full(path)?.exists())
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<DirEntry>, RepoError> {
        let full = self.full(dir)?;
        let rd = match fs::read_dir(&full) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in rd {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                out.push(DirEntry {
                    name: name.to_owned(),
                    is_dir: entry.file_type()?.is_dir(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn walk(&self) -> Result<Vec<String>, RepoError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| RepoError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel) = relative_string(&self.root, entry.path()) {
                out.push(rel);
            }
        }
        out.sort();
        Ok(out)
    }

    fn prune_empty_dirs(&self, dir: &str, stop_at: &str) -> Result<(), RepoError> {
        let mut current = dir.to_owned();
        while !current.is_empty() && current != stop_at {
            let full = self.full(&current)?;
            let is_empty = match fs::read_dir(&full) {
                Ok(mut rd) => rd.next().is_none(),
                Err(e) if e.kind() == ErrorKind::NotFound => true,
                Err(e) => return Err(e.into()),
            };
            if !is_empty {
                break;
            }
            match fs::remove_dir(&full) {
                Ok(()) => debug!("removed empty directory {}", full.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            current = parent(&current).to_owned();
        }
        Ok(())
    }

    fn lock(&self, ctx: &CancelToken) -> Result<StorageLock<'_>, RepoError> {
        let lock_path = self.root.join(LOCK_FILE);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(StorageLock::File(file)),
                Err(_) if started.elapsed() < self.lock_timeout => {
                    ctx.check()?;
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(RepoError::LockFailed(format!(
                        "{} not acquired within {:?}: {e}",
                        lock_path.display(),
                        self.lock_timeout
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        assert_eq!(s.read("a/b.txt").unwrap(), None);
        s.write("a/b.txt", b"hello").unwrap();
        assert_eq!(s.read("a/b.txt").unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(s.exists("a/b.txt").unwrap());
        assert!(s.remove("a/b.txt").unwrap());
        assert!(!s.remove("a/b.txt").unwrap());
    }

    #[test]
    fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        assert!(s.write("../evil", b"x").is_err());
        assert!(s.read("/etc/passwd").is_err());
    }

    #[test]
    fn walk_and_list_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        s.write("b/2", b"").unwrap();
        s.write("a/1", b"").unwrap();
        s.write("b/c/3", b"").unwrap();
        assert_eq!(s.walk().unwrap(), ["a/1", "b/2", "b/c/3"]);
        let listed = s.list_dir("b").unwrap();
        assert_eq!(
            listed,
            [
                DirEntry { name: "2".to_owned(), is_dir: false },
                DirEntry { name: "c".to_owned(), is_dir: true },
            ]
        );
        assert!(s.list_dir("missing").unwrap().is_empty());
    }

    #[test]
    fn prune_stops_at_boundary_and_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path());
        s.write("a/keep.txt", b"").unwrap();
        s.write("a/b/c/d/x", b"").unwrap();
        s.remove("a/b/c/d/x").unwrap();
        s.prune_empty_dirs("a/b/c/d", "a/b").unwrap();
        assert!(dir.path().join("a/b").is_dir());
        assert!(!dir.path().join("a/b/c").exists());

        s.prune_empty_dirs("a/b", "").unwrap();
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a").is_dir());
    }

    #[test]
    fn lock_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancelToken::new();
        let s = FsStorage::new(dir.path()).with_lock_timeout(Duration::from_millis(50));
        let held = s.lock(&ctx).unwrap();
        let err = s.lock(&ctx).err().unwrap();
        assert!(matches!(err, RepoError::LockFailed(_)));
        drop(held);
        assert!(s.lock(&ctx).is_ok());
    }

    #[test]
    fn cancelled_wait_for_lock_returns_early() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsStorage::new(dir.path()).with_lock_timeout(Duration::from_secs(5));
        let held = s.lock(&CancelToken::new()).unwrap();

        let ctx = CancelToken::new();
        let canceller = {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                ctx.cancel();
            })
        };
        let started = Instant::now();
        let err = s.lock(&ctx).err().unwrap();
        assert!(matches!(err, RepoError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
        drop(held);
    }
}
