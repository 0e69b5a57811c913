//! Repository storage in an S3 bucket, or any other `object_store` backend.
//!
//! Keys are the repository-relative paths. The async `object_store` API is
//! driven by a private current-thread runtime so callers stay synchronous.
//! The index lock is an in-process mutex shared by every storage opened on
//! the same location; writers in other processes are not coordinated.

use crate::layout::check_relative;
use crate::storage::{DirEntry, Storage, StorageLock};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tmc_model::{CancelToken, RepoError};
use tracing::debug;

/// Connection settings for an S3 bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Key prefix under which the repository lives.
    pub prefix: Option<String>,
}

pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    label: String,
    runtime: tokio::runtime::Runtime,
    lock: Arc<Mutex<()>>,
}

/// The index mutex of the repository at `location`, one per process.
fn location_lock(location: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Arc::clone(locks.entry(location.to_owned()).or_default())
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("label", &self.label)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn store_error(e: object_store::Error) -> RepoError {
    match e {
        object_store::Error::Unauthenticated { .. } | object_store::Error::PermissionDenied { .. } => {
            RepoError::Unauthorized(e.to_string())
        }
        other => RepoError::RepoAccessFailed(other.to_string()),
    }
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, label: impl Into<String>) -> Result<Self, RepoError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let prefix = prefix.trim_matches('/').to_owned();
        let label = label.into();
        let lock = location_lock(&format!("{label}/{prefix}"));
        Ok(Self {
            store,
            prefix,
            label,
            runtime,
            lock,
        })
    }

    pub fn s3(config: &S3Config) -> Result<Self, RepoError> {
        if config.bucket.is_empty() {
            return Err(RepoError::InvalidRepoSpec("s3 repository needs a bucket".to_owned()));
        }
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(key) = &config.access_key {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_key {
            builder = builder.with_secret_access_key(secret);
        }
        let store = builder
            .build()
            .map_err(|e| RepoError::InvalidRepoSpec(format!("s3 bucket {}: {e}", config.bucket)))?;
        Self::new(
            Arc::new(store),
            config.prefix.as_deref().unwrap_or_default(),
            format!("s3://{}", config.bucket),
        )
    }

    fn key(&self, path: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(path)
        } else if path.is_empty() {
            ObjectPath::from(self.prefix.as_str())
        } else {
            ObjectPath::from(format!("{}/{path}", self.prefix))
        }
    }

    fn relative<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(self.prefix.as_str())
                .map_or(key, |k| k.trim_start_matches('/'))
        }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn list_keys(&self, dir: &str) -> Result<Vec<String>, RepoError> {
        let prefix = if dir.is_empty() && self.prefix.is_empty() {
            None
        } else {
            Some(self.key(dir))
        };
        let metas: Vec<_> = self
            .block_on(self.store.list(prefix.as_ref()).try_collect::<Vec<_>>())
            .map_err(store_error)?;
        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|m| self.relative(m.location.as_ref()).to_owned())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl Storage for ObjectStorage {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, RepoError> {
        check_relative(path)?;
        let key = self.key(path);
        let result = self.block_on(async {
            let got = self.store.get(&key).await?;
            got.bytes().await
        });
        match result {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), RepoError> {
        check_relative(path)?;
        let key = self.key(path);
        let payload = PutPayload::from(bytes::Bytes::copy_from_slice(data));
        self.block_on(self.store.put(&key, payload))
            .map_err(store_error)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<bool, RepoError> {
        if !self.exists(path)? {
            return Ok(false);
        }
        let key = self.key(path);
        match self.block_on(self.store.delete(&key)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(store_error(e)),
        }
    }

    fn remove_tree(&self, dir: &str) -> Result<(), RepoError> {
        check_relative(dir)?;
        for key in self.list_keys(dir)? {
            debug!("deleting {key} from {}", self.label);
            let location = self.key(&key);
            match self.block_on(self.store.delete(&location)) {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(store_error(e)),
            }
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, RepoError> {
        check_relative(path)?;
        let key = self.key(path);
        match self.block_on(self.store.head(&key)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(store_error(e)),
        }
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<DirEntry>, RepoError> {
        if !dir.is_empty() {
            check_relative(dir)?;
        }
        let base = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        let mut children: BTreeMap<String, bool> = BTreeMap::new();
        for key in self.list_keys(dir)? {
            let Some(rest) = key.strip_prefix(&base) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    children.insert(child.to_owned(), true);
                }
                None => {
                    children.entry(rest.to_owned()).or_insert(false);
                }
            }
        }
        Ok(children
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn walk(&self) -> Result<Vec<String>, RepoError> {
        self.list_keys("")
    }

    // Prefixes vanish with their last object.
    fn prune_empty_dirs(&self, _dir: &str, _stop_at: &str) -> Result<(), RepoError> {
        Ok(())
    }

    fn lock(&self, ctx: &CancelToken) -> Result<StorageLock<'_>, RepoError> {
        ctx.check()?;
        let guard = self
            .lock
            .lock()
            .map_err(|_| RepoError::LockFailed(format!("index lock of {} is poisoned", self.label)))?;
        Ok(StorageLock::Process(guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn storage(prefix: &str) -> ObjectStorage {
        ObjectStorage::new(Arc::new(InMemory::new()), prefix, "mem").unwrap()
    }

    #[test]
    fn write_read_remove() {
        let s = storage("");
        assert_eq!(s.read("a/b.txt").unwrap(), None);
        s.write("a/b.txt", b"hello").unwrap();
        assert_eq!(s.read("a/b.txt").unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(s.exists("a/b.txt").unwrap());
        assert!(s.remove("a/b.txt").unwrap());
        assert!(!s.remove("a/b.txt").unwrap());
    }

    #[test]
    fn listing_respects_prefix() {
        let s = storage("catalog/main");
        s.write("b/2", b"").unwrap();
        s.write("a/1", b"").unwrap();
        s.write("b/c/3", b"").unwrap();
        assert_eq!(s.walk().unwrap(), ["a/1", "b/2", "b/c/3"]);
        assert_eq!(
            s.list_dir("b").unwrap(),
            [
                DirEntry { name: "2".to_owned(), is_dir: false },
                DirEntry { name: "c".to_owned(), is_dir: true },
            ]
        );
        let top: Vec<String> = s.list_dir("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(top, ["a", "b"]);
    }

    #[test]
    fn storages_on_one_location_share_the_lock() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let a = ObjectStorage::new(Arc::clone(&store), "cat", "s3://shared-lock").unwrap();
        let b = ObjectStorage::new(Arc::clone(&store), "/cat/", "s3://shared-lock").unwrap();
        let other = ObjectStorage::new(store, "other", "s3://shared-lock").unwrap();
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
        assert!(!Arc::ptr_eq(&a.lock, &other.lock));
    }

    #[test]
    fn remove_tree_deletes_all_below() {
        let s = storage("");
        s.write("x/.attachments/a", b"").unwrap();
        s.write("x/.attachments/v1/b", b"").unwrap();
        s.write("x/keep", b"").unwrap();
        s.remove_tree("x/.attachments").unwrap();
        assert_eq!(s.walk().unwrap(), ["x/keep"]);
    }
}
