//! On-disk cache of HTTP responses keyed by URL.
//!
//! Each URL maps to one file `<dir>/<blake3(url)>.entry`: a JSON line with
//! validators and fetch time, then the body. Entries are replaced with a
//! single rename. Entries younger than the max age are served without a
//! request; older ones are revalidated with a conditional GET.

use crate::client::HttpClient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tmc_model::{CancelToken, RepoError};
use tracing::{debug, warn};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMeta {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    fetched: DateTime<Utc>,
}

#[derive(Debug)]
pub struct HttpCache {
    dir: PathBuf,
    max_age: Duration,
}

static SHARED: OnceLock<Arc<HttpCache>> = OnceLock::new();

impl HttpCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// `$XDG_CACHE_HOME/tmc/http`, falling back to `~/.cache` and then the temp dir.
    pub fn default_dir() -> PathBuf {
        if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("tmc/http");
            }
        }
        match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => PathBuf::from(home).join(".cache/tmc/http"),
            _ => std::env::temp_dir().join("tmc-http-cache"),
        }
    }

    /// The process-wide cache in [`HttpCache::default_dir`].
    pub fn shared() -> Arc<HttpCache> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(HttpCache::new(Self::default_dir()))))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key(url: &str) -> String {
        blake3::hash(url.as_bytes()).to_hex().to_string()
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.entry", Self::key(url)))
    }

    fn read_entry(&self, url: &str) -> Option<(CacheMeta, Vec<u8>)> {
        let mut entry = std::fs::read(self.entry_path(url)).ok()?;
        let split = entry.iter().position(|&b| b == b'\n')?;
        let meta: CacheMeta = serde_json::from_slice(&entry[..split]).ok()?;
        if meta.url != url {
            return None;
        }
        let body = entry.split_off(split + 1);
        Some((meta, body))
    }

    fn store(&self, meta: &CacheMeta, body: &[u8]) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, meta)?;
        tmp.write_all(b"\n")?;
        tmp.write_all(body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&meta.url)).map_err(|e| e.error)?;
        Ok(())
    }

    fn is_fresh(&self, meta: &CacheMeta) -> bool {
        let age = Utc::now().signed_duration_since(meta.fetched);
        age.to_std().is_ok_and(|age| age < self.max_age)
    }

    /// GET `url` through the cache.
    ///
    /// A failed response is passed to `on_error` and never cached.
    pub fn get(
        &self,
        ctx: &CancelToken,
        client: &HttpClient,
        url: &str,
        on_error: impl FnOnce(&crate::client::HttpResponse) -> RepoError,
    ) -> Result<Vec<u8>, RepoError> {
        let cached = self.read_entry(url);
        if let Some((meta, body)) = &cached {
            if self.is_fresh(meta) {
                debug!("cache hit for {url}");
                return Ok(body.clone());
            }
        }

        let mut conditional = Vec::new();
        if let Some((meta, _)) = &cached {
            if let Some(etag) = &meta.etag {
                conditional.push(("If-None-Match", etag.as_str()));
            }
            if let Some(lm) = &meta.last_modified {
                conditional.push(("If-Modified-Since", lm.as_str()));
            }
        }
        let resp = client.get(ctx, url, &conditional)?;

        if resp.status == 304 {
            if let Some((mut meta, body)) = cached {
                debug!("cache revalidated for {url}");
                meta.fetched = Utc::now();
                if let Err(e) = self.store(&meta, &body) {
                    warn!("failed to refresh cache entry for {url}: {e}");
                }
                return Ok(body);
            }
        }
        if !resp.is_success() {
            return Err(on_error(&resp));
        }

        let meta = CacheMeta {
            url: url.to_owned(),
            etag: resp.etag.clone(),
            last_modified: resp.last_modified.clone(),
            fetched: Utc::now(),
        };
        if let Err(e) = self.store(&meta, &resp.body) {
            warn!("failed to cache {url}: {e}");
        }
        Ok(resp.body)
    }

    /// Drop the entry for `url`, if any.
    pub fn invalidate(&self, url: &str) {
        let _ = std::fs::remove_file(self.entry_path(url));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_entries_read_back_and_expire() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HttpCache::new(dir.path());
        let url = "https://x.org/.tmc/tm-catalog.toc.json";
        let meta = CacheMeta {
            url: url.to_owned(),
            etag: Some("\"abc\"".to_owned()),
            last_modified: None,
            fetched: Utc::now(),
        };
        cache.store(&meta, b"{}").unwrap();

        let (read, body) = cache.read_entry(url).unwrap();
        assert_eq!(body, b"{}");
        assert_eq!(read.etag.as_deref(), Some("\"abc\""));
        assert!(cache.is_fresh(&read));

        let stale = CacheMeta {
            fetched: Utc::now() - chrono::Duration::seconds(60),
            ..read
        };
        assert!(!cache.is_fresh(&stale));

        cache.invalidate(url);
        assert!(cache.read_entry(url).is_none());
    }

    #[test]
    fn concurrent_stores_never_mix_validators_and_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(HttpCache::new(dir.path()));
        let url = "https://x.org/.tmc/tm-catalog.toc.json";
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let meta = CacheMeta {
                            url: url.to_owned(),
                            etag: Some(format!("\"{i}\"")),
                            last_modified: None,
                            fetched: Utc::now(),
                        };
                        cache.store(&meta, format!("body {i}\nline two").as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            if let Some((meta, body)) = cache.read_entry(url) {
                let tag = meta.etag.unwrap();
                assert_eq!(format!("body {}\nline two", tag.trim_matches('"')).as_bytes(), body);
            }
        }
        for w in writers {
            w.join().unwrap();
        }
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn keys_are_per_url() {
        assert_ne!(HttpCache::key("https://a"), HttpCache::key("https://b"));
        assert_eq!(HttpCache::key("https://a").len(), 64);
    }
}
