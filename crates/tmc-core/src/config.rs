//! Repository configuration: `{"repos": {"<name>": {"type": ..., ...}}}`.
//!
//! String values of the form `$NAME` or `${NAME}` are replaced from the
//! environment when the file is loaded. The key paths of replaced values are
//! recorded so [`Config::redacted`] can mask them, and [`Config::save`]
//! writes the unexpanded values back.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tmc_model::RepoError;
use tmc_remote::{Auth, RemoteConfig};
use tmc_store::S3Config;
use tracing::{debug, warn};

pub const CONFIG_ENV: &str = "TMC_CONFIG";
const REDACTED: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    File,
    Http,
    Tmc,
    S3,
}

/// One entry of the `repos` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<RepoKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, rename = "access_key", skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, rename = "secret_key", skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl RepoConfig {
    pub fn file(loc: impl Into<String>) -> Self {
        Self {
            kind: Some(RepoKind::File),
            loc: Some(loc.into()),
            ..Self::default()
        }
    }

    pub fn http(remote: RemoteConfig) -> Self {
        Self::remote(RepoKind::Http, remote)
    }

    pub fn tmc(remote: RemoteConfig) -> Self {
        Self::remote(RepoKind::Tmc, remote)
    }

    fn remote(kind: RepoKind, remote: RemoteConfig) -> Self {
        Self {
            kind: Some(kind),
            loc: Some(remote.loc),
            auth: remote.auth,
            headers: remote.headers,
            ..Self::default()
        }
    }

    pub fn s3(s3: S3Config) -> Self {
        Self {
            kind: Some(RepoKind::S3),
            bucket: Some(s3.bucket),
            region: s3.region,
            endpoint: s3.endpoint,
            access_key: s3.access_key,
            secret_key: s3.secret_key,
            prefix: s3.prefix,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn kind(&self) -> Result<RepoKind, RepoError> {
        self.kind
            .ok_or_else(|| RepoError::InvalidRepoSpec("repository has no type".to_owned()))
    }

    /// `loc`, required for file, http and tmc repositories.
    pub fn require_loc(&self) -> Result<&str, RepoError> {
        self.loc
            .as_deref()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| RepoError::InvalidRepoSpec("repository has no loc".to_owned()))
    }

    pub fn remote_config(&self) -> Result<RemoteConfig, RepoError> {
        Ok(RemoteConfig {
            loc: self.require_loc()?.to_owned(),
            auth: self.auth.clone(),
            headers: self.headers.clone(),
        })
    }

    pub fn s3_config(&self) -> Result<S3Config, RepoError> {
        let bucket = self
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| RepoError::InvalidRepoSpec("s3 repository has no bucket".to_owned()))?;
        Ok(S3Config {
            bucket,
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            prefix: self.prefix.clone(),
        })
    }

    /// Check that the fields the repository type needs are present.
    pub fn validate(&self) -> Result<(), RepoError> {
        match self.kind()? {
            RepoKind::File => self.require_loc().map(|_| ()),
            RepoKind::Http | RepoKind::Tmc => self.remote_config()?.validate(),
            RepoKind::S3 => self.s3_config().map(|_| ()),
        }
    }
}

/// Repository names are `[A-Za-z0-9_-]+`.
pub fn validate_repo_name(name: &str) -> Result<(), RepoError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RepoError::InvalidRepoSpec(format!(
            "invalid repository name {name:?}: use letters, digits, '_' and '-'"
        )))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    repos: BTreeMap<String, RepoConfig>,
    /// Values as written in the file, before environment expansion.
    raw: BTreeMap<String, Value>,
    /// Key paths (`repos.<name>.<key>...`) whose values came from the environment.
    expanded: BTreeSet<String>,
}

impl Config {
    /// `$TMC_CONFIG`, else `$XDG_CONFIG_HOME/tmc/config.json`, else `~/.config/tmc/config.json`.
    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.is_empty() {
                return PathBuf::from(p);
            }
        }
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("tmc/config.json");
            }
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        PathBuf::from(home).join(".config/tmc/config.json")
    }

    /// Load a config file; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!("loading config from {}", path.display());
                Self::from_json(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CoreError::Config(format!("reading {}: {e}", path.display()))),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, CoreError> {
        Self::from_json_with_env(content, |name| std::env::var(name).ok())
    }

    /// Parse a config, resolving `$VAR` references through `env`.
    pub fn from_json_with_env(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| CoreError::Config(format!("invalid config: {e}")))?;
        let repos = match root.get("repos") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(_) => return Err(CoreError::Config("`repos` must be an object".to_owned())),
        };

        let mut config = Config::default();
        for (name, raw) in repos {
            validate_repo_name(&name)?;
            let mut value = raw.clone();
            expand_env(&mut value, &format!("repos.{name}"), &env, &mut config.expanded);
            let repo: RepoConfig = serde_json::from_value(value).map_err(|e| {
                RepoError::InvalidRepoSpec(format!("repository {name}: {e}"))
            })?;
            repo.kind().map_err(|e| {
                RepoError::InvalidRepoSpec(format!("repository {name}: {e}"))
            })?;
            config.raw.insert(name.clone(), raw);
            config.repos.insert(name, repo);
        }
        Ok(config)
    }

    /// Write the config atomically, keeping `$VAR` references unexpanded.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let content = serde_json::to_vec_pretty(&self.to_raw_json())?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&content)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }

    fn to_raw_json(&self) -> Value {
        let repos: Map<String, Value> = self
            .raw
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::json!({ "repos": repos })
    }

    pub fn repos(&self) -> &BTreeMap<String, RepoConfig> {
        &self.repos
    }

    pub fn get(&self, name: &str) -> Result<&RepoConfig, RepoError> {
        self.repos
            .get(name)
            .ok_or_else(|| RepoError::repo_not_found(name))
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&str, &RepoConfig)> {
        self.repos
            .iter()
            .filter(|(_, r)| r.is_enabled())
            .map(|(n, r)| (n.as_str(), r))
    }

    pub fn add(&mut self, name: &str, repo: RepoConfig) -> Result<(), CoreError> {
        validate_repo_name(name)?;
        if self.repos.contains_key(name) {
            return Err(RepoError::InvalidRepoSpec(format!("repository {name} already exists")).into());
        }
        repo.validate()?;
        self.raw.insert(name.to_owned(), serde_json::to_value(&repo)?);
        self.repos.insert(name.to_owned(), repo);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<RepoConfig, CoreError> {
        let removed = self
            .repos
            .remove(name)
            .ok_or_else(|| RepoError::repo_not_found(name))?;
        self.raw.remove(name);
        let prefix = format!("repos.{name}.");
        self.expanded.retain(|k| !k.starts_with(&prefix));
        Ok(removed)
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), CoreError> {
        let repo = self
            .repos
            .get_mut(name)
            .ok_or_else(|| RepoError::repo_not_found(name))?;
        repo.enabled = Some(enabled);
        if let Some(Value::Object(raw)) = self.raw.get_mut(name) {
            raw.insert("enabled".to_owned(), Value::Bool(enabled));
        }
        Ok(())
    }

    /// Key paths whose values were taken from the environment.
    pub fn expanded_keys(&self) -> &BTreeSet<String> {
        &self.expanded
    }

    /// The expanded config as JSON with environment-supplied values masked.
    pub fn redacted(&self) -> Value {
        let mut repos = Map::new();
        for (name, repo) in &self.repos {
            let mut value = serde_json::to_value(repo).unwrap_or(Value::Null);
            mask(&mut value, &format!("repos.{name}"), &self.expanded);
            repos.insert(name.clone(), value);
        }
        serde_json::json!({ "repos": repos })
    }
}

/// Resolve `$NAME` / `${NAME}` to the variable name, if `s` is such a reference.
fn env_reference(s: &str) -> Option<&str> {
    let rest = s.strip_prefix('$')?;
    let name = rest
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .unwrap_or(rest);
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

fn expand_env(
    value: &mut Value,
    path: &str,
    env: &impl Fn(&str) -> Option<String>,
    expanded: &mut BTreeSet<String>,
) {
    match value {
        Value::String(s) => {
            if let Some(var) = env_reference(s) {
                let resolved = env(var).unwrap_or_else(|| {
                    warn!("environment variable {var} referenced by {path} is not set");
                    String::new()
                });
                *s = resolved;
                expanded.insert(path.to_owned());
            }
        }
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                expand_env(v, &format!("{path}.{k}"), env, expanded);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                expand_env(v, &format!("{path}.{i}"), env, expanded);
            }
        }
        _ => {}
    }
}

fn mask(value: &mut Value, path: &str, expanded: &BTreeSet<String>) {
    if expanded.contains(path) {
        *value = Value::String(REDACTED.to_owned());
        return;
    }
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                mask(v, &format!("{path}.{k}"), expanded);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                mask(v, &format!("{path}.{i}"), expanded);
            }
        }
        _ => {}
    }
}
