use crate::config::Config;
use crate::repo::Repo;
use crate::union::{ChildError, Partial, Union};
use crate::validate::validate_tm;
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tmc_model::{
    compute_digest, derive_id, looks_like_tm_id, with_id, Attachment, AttachmentContainerRef,
    CancelToken, CheckResult, CompletionKind, FetchName, FoundVersion, ImportOptions,
    ImportResult, RepoError, RepoSpec, Repository, SearchParams, SearchResult, ThingModel, TmId,
};
use tmc_remote::HttpCache;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of importing one file of a directory import.
#[derive(Debug)]
pub struct FileImport {
    pub file: PathBuf,
    pub result: Result<ImportResult, CoreError>,
}

/// Integrity verdicts of one repository.
#[derive(Debug)]
pub struct RepoCheck {
    pub repo: String,
    pub results: Result<Vec<CheckResult>, RepoError>,
}

/// The catalog service: resolves repository specs against the config and
/// runs operations on single repositories or on a union of them.
///
/// Configured repositories are opened once and shared by all requests.
pub struct Catalog {
    config: Config,
    cache: Arc<HttpCache>,
    opened: Mutex<HashMap<String, Arc<Repo>>>,
}

impl Catalog {
    pub fn new(config: Config) -> Self {
        Self::with_cache(config, HttpCache::shared())
    }

    pub fn with_cache(config: Config, cache: Arc<HttpCache>) -> Self {
        Self {
            config,
            cache,
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn open(&self, name: &str) -> Result<Arc<Repo>, RepoError> {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(repo) = opened.get(name) {
            return Ok(Arc::clone(repo));
        }
        let repo = Arc::new(Repo::open(name, self.config.get(name)?, &self.cache)?);
        debug!("opened repository {name}");
        opened.insert(name.to_owned(), Arc::clone(&repo));
        Ok(repo)
    }

    /// The single repository a write addresses.
    ///
    /// An empty spec resolves to the only enabled repository and is
    /// ambiguous when several are enabled.
    pub fn repo(&self, spec: &RepoSpec) -> Result<Arc<Repo>, RepoError> {
        match spec {
            RepoSpec::Name(name) => self.open(name),
            RepoSpec::Dir(dir) => Ok(Arc::new(Repo::dir(dir))),
            RepoSpec::Empty => {
                let enabled: Vec<&str> = self.config.enabled().map(|(n, _)| n).collect();
                match enabled.as_slice() {
                    [] => Err(RepoError::InvalidRepoSpec(
                        "no repository configured; add one or pass a directory".to_owned(),
                    )),
                    [only] => self.open(only),
                    many => Err(RepoError::Ambiguous(format!(
                        "{} repositories enabled ({}); name one",
                        many.len(),
                        many.join(", ")
                    ))),
                }
            }
        }
    }

    /// Repositories a read addresses, with the errors of those that failed to open.
    fn targets(&self, spec: &RepoSpec) -> Result<(Vec<Arc<Repo>>, Vec<ChildError>), RepoError> {
        if !spec.is_empty() {
            return Ok((vec![self.repo(spec)?], Vec::new()));
        }
        let mut repos = Vec::new();
        let mut errors = Vec::new();
        for (name, _) in self.config.enabled() {
            match self.open(name) {
                Ok(r) => repos.push(r),
                Err(error) => {
                    warn!("cannot open repository {name}: {error}");
                    errors.push(ChildError {
                        repo: name.to_owned(),
                        error,
                    });
                }
            }
        }
        if repos.is_empty() && !errors.is_empty() {
            return Err(errors.swap_remove(0).error);
        }
        Ok((repos, errors))
    }

    pub fn union(&self, spec: &RepoSpec) -> Result<(Union, Vec<ChildError>), RepoError> {
        let (repos, errors) = self.targets(spec)?;
        let children = repos
            .into_iter()
            .map(|r| r as Arc<dyn Repository>)
            .collect();
        Ok((Union::new(children), errors))
    }

    fn read<T>(
        &self,
        spec: &RepoSpec,
        op: impl FnOnce(&Union) -> Result<Partial<T>, CoreError>,
    ) -> Result<Partial<T>, CoreError> {
        let (union, open_errors) = self.union(spec)?;
        let mut partial = op(&union)?;
        if !open_errors.is_empty() {
            let mut errors = open_errors;
            errors.append(&mut partial.errors);
            partial.errors = errors;
        }
        Ok(partial)
    }

    pub fn list(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        search: &SearchParams,
    ) -> Result<Partial<SearchResult>, CoreError> {
        self.read(spec, |u| u.list(ctx, search))
    }

    pub fn versions(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        name: &str,
    ) -> Result<Partial<Vec<FoundVersion>>, CoreError> {
        self.read(spec, |u| u.versions(ctx, name))
    }

    pub fn get_tm_metadata(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        id: &str,
    ) -> Result<Partial<Vec<FoundVersion>>, CoreError> {
        TmId::parse(id)?;
        self.read(spec, |u| u.get_tm_metadata(ctx, id))
    }

    /// Fetch a TM by id. With `restore_id` the `id` field is replaced by the
    /// original external id, when the TM has one.
    pub fn fetch(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        id: &str,
        restore_id: bool,
    ) -> Result<Partial<(String, Vec<u8>)>, CoreError> {
        TmId::parse(id)?;
        let fetched = self.read(spec, |u| u.fetch(ctx, id))?;
        if !restore_id {
            return Ok(fetched);
        }
        let Partial {
            data: (served, raw),
            errors,
        } = fetched;
        Ok(Partial {
            data: (served, restore_original_id(&raw)?),
            errors,
        })
    }

    /// Fetch the newest TM selected by `name[:semver]`.
    pub fn fetch_latest(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        fetch_name: &FetchName,
        restore_id: bool,
    ) -> Result<Partial<(String, Vec<u8>)>, CoreError> {
        let versions = self.versions(ctx, spec, &fetch_name.name)?;
        let latest = versions
            .data
            .iter()
            .filter_map(|v| TmId::parse(&v.version.tm_id).ok())
            .filter(|id| fetch_name.matches(&id.version.base))
            .max_by(|a, b| {
                a.version
                    .timestamp
                    .cmp(&b.version.timestamp)
                    .then_with(|| a.version.base.cmp(&b.version.base))
            })
            .ok_or_else(|| RepoError::tm_not_found(fetch_name.to_string()))?;
        debug!("{fetch_name} resolves to {latest}");
        let mut fetched = self.fetch(ctx, spec, &latest.to_string(), restore_id)?;
        let mut errors = versions.errors;
        errors.append(&mut fetched.errors);
        fetched.errors = errors;
        Ok(fetched)
    }

    /// Fetch by TM id, or by `name[:semver]` when `s` is not an id.
    pub fn fetch_any(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        s: &str,
        restore_id: bool,
    ) -> Result<Partial<(String, Vec<u8>)>, CoreError> {
        if looks_like_tm_id(s) {
            self.fetch(ctx, spec, s, restore_id)
        } else {
            self.fetch_latest(ctx, spec, &FetchName::parse(s)?, restore_id)
        }
    }

    pub fn import(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        raw: &[u8],
        opts: &ImportOptions,
    ) -> Result<ImportResult, CoreError> {
        self.import_at(ctx, spec, raw, opts, Utc::now())
    }

    /// Import with an explicit creation time for the derived id.
    pub fn import_at(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        raw: &[u8],
        opts: &ImportOptions,
        now: DateTime<Utc>,
    ) -> Result<ImportResult, CoreError> {
        let repo = self.repo(spec)?;
        let (id, prepared) = prepare_import(raw, &opts.opt_path, now)?;
        let result = repo.import(ctx, &id, &prepared, opts)?;
        repo.index(ctx, std::slice::from_ref(&result.tm_id))?;
        if result.is_warning() {
            warn!("imported {} with warning: {}", result.tm_id, result.message);
        } else {
            info!("imported {}", result.tm_id);
        }
        Ok(result)
    }

    /// Import one file, or every `*.json` file below a directory in path order.
    pub fn import_path(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        path: &Path,
        opts: &ImportOptions,
    ) -> Result<Vec<FileImport>, CoreError> {
        let files: Vec<PathBuf> = if path.is_dir() {
            WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .filter(|p| p.extension().is_some_and(|x| x == "json"))
                .collect()
        } else {
            vec![path.to_path_buf()]
        };

        let mut out = Vec::with_capacity(files.len());
        for file in files {
            ctx.check()?;
            let result = std::fs::read(&file)
                .map_err(CoreError::from)
                .and_then(|raw| self.import(ctx, spec, &raw, opts));
            out.push(FileImport { file, result });
        }
        Ok(out)
    }

    pub fn delete(&self, ctx: &CancelToken, spec: &RepoSpec, id: &str) -> Result<(), CoreError> {
        TmId::parse(id)?;
        self.repo(spec)?.delete(ctx, id)?;
        Ok(())
    }

    /// Rebuild (no ids) or update the index of every addressed repository.
    pub fn index(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        ids: &[String],
    ) -> Result<Partial<usize>, CoreError> {
        let (repos, mut errors) = self.targets(spec)?;
        let mut indexed = 0;
        for repo in repos {
            ctx.check()?;
            let label = repo.spec().label();
            match repo.index(ctx, ids) {
                Ok(()) => {
                    info!("indexed {label}");
                    indexed += 1;
                }
                Err(error) => errors.push(ChildError { repo: label, error }),
            }
        }
        if indexed == 0 && errors.len() == 1 {
            if let Some(only) = errors.pop() {
                return Err(CoreError::Repo(only.error));
            }
        }
        Ok(Partial {
            data: indexed,
            errors,
        })
    }

    pub fn check_integrity(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        filter: &SearchParams,
    ) -> Result<Vec<RepoCheck>, CoreError> {
        let (repos, open_errors) = self.targets(spec)?;
        let mut out: Vec<RepoCheck> = open_errors
            .into_iter()
            .map(|c| RepoCheck {
                repo: c.repo,
                results: Err(c.error),
            })
            .collect();
        for repo in repos {
            ctx.check()?;
            out.push(RepoCheck {
                repo: repo.spec().label(),
                results: repo.check_integrity(ctx, filter),
            });
        }
        Ok(out)
    }

    pub fn import_attachment(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        container: &AttachmentContainerRef,
        attachment: &Attachment,
        content: &[u8],
        force: bool,
    ) -> Result<(), CoreError> {
        self.repo(spec)?
            .import_attachment(ctx, container, attachment, content, force)?;
        Ok(())
    }

    pub fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Partial<Vec<u8>>, CoreError> {
        self.read(spec, |u| u.fetch_attachment(ctx, container, name))
    }

    pub fn delete_attachment(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<(), CoreError> {
        self.repo(spec)?.delete_attachment(ctx, container, name)?;
        Ok(())
    }

    pub fn list_completions(
        &self,
        ctx: &CancelToken,
        spec: &RepoSpec,
        kind: CompletionKind,
        args: &[String],
        to_complete: &str,
    ) -> Result<Partial<Vec<String>>, CoreError> {
        self.read(spec, |u| u.list_completions(ctx, kind, args, to_complete))
    }

    /// Readiness: the addressed repositories resolve.
    pub fn ready(&self, spec: &RepoSpec) -> Result<(), RepoError> {
        let (repos, _) = self.targets(spec)?;
        if repos.is_empty() {
            return Err(RepoError::InvalidRepoSpec(
                "no repository configured".to_owned(),
            ));
        }
        Ok(())
    }
}

fn is_external_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Run the import pipeline on a raw TM: validate, keep an external id as an
/// `original` link, compute the digest and derive the id, then write the id
/// into the document. A valid id already in the file is kept when it
/// describes the same content.
pub fn prepare_import(
    raw: &[u8],
    opt_path: &str,
    now: DateTime<Utc>,
) -> Result<(TmId, Vec<u8>), RepoError> {
    validate_tm(raw)?;
    let mut doc: Map<String, Value> = serde_json::from_slice(raw)
        .map_err(|e| RepoError::InvalidInput(format!("TM is not a JSON object: {e}")))?;

    let mut file_id = None;
    if let Some(Value::String(existing)) = doc.get("id").cloned() {
        match TmId::parse(&existing) {
            Ok(id) => file_id = Some(id),
            Err(_) if is_external_url(&existing) => add_original_link(&mut doc, &existing),
            Err(_) => debug!("dropping non-catalog id {existing}"),
        }
    }

    let bytes = serde_json::to_vec(&Value::Object(doc))?;
    let (hash, _) = compute_digest(&bytes)?;
    let tm = ThingModel::from_bytes(&bytes)?;
    let derived = derive_id(&tm, opt_path, now, &hash)?;
    let id = match file_id {
        Some(existing) if existing == derived => existing,
        _ => derived,
    };
    let prepared = with_id(&bytes, &id.to_string())?;
    Ok((id, prepared))
}

fn add_original_link(doc: &mut Map<String, Value>, href: &str) {
    let links = doc
        .entry("links")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(items) = links else {
        return;
    };
    let present = items.iter().any(|l| {
        l.get("rel").and_then(Value::as_str) == Some("original")
            && l.get("href").and_then(Value::as_str) == Some(href)
    });
    if !present {
        items.push(serde_json::json!({ "rel": "original", "href": href }));
    }
}

/// Replace the `id` of a TM with the href of its `original` link, if any.
pub fn restore_original_id(raw: &[u8]) -> Result<Vec<u8>, RepoError> {
    let tm = ThingModel::from_bytes(raw)?;
    match tm.external_id() {
        Some(original) => with_id(raw, original),
        None => Ok(raw.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TM: &str = r#"{"schema:author":{"name":"a-corp"},"schema:manufacturer":{"name":"eagle"},"schema:mpn":"BT2000","version":{"model":"v1.0.0"}}"#;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn derives_id_and_writes_it_first() {
        let (id, prepared) = prepare_import(TM.as_bytes(), "", at("2024-01-08T14:01:17Z")).unwrap();
        let (hash, _) = compute_digest(TM.as_bytes()).unwrap();
        assert_eq!(
            id.to_string(),
            format!("a-corp/eagle/BT2000/v1.0.0-20240108140117-{hash}.tm.json")
        );
        let text = String::from_utf8(prepared).unwrap();
        assert!(text.starts_with(&format!("{{\n  \"id\": \"{id}\"")));
    }

    #[test]
    fn keeps_matching_file_id_timestamp() {
        let (first, prepared) = prepare_import(TM.as_bytes(), "", at("2024-01-08T14:01:17Z")).unwrap();
        let (again, _) = prepare_import(&prepared, "", at("2025-06-01T00:00:00Z")).unwrap();
        assert_eq!(again.version.timestamp, first.version.timestamp);

        let changed = String::from_utf8(prepared)
            .unwrap()
            .replace("v1.0.0\"", "v1.1.0\"");
        let (bumped, _) = prepare_import(changed.as_bytes(), "", at("2025-06-01T00:00:00Z")).unwrap();
        assert_eq!(bumped.version.timestamp, "20250601000000");
    }

    #[test]
    fn external_id_becomes_original_link_and_restores() {
        let raw = TM.replacen('{', r#"{"id":"https://vendor.example.com/tm/bt2000","#, 1);
        let (id, prepared) = prepare_import(raw.as_bytes(), "", at("2024-01-08T14:01:17Z")).unwrap();
        let tm = ThingModel::from_bytes(&prepared).unwrap();
        assert_eq!(tm.id.as_deref(), Some(id.to_string().as_str()));
        assert_eq!(tm.external_id(), Some("https://vendor.example.com/tm/bt2000"));

        // Importing the output again does not duplicate the link.
        let (_, twice) = prepare_import(&prepared, "", at("2024-01-08T14:01:17Z")).unwrap();
        let links = ThingModel::from_bytes(&twice).unwrap().links;
        assert_eq!(links.iter().filter(|l| l.rel == "original").count(), 1);

        let restored = ThingModel::from_bytes(&restore_original_id(&prepared).unwrap()).unwrap();
        assert_eq!(restored.id.as_deref(), Some("https://vendor.example.com/tm/bt2000"));
        assert_eq!(restore_original_id(TM.as_bytes()).unwrap(), TM.as_bytes());
    }

    #[test]
    fn opt_path_is_part_of_the_id() {
        let (id, _) = prepare_import(TM.as_bytes(), "/Lab/Floor 2/", at("2024-01-08T14:01:17Z")).unwrap();
        assert!(id.to_string().starts_with("a-corp/eagle/BT2000/Lab/Floor-2/v1.0.0-"));
    }

    #[test]
    fn write_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let empty = Catalog::with_cache(Config::default(), Arc::new(HttpCache::new(dir.path())));
        assert!(matches!(
            empty.repo(&RepoSpec::Empty),
            Err(RepoError::InvalidRepoSpec(_))
        ));
        assert!(empty
            .repo(&RepoSpec::from_name("nope"))
            .unwrap_err()
            .is_not_found(tmc_model::NotFoundKind::Repo));

        let mut config = Config::default();
        config
            .add("r1", crate::RepoConfig::file(dir.path().join("r1").to_string_lossy()))
            .unwrap();
        config
            .add("r2", crate::RepoConfig::file(dir.path().join("r2").to_string_lossy()))
            .unwrap();
        let two = Catalog::with_cache(config, Arc::new(HttpCache::new(dir.path())));
        assert!(matches!(two.repo(&RepoSpec::Empty), Err(RepoError::Ambiguous(_))));
        assert!(two.repo(&RepoSpec::from_name("r2")).is_ok());
        assert!(two.ready(&RepoSpec::Empty).is_ok());
    }

    #[test]
    fn configured_repositories_are_opened_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config
            .add("r1", crate::RepoConfig::file(dir.path().join("r1").to_string_lossy()))
            .unwrap();
        let catalog = Catalog::with_cache(config, Arc::new(HttpCache::new(dir.path())));
        let spec = RepoSpec::from_name("r1");
        let first = catalog.repo(&spec).unwrap();
        let second = catalog.repo(&spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let (targets, errors) = catalog.targets(&RepoSpec::Empty).unwrap();
        assert!(errors.is_empty());
        assert!(Arc::ptr_eq(&targets[0], &first));
    }
}
