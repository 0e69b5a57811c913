use crate::fs::FsStorage;
use crate::integrity;
use crate::layout::{classify, PathKind, DEFAULT_IGNORE, IGNORE_FILE, INDEX_FILE, NAMES_FILE};
use crate::object::ObjectStorage;
use crate::storage::Storage;
use crate::tmignore::TmIgnore;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tmc_model::{
    compute_digest, validate_attachment_name, Attachment, AttachmentContainerRef, CancelToken,
    CheckResult, FoundEntry, FoundVersion, ImportOptions, ImportResult, Index, IndexVersion,
    RepoError, RepoSpec, Repository, SearchParams, SearchResult, ThingModel, TmConflict, TmId,
    ATTACHMENTS_DIR, TM_FILE_EXTENSION,
};
use tracing::{debug, info, warn};

/// How an id relates to what is already stored under its TM name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingId {
    None,
    /// The exact file exists.
    Full(String),
    /// Same base version and digest under another timestamp.
    Digest(String),
    /// Same base version and timestamp with another digest.
    Timestamp(String),
}

/// A Thing Model repository whose contents are summarized in an index file.
///
/// All index reads and writes hold the storage lock; the index is re-read
/// from storage on every locked operation.
#[derive(Debug)]
pub struct IndexedRepo<S> {
    spec: RepoSpec,
    storage: S,
}

/// A repository in a local directory.
pub type FileRepo = IndexedRepo<FsStorage>;

/// A repository in an object store bucket.
pub type ObjectRepo = IndexedRepo<ObjectStorage>;

impl FileRepo {
    pub fn open(dir: impl Into<PathBuf>, spec: RepoSpec) -> Self {
        IndexedRepo::new(FsStorage::new(dir), spec)
    }

    /// An unnamed repository addressed by its directory.
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        IndexedRepo::new(FsStorage::new(dir.clone()), RepoSpec::Dir(dir))
    }
}

impl<S: Storage> IndexedRepo<S> {
    pub fn new(storage: S, spec: RepoSpec) -> Self {
        Self { spec, storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn label(&self) -> String {
        self.spec.label()
    }

    pub(crate) fn read_index(&self) -> Result<Index, RepoError> {
        match self.storage.read(INDEX_FILE)? {
            None => Ok(Index::new()),
            Some(data) => serde_json::from_slice(&data).map_err(|e| {
                RepoError::NoIndex(format!("{}: unreadable index: {e}", self.storage.describe()))
            }),
        }
    }

    fn write_index(&self, idx: &mut Index) -> Result<(), RepoError> {
        idx.sort();
        idx.meta.created = chrono::Utc::now();
        let json = serde_json::to_vec_pretty(idx)?;
        self.storage.write(INDEX_FILE, &json)?;
        let mut names = idx.names().join("\n");
        if !names.is_empty() {
            names.push('\n');
        }
        self.storage.write(NAMES_FILE, names.as_bytes())?;
        if !self.storage.exists(IGNORE_FILE)? {
            self.storage.write(IGNORE_FILE, DEFAULT_IGNORE.as_bytes())?;
        }
        Ok(())
    }

    fn locked_index(&self, ctx: &CancelToken) -> Result<Index, RepoError> {
        ctx.check()?;
        let _lock = self.storage.lock(ctx)?;
        self.read_index()
    }

    pub(crate) fn read_ignore(&self) -> Result<TmIgnore, RepoError> {
        match self.storage.read(IGNORE_FILE)? {
            Some(data) => TmIgnore::parse(&String::from_utf8_lossy(&data)),
            None => Ok(TmIgnore::default_patterns()),
        }
    }

    /// Classify `id` against the version files stored under its name.
    pub fn existing_id(&self, id: &TmId) -> Result<ExistingId, RepoError> {
        let dir = id.name();
        let wanted = id.version_file_name();
        let mut candidates: Vec<TmId> = self
            .storage
            .list_dir(&dir)?
            .into_iter()
            .filter(|e| !e.is_dir && e.name.ends_with(TM_FILE_EXTENSION))
            .filter_map(|e| TmId::parse(&format!("{dir}/{}", e.name)).ok())
            .filter(|c| c.version.base == id.version.base)
            .collect();
        if candidates.iter().any(|c| c.version_file_name() == wanted) {
            return Ok(ExistingId::Full(id.to_string()));
        }
        candidates.sort_by(TmId::cmp_newest_first);
        if let Some(c) = candidates.iter().find(|c| c.version.hash == id.version.hash) {
            return Ok(ExistingId::Digest(c.to_string()));
        }
        if let Some(c) = candidates
            .iter()
            .find(|c| c.version.timestamp == id.version.timestamp)
        {
            return Ok(ExistingId::Timestamp(c.to_string()));
        }
        Ok(ExistingId::None)
    }

    fn read_version(&self, path: &str) -> Result<(TmId, IndexVersion), RepoError> {
        let id = TmId::parse(path)?;
        let data = self
            .storage
            .read(path)?
            .ok_or_else(|| RepoError::tm_not_found(path))?;
        let tm = ThingModel::from_bytes(&data)?;
        let version = IndexVersion::from_tm(&id, &tm);
        Ok((id, version))
    }

    fn rebuild_index(&self, ctx: &CancelToken) -> Result<Index, RepoError> {
        let ignore = self.read_ignore()?;
        let mut idx = Index::new();
        let mut containers: BTreeMap<String, Vec<Attachment>> = BTreeMap::new();
        for path in self.storage.walk()? {
            ctx.check()?;
            if ignore.is_ignored(&path) {
                continue;
            }
            match classify(&path) {
                PathKind::Tm => match self.read_version(&path) {
                    Ok((id, version)) => idx.insert_version(&id, version),
                    Err(e) => warn!("{}: skipping {path}: {e}", self.storage.describe()),
                },
                PathKind::Attachment { container, file } => {
                    containers
                        .entry(container)
                        .or_default()
                        .push(Attachment::guessed(file));
                }
                PathKind::Config | PathKind::Unknown => {}
            }
        }
        for (container, attachments) in containers {
            let container = AttachmentContainerRef::parse(&container);
            if let Err(e) = idx.insert_attachments(&container, attachments) {
                warn!("{}: attachments without a TM: {e}", self.storage.describe());
            }
        }
        info!(
            "rebuilt index of {}: {} names, {} versions",
            self.storage.describe(),
            idx.data.len(),
            idx.version_count()
        );
        Ok(idx)
    }

    fn update_index(&self, ctx: &CancelToken, idx: &mut Index, ids: &[String]) -> Result<(), RepoError> {
        let mut touched = BTreeSet::new();
        for id in ids {
            ctx.check()?;
            let tm_id = TmId::parse(id)?;
            if self.storage.exists(id)? {
                let (tm_id, version) = self.read_version(id)?;
                idx.insert_version(&tm_id, version);
            } else {
                let (changed, emptied) = idx.delete(id);
                if changed {
                    debug!("{}: dropped {id} from index", self.storage.describe());
                }
                if let Some(name) = emptied {
                    debug!("{}: TM name {name} has no versions left", self.storage.describe());
                }
            }
            touched.insert(tm_id.name());
        }
        for name in touched {
            self.refresh_attachments(idx, &name)?;
        }
        Ok(())
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>, RepoError> {
        Ok(self
            .storage
            .list_dir(dir)?
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.name)
            .collect())
    }

    fn relisted(
        &self,
        idx: &Index,
        container: &AttachmentContainerRef,
        files: Vec<String>,
    ) -> Vec<Attachment> {
        let known = idx.find_attachment_container(container);
        files
            .into_iter()
            .map(|file| {
                known
                    .and_then(|k| k.iter().find(|a| a.name == file && !a.media_type.is_empty()))
                    .cloned()
                    .unwrap_or_else(|| Attachment::guessed(file))
            })
            .collect()
    }

    /// Re-list the attachment directories of a TM name and its versions.
    fn refresh_attachments(&self, idx: &mut Index, name: &str) -> Result<(), RepoError> {
        let Some(entry) = idx.find_by_name(name) else {
            return Ok(());
        };
        let version_ids: Vec<String> = entry.versions.iter().map(|v| v.tm_id.clone()).collect();
        let dir = format!("{name}/{ATTACHMENTS_DIR}");

        let by_name = AttachmentContainerRef::TmName(name.to_owned());
        let files = self.list_files(&dir)?;
        let list = self.relisted(idx, &by_name, files);
        idx.insert_attachments(&by_name, list)?;

        for id in version_ids {
            let by_id = AttachmentContainerRef::TmId(id);
            let files = self.list_files(&by_id.dir()?)?;
            let list = self.relisted(idx, &by_id, files);
            idx.insert_attachments(&by_id, list)?;
        }
        Ok(())
    }

    fn require_container<'a>(
        idx: &'a Index,
        container: &AttachmentContainerRef,
    ) -> Result<&'a Vec<Attachment>, RepoError> {
        idx.find_attachment_container(container)
            .ok_or_else(|| match container {
                AttachmentContainerRef::TmName(n) => RepoError::name_not_found(n),
                AttachmentContainerRef::TmId(i) => RepoError::tm_not_found(i),
            })
    }
}

impl<S: Storage> Repository for IndexedRepo<S> {
    fn spec(&self) -> RepoSpec {
        self.spec.clone()
    }

    fn import(
        &self,
        ctx: &CancelToken,
        id: &TmId,
        raw: &[u8],
        opts: &ImportOptions,
    ) -> Result<ImportResult, RepoError> {
        ctx.check()?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(RepoError::InvalidInput("empty TM content".to_owned()));
        }
        let (digest, _) = compute_digest(raw)?;
        if digest != id.version.hash {
            return Err(RepoError::InvalidInput(format!(
                "id {id} does not match content digest {digest}"
            )));
        }
        let embedded = ThingModel::from_bytes(raw)?
            .id
            .and_then(|s| TmId::parse(&s).ok())
            .map(|e| e.to_string());
        if embedded.as_deref() != Some(id.to_string().as_str()) {
            return Err(RepoError::InvalidInput(format!(
                "id field {} does not match {id}",
                embedded.as_deref().unwrap_or("<missing>")
            )));
        }

        let _lock = self.storage.lock(ctx)?;
        let existing = self.existing_id(id)?;
        let mut result = ImportResult::ok(id.to_string());
        match existing {
            ExistingId::Full(e) | ExistingId::Digest(e) if !opts.force => {
                info!("{}: {id} already stored as {e}", self.label());
                return Err(TmConflict::same_content(e).into());
            }
            ExistingId::Timestamp(e) if !opts.force => {
                warn!("{}: {id} shares version and timestamp with {e}", self.label());
                result = ImportResult::warning(id.to_string(), TmConflict::same_timestamp(e));
            }
            _ => {}
        }

        let path = id.to_string();
        self.storage.write(&path, raw)?;
        debug!("{}: wrote {path}", self.label());

        let mut idx = self.read_index()?;
        self.update_index(ctx, &mut idx, &[path])?;
        self.write_index(&mut idx)?;
        Ok(result)
    }

    fn fetch(&self, ctx: &CancelToken, id: &str) -> Result<(String, Vec<u8>), RepoError> {
        ctx.check()?;
        let tm_id = TmId::parse(id)?;
        let found = match self.existing_id(&tm_id)? {
            ExistingId::Full(p) | ExistingId::Digest(p) => p,
            ExistingId::Timestamp(_) | ExistingId::None => return Err(RepoError::tm_not_found(id)),
        };
        let data = self
            .storage
            .read(&found)?
            .ok_or_else(|| RepoError::tm_not_found(id))?;
        Ok((found, data))
    }

    fn delete(&self, ctx: &CancelToken, id: &str) -> Result<(), RepoError> {
        ctx.check()?;
        let tm_id = TmId::parse(id)?;
        let _lock = self.storage.lock(ctx)?;
        if self.existing_id(&tm_id)? != ExistingId::Full(tm_id.to_string()) {
            return Err(RepoError::tm_not_found(id));
        }
        let path = tm_id.to_string();
        let name = tm_id.name();
        let attachments_dir = format!("{name}/{ATTACHMENTS_DIR}");

        self.storage.remove(&path)?;
        self.storage
            .remove_tree(&AttachmentContainerRef::TmId(path.clone()).dir()?)?;

        let mut idx = self.read_index()?;
        idx.delete(&path);
        let last_version = !self
            .storage
            .list_dir(&name)?
            .iter()
            .any(|e| !e.is_dir && e.name.ends_with(TM_FILE_EXTENSION));
        if last_version {
            self.storage.remove_tree(&attachments_dir)?;
        }
        self.storage.prune_empty_dirs(&attachments_dir, "")?;
        self.write_index(&mut idx)?;
        info!("{}: deleted {path}", self.label());
        Ok(())
    }

    fn list(&self, ctx: &CancelToken, search: &SearchParams) -> Result<SearchResult, RepoError> {
        let mut idx = self.locked_index(ctx)?;
        idx.filter(search);
        Ok(SearchResult::from_index(idx, &self.label()))
    }

    fn versions(&self, ctx: &CancelToken, name: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let mut idx = self.locked_index(ctx)?;
        let name = name.trim_matches('/');
        match idx.data.iter().position(|e| e.name == name) {
            Some(i) => Ok(FoundEntry::from_entry(idx.data.swap_remove(i), &self.label()).versions),
            None => Err(RepoError::name_not_found(name)),
        }
    }

    fn get_tm_metadata(&self, ctx: &CancelToken, id: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let idx = self.locked_index(ctx)?;
        let (_, version) = idx
            .find_by_tm_id(id)
            .ok_or_else(|| RepoError::tm_not_found(id))?;
        Ok(vec![FoundVersion {
            version: version.clone(),
            found_in: self.label(),
        }])
    }

    fn index(&self, ctx: &CancelToken, ids: &[String]) -> Result<(), RepoError> {
        ctx.check()?;
        let _lock = self.storage.lock(ctx)?;
        let mut idx = if ids.is_empty() {
            self.rebuild_index(ctx)?
        } else {
            let mut idx = self.read_index()?;
            self.update_index(ctx, &mut idx, ids)?;
            idx
        };
        self.write_index(&mut idx)
    }

    fn check_integrity(
        &self,
        ctx: &CancelToken,
        filter: &SearchParams,
    ) -> Result<Vec<CheckResult>, RepoError> {
        ctx.check()?;
        let _lock = self.storage.lock(ctx)?;
        let idx = self.read_index()?;
        let ignore = self.read_ignore()?;
        integrity::check(ctx, &self.storage, &idx, &ignore, filter)
    }

    fn import_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        attachment: &Attachment,
        content: &[u8],
        force: bool,
    ) -> Result<(), RepoError> {
        ctx.check()?;
        validate_attachment_name(&attachment.name)?;
        let _lock = self.storage.lock(ctx)?;
        let mut idx = self.read_index()?;
        let mut list = Self::require_container(&idx, container)?.clone();
        if list.iter().any(|a| a.name == attachment.name) && !force {
            return Err(RepoError::AttachmentExists(attachment.name.clone()));
        }
        self.storage
            .write(&container.file_path(&attachment.name)?, content)?;

        let stored = if attachment.media_type.is_empty() {
            Attachment::guessed(attachment.name.clone())
        } else {
            attachment.clone()
        };
        list.retain(|a| a.name != stored.name);
        list.push(stored);
        idx.insert_attachments(container, list)?;
        self.write_index(&mut idx)?;
        debug!("{}: stored attachment {} of {container}", self.label(), attachment.name);
        Ok(())
    }

    fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Vec<u8>, RepoError> {
        let idx = self.locked_index(ctx)?;
        let list = Self::require_container(&idx, container)?;
        if !list.iter().any(|a| a.name == name) {
            return Err(RepoError::attachment_not_found(name));
        }
        self.storage
            .read(&container.file_path(name)?)?
            .ok_or_else(|| RepoError::attachment_not_found(name))
    }

    fn delete_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<(), RepoError> {
        ctx.check()?;
        validate_attachment_name(name)?;
        let _lock = self.storage.lock(ctx)?;
        let mut idx = self.read_index()?;
        let mut list = Self::require_container(&idx, container)?.clone();
        if !list.iter().any(|a| a.name == name) {
            return Err(RepoError::attachment_not_found(name));
        }
        self.storage.remove(&container.file_path(name)?)?;
        let tm_name = match container {
            AttachmentContainerRef::TmName(n) => n.clone(),
            AttachmentContainerRef::TmId(i) => TmId::parse(i)?.name(),
        };
        self.storage.prune_empty_dirs(&container.dir()?, &tm_name)?;

        list.retain(|a| a.name != name);
        idx.insert_attachments(container, list)?;
        self.write_index(&mut idx)
    }
}
