use crate::cache::HttpCache;
use crate::client::HttpClient;
use crate::config::RemoteConfig;
use std::sync::Arc;
use tmc_model::{
    Attachment, AttachmentContainerRef, CancelToken, CheckResult, FoundEntry, FoundVersion,
    ImportOptions, ImportResult, Index, RepoError, RepoSpec, Repository, SearchParams,
    SearchResult, TmId,
};
use tracing::debug;

const INDEX_PATH: &str = ".tmc/tm-catalog.toc.json";

/// Read-only mirror of a catalog directory published over HTTP.
///
/// The index is fetched through the shared [`HttpCache`]; TM files and
/// attachments are fetched directly.
#[derive(Debug)]
pub struct HttpRepo {
    spec: RepoSpec,
    config: RemoteConfig,
    client: HttpClient,
    cache: Arc<HttpCache>,
}

impl HttpRepo {
    pub fn new(spec: RepoSpec, config: RemoteConfig, cache: Arc<HttpCache>) -> Result<Self, RepoError> {
        config.validate()?;
        Ok(Self {
            client: HttpClient::new(&config),
            spec,
            config,
            cache,
        })
    }

    fn label(&self) -> String {
        self.spec.label()
    }

    fn read_only(&self, op: &str) -> RepoError {
        RepoError::NotSupported(format!("{op} on read-only http repository {}", self.label()))
    }

    fn read_index(&self, ctx: &CancelToken) -> Result<Index, RepoError> {
        let url = self.config.file_url(INDEX_PATH);
        let body = self.cache.get(ctx, &self.client, &url, |resp| {
            resp.error(&url, || RepoError::NoIndex(url.clone()))
        })?;
        serde_json::from_slice(&body)
            .map_err(|e| RepoError::NoIndex(format!("{url}: {e}")))
    }

    fn get_file(
        &self,
        ctx: &CancelToken,
        rel: &str,
        not_found: impl FnOnce() -> RepoError,
    ) -> Result<Vec<u8>, RepoError> {
        let url = self.config.file_url(rel);
        let resp = self.client.get(ctx, &url, &[])?;
        if resp.is_success() {
            Ok(resp.body)
        } else {
            Err(resp.error(&url, not_found))
        }
    }

    /// An indexed id with the same content as `id` under another timestamp.
    fn digest_equivalent(&self, ctx: &CancelToken, id: &TmId) -> Result<Option<String>, RepoError> {
        let idx = self.read_index(ctx)?;
        let Some(entry) = idx.find_by_name(&id.name()) else {
            return Ok(None);
        };
        Ok(entry
            .versions
            .iter()
            .filter_map(|v| TmId::parse(&v.tm_id).ok())
            .find(|candidate| candidate.same_base(id) && candidate.version.hash == id.version.hash)
            .map(|candidate| candidate.to_string()))
    }
}

impl Repository for HttpRepo {
    fn spec(&self) -> RepoSpec {
        self.spec.clone()
    }

    fn import(
        &self,
        _ctx: &CancelToken,
        _id: &TmId,
        _raw: &[u8],
        _opts: &ImportOptions,
    ) -> Result<ImportResult, RepoError> {
        Err(self.read_only("import"))
    }

    fn fetch(&self, ctx: &CancelToken, id: &str) -> Result<(String, Vec<u8>), RepoError> {
        let tm_id = TmId::parse(id)?;
        let canonical = tm_id.to_string();
        match self.get_file(ctx, &canonical, || RepoError::tm_not_found(id)) {
            Ok(body) => Ok((canonical, body)),
            Err(e) if e.is_not_found(tmc_model::NotFoundKind::Tm) => {
                let Some(found) = self.digest_equivalent(ctx, &tm_id)? else {
                    return Err(e);
                };
                debug!("{}: serving {found} for {id}", self.label());
                let body = self.get_file(ctx, &found, || RepoError::tm_not_found(id))?;
                Ok((found, body))
            }
            Err(e) => Err(e),
        }
    }

    fn delete(&self, _ctx: &CancelToken, _id: &str) -> Result<(), RepoError> {
        Err(self.read_only("delete"))
    }

    fn list(&self, ctx: &CancelToken, search: &SearchParams) -> Result<SearchResult, RepoError> {
        let mut idx = self.read_index(ctx)?;
        idx.filter(search);
        Ok(SearchResult::from_index(idx, &self.label()))
    }

    fn versions(&self, ctx: &CancelToken, name: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let mut idx = self.read_index(ctx)?;
        let name = name.trim_matches('/');
        match idx.data.iter().position(|e| e.name == name) {
            Some(i) => Ok(FoundEntry::from_entry(idx.data.swap_remove(i), &self.label()).versions),
            None => Err(RepoError::name_not_found(name)),
        }
    }

    fn get_tm_metadata(&self, ctx: &CancelToken, id: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let idx = self.read_index(ctx)?;
        let (_, version) = idx
            .find_by_tm_id(id)
            .ok_or_else(|| RepoError::tm_not_found(id))?;
        Ok(vec![FoundVersion {
            version: version.clone(),
            found_in: self.label(),
        }])
    }

    fn index(&self, _ctx: &CancelToken, _ids: &[String]) -> Result<(), RepoError> {
        Err(self.read_only("index"))
    }

    fn check_integrity(
        &self,
        _ctx: &CancelToken,
        _filter: &SearchParams,
    ) -> Result<Vec<CheckResult>, RepoError> {
        Err(self.read_only("integrity check"))
    }

    fn import_attachment(
        &self,
        _ctx: &CancelToken,
        _container: &AttachmentContainerRef,
        _attachment: &Attachment,
        _content: &[u8],
        _force: bool,
    ) -> Result<(), RepoError> {
        Err(self.read_only("attachment import"))
    }

    fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Vec<u8>, RepoError> {
        let path = container.file_path(name)?;
        self.get_file(ctx, &path, || RepoError::attachment_not_found(name))
    }

    fn delete_attachment(
        &self,
        _ctx: &CancelToken,
        _container: &AttachmentContainerRef,
        _name: &str,
    ) -> Result<(), RepoError> {
        Err(self.read_only("attachment delete"))
    }
}
