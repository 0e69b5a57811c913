//! Repository backed by another catalog's REST API.

use crate::client::{HttpClient, HttpResponse, Method};
use crate::config::{encode_path, RemoteConfig};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tmc_model::{
    Attachment, AttachmentContainerRef, CancelToken, CheckResult, CompletionKind, FoundEntry,
    FoundVersion, ImportOptions, ImportResult, RepoError, RepoSpec, Repository, SearchParams,
    SearchResult, ThingModel, TmConflict, TmId,
};
use tracing::{debug, warn};
use url::Url;

#[derive(Deserialize)]
struct Data<T> {
    data: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportedData {
    #[serde(rename = "tmID")]
    tm_id: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug)]
pub struct PeerRepo {
    spec: RepoSpec,
    base: String,
    client: HttpClient,
}

impl PeerRepo {
    pub fn new(spec: RepoSpec, config: &RemoteConfig) -> Result<Self, RepoError> {
        config.validate()?;
        if config.is_templated() {
            return Err(RepoError::InvalidRepoSpec(format!(
                "tmc repository loc cannot be a template: {}",
                config.loc
            )));
        }
        Ok(Self {
            spec,
            base: config.base().to_owned(),
            client: HttpClient::new(config),
        })
    }

    fn label(&self) -> String {
        self.spec.label()
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<String, RepoError> {
        let raw = format!("{}/{path}", self.base);
        let mut url = Url::parse(&raw)
            .map_err(|e| RepoError::InvalidRepoSpec(format!("{raw}: {e}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url.into())
    }

    fn call(
        &self,
        ctx: &CancelToken,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<&[u8]>,
        not_found: impl FnOnce() -> RepoError,
    ) -> Result<HttpResponse, RepoError> {
        let resp = self.client.request(ctx, method, url, headers, body)?;
        if resp.is_success() {
            Ok(resp)
        } else {
            Err(resp.error(url, not_found))
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CancelToken,
        url: &str,
        not_found: impl FnOnce() -> RepoError,
    ) -> Result<T, RepoError> {
        let resp = self.call(ctx, Method::Get, url, &[], None, not_found)?;
        let data: Data<T> = serde_json::from_slice(&resp.body)
            .map_err(|e| RepoError::Upstream(format!("{url}: malformed response: {e}")))?;
        Ok(data.data)
    }

    fn relabel(&self, versions: &mut [FoundVersion]) {
        let label = self.label();
        for v in versions {
            v.found_in.clone_from(&label);
        }
    }

    fn attachment_url(
        &self,
        container: &AttachmentContainerRef,
        name: &str,
        query: &[(&str, String)],
    ) -> Result<String, RepoError> {
        let base = match container {
            AttachmentContainerRef::TmId(id) => format!("thing-models/{}", encode_path(id)),
            AttachmentContainerRef::TmName(n) => format!("thing-models/.tmName/{}", encode_path(n)),
        };
        self.endpoint(
            &format!("{base}/.attachments/{}", urlencoding::encode(name)),
            query,
        )
    }
}

impl Repository for PeerRepo {
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
        let mut query = Vec::new();
        if opts.force {
            query.push(("force", "true".to_owned()));
        }
        if !opts.opt_path.is_empty() {
            query.push(("optPath", opts.opt_path.clone()));
        }
        let url = self.endpoint("thing-models", &query)?;
        let resp = self.call(
            ctx,
            Method::Post,
            &url,
            &[("Content-Type", "application/json")],
            Some(raw),
            || RepoError::tm_not_found(id.to_string()),
        )?;
        let data: Data<ImportedData> = serde_json::from_slice(&resp.body)
            .map_err(|e| RepoError::Upstream(format!("{url}: malformed response: {e}")))?;
        let imported = data.data;
        if imported.tm_id != id.to_string() {
            debug!("{}: peer stored {} for {id}", self.label(), imported.tm_id);
        }
        match imported.code.as_deref().and_then(TmConflict::from_code) {
            Some(conflict) => {
                let mut result = ImportResult::warning(imported.tm_id, conflict);
                if let Some(msg) = imported.message {
                    result.message = msg;
                }
                Ok(result)
            }
            None => Ok(ImportResult::ok(imported.tm_id)),
        }
    }

    fn fetch(&self, ctx: &CancelToken, id: &str) -> Result<(String, Vec<u8>), RepoError> {
        let url = self.endpoint(&format!("thing-models/{}", encode_path(id)), &[])?;
        let resp = self.call(ctx, Method::Get, &url, &[], None, || RepoError::tm_not_found(id))?;
        let served = ThingModel::from_bytes(&resp.body)
            .ok()
            .and_then(|tm| tm.id)
            .filter(|served| TmId::parse(served).is_ok())
            .unwrap_or_else(|| id.to_owned());
        Ok((served, resp.body))
    }

    fn delete(&self, ctx: &CancelToken, id: &str) -> Result<(), RepoError> {
        let url = self.endpoint(
            &format!("thing-models/{}", encode_path(id)),
            &[("force", "true".to_owned())],
        )?;
        self.call(ctx, Method::Delete, &url, &[], None, || RepoError::tm_not_found(id))?;
        Ok(())
    }

    fn list(&self, ctx: &CancelToken, search: &SearchParams) -> Result<SearchResult, RepoError> {
        let url = self.endpoint("inventory", &search.to_query())?;
        let mut entries: Vec<FoundEntry> = self.get_json(ctx, &url, || {
            RepoError::Upstream(format!("{url}: inventory not found"))
        })?;
        for e in &mut entries {
            self.relabel(&mut e.versions);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(SearchResult { entries })
    }

    fn versions(&self, ctx: &CancelToken, name: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let name = name.trim_matches('/');
        let url = self.endpoint(
            &format!("inventory/.tmName/{}/.versions", encode_path(name)),
            &[],
        )?;
        let mut versions: Vec<FoundVersion> =
            self.get_json(ctx, &url, || RepoError::name_not_found(name))?;
        self.relabel(&mut versions);
        Ok(versions)
    }

    fn get_tm_metadata(&self, ctx: &CancelToken, id: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let url = self.endpoint(&format!("inventory/{}", encode_path(id)), &[])?;
        let mut versions: Vec<FoundVersion> =
            self.get_json(ctx, &url, || RepoError::tm_not_found(id))?;
        self.relabel(&mut versions);
        Ok(versions)
    }

    // The peer maintains its own index.
    fn index(&self, _ctx: &CancelToken, _ids: &[String]) -> Result<(), RepoError> {
        Ok(())
    }

    fn check_integrity(
        &self,
        _ctx: &CancelToken,
        _filter: &SearchParams,
    ) -> Result<Vec<CheckResult>, RepoError> {
        Err(RepoError::NotSupported(format!(
            "integrity check of tmc repository {}",
            self.label()
        )))
    }

    fn import_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        attachment: &Attachment,
        content: &[u8],
        force: bool,
    ) -> Result<(), RepoError> {
        let query = if force {
            vec![("force", "true".to_owned())]
        } else {
            Vec::new()
        };
        let url = self.attachment_url(container, &attachment.name, &query)?;
        self.call(
            ctx,
            Method::Put,
            &url,
            &[("Content-Type", attachment.media_type.as_str())],
            Some(content),
            || RepoError::tm_not_found(container.value()),
        )?;
        Ok(())
    }

    fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Vec<u8>, RepoError> {
        let url = self.attachment_url(container, name, &[])?;
        let resp = self.call(ctx, Method::Get, &url, &[], None, || {
            RepoError::attachment_not_found(name)
        })?;
        Ok(resp.body)
    }

    fn delete_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<(), RepoError> {
        let url = self.attachment_url(container, name, &[])?;
        self.call(ctx, Method::Delete, &url, &[], None, || {
            RepoError::attachment_not_found(name)
        })?;
        Ok(())
    }

    fn list_completions(
        &self,
        ctx: &CancelToken,
        kind: CompletionKind,
        args: &[String],
        to_complete: &str,
    ) -> Result<Vec<String>, RepoError> {
        let mut query = vec![
            ("kind", kind.as_str().to_owned()),
            ("toComplete", to_complete.to_owned()),
        ];
        query.extend(args.iter().map(|a| ("args", a.clone())));
        let url = self.endpoint(".completions", &query)?;
        let resp = match self.call(ctx, Method::Get, &url, &[], None, || {
            RepoError::Upstream(format!("{url}: completions not available"))
        }) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("{}: completions failed: {e}", self.label());
                return Err(e);
            }
        };
        let text = String::from_utf8_lossy(&resp.body);
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }
}
