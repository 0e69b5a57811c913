//! Transport-independent routing of the REST API onto the catalog service.

use crate::problem::{Problem, PROBLEM_JSON};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tiny_http::Method;
use tmc_core::{Catalog, ChildError, CoreError, Partial};
use tmc_model::{
    Attachment, AttachmentContainerRef, CancelToken, CompletionKind, ImportOptions,
    NameFilterType, RepoError, RepoSpec, SearchParams,
};
use tracing::{debug, warn};

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const ATTACHMENTS_SEP: &str = "/.attachments/";
const TM_NAME_PREFIX: &str = ".tmName/";
const VERSIONS_SUFFIX: &str = "/.versions";

/// A request as seen by the router.
#[derive(Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path without query string, still percent-encoded.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// Split a raw request target into path and decoded query pairs.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method,
            path: path.to_owned(),
            query: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            content_type: None,
            body: Vec::new(),
        }
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn params<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn flag(&self, key: &str) -> bool {
        self.param(key).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn count(&self, key: &str) -> Result<Option<usize>, RepoError> {
        self.param(key)
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse().map_err(|_| {
                    RepoError::InvalidInput(format!("{key} must be a non-negative integer: {v}"))
                })
            })
            .transpose()
    }
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn no_content() -> Self {
        Self {
            status: 204,
            content_type: None,
            body: Vec::new(),
        }
    }

    fn bytes(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: Some(content_type.into()),
            body,
        }
    }

    fn json(status: u16, value: &impl Serialize) -> Result<Self, CoreError> {
        Ok(Self::bytes(status, JSON, serde_json::to_vec(value)?))
    }

    fn problem(p: &Problem) -> Self {
        Self::bytes(p.status, PROBLEM_JSON, p.to_json())
    }
}

/// Router state shared by all request workers.
pub struct Api {
    catalog: Arc<Catalog>,
    target: RepoSpec,
    prefix: String,
    shutdown: CancelToken,
}

impl Api {
    /// `prefix` is a base path such as `/api`; empty for the root.
    pub fn new(catalog: Arc<Catalog>, target: RepoSpec, prefix: &str, shutdown: CancelToken) -> Self {
        let prefix = prefix.trim_end_matches('/');
        let prefix = if prefix.is_empty() || prefix.starts_with('/') {
            prefix.to_owned()
        } else {
            format!("/{prefix}")
        };
        Self {
            catalog,
            target,
            prefix,
            shutdown,
        }
    }

    pub fn handle(&self, req: &ApiRequest) -> ApiResponse {
        let instance = req.path.as_str();
        let Some(route) = req.path.strip_prefix(self.prefix.as_str()) else {
            return ApiResponse::problem(&Problem::new(404, "no such resource", instance));
        };
        let route = match urlencoding::decode(route) {
            Ok(r) => r.into_owned(),
            Err(e) => {
                return ApiResponse::problem(&Problem::new(400, format!("bad path: {e}"), instance))
            }
        };
        let ctx = self.shutdown.child();
        match self.route(&ctx, req, route.trim_start_matches('/')) {
            Ok(Some(resp)) => resp,
            Ok(None) => ApiResponse::problem(&Problem::new(404, "no such resource", instance)),
            Err(e) => {
                debug!("{} {instance}: {e}", req.method);
                ApiResponse::problem(&Problem::from_core(&e, instance))
            }
        }
    }

    fn spec(&self, req: &ApiRequest) -> RepoSpec {
        match req.param("repo").filter(|r| !r.is_empty()) {
            Some(name) => RepoSpec::from_name(name),
            None => self.target.clone(),
        }
    }

    fn route(
        &self,
        ctx: &CancelToken,
        req: &ApiRequest,
        route: &str,
    ) -> Result<Option<ApiResponse>, CoreError> {
        let resp = match route {
            "healthz" | "healthz/live" => only(req, Method::Get, || Ok(ApiResponse::no_content()))?,
            "healthz/ready" | "healthz/startup" => only(req, Method::Get, || Ok(self.ready(req)))?,
            "inventory" => only(req, Method::Get, || self.inventory(ctx, req))?,
            ".completions" => only(req, Method::Get, || self.completions(ctx, req))?,
            "thing-models" => only(req, Method::Post, || self.import(ctx, req))?,
            _ => {
                if let Some(rest) = route.strip_prefix("inventory/") {
                    only(req, Method::Get, || self.inventory_item(ctx, req, rest))?
                } else if let Some(rest) = route.strip_prefix("thing-models/") {
                    self.thing_model(ctx, req, rest)?
                } else {
                    return Ok(None);
                }
            }
        };
        Ok(Some(resp))
    }

    fn ready(&self, req: &ApiRequest) -> ApiResponse {
        match self.catalog.ready(&self.spec(req)) {
            Ok(()) => ApiResponse::no_content(),
            Err(e) => {
                warn!("readiness check failed: {e}");
                let mut p = Problem::new(503, e.to_string(), &req.path);
                p.code = e.code();
                ApiResponse::problem(&p)
            }
        }
    }

    /// Entries matching the filters, paged by the optional `offset` and `limit`.
    fn inventory(&self, ctx: &CancelToken, req: &ApiRequest) -> Result<ApiResponse, CoreError> {
        let offset = req.count("offset")?.unwrap_or(0);
        let limit = req.count("limit")?;
        let search = SearchParams::from_query(req.query.iter().map(|(k, v)| (k, v)));
        let Partial { data, errors } = self.catalog.list(ctx, &self.spec(req), &search)?;
        let total = data.entries.len();
        let page: Vec<_> = data
            .entries
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        let mut meta = json!({ "page": { "elements": page.len(), "total": total, "offset": offset } });
        if let Some(limit) = limit {
            meta["page"]["limit"] = json!(limit);
        }
        if !errors.is_empty() {
            meta["errors"] = child_errors(&errors);
        }
        ApiResponse::json(200, &json!({ "meta": meta, "data": page }))
    }

    fn inventory_item(
        &self,
        ctx: &CancelToken,
        req: &ApiRequest,
        rest: &str,
    ) -> Result<ApiResponse, CoreError> {
        let spec = self.spec(req);
        let Some(name) = rest.strip_prefix(TM_NAME_PREFIX) else {
            let found = self.catalog.get_tm_metadata(ctx, &spec, rest)?;
            log_partial(&req.path, &found.errors);
            return ApiResponse::json(200, &json!({ "data": found.data }));
        };
        if let Some(name) = name.strip_suffix(VERSIONS_SUFFIX) {
            let found = self.catalog.versions(ctx, &spec, name)?;
            log_partial(&req.path, &found.errors);
            return ApiResponse::json(200, &json!({ "data": found.data }));
        }
        let name = name.trim_end_matches('/');
        let search = SearchParams::with_name(name, NameFilterType::FullMatch);
        let found = self.catalog.list(ctx, &spec, &search)?;
        log_partial(&req.path, &found.errors);
        let entry = found
            .data
            .entries
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| RepoError::name_not_found(name))?;
        ApiResponse::json(200, &json!({ "data": entry }))
    }

    fn thing_model(
        &self,
        ctx: &CancelToken,
        req: &ApiRequest,
        rest: &str,
    ) -> Result<ApiResponse, CoreError> {
        if let Some((container, file)) = rest.split_once(ATTACHMENTS_SEP) {
            let container = match container.strip_prefix(TM_NAME_PREFIX) {
                Some(name) => AttachmentContainerRef::TmName(name.to_owned()),
                None => AttachmentContainerRef::TmId(container.to_owned()),
            };
            return self.attachment(ctx, req, &container, file);
        }
        let spec = self.spec(req);
        match req.method {
            Method::Get => {
                let fetched = self.catalog.fetch_any(ctx, &spec, rest, req.flag("restoreId"))?;
                log_partial(&req.path, &fetched.errors);
                Ok(ApiResponse::bytes(200, JSON, fetched.data.1))
            }
            Method::Delete => {
                if !req.flag("force") {
                    return Err(RepoError::InvalidInput(
                        "deleting a TM requires force=true".to_owned(),
                    )
                    .into());
                }
                self.catalog.delete(ctx, &spec, rest)?;
                Ok(ApiResponse::no_content())
            }
            _ => Ok(method_not_allowed(req)),
        }
    }

    fn import(&self, ctx: &CancelToken, req: &ApiRequest) -> Result<ApiResponse, CoreError> {
        let opts = ImportOptions {
            force: req.flag("force"),
            opt_path: req.param("optPath").unwrap_or_default().to_owned(),
        };
        let result = self.catalog.import(ctx, &self.spec(req), &req.body, &opts)?;
        let mut data = json!({ "tmID": result.tm_id });
        if let Some(conflict) = &result.conflict {
            data["code"] = Value::String(conflict.code());
            data["message"] = Value::String(result.message.clone());
        }
        ApiResponse::json(201, &json!({ "data": data }))
    }

    fn attachment(
        &self,
        ctx: &CancelToken,
        req: &ApiRequest,
        container: &AttachmentContainerRef,
        file: &str,
    ) -> Result<ApiResponse, CoreError> {
        let spec = self.spec(req);
        match req.method {
            Method::Get => {
                let content = self.catalog.fetch_attachment(ctx, &spec, container, file)?;
                log_partial(&req.path, &content.errors);
                let media_type = Attachment::guessed(file).media_type;
                Ok(ApiResponse::bytes(200, media_type, content.data))
            }
            Method::Put => {
                let attachment = match req.content_type.as_deref().filter(|c| !c.is_empty()) {
                    Some(ct) => Attachment::new(file, ct),
                    None => Attachment::guessed(file),
                };
                self.catalog.import_attachment(
                    ctx,
                    &spec,
                    container,
                    &attachment,
                    &req.body,
                    req.flag("force"),
                )?;
                Ok(ApiResponse::no_content())
            }
            Method::Delete => {
                self.catalog.delete_attachment(ctx, &spec, container, file)?;
                Ok(ApiResponse::no_content())
            }
            _ => Ok(method_not_allowed(req)),
        }
    }

    fn completions(&self, ctx: &CancelToken, req: &ApiRequest) -> Result<ApiResponse, CoreError> {
        let kind: CompletionKind = req.param("kind").unwrap_or_default().parse()?;
        let args: Vec<String> = req.params("args").map(str::to_owned).collect();
        let to_complete = req.param("toComplete").unwrap_or_default();
        let found = self
            .catalog
            .list_completions(ctx, &self.spec(req), kind, &args, to_complete)?;
        log_partial(&req.path, &found.errors);
        let mut text = found.data.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        Ok(ApiResponse::bytes(200, TEXT, text.into_bytes()))
    }
}

fn only(
    req: &ApiRequest,
    allowed: Method,
    handler: impl FnOnce() -> Result<ApiResponse, CoreError>,
) -> Result<ApiResponse, CoreError> {
    if req.method == allowed {
        handler()
    } else {
        Ok(method_not_allowed(req))
    }
}

fn method_not_allowed(req: &ApiRequest) -> ApiResponse {
    ApiResponse::problem(&Problem::new(
        405,
        format!("{} not allowed here", req.method),
        &req.path,
    ))
}

fn child_errors(errors: &[ChildError]) -> Value {
    Value::Array(
        errors
            .iter()
            .map(|c| {
                let mut e = json!({ "repo": c.repo, "detail": c.error.to_string() });
                if let Some(code) = c.error.code() {
                    e["code"] = Value::String(code);
                }
                e
            })
            .collect(),
    )
}

fn log_partial(path: &str, errors: &[ChildError]) {
    for e in errors {
        warn!("{path}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmc_core::{Config, RepoConfig};

    const S1_TM: &str = r#"{"schema:author":{"name":"a-corp"},"schema:manufacturer":{"name":"eagle"},"schema:mpn":"BT2000","version":{"model":"v1.0.0"}}"#;

    fn api(dir: &std::path::Path, prefix: &str) -> Api {
        let mut config = Config::default();
        config
            .add("local", RepoConfig::file(dir.join("repo").to_string_lossy()))
            .unwrap();
        Api::new(
            Arc::new(Catalog::new(config)),
            RepoSpec::Empty,
            prefix,
            CancelToken::new(),
        )
    }

    fn call(api: &Api, method: Method, target: &str, body: &[u8]) -> ApiResponse {
        let mut req = ApiRequest::new(method, target);
        req.body = body.to_vec();
        api.handle(&req)
    }

    fn json_of(resp: &ApiResponse) -> Value {
        serde_json::from_slice(&resp.body).unwrap()
    }

    #[test]
    fn splits_target_into_path_and_query() {
        let req = ApiRequest::new(Method::Get, "/inventory?filter.author=a%20b,c&search=x&args=1&args=2");
        assert_eq!(req.path, "/inventory");
        assert_eq!(req.param("filter.author"), Some("a b,c"));
        assert_eq!(req.params("args").collect::<Vec<_>>(), ["1", "2"]);
        assert!(!req.flag("force"));
    }

    #[test]
    fn health_and_unknown_routes() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), "");
        assert_eq!(call(&api, Method::Get, "/healthz", b"").status, 204);
        assert_eq!(call(&api, Method::Get, "/healthz/ready", b"").status, 204);
        let missing = call(&api, Method::Get, "/nope", b"");
        assert_eq!(missing.status, 404);
        assert_eq!(missing.content_type.as_deref(), Some(PROBLEM_JSON));
        assert_eq!(call(&api, Method::Put, "/inventory", b"").status, 405);
    }

    #[test]
    fn routes_live_under_the_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), "api/");
        assert_eq!(call(&api, Method::Get, "/healthz", b"").status, 404);
        assert_eq!(call(&api, Method::Get, "/api/healthz/live", b"").status, 204);
    }

    #[test]
    fn import_then_browse() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), "");
        let created = call(&api, Method::Post, "/thing-models", S1_TM.as_bytes());
        assert_eq!(created.status, 201);
        let id = json_of(&created)["data"]["tmID"].as_str().unwrap().to_owned();

        let inv = json_of(&call(&api, Method::Get, "/inventory?filter.mpn=BT2000", b""));
        assert_eq!(inv["meta"]["page"]["elements"], 1);
        assert_eq!(inv["data"][0]["name"], "a-corp/eagle/BT2000");

        let entry = json_of(&call(&api, Method::Get, "/inventory/.tmName/a-corp/eagle/BT2000", b""));
        assert_eq!(entry["data"]["mpn"], "BT2000");
        let versions = json_of(&call(
            &api,
            Method::Get,
            "/inventory/.tmName/a-corp/eagle/BT2000/.versions",
            b"",
        ));
        assert_eq!(versions["data"][0]["tmID"], id.as_str());
        let meta = json_of(&call(&api, Method::Get, &format!("/inventory/{id}"), b""));
        assert_eq!(meta["data"][0]["tmID"], id.as_str());

        let fetched = call(&api, Method::Get, &format!("/thing-models/{id}"), b"");
        assert_eq!(fetched.status, 200);
        let by_name = call(&api, Method::Get, "/thing-models/a-corp/eagle/BT2000:1.0", b"");
        assert_eq!(by_name.body, fetched.body);

        let names = call(&api, Method::Get, "/.completions?kind=names&toComplete=a-", b"");
        assert_eq!(String::from_utf8(names.body).unwrap(), "a-corp/eagle/BT2000\n");
    }

    #[test]
    fn inventory_pages_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), "");
        for mpn in ["BT1000", "BT2000", "BT3000"] {
            let raw = S1_TM.replace("BT2000", mpn);
            assert_eq!(call(&api, Method::Post, "/thing-models", raw.as_bytes()).status, 201);
        }

        let first = json_of(&call(&api, Method::Get, "/inventory?limit=2", b""));
        assert_eq!(first["meta"]["page"]["elements"], 2);
        assert_eq!(first["meta"]["page"]["total"], 3);
        assert_eq!(first["meta"]["page"]["limit"], 2);
        assert_eq!(first["data"][0]["name"], "a-corp/eagle/BT1000");

        let rest = json_of(&call(&api, Method::Get, "/inventory?offset=2&limit=2", b""));
        assert_eq!(rest["meta"]["page"]["elements"], 1);
        assert_eq!(rest["data"][0]["name"], "a-corp/eagle/BT3000");

        let past = json_of(&call(&api, Method::Get, "/inventory?offset=9", b""));
        assert_eq!(past["meta"]["page"]["elements"], 0);
        assert_eq!(past["data"], json!([]));

        assert_eq!(call(&api, Method::Get, "/inventory?limit=-1", b"").status, 400);
    }

    #[test]
    fn unknown_name_is_a_typed_404() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), "");
        let resp = call(&api, Method::Get, "/inventory/.tmName/x/y/z", b"");
        assert_eq!(resp.status, 404);
        assert_eq!(json_of(&resp)["code"], "TMNameNotFound");
        let bad_kind = call(&api, Method::Get, "/.completions?kind=bogus", b"");
        assert_eq!(bad_kind.status, 400);
    }

    #[test]
    fn delete_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let api = api(dir.path(), "");
        let created = call(&api, Method::Post, "/thing-models", S1_TM.as_bytes());
        let id = json_of(&created)["data"]["tmID"].as_str().unwrap().to_owned();
        assert_eq!(call(&api, Method::Delete, &format!("/thing-models/{id}"), b"").status, 400);
        assert_eq!(
            call(&api, Method::Delete, &format!("/thing-models/{id}?force=true"), b"").status,
            204
        );
        assert_eq!(call(&api, Method::Get, &format!("/thing-models/{id}"), b"").status, 404);
    }
}
