//! Blocking HTTP client shared by the mirror and peer repositories.
//!
//! Every request carries the configured credentials and custom headers.
//! Non-2xx responses are returned as [`HttpResponse`] so callers decide how a
//! 404 maps onto the domain; [`HttpResponse::error`] decodes the
//! `{detail, code}` body a catalog server sends.

use crate::config::{Auth, RemoteConfig};
use base64::{prelude::BASE64_STANDARD, Engine};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use tmc_model::{CancelToken, RepoError};
use tracing::debug;

const USER_AGENT: &str = concat!("tmc/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProblemBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    code: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Domain error for a failed response. `not_found` builds the error for a
    /// 404 that carries no typed code.
    pub fn error(&self, url: &str, not_found: impl FnOnce() -> RepoError) -> RepoError {
        let problem: ProblemBody = serde_json::from_slice(&self.body).unwrap_or_default();
        let detail = if problem.detail.is_empty() {
            problem.title.clone()
        } else {
            problem.detail.clone()
        };
        if let Some(err) = problem
            .code
            .as_deref()
            .and_then(|code| RepoError::from_code(code, &detail))
        {
            return err;
        }
        match self.status {
            401 | 403 => RepoError::Unauthorized(format!("{url}: HTTP {}", self.status)),
            404 => not_found(),
            400 => RepoError::InvalidInput(detail),
            status => RepoError::Upstream(if detail.is_empty() {
                format!("{url}: HTTP {status}")
            } else {
                format!("{url}: HTTP {status}: {detail}")
            }),
        }
    }
}

pub struct HttpClient {
    agent: ureq::Agent,
    auth: Option<String>,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(config: &RemoteConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        let auth = config.auth.as_ref().map(|a| match a {
            Auth::Bearer(token) => format!("Bearer {token}"),
            Auth::Basic { username, password } => {
                format!("Basic {}", BASE64_STANDARD.encode(format!("{username}:{password}")))
            }
        });
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            auth,
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn decorate<B>(
        &self,
        mut req: ureq::RequestBuilder<B>,
        extra: &[(&str, &str)],
    ) -> ureq::RequestBuilder<B> {
        req = req.header("User-Agent", USER_AGENT);
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", auth.as_str());
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        for (k, v) in extra {
            req = req.header(*k, *v);
        }
        req
    }

    pub fn get(
        &self,
        ctx: &CancelToken,
        url: &str,
        extra: &[(&str, &str)],
    ) -> Result<HttpResponse, RepoError> {
        self.request(ctx, Method::Get, url, extra, None)
    }

    /// Send a request; `body` is ignored for GET and DELETE.
    pub fn request(
        &self,
        ctx: &CancelToken,
        method: Method,
        url: &str,
        extra: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, RepoError> {
        ctx.check()?;
        debug!("{} {url}", method.as_str());
        let result = match method {
            Method::Get => self.decorate(self.agent.get(url), extra).call(),
            Method::Delete => self.decorate(self.agent.delete(url), extra).call(),
            Method::Post => self
                .decorate(self.agent.post(url), extra)
                .send(body.unwrap_or_default()),
            Method::Put => self
                .decorate(self.agent.put(url), extra)
                .send(body.unwrap_or_default()),
        };
        let resp = result.map_err(|e| RepoError::Upstream(format!("{url}: {e}")))?;
        ctx.check()?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let status = resp.status().as_u16();
        let etag = header("etag");
        let last_modified = header("last-modified");
        let content_type = header("content-type");

        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RepoError::Upstream(format!("{url}: {e}")))?;
        Ok(HttpResponse {
            status,
            body,
            etag,
            last_modified,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmc_model::{ConflictKind, NotFoundKind};

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
            ..HttpResponse::default()
        }
    }

    #[test]
    fn typed_code_wins_over_status() {
        let r = response(
            409,
            r#"{"title":"Conflict","detail":"exists","code":"1:a/b/c/v1.0.0-20240108140117-aaaaaaaaaaaa.tm.json"}"#,
        );
        match r.error("u", || RepoError::tm_not_found("x")) {
            RepoError::Conflict(c) => {
                assert_eq!(c.kind, ConflictKind::SameContent);
                assert_eq!(c.existing_id, "a/b/c/v1.0.0-20240108140117-aaaaaaaaaaaa.tm.json");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_fallbacks() {
        assert!(matches!(
            response(403, "").error("u", || RepoError::tm_not_found("x")),
            RepoError::Unauthorized(_)
        ));
        assert!(response(404, "not json")
            .error("u", || RepoError::attachment_not_found("a"))
            .is_not_found(NotFoundKind::Attachment));
        assert!(matches!(
            response(400, r#"{"detail":"bad"}"#).error("u", || RepoError::tm_not_found("x")),
            RepoError::InvalidInput(d) if d == "bad"
        ));
        assert!(matches!(
            response(502, "").error("u", || RepoError::tm_not_found("x")),
            RepoError::Upstream(_)
        ));
    }

    #[test]
    fn connection_refused_is_upstream() {
        let client = HttpClient::new(&RemoteConfig::new("http://127.0.0.1:1"));
        let err = client
            .get(&CancelToken::new(), "http://127.0.0.1:1/x", &[])
            .unwrap_err();
        assert!(matches!(err, RepoError::Upstream(_)));
    }
}
