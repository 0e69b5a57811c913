//! `application/problem+json` error bodies and the error-to-status mapping.

use serde::Serialize;
use tmc_core::CoreError;
use tmc_model::RepoError;

pub const PROBLEM_JSON: &str = "application/problem+json";

#[derive(Debug, Serialize)]
pub struct Problem {
    pub title: String,
    pub detail: String,
    pub status: u16,
    pub instance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Problem {
    pub fn new(status: u16, detail: impl Into<String>, instance: &str) -> Self {
        Self {
            title: reason(status).to_owned(),
            detail: detail.into(),
            status,
            instance: instance.to_owned(),
            code: None,
        }
    }

    pub fn from_repo(err: &RepoError, instance: &str) -> Self {
        let mut p = Self::new(status_of(err), detail_of(err), instance);
        p.code = err.code();
        p
    }

    pub fn from_core(err: &CoreError, instance: &str) -> Self {
        match err.repo_error() {
            Some(e) => Self::from_repo(e, instance),
            None => Self::new(500, err.to_string(), instance),
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// HTTP status for a domain error.
pub fn status_of(err: &RepoError) -> u16 {
    match err {
        RepoError::InvalidInput(_)
        | RepoError::InvalidId(_)
        | RepoError::NameTooLong { .. }
        | RepoError::InvalidRepoSpec(_)
        | RepoError::Ambiguous(_) => 400,
        RepoError::Unauthorized(_) => 401,
        RepoError::NotFound { .. } => 404,
        RepoError::Conflict(_) | RepoError::AttachmentExists(_) => 409,
        RepoError::NotSupported(_) => 405,
        RepoError::Cancelled => 503,
        _ => 500,
    }
}

// Peers rebuild typed errors from `code` plus `detail`, so not-found
// details carry only the subject.
fn detail_of(err: &RepoError) -> String {
    match err {
        RepoError::NotFound { subject, .. } => subject.clone(),
        RepoError::AttachmentExists(name) => name.clone(),
        other => other.to_string(),
    }
}

pub fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmc_model::TmConflict;

    #[test]
    fn maps_domain_errors_to_status() {
        assert_eq!(status_of(&RepoError::InvalidId("x".into())), 400);
        assert_eq!(status_of(&RepoError::Unauthorized("x".into())), 401);
        assert_eq!(status_of(&RepoError::tm_not_found("x")), 404);
        assert_eq!(status_of(&TmConflict::same_content("x").into()), 409);
        assert_eq!(status_of(&RepoError::Upstream("x".into())), 500);
    }

    #[test]
    fn conflict_problem_carries_code() {
        let id = "a-corp/eagle/BT2000/v1.0.0-20240108140117-5cb3f3b8a0c4.tm.json";
        let p = Problem::from_repo(&TmConflict::same_content(id).into(), "/thing-models");
        assert_eq!(p.status, 409);
        assert_eq!(p.title, "Conflict");
        assert_eq!(p.code.as_deref(), Some(format!("1:{id}").as_str()));

        let v: serde_json::Value = serde_json::from_slice(&p.to_json()).unwrap();
        assert_eq!(v["instance"], "/thing-models");
    }

    #[test]
    fn not_found_detail_is_the_subject() {
        let p = Problem::from_repo(&RepoError::name_not_found("a/b"), "/x");
        assert_eq!(p.detail, "a/b");
        assert_eq!(p.code.as_deref(), Some("TMNameNotFound"));
        let rebuilt = RepoError::from_code("TMNameNotFound", &p.detail).unwrap();
        assert_eq!(rebuilt.to_string(), RepoError::name_not_found("a/b").to_string());
    }
}
