use std::fmt;
use thiserror::Error;

/// Subject of a [`RepoError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Tm,
    TmName,
    Attachment,
    Repo,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Tm => write!(f, "TM"),
            NotFoundKind::TmName => write!(f, "TM name"),
            NotFoundKind::Attachment => write!(f, "attachment"),
            NotFoundKind::Repo => write!(f, "repository"),
        }
    }
}

impl NotFoundKind {
    fn code(self) -> &'static str {
        match self {
            NotFoundKind::Tm => "TMNotFound",
            NotFoundKind::TmName => "TMNameNotFound",
            NotFoundKind::Attachment => "AttachmentNotFound",
            NotFoundKind::Repo => "RepoNotFound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Same base version and digest: the content is already stored.
    SameContent,
    /// Same base version and timestamp with a different digest.
    SameTimestamp,
}

/// An id conflict detected on import, carrying the id already in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmConflict {
    pub kind: ConflictKind,
    pub existing_id: String,
}

impl fmt::Display for TmConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictKind::SameContent => {
                write!(f, "TM with same content already exists: {}", self.existing_id)
            }
            ConflictKind::SameTimestamp => write!(
                f,
                "TM with same version and timestamp already exists: {}",
                self.existing_id
            ),
        }
    }
}

impl std::error::Error for TmConflict {}

impl TmConflict {
    pub fn same_content(existing_id: impl Into<String>) -> Self {
        Self {
            kind: ConflictKind::SameContent,
            existing_id: existing_id.into(),
        }
    }

    pub fn same_timestamp(existing_id: impl Into<String>) -> Self {
        Self {
            kind: ConflictKind::SameTimestamp,
            existing_id: existing_id.into(),
        }
    }

    /// Machine-readable code, `1:<id>` or `2:<id>`.
    pub fn code(&self) -> String {
        let n = match self.kind {
            ConflictKind::SameContent => 1,
            ConflictKind::SameTimestamp => 2,
        };
        format!("{n}:{}", self.existing_id)
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: &str) -> Option<Self> {
        let (n, id) = code.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match n {
            "1" => Some(Self::same_content(id)),
            "2" => Some(Self::same_timestamp(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("TM name too long: {len} characters, at most {limit} allowed")]
    NameTooLong { len: usize, limit: usize },
    #[error("invalid TM id: {0}")]
    InvalidId(String),
    #[error("invalid repo spec: {0}")]
    InvalidRepoSpec(String),
    #[error("{kind} not found: {subject}")]
    NotFound { kind: NotFoundKind, subject: String },
    #[error("ambiguous repository: {0}")]
    Ambiguous(String),
    #[error(transparent)]
    Conflict(#[from] TmConflict),
    #[error("operation not supported by this repository: {0}")]
    NotSupported(String),
    #[error("attachment already exists: {0}")]
    AttachmentExists(String),
    #[error("no index found: {0}")]
    NoIndex(String),
    #[error("index does not match repository contents: {0}")]
    IndexMismatch(String),
    #[error("integrity check failed: {0}")]
    IntegrityFailed(String),
    #[error("repository access failed: {0}")]
    RepoAccessFailed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepoError {
    pub fn tm_not_found(id: impl Into<String>) -> Self {
        RepoError::NotFound {
            kind: NotFoundKind::Tm,
            subject: id.into(),
        }
    }

    pub fn name_not_found(name: impl Into<String>) -> Self {
        RepoError::NotFound {
            kind: NotFoundKind::TmName,
            subject: name.into(),
        }
    }

    pub fn attachment_not_found(name: impl Into<String>) -> Self {
        RepoError::NotFound {
            kind: NotFoundKind::Attachment,
            subject: name.into(),
        }
    }

    pub fn repo_not_found(name: impl Into<String>) -> Self {
        RepoError::NotFound {
            kind: NotFoundKind::Repo,
            subject: name.into(),
        }
    }

    pub fn is_not_found(&self, kind: NotFoundKind) -> bool {
        matches!(self, RepoError::NotFound { kind: k, .. } if *k == kind)
    }

    /// Machine-readable code preserved across the REST surface so peers can
    /// reconstruct the typed error.
    pub fn code(&self) -> Option<String> {
        match self {
            RepoError::Conflict(c) => Some(c.code()),
            RepoError::NotFound { kind, .. } => Some(kind.code().to_owned()),
            RepoError::AttachmentExists(_) => Some("AttachmentExists".to_owned()),
            _ => None,
        }
    }

    /// Rebuild a typed error from a code and detail received from a peer.
    pub fn from_code(code: &str, detail: &str) -> Option<Self> {
        if let Some(conflict) = TmConflict::from_code(code) {
            return Some(RepoError::Conflict(conflict));
        }
        let kind = match code {
            "TMNotFound" => NotFoundKind::Tm,
            "TMNameNotFound" => NotFoundKind::TmName,
            "AttachmentNotFound" => NotFoundKind::Attachment,
            "RepoNotFound" => NotFoundKind::Repo,
            "AttachmentExists" => return Some(RepoError::AttachmentExists(detail.to_owned())),
            _ => return None,
        };
        Some(RepoError::NotFound {
            kind,
            subject: detail.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_code_roundtrip() {
        let c = TmConflict::same_content("a/b/c/v1.0.0-20240108140117-5cb3f3b8a0c4.tm.json");
        assert_eq!(
            c.code(),
            "1:a/b/c/v1.0.0-20240108140117-5cb3f3b8a0c4.tm.json"
        );
        assert_eq!(TmConflict::from_code(&c.code()), Some(c));

        let t = TmConflict::same_timestamp("x/y/v1.0.0-20240108140117-aaaaaaaaaaaa.tm.json");
        assert!(t.code().starts_with("2:"));
        assert_eq!(TmConflict::from_code(&t.code()), Some(t));
    }

    #[test]
    fn conflict_from_bad_code() {
        assert!(TmConflict::from_code("3:abc").is_none());
        assert!(TmConflict::from_code("1:").is_none());
        assert!(TmConflict::from_code("nocolon").is_none());
    }

    #[test]
    fn not_found_display_names_subject() {
        let e = RepoError::name_not_found("a-corp/eagle/BT2000");
        let msg = e.to_string();
        assert!(msg.contains("TM name not found"));
        assert!(msg.contains("a-corp/eagle/BT2000"));
        assert!(e.is_not_found(NotFoundKind::TmName));
        assert!(!e.is_not_found(NotFoundKind::Tm));
    }

    #[test]
    fn error_codes_roundtrip_through_from_code() {
        let errors = [
            RepoError::tm_not_found("id"),
            RepoError::name_not_found("name"),
            RepoError::attachment_not_found("README.md"),
            RepoError::repo_not_found("r1"),
            RepoError::AttachmentExists("README.md".to_owned()),
        ];
        for e in errors {
            let code = e.code().unwrap();
            let back = RepoError::from_code(&code, "detail").unwrap();
            assert_eq!(back.code(), Some(code));
        }
    }

    #[test]
    fn unclassified_errors_have_no_code() {
        assert!(RepoError::Upstream("boom".to_owned()).code().is_none());
        assert!(RepoError::from_code("whatever", "x").is_none());
    }
}
