//! The capability set shared by every repository backend.

use crate::attachment::{Attachment, AttachmentContainerRef};
use crate::cancel::CancelToken;
use crate::error::{RepoError, TmConflict};
use crate::filter::{NameFilterType, SearchParams};
use crate::id::{looks_like_tm_id, TmId};
use crate::search::{FoundVersion, SearchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which repository an operation addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RepoSpec {
    /// Every enabled repository for reads, the only one for writes.
    #[default]
    Empty,
    /// A repository configured under this name.
    Name(String),
    /// An ad-hoc local directory.
    Dir(PathBuf),
}

impl RepoSpec {
    pub fn new(name: Option<&str>, dir: Option<PathBuf>) -> Result<Self, RepoError> {
        match (name.filter(|n| !n.is_empty()), dir) {
            (Some(_), Some(_)) => Err(RepoError::InvalidRepoSpec(
                "repository name and directory are mutually exclusive".to_owned(),
            )),
            (Some(n), None) => Ok(Self::Name(n.to_owned())),
            (None, Some(d)) => Ok(Self::Dir(d)),
            (None, None) => Ok(Self::Empty),
        }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Label used for `found_in` and error attribution.
    pub fn label(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Name(n) => n.clone(),
            Self::Dir(d) => format!("<{}>", d.display()),
        }
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "<all repositories>"),
            Self::Name(n) => write!(f, "{n}"),
            Self::Dir(d) => write!(f, "<{}>", d.display()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub force: bool,
    pub opt_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportResultKind {
    Ok,
    Warning,
}

/// Outcome of a successful import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub kind: ImportResultKind,
    pub tm_id: String,
    pub message: String,
    /// Set for a same-timestamp warning.
    pub conflict: Option<TmConflict>,
}

impl ImportResult {
    pub fn ok(tm_id: impl Into<String>) -> Self {
        Self {
            kind: ImportResultKind::Ok,
            tm_id: tm_id.into(),
            message: String::new(),
            conflict: None,
        }
    }

    pub fn warning(tm_id: impl Into<String>, conflict: TmConflict) -> Self {
        Self {
            kind: ImportResultKind::Warning,
            tm_id: tm_id.into(),
            message: conflict.to_string(),
            conflict: Some(conflict),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.kind == ImportResultKind::Warning
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckResultKind {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for CheckResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckResultKind::Ok => write!(f, "OK"),
            CheckResultKind::Warning => write!(f, "WARN"),
            CheckResultKind::Error => write!(f, "ERROR"),
        }
    }
}

/// Verdict on one resource from an integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckResultKind,
    pub resource: String,
    pub message: String,
}

impl CheckResult {
    pub fn ok(resource: impl Into<String>) -> Self {
        Self {
            kind: CheckResultKind::Ok,
            resource: resource.into(),
            message: String::new(),
        }
    }

    pub fn warning(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: CheckResultKind::Warning,
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn error(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: CheckResultKind::Error,
            resource: resource.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Names,
    FetchNames,
    NamesOrIds,
    Attachments,
}

impl CompletionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionKind::Names => "names",
            CompletionKind::FetchNames => "fetchNames",
            CompletionKind::NamesOrIds => "namesOrIds",
            CompletionKind::Attachments => "attachments",
        }
    }
}

impl FromStr for CompletionKind {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "names" => Ok(CompletionKind::Names),
            "fetchNames" => Ok(CompletionKind::FetchNames),
            "namesOrIds" => Ok(CompletionKind::NamesOrIds),
            "attachments" => Ok(CompletionKind::Attachments),
            other => Err(RepoError::InvalidInput(format!(
                "unknown completion kind: {other}"
            ))),
        }
    }
}

/// A Thing Model repository.
///
/// Every call takes a [`CancelToken`]; implementations check it before and
/// during I/O and return [`RepoError::Cancelled`] once it fires.
pub trait Repository: Send + Sync {
    fn spec(&self) -> RepoSpec;

    /// Store `raw`, whose `id` field already holds `id`.
    fn import(
        &self,
        ctx: &CancelToken,
        id: &TmId,
        raw: &[u8],
        opts: &ImportOptions,
    ) -> Result<ImportResult, RepoError>;

    /// Fetch a TM. Returns the id actually served, which may carry an older
    /// timestamp than the one requested when the content is the same.
    fn fetch(&self, ctx: &CancelToken, id: &str) -> Result<(String, Vec<u8>), RepoError>;

    fn delete(&self, ctx: &CancelToken, id: &str) -> Result<(), RepoError>;

    fn list(&self, ctx: &CancelToken, search: &SearchParams) -> Result<SearchResult, RepoError>;

    /// Versions of a TM name, newest first.
    fn versions(&self, ctx: &CancelToken, name: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let params = SearchParams::with_name(name, NameFilterType::FullMatch);
        let result = self.list(ctx, &params)?;
        result
            .entries
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.versions)
            .ok_or_else(|| RepoError::name_not_found(name))
    }

    fn get_tm_metadata(&self, ctx: &CancelToken, id: &str) -> Result<Vec<FoundVersion>, RepoError> {
        let tm_id = TmId::parse(id)?;
        let versions = self.versions(ctx, &tm_id.name()).map_err(|e| {
            if e.is_not_found(crate::NotFoundKind::TmName) {
                RepoError::tm_not_found(id)
            } else {
                e
            }
        })?;
        let found: Vec<FoundVersion> = versions
            .into_iter()
            .filter(|v| v.version.tm_id == id)
            .collect();
        if found.is_empty() {
            return Err(RepoError::tm_not_found(id));
        }
        Ok(found)
    }

    /// Rebuild the index fully when `ids` is empty, otherwise update it for the given ids.
    fn index(&self, ctx: &CancelToken, ids: &[String]) -> Result<(), RepoError>;

    fn check_integrity(
        &self,
        ctx: &CancelToken,
        filter: &SearchParams,
    ) -> Result<Vec<CheckResult>, RepoError>;

    fn import_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        attachment: &Attachment,
        content: &[u8],
        force: bool,
    ) -> Result<(), RepoError>;

    fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Vec<u8>, RepoError>;

    fn delete_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<(), RepoError>;

    fn list_completions(
        &self,
        ctx: &CancelToken,
        kind: CompletionKind,
        args: &[String],
        to_complete: &str,
    ) -> Result<Vec<String>, RepoError> {
        complete_from_listing(self, ctx, kind, args, to_complete)
    }
}

/// Completion suggestions computed from `list`, `versions`, and `get_tm_metadata`.
pub fn complete_from_listing<R: Repository + ?Sized>(
    repo: &R,
    ctx: &CancelToken,
    kind: CompletionKind,
    args: &[String],
    to_complete: &str,
) -> Result<Vec<String>, RepoError> {
    let mut out = match kind {
        CompletionKind::Names => names_with_prefix(repo, ctx, to_complete)?,
        CompletionKind::FetchNames => match to_complete.split_once(':') {
            Some((name, _)) => {
                version_suggestions(repo, ctx, name)?
                    .into_iter()
                    .map(|v| format!("{name}:{v}"))
                    .filter(|s| s.starts_with(to_complete))
                    .collect()
            }
            None => names_with_prefix(repo, ctx, to_complete)?,
        },
        CompletionKind::NamesOrIds => {
            let mut out = names_with_prefix(repo, ctx, to_complete)?;
            if let Some((name, _)) = to_complete.rsplit_once('/') {
                match repo.versions(ctx, name) {
                    Ok(versions) => out.extend(
                        versions
                            .into_iter()
                            .map(|v| v.version.tm_id)
                            .filter(|id| id.starts_with(to_complete)),
                    ),
                    Err(e) if e.is_not_found(crate::NotFoundKind::TmName) => {}
                    Err(e) => return Err(e),
                }
            }
            out
        }
        CompletionKind::Attachments => {
            let Some(target) = args.first() else {
                return Ok(Vec::new());
            };
            let attachments = if looks_like_tm_id(target) {
                repo.get_tm_metadata(ctx, target)?
                    .into_iter()
                    .flat_map(|v| v.version.attachments)
                    .collect::<Vec<_>>()
            } else {
                repo.list(ctx, &SearchParams::with_name(target, NameFilterType::FullMatch))?
                    .entries
                    .into_iter()
                    .flat_map(|e| e.attachments)
                    .collect()
            };
            attachments
                .into_iter()
                .map(|a| a.name)
                .filter(|n| n.starts_with(to_complete))
                .collect()
        }
    };
    out.sort();
    out.dedup();
    Ok(out)
}

fn names_with_prefix<R: Repository + ?Sized>(
    repo: &R,
    ctx: &CancelToken,
    prefix: &str,
) -> Result<Vec<String>, RepoError> {
    Ok(repo
        .list(ctx, &SearchParams::default())?
        .entries
        .into_iter()
        .map(|e| e.name)
        .filter(|n| n.starts_with(prefix))
        .collect())
}

fn version_suggestions<R: Repository + ?Sized>(
    repo: &R,
    ctx: &CancelToken,
    name: &str,
) -> Result<Vec<String>, RepoError> {
    match repo.versions(ctx, name) {
        Ok(versions) => Ok(versions
            .into_iter()
            .filter_map(|v| TmId::parse(&v.version.tm_id).ok())
            .map(|id| id.version.base.to_string())
            .collect()),
        Err(e) if e.is_not_found(crate::NotFoundKind::TmName) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_spec_construction() {
        assert_eq!(RepoSpec::new(None, None).unwrap(), RepoSpec::Empty);
        assert_eq!(
            RepoSpec::new(Some("r1"), None).unwrap(),
            RepoSpec::Name("r1".to_owned())
        );
        assert!(matches!(
            RepoSpec::new(Some("r1"), Some(PathBuf::from("/tmp"))),
            Err(RepoError::InvalidRepoSpec(_))
        ));
        assert_eq!(RepoSpec::Dir(PathBuf::from("/x")).to_string(), "</x>");
    }

    #[test]
    fn completion_kind_parsing() {
        assert_eq!(
            "fetchNames".parse::<CompletionKind>().unwrap(),
            CompletionKind::FetchNames
        );
        for k in [
            CompletionKind::Names,
            CompletionKind::FetchNames,
            CompletionKind::NamesOrIds,
            CompletionKind::Attachments,
        ] {
            assert_eq!(k.as_str().parse::<CompletionKind>().unwrap(), k);
        }
        assert!("bogus".parse::<CompletionKind>().is_err());
    }

    #[test]
    fn import_result_warning_carries_conflict() {
        let r = ImportResult::warning("x", TmConflict::same_timestamp("y"));
        assert!(r.is_warning());
        assert_eq!(r.conflict.unwrap().code(), "2:y");
    }
}
