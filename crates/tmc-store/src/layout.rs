//! Repository-relative paths of the catalog's bookkeeping files.
//!
//! All paths are `/`-separated strings relative to the repository root so the
//! same layout serves the local directory and the object store.

use tmc_model::{RepoError, ATTACHMENTS_DIR, TM_FILE_EXTENSION};

pub const TMC_DIR: &str = ".tmc";
pub const INDEX_FILE: &str = ".tmc/tm-catalog.toc.json";
pub const NAMES_FILE: &str = ".tmc/tmnames.txt";
pub const IGNORE_FILE: &str = ".tmc/.tmignore";
pub const LOCK_FILE: &str = ".tmc/tm-catalog.toc.json.lock";

pub const DEFAULT_IGNORE: &str = ".git/\n.github/\n.DS_Store\n";

/// What a repository file is, judged from its path alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    Config,
    Tm,
    /// A file in an attachment directory; `container` is a TM name or TM id.
    Attachment { container: String, file: String },
    Unknown,
}

pub fn classify(path: &str) -> PathKind {
    if path == TMC_DIR || path.starts_with(".tmc/") {
        return PathKind::Config;
    }
    let marker = format!("/{ATTACHMENTS_DIR}/");
    if let Some(pos) = path.find(&marker) {
        let name = &path[..pos];
        let rest = &path[pos + marker.len()..];
        return match rest.split_once('/') {
            None if !rest.is_empty() => PathKind::Attachment {
                container: name.to_owned(),
                file: rest.to_owned(),
            },
            Some((ver, file)) if !file.contains('/') && !file.is_empty() => PathKind::Attachment {
                container: format!("{name}/{ver}{TM_FILE_EXTENSION}"),
                file: file.to_owned(),
            },
            _ => PathKind::Unknown,
        };
    }
    if path.ends_with(TM_FILE_EXTENSION) {
        PathKind::Tm
    } else {
        PathKind::Unknown
    }
}

/// Parent of a `/`-separated path, `""` for top-level entries.
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(p, _)| p)
}

/// Reject paths that would escape the repository root.
pub fn check_relative(path: &str) -> Result<(), RepoError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(RepoError::InvalidInput(format!("invalid repository path: {path}")));
    }
    Ok(())
}
