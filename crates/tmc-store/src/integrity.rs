use crate::layout::{classify, PathKind};
use crate::storage::Storage;
use crate::tmignore::TmIgnore;
use std::collections::HashSet;
use tmc_model::{
    compute_digest, AttachmentContainerRef, CancelToken, CheckResult, Index, RepoError,
    SearchParams, ThingModel, TmId,
};

fn check_tm<S: Storage + ?Sized>(storage: &S, idx: &Index, path: &str) -> CheckResult {
    let id = match TmId::parse(path) {
        Ok(id) => id,
        Err(e) => return CheckResult::error(path, format!("file name is not a valid TM id: {e}")),
    };
    let data = match storage.read(path) {
        Ok(Some(d)) => d,
        Ok(None) => return CheckResult::error(path, "file vanished during check"),
        Err(e) => return CheckResult::error(path, format!("read error: {e}")),
    };
    match compute_digest(&data) {
        Ok((hash, _)) if hash != id.version.hash => {
            return CheckResult::error(
                path,
                format!("content digest {hash} does not match id hash {}", id.version.hash),
            )
        }
        Ok(_) => {}
        Err(e) => return CheckResult::error(path, format!("invalid TM content: {e}")),
    }
    match ThingModel::from_bytes(&data) {
        Ok(tm) if tm.id.as_deref() != Some(path) => {
            return CheckResult::error(
                path,
                format!("id field {:?} does not match file path", tm.id.unwrap_or_default()),
            )
        }
        Ok(_) => {}
        Err(e) => return CheckResult::error(path, format!("invalid TM content: {e}")),
    }
    if idx.find_by_tm_id(path).is_none() {
        return CheckResult::error(path, "TM is not in the index");
    }
    CheckResult::ok(path)
}

fn check_attachment(idx: &Index, path: &str, container: &str, file: &str) -> CheckResult {
    let container = AttachmentContainerRef::parse(container);
    match idx.find_attachment_container(&container) {
        None => CheckResult::error(path, format!("attachment of unknown {container}")),
        Some(list) if !list.iter().any(|a| a.name == file) => {
            CheckResult::error(path, "attachment is not in the index")
        }
        Some(_) => CheckResult::ok(path),
    }
}

fn container_name(container: &str) -> String {
    match AttachmentContainerRef::parse(container) {
        AttachmentContainerRef::TmId(id) => TmId::parse(&id).map_or(id, |i| i.name()),
        AttachmentContainerRef::TmName(name) => name,
    }
}

/// Compare every stored file with the index.
///
/// Files under `.tmc/` and paths matched by `.tmignore` are skipped; other
/// non-catalog files produce warnings; index versions without a file are errors.
pub fn check<S: Storage + ?Sized>(
    ctx: &CancelToken,
    storage: &S,
    idx: &Index,
    ignore: &TmIgnore,
    filter: &SearchParams,
) -> Result<Vec<CheckResult>, RepoError> {
    let mut results = Vec::new();
    let mut seen = HashSet::new();
    let filtered = !filter.name.is_empty();

    for path in storage.walk()? {
        ctx.check()?;
        if ignore.is_ignored(&path) {
            continue;
        }
        match classify(&path) {
            PathKind::Config => {}
            PathKind::Tm => {
                let name = crate::layout::parent(&path);
                if filtered && !filter.matches_name(name) {
                    continue;
                }
                results.push(check_tm(storage, idx, &path));
                seen.insert(path);
            }
            PathKind::Attachment { container, file } => {
                if filtered && !filter.matches_name(&container_name(&container)) {
                    continue;
                }
                results.push(check_attachment(idx, &path, &container, &file));
            }
            PathKind::Unknown => {
                if filtered && !filter.matches_name(crate::layout::parent(&path)) {
                    continue;
                }
                results.push(CheckResult::warning(&path, "unknown file"));
            }
        }
    }

    for entry in &idx.data {
        if filtered && !filter.matches_name(&entry.name) {
            continue;
        }
        for v in &entry.versions {
            if !seen.contains(&v.tm_id) {
                results.push(CheckResult::error(&v.tm_id, "indexed TM has no file"));
            }
        }
    }
    Ok(results)
}
