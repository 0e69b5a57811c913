use crate::config::{RepoConfig, RepoKind};
use std::path::PathBuf;
use std::sync::Arc;
use tmc_model::{
    Attachment, AttachmentContainerRef, CancelToken, CheckResult, CompletionKind, FoundVersion,
    ImportOptions, ImportResult, RepoError, RepoSpec, Repository, SearchParams, SearchResult, TmId,
};
use tmc_remote::{HttpCache, HttpRepo, PeerRepo};
use tmc_store::{FileRepo, IndexedRepo, ObjectRepo, ObjectStorage};

/// A configured repository of any backend type.
#[derive(Debug)]
pub enum Repo {
    File(FileRepo),
    Object(ObjectRepo),
    Http(HttpRepo),
    Peer(PeerRepo),
}

impl Repo {
    /// Open the repository configured under `name`.
    pub fn open(name: &str, config: &RepoConfig, cache: &Arc<HttpCache>) -> Result<Self, RepoError> {
        let spec = RepoSpec::from_name(name);
        let repo = match config.kind()? {
            RepoKind::File => Repo::File(FileRepo::open(expand_home(config.require_loc()?), spec)),
            RepoKind::S3 => {
                let storage = ObjectStorage::s3(&config.s3_config()?)?;
                Repo::Object(IndexedRepo::new(storage, spec))
            }
            RepoKind::Http => {
                Repo::Http(HttpRepo::new(spec, config.remote_config()?, Arc::clone(cache))?)
            }
            RepoKind::Tmc => Repo::Peer(PeerRepo::new(spec, &config.remote_config()?)?),
        };
        Ok(repo)
    }

    /// An unnamed file repository in `dir`.
    pub fn dir(dir: impl Into<PathBuf>) -> Self {
        Repo::File(FileRepo::for_dir(dir))
    }

    fn inner(&self) -> &dyn Repository {
        match self {
            Repo::File(r) => r,
            Repo::Object(r) => r,
            Repo::Http(r) => r,
            Repo::Peer(r) => r,
        }
    }
}

/// `~/x` relative to `$HOME`.
fn expand_home(loc: &str) -> PathBuf {
    match (loc.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(loc),
    }
}

impl Repository for Repo {
    fn spec(&self) -> RepoSpec {
        self.inner().spec()
    }

    fn import(
        &self,
        ctx: &CancelToken,
        id: &TmId,
        raw: &[u8],
        opts: &ImportOptions,
    ) -> Result<ImportResult, RepoError> {
        self.inner().import(ctx, id, raw, opts)
    }

    fn fetch(&self, ctx: &CancelToken, id: &str) -> Result<(String, Vec<u8>), RepoError> {
        self.inner().fetch(ctx, id)
    }

    fn delete(&self, ctx: &CancelToken, id: &str) -> Result<(), RepoError> {
        self.inner().delete(ctx, id)
    }

    fn list(&self, ctx: &CancelToken, search: &SearchParams) -> Result<SearchResult, RepoError> {
        self.inner().list(ctx, search)
    }

    fn versions(&self, ctx: &CancelToken, name: &str) -> Result<Vec<FoundVersion>, RepoError> {
        self.inner().versions(ctx, name)
    }

    fn get_tm_metadata(&self, ctx: &CancelToken, id: &str) -> Result<Vec<FoundVersion>, RepoError> {
        self.inner().get_tm_metadata(ctx, id)
    }

    fn index(&self, ctx: &CancelToken, ids: &[String]) -> Result<(), RepoError> {
        self.inner().index(ctx, ids)
    }

    fn check_integrity(
        &self,
        ctx: &CancelToken,
        filter: &SearchParams,
    ) -> Result<Vec<CheckResult>, RepoError> {
        self.inner().check_integrity(ctx, filter)
    }

    fn import_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        attachment: &Attachment,
        content: &[u8],
        force: bool,
    ) -> Result<(), RepoError> {
        self.inner()
            .import_attachment(ctx, container, attachment, content, force)
    }

    fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Vec<u8>, RepoError> {
        self.inner().fetch_attachment(ctx, container, name)
    }

    fn delete_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<(), RepoError> {
        self.inner().delete_attachment(ctx, container, name)
    }

    fn list_completions(
        &self,
        ctx: &CancelToken,
        kind: CompletionKind,
        args: &[String],
        to_complete: &str,
    ) -> Result<Vec<String>, RepoError> {
        self.inner().list_completions(ctx, kind, args, to_complete)
    }
}
