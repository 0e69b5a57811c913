//! Concurrent fan-out over several repositories.
//!
//! Every call runs one worker thread per child. Workers send
//! `(child index, result)` over a single channel and share a child of the
//! caller's [`CancelToken`]. Gathering calls wait for every worker.
//! First-hit calls (`fetch`, `fetch_attachment`) run detached workers and
//! return on the first success; the token is then cancelled and late
//! results are dropped with the channel.

use crate::CoreError;
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use tmc_model::{
    AttachmentContainerRef, CancelToken, CompletionKind, FoundVersion, NotFoundKind, RepoError,
    Repository, SearchParams, SearchResult,
};
use tracing::{debug, warn};

/// An error reported by one child of a union, tagged with the child's label.
#[derive(Debug)]
pub struct ChildError {
    pub repo: String,
    pub error: RepoError,
}

impl fmt::Display for ChildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.repo, self.error)
    }
}

/// Data gathered from a union together with the errors of children that failed.
#[derive(Debug)]
pub struct Partial<T> {
    pub data: T,
    pub errors: Vec<ChildError>,
}

impl<T> Partial<T> {
    pub fn complete(data: T) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Partial<U> {
        Partial {
            data: f(self.data),
            errors: self.errors,
        }
    }
}

pub struct Union {
    repos: Vec<Arc<dyn Repository>>,
}

impl Union {
    pub fn new(repos: Vec<Arc<dyn Repository>>) -> Self {
        Self { repos }
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    pub fn repos(&self) -> &[Arc<dyn Repository>] {
        &self.repos
    }

    /// Run `op` on every child concurrently and hand each result to
    /// `on_result` as it arrives. Returns once every worker has finished.
    fn fan_out<T, F>(
        &self,
        ctx: &CancelToken,
        op: F,
        mut on_result: impl FnMut(usize, Result<T, RepoError>),
    ) where
        T: Send,
        F: Fn(&dyn Repository, &CancelToken) -> Result<T, RepoError> + Sync,
    {
        let token = ctx.child();
        let (tx, rx) = mpsc::channel();
        std::thread::scope(|scope| {
            for (i, repo) in self.repos.iter().enumerate() {
                let tx = tx.clone();
                let token = &token;
                let op = &op;
                scope.spawn(move || {
                    let result = op(repo.as_ref(), token);
                    let _ = tx.send((i, result));
                });
            }
            drop(tx);
            for (i, result) in rx {
                on_result(i, result);
            }
        });
    }

    fn label(&self, i: usize) -> String {
        self.repos[i].spec().label()
    }

    fn child_error(&self, i: usize, error: RepoError) -> ChildError {
        let repo = self.label(i);
        warn!("repository {repo} failed: {error}");
        ChildError { repo, error }
    }

    /// Collect one result per child; fails only if every child failed.
    fn gather<T, F>(&self, ctx: &CancelToken, op: F) -> Result<Partial<Vec<T>>, CoreError>
    where
        T: Send,
        F: Fn(&dyn Repository, &CancelToken) -> Result<T, RepoError> + Sync,
    {
        let mut slots: Vec<Option<T>> = (0..self.repos.len()).map(|_| None).collect();
        let mut errors: Vec<(usize, RepoError)> = Vec::new();
        self.fan_out(ctx, op, |i, result| match result {
            Ok(v) => slots[i] = Some(v),
            Err(e) => errors.push((i, e)),
        });
        ctx.check()?;
        errors.sort_by_key(|(i, _)| *i);
        let data: Vec<T> = slots.into_iter().flatten().collect();
        let errors: Vec<ChildError> = errors
            .into_iter()
            .map(|(i, e)| self.child_error(i, e))
            .collect();
        if data.is_empty() && !errors.is_empty() {
            return Err(federated(errors));
        }
        Ok(Partial { data, errors })
    }

    /// First successful result wins and is returned without waiting for the
    /// other children. `missing` identifies the not-found kind that children
    /// may report without it counting as an error.
    fn first<T, F>(
        &self,
        ctx: &CancelToken,
        missing: NotFoundKind,
        not_found: impl FnOnce() -> RepoError,
        op: F,
    ) -> Result<Partial<T>, CoreError>
    where
        T: Send + 'static,
        F: Fn(&dyn Repository, &CancelToken) -> Result<T, RepoError> + Send + Sync + 'static,
    {
        let token = ctx.child();
        let op = Arc::new(op);
        let (tx, rx) = mpsc::channel();
        for (i, repo) in self.repos.iter().enumerate() {
            let tx = tx.clone();
            let token = token.clone();
            let op = Arc::clone(&op);
            let repo = Arc::clone(repo);
            std::thread::spawn(move || {
                let result = op(repo.as_ref(), &token);
                let _ = tx.send((i, result));
            });
        }
        drop(tx);

        let mut winner: Option<(usize, T)> = None;
        let mut errors: Vec<(usize, RepoError)> = Vec::new();
        for (i, result) in rx.iter() {
            match result {
                Ok(v) => {
                    winner = Some((i, v));
                    break;
                }
                Err(e) => errors.push((i, e)),
            }
        }
        token.cancel();
        errors.sort_by_key(|(i, _)| *i);
        let won = winner.is_some();
        let errors: Vec<ChildError> = errors
            .into_iter()
            .filter(|(_, e)| !e.is_not_found(missing))
            .filter(|(_, e)| !(won && matches!(e, RepoError::Cancelled)))
            .map(|(i, e)| self.child_error(i, e))
            .collect();
        match winner {
            Some((i, data)) => {
                debug!("served by {}", self.label(i));
                Ok(Partial { data, errors })
            }
            None => {
                ctx.check()?;
                Err(CoreError::Federated {
                    source: not_found(),
                    children: errors,
                })
            }
        }
    }

    pub fn fetch(&self, ctx: &CancelToken, id: &str) -> Result<Partial<(String, Vec<u8>)>, CoreError> {
        let owned = id.to_owned();
        self.first(
            ctx,
            NotFoundKind::Tm,
            || RepoError::tm_not_found(id),
            move |repo, token| repo.fetch(token, &owned),
        )
    }

    pub fn fetch_attachment(
        &self,
        ctx: &CancelToken,
        container: &AttachmentContainerRef,
        name: &str,
    ) -> Result<Partial<Vec<u8>>, CoreError> {
        let (container, owned) = (container.clone(), name.to_owned());
        self.first(
            ctx,
            NotFoundKind::Attachment,
            || RepoError::attachment_not_found(name),
            move |repo, token| repo.fetch_attachment(token, &container, &owned),
        )
    }

    pub fn list(&self, ctx: &CancelToken, search: &SearchParams) -> Result<Partial<SearchResult>, CoreError> {
        let gathered = self.gather(ctx, |repo, token| repo.list(token, search))?;
        Ok(gathered.map(|results| {
            results
                .into_iter()
                .fold(SearchResult::default(), SearchResult::merge)
        }))
    }

    /// Versions of `name` from every child, merged newest first.
    pub fn versions(&self, ctx: &CancelToken, name: &str) -> Result<Partial<Vec<FoundVersion>>, CoreError> {
        self.merged_versions(ctx, NotFoundKind::TmName, || RepoError::name_not_found(name), |repo, token| {
            repo.versions(token, name)
        })
    }

    pub fn get_tm_metadata(&self, ctx: &CancelToken, id: &str) -> Result<Partial<Vec<FoundVersion>>, CoreError> {
        self.merged_versions(ctx, NotFoundKind::Tm, || RepoError::tm_not_found(id), |repo, token| {
            repo.get_tm_metadata(token, id)
        })
    }

    /// Children reporting `missing` contribute nothing; the call fails with
    /// `not_found` only when every child reported it.
    fn merged_versions<F>(
        &self,
        ctx: &CancelToken,
        missing: NotFoundKind,
        not_found: impl FnOnce() -> RepoError,
        op: F,
    ) -> Result<Partial<Vec<FoundVersion>>, CoreError>
    where
        F: Fn(&dyn Repository, &CancelToken) -> Result<Vec<FoundVersion>, RepoError> + Sync,
    {
        let gathered = self.gather(ctx, |repo, token| match op(repo, token) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found(missing) => Ok(None),
            Err(e) => Err(e),
        })?;
        if gathered.data.iter().all(Option::is_none) {
            return Err(CoreError::Federated {
                source: not_found(),
                children: gathered.errors,
            });
        }
        Ok(gathered.map(|lists| {
            let mut out: Vec<FoundVersion> = Vec::new();
            for v in lists.into_iter().flatten().flatten() {
                match out.iter_mut().find(|o| o.version.same_tm(&v.version)) {
                    Some(existing) => {
                        let newer = v.version.timestamp > existing.version.timestamp;
                        let tie = v.version.timestamp == existing.version.timestamp
                            && v.found_in < existing.found_in;
                        if newer || tie {
                            *existing = v;
                        }
                    }
                    None => out.push(v),
                }
            }
            out.sort_by(|a, b| {
                a.version
                    .cmp_newest_first(&b.version)
                    .then_with(|| a.found_in.cmp(&b.found_in))
            });
            out
        }))
    }

    pub fn list_completions(
        &self,
        ctx: &CancelToken,
        kind: CompletionKind,
        args: &[String],
        to_complete: &str,
    ) -> Result<Partial<Vec<String>>, CoreError> {
        let gathered = self.gather(ctx, |repo, token| {
            repo.list_completions(token, kind, args, to_complete)
        })?;
        Ok(gathered.map(|lists| {
            let mut all: Vec<String> = lists.into_iter().flatten().collect();
            all.sort();
            all.dedup();
            all
        }))
    }
}

fn federated(mut errors: Vec<ChildError>) -> CoreError {
    if errors.iter().any(|c| matches!(c.error, RepoError::Cancelled)) {
        return CoreError::Repo(RepoError::Cancelled);
    }
    if errors.len() == 1 {
        if let Some(only) = errors.pop() {
            return CoreError::Repo(only.error);
        }
    }
    CoreError::Federated {
        source: RepoError::RepoAccessFailed(format!("all {} repositories failed", errors.len())),
        children: errors,
    }
}
