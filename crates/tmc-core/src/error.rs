use crate::union::ChildError;
use thiserror::Error;
use tmc_model::RepoError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    /// A federated call failed as a whole; `children` holds the per-repository causes.
    #[error("{source}")]
    Federated {
        source: RepoError,
        children: Vec<ChildError>,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// The domain error behind this failure, if any.
    pub fn repo_error(&self) -> Option<&RepoError> {
        match self {
            CoreError::Repo(e) | CoreError::Federated { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn children(&self) -> &[ChildError] {
        match self {
            CoreError::Federated { children, .. } => children,
            _ => &[],
        }
    }

    pub fn code(&self) -> Option<String> {
        self.repo_error().and_then(RepoError::code)
    }
}
