//! Publish error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ValidationError;
use crate::error::{Effect, Transience};

/// Errors from the commit store's append/publish path.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{path} is not a usable git working copy: {source}")]
    LocalState {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to write record file {path}: {source}")]
    WriteRecord {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to create local commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("failed to fetch from remote: {0}")]
    Fetch(#[source] git2::Error),

    #[error("failed to rebase onto remote tip: {0}")]
    Rebase(#[source] git2::Error),

    #[error("failed to merge remote tip: {0}")]
    Merge(#[source] git2::Error),

    #[error("failed to push: {0}")]
    Push(#[source] git2::Error),

    #[error("remote rejected the push after recovery and forced overwrite: {message}")]
    Conflict { message: String },

    #[error("failed to resolve branch tip: {0}")]
    Head(#[source] git2::Error),
}

impl PublishError {
    /// Whether retrying the whole publish may succeed.
    pub fn transience(&self) -> Transience {
        match self {
            PublishError::Fetch(_)
            | PublishError::Push(_)
            | PublishError::Conflict { .. } => Transience::Retryable,

            PublishError::Validation(_)
            | PublishError::LocalState { .. }
            | PublishError::WriteRecord { .. }
            | PublishError::Stage { .. }
            | PublishError::Commit(_)
            | PublishError::Rebase(_)
            | PublishError::Merge(_)
            | PublishError::Head(_) => Transience::Permanent,
        }
    }

    /// What we know about side effects when this error is returned.
    pub fn effect(&self) -> Effect {
        match self {
            // Rejected before any local mutation.
            PublishError::Validation(_) | PublishError::LocalState { .. } => Effect::None,

            // Record file may exist but nothing is committed.
            PublishError::WriteRecord { .. } | PublishError::Stage { .. } => Effect::Unknown,

            PublishError::Commit(_) => Effect::Unknown,

            // Post-commit failures: the record is locally durable.
            PublishError::Fetch(_)
            | PublishError::Rebase(_)
            | PublishError::Merge(_)
            | PublishError::Push(_)
            | PublishError::Conflict { .. }
            | PublishError::Head(_) => Effect::Some,
        }
    }
}
