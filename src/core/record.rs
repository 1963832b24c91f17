//! Message records - the unit of replication.
//!
//! A record is created pending (no commit hash) and transitions to durable
//! exactly once, when its publish commit lands on the remote. Only the
//! replicated log is authoritative for the hash; the local index merely
//! caches it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::time::Timestamp;
use crate::error::{Effect, Transience};

/// Rejected input, caught before any local mutation.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("message content must not be empty")]
    EmptyContent,

    #[error("message id must not be empty")]
    EmptyId,

    #[error("record {id} already has a commit hash")]
    AlreadyDurable { id: String },

    #[error("timestamp `{raw}` is not a recognized ISO-8601 instant")]
    BadTimestamp { raw: String },

    #[error("repository name `{raw}` is invalid: {reason}")]
    BadRepo { raw: String, reason: String },
}

impl From<super::repo::InvalidRepoName> for ValidationError {
    fn from(e: super::repo::InvalidRepoName) -> Self {
        ValidationError::BadRepo {
            raw: e.raw,
            reason: e.reason,
        }
    }
}

impl ValidationError {
    pub fn transience(&self) -> Transience {
        // Retrying with the same inputs never helps.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// A single message as stored in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub content: String,
    pub timestamp: Timestamp,
    /// Commit that durably published this record. `None` = pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

impl MessageRecord {
    /// Create a pending record stamped now.
    pub fn new(content: impl Into<String>, id: impl Into<String>) -> Result<Self, ValidationError> {
        Self::at(content, id, Timestamp::now())
    }

    /// Create a pending record with an explicit timestamp.
    pub fn at(
        content: impl Into<String>,
        id: impl Into<String>,
        timestamp: Timestamp,
    ) -> Result<Self, ValidationError> {
        let content = content.into();
        let id = id.into();
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        Ok(Self {
            id,
            content,
            timestamp,
            commit_hash: None,
        })
    }

    pub fn is_durable(&self) -> bool {
        self.commit_hash.is_some()
    }

    /// Record the publish commit. A hash is assigned exactly once; a second
    /// assignment is a caller bug and is rejected.
    pub fn mark_durable(&mut self, hash: impl Into<String>) -> Result<(), ValidationError> {
        if self.commit_hash.is_some() {
            return Err(ValidationError::AlreadyDurable {
                id: self.id.clone(),
            });
        }
        self.commit_hash = Some(hash.into());
        Ok(())
    }
}

/// A record annotated with its originating repository.
///
/// Produced only by the aggregator, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedRecord {
    pub content: String,
    pub timestamp: Timestamp,
    pub source_repo: String,
}
