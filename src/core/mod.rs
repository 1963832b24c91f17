//! Domain types: records, timestamps, repository identifiers.

pub mod record;
pub mod repo;
pub mod time;

pub use record::{AggregatedRecord, MessageRecord, ValidationError};
pub use repo::{InvalidRepoName, RepoName, RepoRole, RepositoryRef};
pub use time::Timestamp;
