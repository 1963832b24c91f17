//! Git integration: the commit store and its engine seam.

pub mod engine;
pub mod error;
pub mod store;

pub use engine::{Git2Engine, GitEngine, IntegrationOutcome, PushOutcome, RemoteState};
pub use error::PublishError;
pub use store::{CommitStore, DEFAULT_BRANCH, DEFAULT_REMOTE, MESSAGES_DIR};
