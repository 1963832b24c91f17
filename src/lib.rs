//! chatlog-rs: a git-backed replicated message log.
//!
//! Messages are JSON files committed to a git repository; publishing pushes
//! each commit to a hosted remote, recovering from concurrent writers by
//! rebasing, then merging, then (once) force-pushing. Reading aggregates
//! every registered repository into a single timeline.

#![forbid(unsafe_code)]

pub mod cli;
pub mod codec;
pub mod config;
pub mod core;
mod error;
pub mod git;
pub mod index;
pub mod paths;
pub mod pull;
pub mod registry;
pub mod remote;
pub mod telemetry;

pub use error::{Effect, Error, Transience};

pub type Result<T> = std::result::Result<T, Error>;

pub use crate::core::{AggregatedRecord, MessageRecord, RepoName, Timestamp};
