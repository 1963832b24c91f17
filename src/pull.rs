//! Multi-source aggregator.
//!
//! Materializes each remote log into its own disposable scratch clone,
//! decodes whatever record files it holds, and merges everything into one
//! time-ordered view. A source that cannot be cloned, or that exceeds its
//! timeout, contributes nothing; the collection never fails as a whole.

use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, bounded};
use tracing::{debug, warn};

use crate::codec::{self, PLAIN_EXT, STRUCTURED_EXT};
use crate::core::{AggregatedRecord, RepoName, Timestamp};
use crate::git::MESSAGES_DIR;

pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one collection pass. Skip counts make partial success
/// observable to the caller.
#[derive(Debug, Default)]
pub struct CollectReport {
    /// Records ordered by timestamp descending; ties keep
    /// source-then-encounter order.
    pub records: Vec<AggregatedRecord>,
    pub skipped_sources: usize,
    pub skipped_files: usize,
}

/// Pulls records from many repositories into one ordered sequence.
pub struct Aggregator {
    git_base: String,
    token: Option<String>,
    clone_timeout: Duration,
}

struct SourceHarvest {
    records: Vec<AggregatedRecord>,
    skipped_files: usize,
}

impl Aggregator {
    pub fn new(git_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            git_base: git_base.into(),
            token,
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
        }
    }

    pub fn clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    /// Clone, decode and merge. Sources run in parallel, each in its own
    /// scratch area that is removed on every exit path; results are gathered
    /// in input order so tie-breaking stays deterministic.
    pub fn collect(&self, repos: &[RepoName]) -> CollectReport {
        let now = Timestamp::now();
        let mut report = CollectReport::default();

        let workers: Vec<_> = repos
            .iter()
            .map(|repo| {
                let (tx, rx) = bounded(1);
                let url = repo.clone_url(&self.git_base, self.token.as_deref());
                let source = repo.to_string();
                let handle = std::thread::spawn(move || harvest_source(&url, &source, now, &tx));
                (repo.clone(), rx, handle)
            })
            .collect();

        for (repo, rx, handle) in workers {
            let deadline = Instant::now() + self.clone_timeout;
            match rx.recv_deadline(deadline) {
                Ok(Ok(harvest)) => {
                    debug!(repo = %repo, records = harvest.records.len(), "source collected");
                    report.records.extend(harvest.records);
                    report.skipped_files += harvest.skipped_files;
                }
                Ok(Err(reason)) => {
                    warn!(repo = %repo, %reason, "source unavailable; skipping");
                    report.skipped_sources += 1;
                }
                Err(_) => {
                    warn!(repo = %repo, timeout = ?self.clone_timeout, "source timed out; skipping");
                    report.skipped_sources += 1;
                    // The worker cleans its own scratch area when it finishes.
                    drop(handle);
                    continue;
                }
            }
            let _ = handle.join();
        }

        order_merged(&mut report.records);
        report
    }
}

/// Clone one source into a scratch area and harvest its records.
///
/// Runs on a worker thread; the scratch `TempDir` is dropped here on every
/// exit path, including after the collector has given up waiting.
fn harvest_source(
    url: &str,
    source: &str,
    now: Timestamp,
    tx: &Sender<Result<SourceHarvest, String>>,
) {
    let outcome = (|| {
        let scratch = tempfile::tempdir().map_err(|e| format!("scratch area: {e}"))?;
        clone_into(url, scratch.path()).map_err(|e| format!("clone failed: {e}"))?;
        Ok(read_source(scratch.path(), source, now))
    })();
    let _ = tx.send(outcome);
}

fn clone_into(url: &str, dest: &Path) -> Result<(), git2::Error> {
    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.credentials(|_url, _username, _allowed| git2::Cred::default());
    let mut fetch = git2::FetchOptions::new();
    fetch.remote_callbacks(callbacks);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch);
    builder.clone(url, dest)?;
    Ok(())
}

/// Decode every recognized record file under `messages/`.
///
/// Files are visited in filename order so encounter order is deterministic;
/// a file that fails to decode is counted and skipped, never fatal.
fn read_source(dir: &Path, source: &str, now: Timestamp) -> SourceHarvest {
    let mut harvest = SourceHarvest {
        records: Vec::new(),
        skipped_files: 0,
    };

    let messages = dir.join(MESSAGES_DIR);
    let Ok(entries) = std::fs::read_dir(&messages) else {
        // A log with no messages directory contributes zero records.
        return harvest;
    };

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some(STRUCTURED_EXT) | Some(PLAIN_EXT)
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unreadable record file; skipping");
                harvest.skipped_files += 1;
                continue;
            }
        };

        let decoded = if path.extension().and_then(|e| e.to_str()) == Some(PLAIN_EXT) {
            let mtime = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(Timestamp::from)
                .unwrap_or(now);
            codec::decode_plain(&raw, mtime)
        } else {
            codec::decode_structured(&raw, now).map(Some)
        };

        match decoded {
            Ok(Some(rec)) => harvest.records.push(AggregatedRecord {
                content: rec.content,
                timestamp: rec.timestamp,
                source_repo: source.to_string(),
            }),
            Ok(None) => {}
            Err(e) => {
                warn!(file = %path.display(), error = %e, "undecodable record file; skipping");
                harvest.skipped_files += 1;
            }
        }
    }

    harvest
}

/// Timestamp descending; the stable sort keeps source-then-encounter order
/// for sub-second collisions across sources.
fn order_merged(records: &mut [AggregatedRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}
