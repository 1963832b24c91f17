//! Commit store: durable publication of one record into the shared log.
//!
//! The working copy is a singleton resource: one store instance per path,
//! one publish in flight at a time. Cross-process contention on the shared
//! remote is handled by the recovery protocol in [`CommitStore::publish`],
//! not by in-process locking.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::engine::{Git2Engine, GitEngine, IntegrationOutcome, PushOutcome, RemoteState};
use super::error::PublishError;
use crate::codec;
use crate::core::MessageRecord;

/// Directory holding record files inside the working copy.
pub const MESSAGES_DIR: &str = "messages";

/// Default branch and remote for the log.
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_REMOTE: &str = "origin";

/// One local working copy of the replicated log.
pub struct CommitStore<E = Git2Engine> {
    workdir: PathBuf,
    engine: E,
}

impl CommitStore<Git2Engine> {
    /// Open the working copy at `path` on the default branch/remote.
    ///
    /// The bearer token, if any, is used to authenticate pushes; it is held
    /// in memory only.
    pub fn open(path: &Path, token: Option<String>) -> Result<Self, PublishError> {
        Self::open_with(path, DEFAULT_BRANCH, DEFAULT_REMOTE, token)
    }

    pub fn open_with(
        path: &Path,
        branch: &str,
        remote: &str,
        token: Option<String>,
    ) -> Result<Self, PublishError> {
        let engine = Git2Engine::open(path, branch, remote, token)?;
        let workdir = engine.workdir().unwrap_or_else(|| path.to_owned());
        Ok(Self { workdir, engine })
    }
}

impl<E: GitEngine> CommitStore<E> {
    /// Build a store over a custom engine. Test seam.
    pub fn with_engine(workdir: impl Into<PathBuf>, engine: E) -> Self {
        Self {
            workdir: workdir.into(),
            engine,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Write the record file. No network I/O; publication happens in
    /// [`publish`](Self::publish).
    ///
    /// Filenames are `{compact-utc}_{id}.json`: the id suffix keeps two
    /// records written within the same second apart.
    pub fn append(&self, content: &str, id: &str) -> Result<PathBuf, PublishError> {
        let record = MessageRecord::new(content, id)?;
        self.append_record(&record)
    }

    pub fn append_record(&self, record: &MessageRecord) -> Result<PathBuf, PublishError> {
        let dir = self.workdir.join(MESSAGES_DIR);
        fs::create_dir_all(&dir).map_err(|source| PublishError::WriteRecord {
            path: dir.clone(),
            source,
        })?;

        let filename = format!(
            "{}_{}.{}",
            record.timestamp.compact(),
            record.id,
            codec::STRUCTURED_EXT
        );
        let path = dir.join(filename);
        fs::write(&path, codec::encode(record)).map_err(|source| PublishError::WriteRecord {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Commit and durably publish one appended record file.
    ///
    /// Recovery protocol for concurrent writers:
    /// 1. commit locally first, so the record survives any network failure;
    /// 2. fetch, and rebase the local branch onto the remote tip;
    /// 3. on rebase conflict, abort and fall back to a merge commit;
    /// 4. push; if rejected, exactly one forced overwrite of the remote
    ///    branch, logged as a degraded path (it can discard concurrent peer
    ///    commits);
    /// 5. the local branch tip after a successful push is the record's
    ///    commit hash.
    pub fn publish(&self, path: &Path, id: &str) -> Result<String, PublishError> {
        let rel = path.strip_prefix(&self.workdir).unwrap_or(path);

        self.engine.stage(rel)?;
        let local_commit = self.engine.commit(&format!("Add message {id}"))?;
        debug!(id, commit = %local_commit, "record committed locally");

        match self.engine.fetch_remote()? {
            RemoteState::Absent => {
                debug!(id, "no remote configured; local commit is the durability point");
            }
            remote => {
                if let RemoteState::Tip(remote_tip) = &remote
                    && self.engine.needs_integration(remote_tip)?
                {
                    match self.engine.rebase_onto_remote()? {
                        IntegrationOutcome::Clean => {
                            debug!(id, %remote_tip, "rebased onto remote tip");
                        }
                        IntegrationOutcome::Conflicted => {
                            warn!(id, %remote_tip, "rebase conflicted; falling back to merge");
                            if self.engine.merge_remote()? == IntegrationOutcome::Conflicted {
                                warn!(id, "merge also conflicted; relying on push recovery");
                            }
                        }
                    }
                }

                if let PushOutcome::Rejected(message) = self.engine.push(false)? {
                    warn!(
                        id,
                        %message,
                        "push rejected after recovery; forcing overwrite of remote branch \
                         (concurrent peer commits may be discarded)"
                    );
                    if let PushOutcome::Rejected(message) = self.engine.push(true)? {
                        return Err(PublishError::Conflict { message });
                    }
                }
            }
        }

        self.engine.head()
    }

    /// Append and publish in one step, stamping the record durable.
    pub fn store(&self, record: &mut MessageRecord) -> Result<String, PublishError> {
        let path = self.append_record(record)?;
        let hash = self.publish(&path, &record.id)?;
        record.mark_durable(hash.clone())?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::core::Timestamp;

    /// Scripted engine: records the call sequence, replays canned outcomes.
    #[derive(Default)]
    struct FakeEngine {
        calls: RefCell<Vec<String>>,
        remote: Option<RemoteState>,
        needs_integration: bool,
        rebase: Option<IntegrationOutcome>,
        merge: Option<IntegrationOutcome>,
        pushes: RefCell<VecDeque<PushOutcome>>,
        head: String,
    }

    impl FakeEngine {
        fn record(&self, call: impl Into<String>) {
            self.calls.borrow_mut().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl GitEngine for FakeEngine {
        fn stage(&self, rel_path: &Path) -> Result<(), PublishError> {
            self.record(format!("stage {}", rel_path.display()));
            Ok(())
        }

        fn commit(&self, message: &str) -> Result<String, PublishError> {
            self.record(format!("commit {message}"));
            Ok("local0".into())
        }

        fn fetch_remote(&self) -> Result<RemoteState, PublishError> {
            self.record("fetch");
            Ok(self.remote.clone().unwrap_or(RemoteState::Absent))
        }

        fn needs_integration(&self, _remote_tip: &str) -> Result<bool, PublishError> {
            Ok(self.needs_integration)
        }

        fn rebase_onto_remote(&self) -> Result<IntegrationOutcome, PublishError> {
            self.record("rebase");
            Ok(self.rebase.expect("rebase not scripted"))
        }

        fn merge_remote(&self) -> Result<IntegrationOutcome, PublishError> {
            self.record("merge");
            Ok(self.merge.expect("merge not scripted"))
        }

        fn push(&self, force: bool) -> Result<PushOutcome, PublishError> {
            self.record(if force { "push --force" } else { "push" });
            Ok(self
                .pushes
                .borrow_mut()
                .pop_front()
                .expect("push not scripted"))
        }

        fn head(&self) -> Result<String, PublishError> {
            Ok(self.head.clone())
        }
    }

    fn store_with(engine: FakeEngine) -> CommitStore<FakeEngine> {
        CommitStore::with_engine("/work", engine)
    }

    fn publish(store: &CommitStore<FakeEngine>) -> Result<String, PublishError> {
        store.publish(Path::new("/work/messages/x.json"), "m-1")
    }

    #[test]
    fn publish_commits_before_any_network_step() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Tip("tip0".into())),
            pushes: RefCell::new(VecDeque::from([PushOutcome::Accepted])),
            head: "head0".into(),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        let hash = publish(&store).expect("publish");
        assert_eq!(hash, "head0");
        assert_eq!(
            store.engine.calls(),
            vec![
                "stage messages/x.json",
                "commit Add message m-1",
                "fetch",
                "push",
            ]
        );
    }

    #[test]
    fn publish_rebases_when_behind_remote() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Tip("tip1".into())),
            needs_integration: true,
            rebase: Some(IntegrationOutcome::Clean),
            pushes: RefCell::new(VecDeque::from([PushOutcome::Accepted])),
            head: "head1".into(),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        publish(&store).expect("publish");
        let calls = store.engine.calls();
        assert!(calls.contains(&"rebase".to_string()));
        assert!(!calls.contains(&"merge".to_string()));
        assert!(!calls.contains(&"push --force".to_string()));
    }

    #[test]
    fn publish_falls_back_to_merge_on_rebase_conflict() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Tip("tip1".into())),
            needs_integration: true,
            rebase: Some(IntegrationOutcome::Conflicted),
            merge: Some(IntegrationOutcome::Clean),
            pushes: RefCell::new(VecDeque::from([PushOutcome::Accepted])),
            head: "head2".into(),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        publish(&store).expect("publish");
        let calls = store.engine.calls();
        let rebase_at = calls.iter().position(|c| c == "rebase").expect("rebase");
        let merge_at = calls.iter().position(|c| c == "merge").expect("merge");
        assert!(rebase_at < merge_at);
        assert!(!calls.contains(&"push --force".to_string()));
    }

    #[test]
    fn publish_forces_exactly_once_when_push_rejected() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Tip("tip1".into())),
            pushes: RefCell::new(VecDeque::from([
                PushOutcome::Rejected("stale".into()),
                PushOutcome::Accepted,
            ])),
            head: "head3".into(),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        let hash = publish(&store).expect("publish");
        assert_eq!(hash, "head3");
        let forces = store
            .engine
            .calls()
            .iter()
            .filter(|c| *c == "push --force")
            .count();
        assert_eq!(forces, 1);
    }

    #[test]
    fn publish_surfaces_conflict_when_forced_push_rejected() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Tip("tip1".into())),
            pushes: RefCell::new(VecDeque::from([
                PushOutcome::Rejected("stale".into()),
                PushOutcome::Rejected("still stale".into()),
            ])),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        let err = publish(&store).expect_err("conflict");
        assert!(matches!(err, PublishError::Conflict { .. }));
        assert!(err.transience().is_retryable());
    }

    #[test]
    fn publish_without_remote_is_local_only_success() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Absent),
            head: "head4".into(),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        let hash = publish(&store).expect("publish");
        assert_eq!(hash, "head4");
        let calls = store.engine.calls();
        assert!(!calls.iter().any(|c| c.starts_with("push")));
    }

    #[test]
    fn publish_to_unborn_remote_branch_pushes_without_integration() {
        let engine = FakeEngine {
            remote: Some(RemoteState::Unborn),
            pushes: RefCell::new(VecDeque::from([PushOutcome::Accepted])),
            head: "head5".into(),
            ..FakeEngine::default()
        };
        let store = store_with(engine);

        let hash = publish(&store).expect("publish");
        assert_eq!(hash, "head5");
        let calls = store.engine.calls();
        assert!(calls.contains(&"push".to_string()));
        assert!(!calls.contains(&"rebase".to_string()));
        assert!(!calls.contains(&"merge".to_string()));
    }

    #[test]
    fn append_rejects_empty_content_before_touching_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CommitStore::with_engine(dir.path(), FakeEngine::default());

        let err = store.append("", "m-1").expect_err("validation");
        assert!(matches!(err, PublishError::Validation(_)));
        assert!(!dir.path().join(MESSAGES_DIR).exists());
    }

    #[test]
    fn append_names_are_distinct_per_id_and_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CommitStore::with_engine(dir.path(), FakeEngine::default());

        let ts = Timestamp::parse("2025-01-01T00:00:00Z").expect("ts");
        let a = MessageRecord::at("one", "m-a", ts).expect("record");
        let b = MessageRecord::at("two", "m-b", ts).expect("record");
        let later = MessageRecord::at("three", "m-a", Timestamp::parse("2025-01-01T00:00:01Z").expect("ts"))
            .expect("record");

        let pa = store.append_record(&a).expect("append a");
        let pb = store.append_record(&b).expect("append b");
        let pl = store.append_record(&later).expect("append later");

        // Same second, different ids: distinct files.
        assert_ne!(pa, pb);
        // Same id, different timestamp: the first file is not overwritten.
        assert_ne!(pa, pl);
        assert!(pa.exists() && pb.exists() && pl.exists());
    }
}
