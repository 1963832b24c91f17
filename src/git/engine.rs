//! Git capability seam for the commit store.
//!
//! The conflict-recovery protocol in [`super::store`] is written against
//! this trait so it can be driven by a scripted fake in tests; `Git2Engine`
//! is the real implementation over libgit2.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use git2::{FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository, Signature};

use super::error::PublishError;

/// Result of a push attempt that reached the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// The remote refused the ref update (non-fast-forward or ref lock).
    Rejected(String),
}

/// Result of a rebase or merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationOutcome {
    Clean,
    /// Histories conflict; any partial state has been rolled back.
    Conflicted,
}

/// What a fetch learned about the remote branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// No remote configured; the log is local-only.
    Absent,
    /// Remote reachable but the branch has no history yet.
    Unborn,
    /// Remote branch tip commit id.
    Tip(String),
}

/// Minimal git surface the publish protocol needs.
pub trait GitEngine {
    /// Stage one file, path relative to the working copy root.
    fn stage(&self, rel_path: &Path) -> Result<(), PublishError>;

    /// Commit staged changes to the log branch, returning the commit id.
    fn commit(&self, message: &str) -> Result<String, PublishError>;

    /// Fetch the remote branch tip.
    fn fetch_remote(&self) -> Result<RemoteState, PublishError>;

    /// Whether the fetched remote tip carries history the local branch does
    /// not already contain.
    fn needs_integration(&self, remote_tip: &str) -> Result<bool, PublishError>;

    /// Rebase the local branch onto the fetched remote tip. A conflicted
    /// rebase is aborted before returning.
    fn rebase_onto_remote(&self) -> Result<IntegrationOutcome, PublishError>;

    /// Non-rebasing fallback: merge the fetched remote tip into the local
    /// branch.
    fn merge_remote(&self) -> Result<IntegrationOutcome, PublishError>;

    /// Push the log branch. `force` overwrites the remote ref.
    fn push(&self, force: bool) -> Result<PushOutcome, PublishError>;

    /// Resolve the local branch tip.
    fn head(&self) -> Result<String, PublishError>;
}

/// libgit2-backed engine owning one working copy.
pub struct Git2Engine {
    repo: Repository,
    branch: String,
    remote: String,
    token: Option<String>,
}

impl Git2Engine {
    pub fn open(
        path: &Path,
        branch: impl Into<String>,
        remote: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, PublishError> {
        let branch = branch.into();
        let local_state = |source: git2::Error| PublishError::LocalState {
            path: path.to_owned(),
            source,
        };

        let repo = Repository::open(path).map_err(local_state)?;
        if repo.is_bare() {
            return Err(local_state(git2::Error::from_str(
                "bare repository not supported",
            )));
        }

        // Pin HEAD to the log branch; the working copy is dedicated to it.
        let branch_ref = format!("refs/heads/{branch}");
        let on_branch = match repo.head() {
            Ok(head) => head.name() == Some(branch_ref.as_str()),
            Err(_) => false,
        };
        if !on_branch {
            repo.set_head(&branch_ref).map_err(local_state)?;
            if repo.refname_to_id(&branch_ref).is_ok() {
                repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
                    .map_err(local_state)?;
            }
        }

        Ok(Self {
            repo,
            branch,
            remote: remote.into(),
            token,
        })
    }

    pub fn workdir(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_owned)
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }

    fn signature(&self) -> Result<Signature<'static>, PublishError> {
        self.repo
            .signature()
            .or_else(|_| Signature::now("chatlog", "chatlog@localhost"))
            .map_err(PublishError::Commit)
    }

    /// Credential chain: explicit bearer token, ssh agent, then the
    /// credential helper.
    fn callbacks<'cb>(&self) -> RemoteCallbacks<'cb> {
        let cfg = self.repo.config().ok();
        let token = self.token.clone();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            if allowed.is_user_pass_plaintext()
                && let Some(ref token) = token
            {
                return git2::Cred::userpass_plaintext("x-access-token", token);
            }
            if allowed.is_ssh_key()
                && let Some(user) = username_from_url
            {
                return git2::Cred::ssh_key_from_agent(user);
            }
            if allowed.is_user_pass_plaintext()
                && let Some(ref cfg) = cfg
                && let Ok(cred) = git2::Cred::credential_helper(cfg, url, username_from_url)
            {
                return Ok(cred);
            }
            git2::Cred::default()
        });
        callbacks
    }
}

/// Rejection statuses the remote reports for stale ref updates.
fn is_ref_rejection(message: &str) -> bool {
    message.contains("non-fast-forward")
        || message.contains("non-fastforward")
        || message.contains("fetch first")
        || message.contains("cannot lock ref")
        || message.contains("failed to update ref")
}

impl GitEngine for Git2Engine {
    fn stage(&self, rel_path: &Path) -> Result<(), PublishError> {
        let stage_err = |source: git2::Error| PublishError::Stage {
            path: rel_path.to_owned(),
            source,
        };
        let mut index = self.repo.index().map_err(stage_err)?;
        index.add_path(rel_path).map_err(stage_err)?;
        index.write().map_err(stage_err)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String, PublishError> {
        let sig = self.signature()?;
        let mut index = self.repo.index().map_err(PublishError::Commit)?;
        let tree_oid = index.write_tree().map_err(PublishError::Commit)?;
        let tree = self.repo.find_tree(tree_oid).map_err(PublishError::Commit)?;

        // Unborn branch on first publish: commit with no parent.
        let parent = match self.repo.refname_to_id(&self.branch_ref()) {
            Ok(oid) => Some(self.repo.find_commit(oid).map_err(PublishError::Commit)?),
            Err(_) => None,
        };
        let parents: Vec<_> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some(&self.branch_ref()), &sig, &sig, message, &tree, &parents)
            .map_err(PublishError::Commit)?;
        Ok(oid.to_string())
    }

    fn fetch_remote(&self) -> Result<RemoteState, PublishError> {
        let mut remote = match self.repo.find_remote(&self.remote) {
            Ok(remote) => remote,
            Err(_) => return Ok(RemoteState::Absent),
        };
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(self.callbacks());
        // Explicit dst so the tracking ref updates even when the remote was
        // added without the default fetch refspec.
        let refspec = format!("+{}:{}", self.branch_ref(), self.tracking_ref());
        remote
            .fetch(&[&refspec], Some(&mut opts), None)
            .map_err(PublishError::Fetch)?;

        match self.repo.refname_to_id(&self.tracking_ref()) {
            Ok(oid) => Ok(RemoteState::Tip(oid.to_string())),
            Err(_) => Ok(RemoteState::Unborn),
        }
    }

    fn needs_integration(&self, remote_tip: &str) -> Result<bool, PublishError> {
        let head = match self.repo.refname_to_id(&self.branch_ref()) {
            Ok(oid) => oid,
            Err(_) => return Ok(true),
        };
        let tip = Oid::from_str(remote_tip).map_err(PublishError::Fetch)?;
        if head == tip {
            return Ok(false);
        }
        let tip_is_ancestor = self
            .repo
            .graph_descendant_of(head, tip)
            .map_err(PublishError::Fetch)?;
        Ok(!tip_is_ancestor)
    }

    fn rebase_onto_remote(&self) -> Result<IntegrationOutcome, PublishError> {
        let local_ref = self
            .repo
            .find_reference(&self.branch_ref())
            .map_err(PublishError::Rebase)?;
        let local = self
            .repo
            .reference_to_annotated_commit(&local_ref)
            .map_err(PublishError::Rebase)?;
        let remote_ref = self
            .repo
            .find_reference(&self.tracking_ref())
            .map_err(PublishError::Rebase)?;
        let upstream = self
            .repo
            .reference_to_annotated_commit(&remote_ref)
            .map_err(PublishError::Rebase)?;

        let sig = self.signature()?;
        let mut opts = git2::RebaseOptions::new();
        let mut rebase = self
            .repo
            .rebase(Some(&local), Some(&upstream), None, Some(&mut opts))
            .map_err(PublishError::Rebase)?;

        while let Some(op) = rebase.next() {
            if op.is_err() {
                let _ = rebase.abort();
                return Ok(IntegrationOutcome::Conflicted);
            }
            let conflicted = self
                .repo
                .index()
                .map(|index| index.has_conflicts())
                .unwrap_or(true);
            if conflicted {
                let _ = rebase.abort();
                return Ok(IntegrationOutcome::Conflicted);
            }
            if rebase.commit(None, &sig, None).is_err() {
                let _ = rebase.abort();
                return Ok(IntegrationOutcome::Conflicted);
            }
        }

        rebase.finish(Some(&sig)).map_err(PublishError::Rebase)?;
        Ok(IntegrationOutcome::Clean)
    }

    fn merge_remote(&self) -> Result<IntegrationOutcome, PublishError> {
        let local_oid = self
            .repo
            .refname_to_id(&self.branch_ref())
            .map_err(PublishError::Merge)?;
        let remote_oid = self
            .repo
            .refname_to_id(&self.tracking_ref())
            .map_err(PublishError::Merge)?;
        let local = self.repo.find_commit(local_oid).map_err(PublishError::Merge)?;
        let remote = self
            .repo
            .find_commit(remote_oid)
            .map_err(PublishError::Merge)?;

        let mut merged = self
            .repo
            .merge_commits(&local, &remote, None)
            .map_err(PublishError::Merge)?;
        if merged.has_conflicts() {
            return Ok(IntegrationOutcome::Conflicted);
        }

        let tree_oid = merged
            .write_tree_to(&self.repo)
            .map_err(PublishError::Merge)?;
        let tree = self.repo.find_tree(tree_oid).map_err(PublishError::Merge)?;
        let sig = self.signature()?;
        let message = format!("Merge remote history from {}", self.remote);
        self.repo
            .commit(
                Some(&self.branch_ref()),
                &sig,
                &sig,
                &message,
                &tree,
                &[&local, &remote],
            )
            .map_err(PublishError::Merge)?;

        // Bring index and working tree up to the merge tip.
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .map_err(PublishError::Merge)?;
        Ok(IntegrationOutcome::Clean)
    }

    fn push(&self, force: bool) -> Result<PushOutcome, PublishError> {
        let mut remote = self
            .repo
            .find_remote(&self.remote)
            .map_err(PublishError::Push)?;

        let branch_ref = self.branch_ref();
        let refspec = if force {
            format!("+{branch_ref}:{branch_ref}")
        } else {
            format!("{branch_ref}:{branch_ref}")
        };

        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = self.callbacks();
            callbacks.push_update_reference(|_refname, status| {
                if let Some(msg) = status {
                    *rejection.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);

            if let Err(e) = remote.push(&[&refspec], Some(&mut opts)) {
                let msg = e.to_string();
                if is_ref_rejection(&msg) {
                    return Ok(PushOutcome::Rejected(msg));
                }
                return Err(PublishError::Push(e));
            }
        }

        match rejection.into_inner() {
            Some(msg) => Ok(PushOutcome::Rejected(msg)),
            None => Ok(PushOutcome::Accepted),
        }
    }

    fn head(&self) -> Result<String, PublishError> {
        self.repo
            .refname_to_id(&self.branch_ref())
            .map(|oid| oid.to_string())
            .map_err(PublishError::Head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_rejection_statuses() {
        assert!(is_ref_rejection("cannot push non-fastforwardable reference"));
        assert!(is_ref_rejection("rejected: non-fast-forward"));
        assert!(is_ref_rejection("failed to update ref"));
        assert!(!is_ref_rejection("connection refused"));
    }
}
