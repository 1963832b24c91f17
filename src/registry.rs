//! Repository registry: the ordered list of remote logs.
//!
//! Persisted as a flat file, one `owner/name` per line. `#` comments and
//! blank lines are kept across rewrites; the first repository line is the
//! main (writable) target. The core treats the file as an opaque ordered
//! list with a distinguished head.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::core::{RepoName, RepoRole, RepositoryRef};
use crate::error::{Effect, Transience};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("failed to read registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{repo} is already registered")]
    AlreadyListed { repo: RepoName },

    #[error("{repo} is not registered")]
    NotFound { repo: RepoName },

    #[error("{repo} is the main repository; promote another before removing it")]
    CannotRemoveMain { repo: RepoName },
}

impl RegistryError {
    pub fn transience(&self) -> Transience {
        match self {
            RegistryError::Read { .. } | RegistryError::Write { .. } => Transience::Unknown,
            RegistryError::AlreadyListed { .. }
            | RegistryError::NotFound { .. }
            | RegistryError::CannotRemoveMain { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Write failures go through a temp file; the registry on disk
            // is either old or new, never torn.
            RegistryError::Write { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}

/// One line of the persisted file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Comment or blank, preserved verbatim.
    Passthrough(String),
    Repo(RepoName),
}

/// In-memory view of the registry file. Mutations rewrite the whole file
/// atomically via [`save`](Self::save).
#[derive(Debug)]
pub struct RepoRegistry {
    path: PathBuf,
    lines: Vec<Line>,
}

impl RepoRegistry {
    /// Load the registry; a missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(RegistryError::Read { path, source }),
        };

        let mut lines = Vec::new();
        for raw in contents.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                lines.push(Line::Passthrough(raw.to_string()));
                continue;
            }
            match RepoName::parse(trimmed) {
                Ok(repo) => lines.push(Line::Repo(repo)),
                Err(e) => {
                    warn!(path = %path.display(), line = raw, error = %e, "skipping invalid registry line");
                    lines.push(Line::Passthrough(format!("# invalid: {raw}")));
                }
            }
        }

        Ok(Self { path, lines })
    }

    /// All repositories in order; the head is `Main`, the rest `Secondary`.
    pub fn list(&self) -> Vec<RepositoryRef> {
        self.repos()
            .enumerate()
            .map(|(i, name)| RepositoryRef {
                name: name.clone(),
                role: if i == 0 {
                    RepoRole::Main
                } else {
                    RepoRole::Secondary
                },
            })
            .collect()
    }

    pub fn names(&self) -> Vec<RepoName> {
        self.repos().cloned().collect()
    }

    /// The writable publish target, if any repository is registered.
    pub fn main(&self) -> Option<&RepoName> {
        self.repos().next()
    }

    pub fn add(&mut self, repo: RepoName) -> Result<(), RegistryError> {
        if self.repos().any(|r| *r == repo) {
            return Err(RegistryError::AlreadyListed { repo });
        }
        self.lines.push(Line::Repo(repo));
        Ok(())
    }

    /// Remove a secondary repository. Removing the main target is rejected,
    /// never silently demoted.
    pub fn remove(&mut self, repo: &RepoName) -> Result<(), RegistryError> {
        if self.main() == Some(repo) {
            return Err(RegistryError::CannotRemoveMain { repo: repo.clone() });
        }
        let before = self.lines.len();
        self.lines.retain(|line| !matches!(line, Line::Repo(r) if r == repo));
        if self.lines.len() == before {
            return Err(RegistryError::NotFound { repo: repo.clone() });
        }
        Ok(())
    }

    /// Make an already-registered repository the main target.
    pub fn promote(&mut self, repo: &RepoName) -> Result<(), RegistryError> {
        if !self.repos().any(|r| r == repo) {
            return Err(RegistryError::NotFound { repo: repo.clone() });
        }
        if self.main() == Some(repo) {
            return Ok(());
        }
        self.lines.retain(|line| !matches!(line, Line::Repo(r) if r == repo));
        let head = self
            .lines
            .iter()
            .position(|line| matches!(line, Line::Repo(_)))
            .unwrap_or(self.lines.len());
        self.lines.insert(head, Line::Repo(repo.clone()));
        Ok(())
    }

    /// Persist via temp-file rename so readers never see a torn list.
    pub fn save(&self) -> Result<(), RegistryError> {
        let write_err = |source: std::io::Error| RegistryError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(write_err)?;

        let mut contents = String::new();
        for line in &self.lines {
            match line {
                Line::Passthrough(raw) => contents.push_str(raw),
                Line::Repo(repo) => contents.push_str(&repo.to_string()),
            }
            contents.push('\n');
        }

        let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        fs::write(temp.path(), contents.as_bytes()).map_err(write_err)?;
        temp.persist(&self.path)
            .map_err(|e| write_err(e.error))?;
        Ok(())
    }

    fn repos(&self) -> impl Iterator<Item = &RepoName> {
        self.lines.iter().filter_map(|line| match line {
            Line::Repo(repo) => Some(repo),
            Line::Passthrough(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> RepoName {
        RepoName::parse(raw).expect("repo name")
    }

    fn registry_with(contents: &str) -> (tempfile::TempDir, RepoRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("repos.txt");
        fs::write(&path, contents).expect("write");
        let registry = RepoRegistry::load(&path).expect("load");
        (dir, registry)
    }

    #[test]
    fn first_non_comment_line_is_main() {
        let (_dir, registry) = registry_with("# primary first\nalice/log\nbob/log\n");
        let refs = registry.list();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, name("alice/log"));
        assert_eq!(refs[0].role, RepoRole::Main);
        assert_eq!(refs[1].role, RepoRole::Secondary);
        assert_eq!(registry.main(), Some(&name("alice/log")));
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RepoRegistry::load(dir.path().join("repos.txt")).expect("load");
        assert!(registry.list().is_empty());
        assert!(registry.main().is_none());
    }

    #[test]
    fn add_rejects_duplicates() {
        let (_dir, mut registry) = registry_with("alice/log\n");
        assert!(matches!(
            registry.add(name("alice/log")),
            Err(RegistryError::AlreadyListed { .. })
        ));
        registry.add(name("bob/log")).expect("add");
        assert_eq!(registry.names().len(), 2);
    }

    #[test]
    fn remove_rejects_main_and_unknown() {
        let (_dir, mut registry) = registry_with("alice/log\nbob/log\n");
        assert!(matches!(
            registry.remove(&name("alice/log")),
            Err(RegistryError::CannotRemoveMain { .. })
        ));
        assert!(matches!(
            registry.remove(&name("carol/log")),
            Err(RegistryError::NotFound { .. })
        ));
        registry.remove(&name("bob/log")).expect("remove");
        assert_eq!(registry.main(), Some(&name("alice/log")));
    }

    #[test]
    fn promote_moves_entry_to_head() {
        let (_dir, mut registry) = registry_with("alice/log\nbob/log\ncarol/log\n");
        registry.promote(&name("carol/log")).expect("promote");
        assert_eq!(registry.main(), Some(&name("carol/log")));
        let names = registry.names();
        assert_eq!(names, vec![name("carol/log"), name("alice/log"), name("bob/log")]);

        // Promoting the current main is a no-op.
        registry.promote(&name("carol/log")).expect("promote again");
        assert_eq!(registry.main(), Some(&name("carol/log")));
    }

    #[test]
    fn save_preserves_comments_and_roundtrips() {
        let (_dir, mut registry) = registry_with("# mirrors\nalice/log\n\nbob/log\n");
        registry.add(name("carol/log")).expect("add");
        registry.save().expect("save");

        let reloaded = RepoRegistry::load(&registry.path).expect("reload");
        assert_eq!(
            reloaded.names(),
            vec![name("alice/log"), name("bob/log"), name("carol/log")]
        );
        let text = fs::read_to_string(&registry.path).expect("read");
        assert!(text.starts_with("# mirrors\n"));
    }

    #[test]
    fn invalid_lines_are_skipped_not_fatal() {
        let (_dir, registry) = registry_with("alice/log\nnot a repo!!\nbob/log\n");
        assert_eq!(registry.names(), vec![name("alice/log"), name("bob/log")]);
    }
}
