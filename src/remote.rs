//! Read-side history over the hosting provider's commits API.
//!
//! The git store only ever appends; per-message provenance (who published
//! what, when, under which commit) is read back out-of-band from the
//! provider rather than by walking clones. Responses are plain JSON, so the
//! page parser is a pure function that tests feed fixtures to.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::core::{RepoName, Timestamp};
use crate::error::{Effect, Transience};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_PER_PAGE: u32 = 30;
const MAX_PER_PAGE: u32 = 100;
const USER_AGENT: &str = concat!("chatlog-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteReadError {
    #[error("{repo} not found (or the credential cannot see it)")]
    NotFound { repo: RepoName },

    #[error("rate limited by the api reading {repo}")]
    RateLimited { repo: RepoName },

    #[error("api request for {repo} failed with status {status}")]
    Status { repo: RepoName, status: u16 },

    #[error("transport failure reading {repo}: {source}")]
    Transport {
        repo: RepoName,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("truncated api response from {repo}: {source}")]
    Body {
        repo: RepoName,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed api response: {source}")]
    Malformed {
        #[source]
        source: serde_json::Error,
    },
}

impl RemoteReadError {
    pub fn transience(&self) -> Transience {
        match self {
            RemoteReadError::RateLimited { .. }
            | RemoteReadError::Transport { .. }
            | RemoteReadError::Body { .. } => Transience::Retryable,
            RemoteReadError::NotFound { .. } | RemoteReadError::Malformed { .. } => {
                Transience::Permanent
            }
            RemoteReadError::Status { status, .. } if *status >= 500 => Transience::Retryable,
            RemoteReadError::Status { .. } => Transience::Permanent,
        }
    }

    /// Reads never mutate remote state.
    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Filters for a commit listing. `Default` matches the provider defaults.
#[derive(Debug, Clone, Default)]
pub struct CommitQuery {
    /// Restrict to commits touching this path (e.g. `messages/`).
    pub path: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub per_page: Option<u32>,
    pub page: Option<u32>,
}

/// One commit as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: Timestamp,
    pub url: String,
}

// Wire shape of the commits endpoint; only the fields we surface.
#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    html_url: String,
    commit: ApiCommitBody,
}

#[derive(Debug, Deserialize)]
struct ApiCommitBody {
    message: String,
    author: ApiAuthor,
}

#[derive(Debug, Deserialize)]
struct ApiAuthor {
    name: String,
    email: String,
    date: Timestamp,
}

/// Effective `(per_page, page)` for a query: `per_page` clamped to the
/// provider maximum, pages numbered from 1.
fn effective_paging(query: &CommitQuery) -> (u32, u32) {
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).min(MAX_PER_PAGE);
    let page = query.page.unwrap_or(1).max(1);
    (per_page, page)
}

/// Parse one page of the commits endpoint into [`CommitInfo`]s.
pub fn parse_commit_page(raw: &str) -> Result<Vec<CommitInfo>, RemoteReadError> {
    let commits: Vec<ApiCommit> =
        serde_json::from_str(raw).map_err(|source| RemoteReadError::Malformed { source })?;
    Ok(commits
        .into_iter()
        .map(|c| CommitInfo {
            sha: c.sha,
            message: c.commit.message,
            author_name: c.commit.author.name,
            author_email: c.commit.author.email,
            timestamp: c.commit.author.date,
            url: c.html_url,
        })
        .collect())
}

/// Client for the provider's commits endpoint.
pub struct CommitReader {
    agent: ureq::Agent,
    api_base: String,
    token: Option<String>,
}

impl CommitReader {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(15))
            .build();
        Self {
            agent,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// One page of commit history for `repo`, newest first.
    pub fn list_commits(
        &self,
        repo: &RepoName,
        query: &CommitQuery,
    ) -> Result<Vec<CommitInfo>, RemoteReadError> {
        let url = format!(
            "{}/repos/{}/{}/commits",
            self.api_base,
            repo.owner(),
            repo.name()
        );
        let (per_page, page) = effective_paging(query);

        let mut request = self
            .agent
            .get(&url)
            .set("Accept", "application/vnd.github.v3+json")
            .set("User-Agent", USER_AGENT)
            .query("per_page", &per_page.to_string())
            .query("page", &page.to_string());
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("token {token}"));
        }
        if let Some(path) = &query.path {
            request = request.query("path", path);
        }
        if let Some(since) = &query.since {
            request = request.query("since", &since.to_rfc3339());
        }
        if let Some(until) = &query.until {
            request = request.query("until", &until.to_rfc3339());
        }

        debug!(repo = %repo, page, per_page, "listing commits");
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => {
                return Err(RemoteReadError::NotFound { repo: repo.clone() });
            }
            Err(ureq::Error::Status(status @ (403 | 429), _)) => {
                debug!(repo = %repo, status, "treated as rate limit");
                return Err(RemoteReadError::RateLimited { repo: repo.clone() });
            }
            Err(ureq::Error::Status(status, _)) => {
                return Err(RemoteReadError::Status {
                    repo: repo.clone(),
                    status,
                });
            }
            Err(e) => {
                return Err(RemoteReadError::Transport {
                    repo: repo.clone(),
                    source: Box::new(e),
                });
            }
        };

        let body = response.into_string().map_err(|source| RemoteReadError::Body {
            repo: repo.clone(),
            source,
        })?;
        parse_commit_page(&body)
    }

    /// Up to `max_count` message-publishing commits, following pagination
    /// until the cap or a short page.
    pub fn list_messages(
        &self,
        repo: &RepoName,
        max_count: usize,
    ) -> Result<Vec<CommitInfo>, RemoteReadError> {
        let mut commits = Vec::new();
        let mut page = 1;
        while commits.len() < max_count {
            let remaining = max_count - commits.len();
            let per_page = (remaining as u32).min(MAX_PER_PAGE).max(1);
            let batch = self.list_commits(
                repo,
                &CommitQuery {
                    path: Some(crate::git::MESSAGES_DIR.to_string()),
                    per_page: Some(per_page),
                    page: Some(page),
                    ..CommitQuery::default()
                },
            )?;
            let short_page = (batch.len() as u32) < per_page;
            commits.extend(batch);
            if short_page {
                break;
            }
            page += 1;
        }
        commits.truncate(max_count);
        Ok(commits)
    }
}
