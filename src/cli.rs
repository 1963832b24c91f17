//! CLI surface for chatlog.
//!
//! Thin handlers over the library: parse, load config, call one operation,
//! render. Structured output goes through `--json` for scripting.

use std::ffi::OsString;

use clap::{ArgAction, Parser, Subcommand};
use uuid::Uuid;

use crate::core::{AggregatedRecord, MessageRecord, RepoName, RepoRole};
use crate::git::CommitStore;
use crate::index::MessageIndex;
use crate::pull::Aggregator;
use crate::registry::RepoRegistry;
use crate::remote::{CommitInfo, CommitReader};
use crate::{Result, config, paths};

#[derive(Parser, Debug)]
#[command(
    name = "chatlog",
    version,
    about = "Git-backed replicated message log",
    infer_subcommands = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Append a message to the main log and push it.
    Publish {
        /// Message content.
        content: String,
        /// Message id (default: random uuid).
        #[arg(long)]
        id: Option<String>,
    },

    /// Clone every registered log and print the merged history, newest first.
    Pull {
        /// Cap on printed messages.
        #[arg(long)]
        max: Option<usize>,
    },

    /// Commit history of one log via the hosting provider's API.
    Log {
        /// Repository in `owner/name` form.
        repo: String,
        /// Cap on listed commits.
        #[arg(long, default_value_t = 30)]
        max: usize,
    },

    /// Manage the registered repositories.
    Repos {
        #[command(subcommand)]
        cmd: ReposCmd,
    },

    /// Local index statistics.
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum ReposCmd {
    /// List registered repositories.
    #[command(alias = "ls")]
    List,
    /// Register a repository.
    Add { repo: String },
    /// Unregister a secondary repository.
    #[command(alias = "rm")]
    Remove { repo: String },
    /// Make a registered repository the main publish target.
    Promote { repo: String },
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Run the CLI (used by bin).
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish { content, id } => handle_publish(cli.json, &content, id),
        Commands::Pull { max } => handle_pull(cli.json, max),
        Commands::Log { repo, max } => handle_log(cli.json, &repo, max),
        Commands::Repos { cmd } => handle_repos(cli.json, cmd),
        Commands::Stats => handle_stats(cli.json),
    }
}

fn handle_publish(json: bool, content: &str, id: Option<String>) -> Result<()> {
    let cfg = config::load_or_init();
    let token = config::github_token();

    let mut record = MessageRecord::new(
        content,
        id.unwrap_or_else(|| Uuid::new_v4().to_string()),
    )?;

    let store = CommitStore::open_with(
        &cfg.store.repo_path(),
        &cfg.store.branch,
        &cfg.store.remote,
        token,
    )?;
    let hash = store.store(&mut record)?;

    let index = MessageIndex::open(&paths::index_path())?;
    index.insert(&record)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record).unwrap_or_default());
    } else {
        println!("published {} as {}", record.id, short_sha(&hash));
    }
    Ok(())
}

fn handle_pull(json: bool, max: Option<usize>) -> Result<()> {
    let cfg = config::load_or_init();
    let registry = RepoRegistry::load(paths::registry_path())?;
    let repos = registry.names();
    if repos.is_empty() {
        tracing::warn!("no repositories registered; nothing to pull");
    }

    let aggregator = Aggregator::new(&cfg.github.git_base, config::github_token())
        .clone_timeout(std::time::Duration::from_millis(cfg.aggregate.clone_timeout_ms));
    let mut report = aggregator.collect(&repos);
    if let Some(max) = max {
        report.records.truncate(max);
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report.records).unwrap_or_default()
        );
    } else {
        for record in &report.records {
            print_aggregated(record);
        }
        if report.skipped_sources > 0 || report.skipped_files > 0 {
            eprintln!(
                "skipped {} source(s), {} file(s)",
                report.skipped_sources, report.skipped_files
            );
        }
    }
    Ok(())
}

fn handle_log(json: bool, repo: &str, max: usize) -> Result<()> {
    let cfg = config::load_or_init();
    let repo = RepoName::parse(repo)?;

    let reader = CommitReader::new(&cfg.github.api_base, config::github_token());
    let commits = reader.list_messages(&repo, max)?;

    if json {
        #[derive(serde::Serialize)]
        struct CommitLine<'a> {
            sha: &'a str,
            message: &'a str,
            author: &'a str,
            timestamp: String,
            url: &'a str,
        }
        let lines: Vec<CommitLine<'_>> = commits
            .iter()
            .map(|c| CommitLine {
                sha: &c.sha,
                message: &c.message,
                author: &c.author_name,
                timestamp: c.timestamp.to_rfc3339(),
                url: &c.url,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&lines).unwrap_or_default());
    } else {
        for commit in &commits {
            print_commit(commit);
        }
    }
    Ok(())
}

fn handle_repos(json: bool, cmd: ReposCmd) -> Result<()> {
    let mut registry = RepoRegistry::load(paths::registry_path())?;
    match cmd {
        ReposCmd::List => {
            let refs = registry.list();
            if json {
                #[derive(serde::Serialize)]
                struct RepoLine {
                    repo: String,
                    role: RepoRole,
                }
                let lines: Vec<RepoLine> = refs
                    .iter()
                    .map(|r| RepoLine {
                        repo: r.name.to_string(),
                        role: r.role,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&lines).unwrap_or_default());
            } else {
                for r in &refs {
                    let marker = match r.role {
                        RepoRole::Main => "* ",
                        RepoRole::Secondary => "  ",
                    };
                    println!("{marker}{}", r.name);
                }
            }
            Ok(())
        }
        ReposCmd::Add { repo } => {
            registry.add(parse_repo(&repo)?)?;
            registry.save()?;
            println!("added {repo}");
            Ok(())
        }
        ReposCmd::Remove { repo } => {
            registry.remove(&parse_repo(&repo)?)?;
            registry.save()?;
            println!("removed {repo}");
            Ok(())
        }
        ReposCmd::Promote { repo } => {
            registry.promote(&parse_repo(&repo)?)?;
            registry.save()?;
            println!("{repo} is now the main repository");
            Ok(())
        }
    }
}

fn handle_stats(json: bool) -> Result<()> {
    let index = MessageIndex::open(&paths::index_path())?;
    let count = index.count()?;
    let latest = index.list(1, 0)?.into_iter().next();

    if json {
        #[derive(serde::Serialize)]
        struct Stats {
            messages: u64,
            latest: Option<MessageRecord>,
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&Stats {
                messages: count,
                latest
            })
            .unwrap_or_default()
        );
    } else {
        println!("messages: {count}");
        if let Some(latest) = latest {
            println!("latest:   {} ({})", latest.id, latest.timestamp.to_rfc3339());
        }
    }
    Ok(())
}

fn parse_repo(raw: &str) -> Result<RepoName> {
    Ok(RepoName::parse(raw)?)
}

fn print_aggregated(record: &AggregatedRecord) {
    println!(
        "{}  [{}]  {}",
        record.timestamp.to_rfc3339(),
        record.source_repo,
        record.content
    );
}

fn print_commit(commit: &CommitInfo) {
    println!(
        "{}  {}  {} <{}>  {}",
        short_sha(&commit.sha),
        commit.timestamp.to_rfc3339(),
        commit.author_name,
        commit.author_email,
        commit.message.lines().next().unwrap_or_default()
    );
}

/// Abbreviate a commit id for display. The sha may come from a remote
/// response, so never byte-slice it blindly.
fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
