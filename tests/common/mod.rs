//! Fixture helpers: local git remotes laid out as `{base}/{owner}/{name}`
//! so the library's clone-url logic resolves them like hosted repos.

use std::path::{Path, PathBuf};

use chatlog_rs::core::RepoName;

/// Create a bare remote for `owner/name` under `base`.
pub fn bare_remote(base: &Path, repo: &str) -> PathBuf {
    let name = RepoName::parse(repo).expect("repo name");
    let path = base.join(name.owner()).join(name.name());
    std::fs::create_dir_all(&path).expect("remote dir");

    let mut opts = git2::RepositoryInitOptions::new();
    opts.bare(true).initial_head("main");
    git2::Repository::init_opts(&path, &opts).expect("init bare");
    path
}

/// Clone a remote into a fresh working copy.
pub fn workdir_clone(remote: &Path, dest: &Path) -> git2::Repository {
    git2::build::RepoBuilder::new()
        .clone(remote.to_str().expect("utf8 path"), dest)
        .expect("clone")
}

/// Create a non-bare source repo for `owner/name` under `base` with the
/// given `messages/` files committed on `main`.
pub fn seeded_source(base: &Path, repo: &str, files: &[(&str, &str)]) -> PathBuf {
    let name = RepoName::parse(repo).expect("repo name");
    let path = base.join(name.owner()).join(name.name());
    std::fs::create_dir_all(&path).expect("source dir");

    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head("main");
    let git = git2::Repository::init_opts(&path, &opts).expect("init");

    let messages = path.join("messages");
    std::fs::create_dir_all(&messages).expect("messages dir");
    for (file, body) in files {
        std::fs::write(messages.join(file), body).expect("write record");
    }

    let mut index = git.index().expect("index");
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .expect("stage");
    index.write().expect("index write");
    let tree_oid = index.write_tree().expect("tree");
    let tree = git.find_tree(tree_oid).expect("find tree");
    let sig = git2::Signature::now("fixture", "fixture@localhost").expect("signature");
    git.commit(Some("refs/heads/main"), &sig, &sig, "seed", &tree, &[])
        .expect("commit");
    path
}

/// Paths of the committed message files on the remote's `main` branch.
pub fn remote_message_files(remote: &Path) -> Vec<String> {
    let git = git2::Repository::open(remote).expect("open remote");
    let oid = git
        .refname_to_id("refs/heads/main")
        .expect("main not born on remote");
    let commit = git.find_commit(oid).expect("commit");
    let tree = commit.tree().expect("tree");

    let mut files = Vec::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            files.push(format!("{dir}{}", entry.name().unwrap_or_default()));
        }
        git2::TreeWalkResult::Ok
    })
    .expect("walk");
    files.sort();
    files
}
