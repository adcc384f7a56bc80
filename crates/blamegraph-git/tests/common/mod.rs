//! Scratch git repositories for integration tests.
//!
//! Trees are written straight from blobs, so no working directory or git
//! binary is needed, and signatures and timestamps are fixed so runs are
//! reproducible.

#![allow(dead_code)]

use blamegraph_core::storage::SqliteStorage;
use blamegraph_core::IndexerConfig;
use blamegraph_git::Orchestrator;
use git2::{Oid, Repository, Signature, Time};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const DEV: (&str, &str) = ("Dev Eloper", "dev@example.com");
pub const OTHER: (&str, &str) = ("Other Person", "other@example.com");

/// A file change: `Some(content)` writes the file, `None` removes it.
pub type Change<'a> = (&'a str, Option<&'a str>);

/// Bare source repository with a deterministic clock.
pub struct SourceRepo {
    pub repo: Repository,
    path: PathBuf,
    clock: i64,
}

impl SourceRepo {
    pub fn init(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let repo = Repository::init_bare(&path).unwrap();
        Self {
            repo,
            path,
            clock: 1_700_000_000,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit on top of HEAD and move the checked-out branch.
    pub fn commit(&mut self, changes: &[Change<'_>], message: &str) -> Oid {
        self.commit_as(DEV, changes, message)
    }

    pub fn commit_as(&mut self, author: (&str, &str), changes: &[Change<'_>], message: &str) -> Oid {
        let parents: Vec<Oid> = self.head().into_iter().collect();
        self.commit_with(Some("HEAD"), author, &parents, changes, message)
    }

    /// Commit with explicit parents. The tree starts from the first parent's.
    pub fn commit_with(
        &mut self,
        update_ref: Option<&str>,
        author: (&str, &str),
        parents: &[Oid],
        changes: &[Change<'_>],
        message: &str,
    ) -> Oid {
        self.clock += 60;
        let sig = Signature::new(author.0, author.1, &Time::new(self.clock, 0)).unwrap();

        let parent_commits: Vec<git2::Commit<'_>> = parents
            .iter()
            .map(|oid| self.repo.find_commit(*oid).unwrap())
            .collect();
        let base_tree = parent_commits.first().map(|c| c.tree().unwrap());
        let mut builder = self.repo.treebuilder(base_tree.as_ref()).unwrap();
        for (name, content) in changes {
            match content {
                Some(content) => {
                    let blob = self.repo.blob(content.as_bytes()).unwrap();
                    builder.insert(*name, blob, 0o100644).unwrap();
                }
                None => {
                    builder.remove(*name).unwrap();
                }
            }
        }
        let tree = self.repo.find_tree(builder.write().unwrap()).unwrap();

        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();
        self.repo
            .commit(update_ref, &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    /// Move the checked-out branch.
    pub fn set_head(&self, oid: Oid) {
        let head = self.repo.find_reference("HEAD").unwrap();
        let branch = head.symbolic_target().unwrap().to_string();
        self.repo.reference(&branch, oid, true, "test reset").unwrap();
    }

    pub fn head(&self) -> Option<Oid> {
        self.repo.head().ok().and_then(|h| h.target())
    }
}

/// `"a\nb\n"` from `["a", "b"]`.
pub fn lines(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

/// Sources live under `{root}/sources/{owner}/{repo}`, mirrors under
/// `{root}/projects`.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    pub fn source(&self, owner: &str, repo: &str) -> SourceRepo {
        SourceRepo::init(self.root.path().join("sources").join(owner).join(repo))
    }

    pub fn config(&self) -> IndexerConfig {
        IndexerConfig {
            projects_root: self.root.path().join("projects"),
            remote_template: format!("{}/{{owner}}/{{repo}}", self.root.path().join("sources").display()),
            network_retries: 0,
            progress_interval_ms: 10,
            ..Default::default()
        }
    }

    pub fn orchestrator(&self, store: Arc<SqliteStorage>) -> Orchestrator {
        Orchestrator::new(self.config(), store)
    }

    pub fn mirror_path(&self, owner: &str, repo: &str) -> PathBuf {
        self.config().mirror_path(owner, repo)
    }
}

pub fn memory_store() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::in_memory().unwrap())
}
