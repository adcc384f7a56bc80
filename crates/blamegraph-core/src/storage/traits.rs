//! Storage trait definitions.

use crate::blame::{BlameState, HunkDelta};
use crate::model::{
    BlameHunk, Commit, Direction, EdgeKind, FileNode, IndexMarker, Node, NodeRef, Repository,
    Stakeholder,
};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted blame state of the walk frontier of one `(repository, ref)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Blame state per processed commit that may still have unprocessed children
    pub commits: BTreeMap<String, BlameState>,
}

impl Checkpoint {
    pub fn shas(&self) -> impl Iterator<Item = &str> {
        self.commits.keys().map(|s| s.as_str())
    }
}

/// Node and edge counts of the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub repositories: usize,
    pub commits: usize,
    pub files: usize,
    pub blame_hunks: usize,
    pub stakeholders: usize,
    pub edges: usize,
}

/// Atomic per-commit graph mutation.
#[async_trait]
pub trait GraphWriter: Send + Sync {
    /// Apply one commit's changes as a single transaction.
    ///
    /// Upserts the commit, the touched `files` and the stakeholder, replaces
    /// the affected hunks (removed hunks are deleted, stored hunks overlapping
    /// an added one are truncated or dropped), writes the edges and moves
    /// `marker` to the commit. Nothing is applied on failure.
    async fn commit_transaction(
        &self,
        marker: &IndexMarker,
        commit: &Commit,
        delta: &HunkDelta,
        stakeholder: &Stakeholder,
        files: &[FileNode],
    ) -> Result<()>;
}

/// Read access to the persisted graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_commit(&self, sha: &str) -> Result<Option<Commit>>;

    async fn get_file(&self, path: &str) -> Result<Option<FileNode>>;

    async fn get_stakeholder(&self, key: &str) -> Result<Option<Stakeholder>>;

    /// Current hunks of a file ordered by start line.
    async fn hunks_in_file(&self, path: &str) -> Result<Vec<BlameHunk>>;

    /// Nodes connected to `from` through `edge`, sorted by natural key.
    async fn traverse(
        &self,
        from: &NodeRef,
        edge: EdgeKind,
        direction: Direction,
    ) -> Result<Vec<Node>>;

    async fn stats(&self) -> Result<GraphStats>;
}

/// Repository records, index markers and resume checkpoints.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Insert or update a repository. Markers are left untouched.
    async fn upsert_repository(&self, repository: &Repository) -> Result<()>;

    /// Repository with its per-ref markers.
    async fn get_repository(&self, key: &str) -> Result<Option<Repository>>;

    async fn load_checkpoint(&self, marker: &IndexMarker) -> Result<Option<Checkpoint>>;

    /// Replace the checkpoint of `marker`.
    async fn save_checkpoint(&self, marker: &IndexMarker, checkpoint: &Checkpoint) -> Result<()>;
}

/// Everything the indexer needs from storage.
pub trait IndexStore: GraphWriter + GraphStore + RepositoryStore {}

impl<T: GraphWriter + GraphStore + RepositoryStore> IndexStore for T {}
