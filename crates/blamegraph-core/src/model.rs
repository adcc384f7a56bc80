//! Graph node and edge types.

use crate::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A repository known to the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    /// Local mirror directory
    pub local_path: String,
    pub remote_url: String,
    /// Last indexed commit per ref name
    pub last_indexed: BTreeMap<String, String>,
}

impl Repository {
    /// Create a repository that has not been indexed yet.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        local_path: impl Into<String>,
        remote_url: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            local_path: local_path.into(),
            remote_url: remote_url.into(),
            last_indexed: BTreeMap::new(),
        }
    }

    /// Identity key in `owner/name` form.
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A git commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Full commit hash (40 hex characters)
    pub sha: String,
    /// Full commit message
    pub message: String,
    /// Author in "Name <email>" format
    pub signature: String,
    /// Author timestamp
    pub date: DateTime<Utc>,
    /// Parent hashes, first parent first
    pub parents: Vec<String>,
    /// Lines last edited per author signature, as of this commit
    #[serde(default)]
    pub lines_per_author: BTreeMap<String, u64>,
}

impl Commit {
    /// Short commit hash (7 characters).
    pub fn short_sha(&self) -> &str {
        &self.sha[..7.min(self.sha.len())]
    }

    /// First line of the message.
    pub fn message_header(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A file, identified by its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    /// Language label from the classifier, if any
    pub language: Option<String>,
}

/// A contiguous line range `[start, end)` of a file attributed to one commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlameHunk {
    pub path: String,
    pub start: usize,
    pub end: usize,
    pub commit_sha: String,
}

impl BlameHunk {
    pub fn new(path: impl Into<String>, start: usize, end: usize, commit_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            start,
            end,
            commit_sha: commit_sha.into(),
        }
    }

    /// Storage key derived from `(path, start, end)`.
    pub fn key(&self) -> String {
        ContentHash::hunk_key(&self.path, self.start, self.end).to_hex()
    }

    /// Number of lines covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A normalized author identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakeholder {
    /// Normalized signature
    pub key: String,
    /// Display signature as last seen
    pub signature: String,
    /// Lines currently attributed to this stakeholder's commits
    pub lines: u64,
}

impl Stakeholder {
    /// Build a stakeholder from a raw signature. Line totals are maintained by storage.
    pub fn from_signature(signature: &str) -> Self {
        Self {
            key: normalize_signature(signature),
            signature: signature.trim().to_string(),
            lines: 0,
        }
    }
}

/// Normalize a `Name <email>` signature into a stakeholder key.
///
/// The lower-cased email wins when present; otherwise the lower-cased name
/// with runs of whitespace collapsed.
pub fn normalize_signature(signature: &str) -> String {
    let signature = signature.trim();
    if let (Some(open), Some(close)) = (signature.rfind('<'), signature.rfind('>')) {
        if open < close {
            let email = signature[open + 1..close].trim();
            if !email.is_empty() {
                return email.to_lowercase();
            }
        }
    }
    let name = signature.split('<').next().unwrap_or("");
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Node collections of the persisted graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Commits,
    Files,
    BlameHunks,
    Stakeholders,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Commits => "commits",
            Collection::Files => "files",
            Collection::BlameHunks => "blameHunks",
            Collection::Stakeholders => "stakeholders",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "commits" => Some(Collection::Commits),
            "files" => Some(Collection::Files),
            "blameHunks" => Some(Collection::BlameHunks),
            "stakeholders" => Some(Collection::Stakeholders),
            _ => None,
        }
    }
}

/// Kind of relationship between graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Commit introduces a blame hunk
    #[serde(rename = "commits-blameHunks")]
    CommitBlameHunk,
    /// Blame hunk belongs to a file
    #[serde(rename = "blameHunks-files")]
    BlameHunkFile,
    /// Commit authored by a stakeholder
    #[serde(rename = "commits-stakeholders")]
    CommitStakeholder,
}

impl EdgeKind {
    /// Get the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::CommitBlameHunk => "commits-blameHunks",
            EdgeKind::BlameHunkFile => "blameHunks-files",
            EdgeKind::CommitStakeholder => "commits-stakeholders",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "commits-blameHunks" => Some(EdgeKind::CommitBlameHunk),
            "blameHunks-files" => Some(EdgeKind::BlameHunkFile),
            "commits-stakeholders" => Some(EdgeKind::CommitStakeholder),
            _ => None,
        }
    }

    /// `(from, to)` collections of the edge.
    pub fn endpoints(&self) -> (Collection, Collection) {
        match self {
            EdgeKind::CommitBlameHunk => (Collection::Commits, Collection::BlameHunks),
            EdgeKind::BlameHunkFile => (Collection::BlameHunks, Collection::Files),
            EdgeKind::CommitStakeholder => (Collection::Commits, Collection::Stakeholders),
        }
    }
}

/// Traversal direction along an edge collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Reference to a node by collection and natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub collection: Collection,
    pub key: String,
}

impl NodeRef {
    pub fn commit(sha: impl Into<String>) -> Self {
        Self { collection: Collection::Commits, key: sha.into() }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self { collection: Collection::Files, key: path.into() }
    }

    pub fn hunk(key: impl Into<String>) -> Self {
        Self { collection: Collection::BlameHunks, key: key.into() }
    }

    pub fn stakeholder(key: impl Into<String>) -> Self {
        Self { collection: Collection::Stakeholders, key: key.into() }
    }
}

/// A node returned from a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "camelCase")]
pub enum Node {
    Commit(Commit),
    File(FileNode),
    BlameHunk(BlameHunk),
    Stakeholder(Stakeholder),
}

/// Outcome of ensuring a local mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorOutcome {
    Cloned,
    Fetched,
    UpToDate,
}

impl fmt::Display for MirrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MirrorOutcome::Cloned => "cloned",
            MirrorOutcome::Fetched => "fetched",
            MirrorOutcome::UpToDate => "up to date",
        };
        f.write_str(s)
    }
}

/// Where a commit transaction records its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMarker {
    /// Repository key (`owner/name`)
    pub repository: String,
    pub ref_name: String,
}
