//! BlameGraph Git Integration
//!
//! Mirrors repositories, walks their history parent-before-child and drives
//! the blame engine and graph writer through the [`Orchestrator`].

pub mod blame;
pub mod commit;
pub mod diff;
pub mod indexer;
pub mod mirror;
pub mod repository;
pub mod walker;

pub use commit::convert_commit;
pub use diff::commit_diff;
pub use indexer::{Orchestrator, RepoSpec};
pub use mirror::{GitMirror, MirrorOptions, RepoMirror};
pub use repository::{GitError, GitRepository};
pub use walker::CommitWalker;
