//! BlameGraph Core Library
//!
//! Core types, the incremental blame engine, progress reporting and graph
//! storage for the BlameGraph history indexer.

pub mod blame;
pub mod config;
pub mod content_hash;
pub mod error;
pub mod language;
pub mod model;
pub mod progress;
pub mod service;
pub mod storage;

pub use blame::{apply_commit, BlameOutcome, BlameState, CommitDiff, FileBlame, HunkDelta};
pub use config::IndexerConfig;
pub use content_hash::ContentHash;
pub use error::{Error, Result};
pub use language::{ExtensionClassifier, Language, LanguageClassifier};
pub use model::{
    BlameHunk, Collection, Commit, Direction, EdgeKind, FileNode, IndexMarker, MirrorOutcome,
    Node, NodeRef, Repository, Stakeholder,
};
pub use progress::{ProgressEvent, ProgressReporter};
