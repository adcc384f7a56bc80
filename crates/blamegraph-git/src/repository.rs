//! Git repository wrapper.

use crate::commit::convert_commit;
use crate::diff::commit_diff;
use blamegraph_core::{Commit, CommitDiff, Error as CoreError};
use git2::{ErrorClass, ErrorCode, Oid, Repository};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from git operations.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Repository not found at {0}")]
    NotFound(PathBuf),

    #[error("Unknown ref: {0}")]
    InvalidRef(String),

    #[error("Invalid commit: {0}")]
    InvalidCommit(String),
}

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;

impl From<GitError> for CoreError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Git(e) => classify(e),
            GitError::NotFound(path) => {
                CoreError::Disk(format!("no repository at {}", path.display()))
            }
            GitError::InvalidRef(name) => CoreError::NotFound(format!("ref {}", name)),
            GitError::InvalidCommit(sha) => CoreError::NotFound(format!("commit {}", sha)),
        }
    }
}

/// Map a libgit2 error onto the indexer's error taxonomy.
pub fn classify(err: git2::Error) -> CoreError {
    let message = err.message().to_string();
    let lower = message.to_lowercase();
    if matches!(err.code(), ErrorCode::Auth | ErrorCode::Certificate)
        || lower.contains("authentication")
        || lower.contains("401")
        || lower.contains("403")
    {
        return CoreError::Auth(message);
    }
    if lower.contains("failed to connect")
        || lower.contains("connection refused")
        || lower.contains("failed to resolve address")
        || lower.contains("timed out")
    {
        return CoreError::Network(message);
    }
    match (err.class(), err.code()) {
        (ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl, _) => {
            CoreError::Network(message)
        }
        // Transfer aborted by our deadline callback
        (_, ErrorCode::User) => CoreError::Network(message),
        (_, ErrorCode::NotFound) => CoreError::NotFound(message),
        (
            ErrorClass::Os
            | ErrorClass::Filesystem
            | ErrorClass::Repository
            | ErrorClass::Odb
            | ErrorClass::Index,
            _,
        ) => CoreError::Disk(message),
        _ => CoreError::Other(anyhow::Error::new(err)),
    }
}

/// Wrapper around a (usually bare) mirror repository.
pub struct GitRepository {
    repo: Repository,
    path: PathBuf,
}

impl GitRepository {
    /// Open the repository at exactly the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(GitError::NotFound(path));
        }
        let repo = Repository::open(&path)?;
        Ok(Self { repo, path })
    }

    /// Repository path as given to [`GitRepository::open`].
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a ref name (`HEAD`, a branch, a tag or a sha) to a commit id.
    pub fn resolve_ref(&self, name: &str) -> Result<Oid> {
        let object = if name == "HEAD" {
            self.repo
                .head()
                .map_err(|_| GitError::InvalidRef(name.to_string()))?
                .peel_to_commit()?
                .into_object()
        } else {
            self.repo
                .revparse_single(name)
                .map_err(|_| GitError::InvalidRef(name.to_string()))?
                .peel(git2::ObjectType::Commit)?
        };
        Ok(object.id())
    }

    /// Whether `sha` names a commit present in the repository.
    pub fn contains(&self, sha: &str) -> bool {
        Oid::from_str(sha)
            .ok()
            .and_then(|oid| self.repo.find_commit(oid).ok())
            .is_some()
    }

    /// Get a commit by its hash.
    pub fn get_commit(&self, sha: &str) -> Result<Commit> {
        let commit = self.find_commit(sha)?;
        Ok(convert_commit(&commit))
    }

    /// Diffs of a commit against each of its parents.
    pub fn diff_commit(&self, sha: &str) -> Result<CommitDiff> {
        let commit = self.find_commit(sha)?;
        commit_diff(&self.repo, &commit)
    }

    fn find_commit(&self, sha: &str) -> Result<git2::Commit<'_>> {
        let oid = Oid::from_str(sha).map_err(|_| GitError::InvalidCommit(sha.to_string()))?;
        self.repo
            .find_commit(oid)
            .map_err(|_| GitError::InvalidCommit(sha.to_string()))
    }

    /// Get the underlying git2 repository.
    pub fn inner(&self) -> &Repository {
        &self.repo
    }
}
