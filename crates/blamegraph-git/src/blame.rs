//! Reference blame computed by libgit2.
//!
//! Used to cross-check the incremental engine on real repositories.

use crate::repository::{GitError, GitRepository, Result};
use blamegraph_core::BlameHunk;
use git2::{BlameOptions, Oid};
use std::path::Path;

impl GitRepository {
    /// Blame `path` as of commit `sha`, as coalesced 0-based hunks.
    pub fn blame_file(&self, path: &str, sha: &str) -> Result<Vec<BlameHunk>> {
        let oid = Oid::from_str(sha).map_err(|_| GitError::InvalidCommit(sha.to_string()))?;
        let mut opts = BlameOptions::new();
        opts.newest_commit(oid);
        let blame = self.inner().blame_file(Path::new(path), Some(&mut opts))?;

        let mut hunks: Vec<BlameHunk> = Vec::new();
        for hunk in blame.iter() {
            let start = hunk.final_start_line().saturating_sub(1);
            let end = start + hunk.lines_in_hunk();
            let commit = hunk.final_commit_id().to_string();
            match hunks.last_mut() {
                Some(last) if last.end == start && last.commit_sha == commit => last.end = end,
                _ => hunks.push(BlameHunk::new(path, start, end, commit)),
            }
        }
        Ok(hunks)
    }
}
