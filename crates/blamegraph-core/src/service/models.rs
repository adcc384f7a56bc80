use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stage of an indexing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    /// Resolving markers and mirroring repositories
    Resolving,
    /// Walking commit history
    Walking,
    /// Running commits through blame and the graph writer
    Indexing,
    /// Finalizing progress and checkpoints
    Reporting,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Resolving => "resolving",
            JobPhase::Walking => "walking",
            JobPhase::Indexing => "indexing",
            JobPhase::Reporting => "reporting",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one repository's ref stands after a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMarker {
    /// Repository key (`owner/name`)
    pub repository: String,
    pub ref_name: String,
    /// Last fully committed commit, if any
    pub commit_sha: Option<String>,
    pub commits_indexed: usize,
    pub skipped_files: usize,
}

/// Successful (or cleanly cancelled) job outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub markers: Vec<RepositoryMarker>,
    pub commits_indexed: usize,
    pub skipped_files: usize,
    pub cancelled: bool,
}

impl JobReport {
    /// Add a repository's marker to the totals.
    pub fn push(&mut self, marker: RepositoryMarker) {
        self.commits_indexed += marker.commits_indexed;
        self.skipped_files += marker.skipped_files;
        self.markers.push(marker);
    }
}

/// A job that stopped with an error.
#[derive(Debug, Error)]
#[error("{phase} failed: {error}")]
pub struct JobFailure {
    pub phase: JobPhase,
    #[source]
    pub error: Error,
}

impl JobFailure {
    pub fn new(phase: JobPhase, error: impl Into<Error>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let mut report = JobReport::default();
        for (repo, commits, skipped) in [("a/x", 3, 1), ("b/y", 2, 0)] {
            report.push(RepositoryMarker {
                repository: repo.into(),
                ref_name: "HEAD".into(),
                commit_sha: None,
                commits_indexed: commits,
                skipped_files: skipped,
            });
        }
        assert_eq!(report.commits_indexed, 5);
        assert_eq!(report.skipped_files, 1);
    }

    #[test]
    fn test_failure_message_names_phase() {
        let failure = JobFailure::new(JobPhase::Walking, Error::NotFound("ref HEAD".into()));
        assert_eq!(failure.to_string(), "walking failed: Not found: ref HEAD");
        assert_eq!(serde_json::to_value(JobPhase::Indexing).unwrap(), "indexing");
    }
}
