//! Indexer configuration.

use crate::{Error, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by the server and the CLI.
#[derive(Debug, Clone, Args)]
pub struct IndexerConfig {
    /// Directory holding one mirror per `{owner}/{repo}`
    #[arg(long, env = "BLAMEGRAPH_PROJECTS_ROOT", default_value = ".blamegraph/projects")]
    pub projects_root: PathBuf,

    /// Owner of the base project forks are compared against
    #[arg(long, env = "BLAMEGRAPH_BASE_OWNER", default_value = "local")]
    pub base_owner: String,

    /// Name of the base project
    #[arg(long, env = "BLAMEGRAPH_BASE_NAME", default_value = "base")]
    pub base_name: String,

    /// Local path of the authoritative base repository, mirrored without network access
    #[arg(long, env = "BLAMEGRAPH_BASE_SOURCE")]
    pub base_source: Option<PathBuf>,

    /// Remote URL pattern for indexed projects
    #[arg(
        long,
        env = "BLAMEGRAPH_REMOTE_TEMPLATE",
        default_value = "https://github.com/{owner}/{repo}.git"
    )]
    pub remote_template: String,

    /// Ref indexed in each mirror
    #[arg(long, default_value = "HEAD")]
    pub git_ref: String,

    /// Upper bound for a single clone or fetch attempt
    #[arg(long, default_value = "120")]
    pub network_timeout_secs: u64,

    /// Retries after a failed clone or fetch
    #[arg(long, default_value = "3")]
    pub network_retries: usize,

    /// Initial retry backoff
    #[arg(long, default_value = "250")]
    pub retry_backoff_ms: u64,

    /// Commits between blame-state checkpoints
    #[arg(long, default_value = "256")]
    pub checkpoint_interval: usize,

    /// Minimum spacing between progress events
    #[arg(long, default_value = "200")]
    pub progress_interval_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from(".blamegraph/projects"),
            base_owner: "local".to_string(),
            base_name: "base".to_string(),
            base_source: None,
            remote_template: "https://github.com/{owner}/{repo}.git".to_string(),
            git_ref: "HEAD".to_string(),
            network_timeout_secs: 120,
            network_retries: 3,
            retry_backoff_ms: 250,
            checkpoint_interval: 256,
            progress_interval_ms: 200,
        }
    }
}

impl IndexerConfig {
    /// Mirror directory of a project.
    pub fn mirror_path(&self, owner: &str, repo: &str) -> PathBuf {
        self.projects_root.join(owner).join(repo)
    }

    /// Remote URL of a project.
    pub fn remote_url(&self, owner: &str, repo: &str) -> String {
        self.remote_template
            .replace("{owner}", owner)
            .replace("{repo}", repo)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Sanity-check values that would make indexing misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(Error::Config("checkpoint_interval must be positive".into()));
        }
        if self.network_timeout_secs == 0 {
            return Err(Error::Config("network_timeout_secs must be positive".into()));
        }
        if !self.remote_template.contains("{repo}") {
            return Err(Error::Config("remote_template must contain {repo}".into()));
        }
        validate_name(&self.base_owner)?;
        validate_name(&self.base_name)?;
        Ok(())
    }
}

/// Reject owner/repo names that would escape the projects root.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || Path::new(name).is_absolute();
    if bad {
        return Err(Error::InvalidRequest(format!("invalid name: {:?}", name)));
    }
    Ok(())
}
