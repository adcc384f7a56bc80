pub mod models;

use crate::progress::ProgressEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
pub use models::*;

/// Entry point shared by the HTTP trigger and the CLI.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Mirror and index `owner/repo` (plus the configured base project).
    async fn index_project(&self, owner: &str, repo: &str) -> Result<JobReport, JobFailure>;

    /// Progress events of every job run by this service.
    fn subscribe(&self) -> broadcast::Receiver<ProgressEvent>;
}
