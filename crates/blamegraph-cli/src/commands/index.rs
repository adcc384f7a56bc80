//! Index command implementation.

use anyhow::Result;
use blamegraph_core::progress::PHASE_COMMITS;
use blamegraph_core::service::IndexService;
use blamegraph_core::storage::{GraphStore, SqliteStorage};
use blamegraph_core::{IndexerConfig, ProgressEvent};
use blamegraph_git::Orchestrator;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Run the index command.
pub async fn run(owner: String, repo: String, database: PathBuf, config: IndexerConfig) -> Result<()> {
    config.validate()?;
    println!("{} Indexing {}/{}", "→".blue(), owner, repo);

    let storage = Arc::new(SqliteStorage::new(&database)?);
    let orchestrator = Orchestrator::new(config, storage.clone());

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{} Interrupted, stopping after the current commit...", "⚠".yellow());
            cancel.cancel();
        }
    });

    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ProgressEvent::Progress { phases }) => {
                    if let Some(commits) = phases.get(PHASE_COMMITS) {
                        print!(
                            "\r{} Indexed {}/{} commits...",
                            "→".blue(),
                            commits.completed,
                            commits.total
                        );
                        let _ = std::io::stdout().flush();
                    }
                }
                Ok(event) if event.is_terminal() => break,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = orchestrator.index_project(&owner, &repo).await;
    printer.abort();
    println!();
    println!();

    let report = match result {
        Ok(report) => report,
        Err(failure) => {
            eprintln!("{} Indexing failed during {}: {}", "✗".red(), failure.phase, failure.error);
            return Err(failure.into());
        }
    };

    if report.cancelled {
        println!("{} Indexing cancelled", "⚠".yellow());
    } else {
        println!("{} Indexing complete!", "✓".green());
    }
    for marker in &report.markers {
        println!(
            "  {} @ {}: {}",
            marker.repository,
            marker.ref_name,
            marker.commit_sha.as_deref().unwrap_or("nothing indexed").magenta()
        );
    }
    println!("  Commits: {}", report.commits_indexed);
    println!("  Skipped files: {}", report.skipped_files);

    let stats = storage.stats().await?;
    println!("  Blame hunks: {}", stats.blame_hunks);
    println!("  Database: {}", database.display());

    Ok(())
}
