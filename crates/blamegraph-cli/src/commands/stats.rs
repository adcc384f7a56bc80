//! Stats command implementation.

use anyhow::Result;
use blamegraph_core::storage::{GraphStore, SqliteStorage};
use colored::Colorize;
use std::path::PathBuf;

/// Run the stats command.
pub async fn run(database: PathBuf) -> Result<()> {
    // Check if database exists
    if !database.exists() {
        eprintln!(
            "{} Database not found: {}",
            "✗".red(),
            database.display()
        );
        eprintln!("Run 'blamegraph index <owner> <repo>' first to build the graph.");
        return Ok(());
    }

    println!("{} Graph Statistics", "→".blue());
    println!();

    let storage = SqliteStorage::new(&database)?;
    let stats = storage.stats().await?;

    let file_size = std::fs::metadata(&database)?.len();
    let size_mb = file_size as f64 / (1024.0 * 1024.0);

    println!("  Database: {}", database.display());
    println!("  Repositories: {}", stats.repositories);
    println!("  Commits: {}", stats.commits.to_string().green());
    println!("  Files: {}", stats.files);
    println!("  Blame hunks: {}", stats.blame_hunks.to_string().green());
    println!("  Stakeholders: {}", stats.stakeholders);
    println!("  Edges: {}", stats.edges);
    println!("  Database size: {:.2} MB", size_mb);

    Ok(())
}
