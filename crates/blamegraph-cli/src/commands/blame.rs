//! Blame command implementation.

use anyhow::Result;
use blamegraph_core::storage::{GraphStore, SqliteStorage};
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Run the blame command.
pub async fn run(path: String, database: PathBuf) -> Result<()> {
    if !database.exists() {
        eprintln!("{} Database not found: {}", "✗".red(), database.display());
        eprintln!("  Run 'blamegraph index <owner> <repo>' first to build the graph");
        return Ok(());
    }

    let storage = SqliteStorage::new(&database)?;
    let hunks = storage.hunks_in_file(&path).await?;

    if hunks.is_empty() {
        match storage.get_file(&path).await? {
            Some(_) => println!("{} {} has no current lines", "⚠".yellow(), path),
            None => println!("{} No file {} in the graph", "⚠".yellow(), path),
        }
        return Ok(());
    }

    println!("{} {}", "→".blue(), path.bold());
    println!();

    let mut commits = HashMap::new();
    for hunk in &hunks {
        if !commits.contains_key(&hunk.commit_sha) {
            let commit = storage.get_commit(&hunk.commit_sha).await?;
            commits.insert(hunk.commit_sha.clone(), commit);
        }
        let commit = commits.get(&hunk.commit_sha).and_then(Option::as_ref);

        let lines = format!("{:>5}-{:<5}", hunk.start + 1, hunk.end);
        let sha = &hunk.commit_sha[..7.min(hunk.commit_sha.len())];
        match commit {
            Some(commit) => println!(
                "{} {} {} {} {}",
                lines.cyan(),
                sha.magenta(),
                commit.date.format("%Y-%m-%d"),
                commit.signature,
                commit.message_header().dimmed()
            ),
            None => println!("{} {}", lines.cyan(), sha.magenta()),
        }
    }

    let total: usize = hunks.iter().map(|h| h.len()).sum();
    println!();
    println!("  {} line(s) in {} hunk(s) from {} commit(s)", total, hunks.len(), commits.len());

    Ok(())
}
