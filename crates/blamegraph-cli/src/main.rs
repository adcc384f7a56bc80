//! BlameGraph CLI
//!
//! Command-line interface for indexing repository history into a blame graph.

use anyhow::Result;
use blamegraph_core::IndexerConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "blamegraph")]
#[command(author, version, about = "Line-level history graph of your repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror and index a project
    Index {
        /// Project owner
        owner: String,

        /// Project name
        repo: String,

        /// Database path
        #[arg(short, long, default_value = ".blamegraph/graph.db")]
        database: PathBuf,

        #[command(flatten)]
        indexer: IndexerConfig,
    },

    /// Show graph statistics
    Stats {
        /// Database path
        #[arg(short, long, default_value = ".blamegraph/graph.db")]
        database: PathBuf,
    },

    /// Show the current line attribution of a file
    Blame {
        /// File path as stored in the graph
        path: String,

        /// Database path
        #[arg(short, long, default_value = ".blamegraph/graph.db")]
        database: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("blamegraph=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("blamegraph=info")
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Index {
            owner,
            repo,
            database,
            indexer,
        } => {
            commands::index::run(owner, repo, database, indexer).await?;
        }
        Commands::Stats { database } => {
            commands::stats::run(database).await?;
        }
        Commands::Blame { path, database } => {
            commands::blame::run(path, database).await?;
        }
    }

    Ok(())
}
