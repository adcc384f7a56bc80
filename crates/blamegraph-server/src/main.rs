use anyhow::Result;
use blamegraph_core::IndexerConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blamegraph-server")]
#[command(author, version, about = "BlameGraph HTTP API Server", long_about = None)]
struct Cli {
    /// Database path
    #[arg(short, long, default_value = ".blamegraph/graph.db")]
    database: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Verbose output
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(flatten)]
    indexer: IndexerConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "blamegraph_server=debug,blamegraph=debug,tower_http=debug"
    } else {
        "blamegraph_server=info,blamegraph=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    blamegraph_server::start(cli.indexer, cli.database, cli.port).await
}
