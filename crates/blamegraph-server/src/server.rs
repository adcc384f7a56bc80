use crate::handlers::{health, index_project, progress, stats, traverse, AppState, SharedState};
use anyhow::Result;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use blamegraph_core::service::IndexService;
use blamegraph_core::storage::{GraphStore, SqliteStorage};
use blamegraph_core::IndexerConfig;
use blamegraph_git::Orchestrator;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/index-project", post(index_project))
        .route("/api/v1/progress", get(progress))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/graph/:collection/:key/:edge", get(traverse))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

pub async fn start(config: IndexerConfig, db_path: PathBuf, port: u16) -> Result<()> {
    config.validate()?;

    let storage = Arc::new(SqliteStorage::new(&db_path)?);
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(config, storage.clone()).with_cancellation(cancel.clone());

    let state = Arc::new(AppState {
        service: Arc::new(orchestrator) as Arc<dyn IndexService>,
        graph: storage as Arc<dyn GraphStore>,
    });
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("BlameGraph server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C after asking running jobs to stop.
async fn shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, never shut down on our own.
        std::future::pending::<()>().await;
    }
    info!("Shutting down, cancelling running jobs");
    cancel.cancel();
}
