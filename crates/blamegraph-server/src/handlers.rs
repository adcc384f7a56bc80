use crate::models::{
    ErrorResponse, IndexProjectRequest, IndexProjectResponse, TraverseQuery, TraverseResponse,
};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Extension, Json};
use blamegraph_core::config::validate_name;
use blamegraph_core::service::{IndexService, JobPhase};
use blamegraph_core::storage::{GraphStats, GraphStore};
use blamegraph_core::{Collection, Direction, EdgeKind, Error, NodeRef};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub struct AppState {
    pub service: Arc<dyn IndexService>,
    pub graph: Arc<dyn GraphStore>,
}

pub type SharedState = Arc<AppState>;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString, phase: Option<JobPhase>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            phase,
        }),
    )
}

fn status_of(error: &Error) -> StatusCode {
    match error {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn index_project(
    Extension(state): Extension<SharedState>,
    Json(req): Json<IndexProjectRequest>,
) -> Result<Json<IndexProjectResponse>, ApiError> {
    for name in [&req.owner, &req.project] {
        validate_name(name)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e, Some(JobPhase::Resolving)))?;
    }

    info!("Index request for {}/{}", req.owner, req.project);
    match state.service.index_project(&req.owner, &req.project).await {
        Ok(report) if report.cancelled => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            Error::Cancelled.kind(),
            Some(JobPhase::Indexing),
        )),
        Ok(_) => Ok(Json(IndexProjectResponse::default())),
        Err(failure) => {
            warn!("Index request for {}/{} failed: {}", req.owner, req.project, failure);
            let status = match failure.error {
                Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(api_error(status, &failure.error, Some(failure.phase)))
        }
    }
}

/// Server-sent progress events of every job started after subscribing.
pub async fn progress(
    Extension(state): Extension<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.service.subscribe();
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    let sse = Event::default().event(event.name()).data(data);
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Progress subscriber lagged, {} event(s) dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn traverse(
    Extension(state): Extension<SharedState>,
    Path((collection, key, edge)): Path<(String, String, String)>,
    Query(query): Query<TraverseQuery>,
) -> Result<Json<TraverseResponse>, ApiError> {
    let collection = Collection::from_str(&collection).ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, format!("unknown collection: {}", collection), None)
    })?;
    let edge = EdgeKind::from_str(&edge)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("unknown edge: {}", edge), None))?;
    let direction = query.direction.unwrap_or(Direction::Outbound);

    let from = NodeRef { collection, key };
    let nodes = state
        .graph
        .traverse(&from, edge, direction)
        .await
        .map_err(|e| api_error(status_of(&e), e, None))?;
    Ok(Json(TraverseResponse { nodes }))
}

pub async fn stats(Extension(state): Extension<SharedState>) -> Result<Json<GraphStats>, ApiError> {
    let stats = state
        .graph
        .stats()
        .await
        .map_err(|e| api_error(status_of(&e), e, None))?;
    Ok(Json(stats))
}
