use blamegraph_core::service::JobPhase;
use blamegraph_core::{Direction, Node};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct IndexProjectRequest {
    pub owner: String,
    pub project: String,
}

/// Empty success payload.
#[derive(Debug, Default, Serialize)]
pub struct IndexProjectResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<JobPhase>,
}

#[derive(Debug, Deserialize)]
pub struct TraverseQuery {
    pub direction: Option<Direction>,
}

#[derive(Debug, Serialize)]
pub struct TraverseResponse {
    pub nodes: Vec<Node>,
}
