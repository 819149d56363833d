//! Merge and unmerge API handlers
//!
//! POST /merges, GET /merges/:id, POST /unmerges

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use crowd_common::events::EntityKind;
use serde::{Deserialize, Serialize};

use crate::{error::{ApiError, ApiResult}, models::MergeStatus, AppState};

/// POST /merges request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMergeRequest {
    #[serde(rename = "type")]
    pub entity: EntityKind,
    pub primary_id: String,
    pub secondary_id: String,
    pub action_by: Option<String>,
}

/// POST /unmerges request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUnmergeRequest {
    pub primary_id: String,
    pub secondary_id: String,
    pub action_by: Option<String>,
}

/// POST /merges and POST /unmerges response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeAcceptedResponse {
    pub merge_action_id: String,
}

/// POST /merges
///
/// Records the merge (or reopens a failed one) and runs the steps in the
/// background. Returns 202 Accepted; poll GET /merges/:id for progress.
pub async fn start_merge(
    State(state): State<AppState>,
    Json(request): Json<StartMergeRequest>,
) -> ApiResult<(StatusCode, Json<MergeAcceptedResponse>)> {
    let merge_action_id = state
        .merges
        .begin_merge(
            request.entity,
            &request.primary_id,
            &request.secondary_id,
            request.action_by.as_deref(),
        )
        .await?;

    let merges = state.merges.clone();
    let action_id = merge_action_id.clone();
    tokio::spawn(async move {
        tracing::info!(merge_action_id = %action_id, "Background merge task started");

        if let Err(e) = merges.execute_merge(&action_id).await {
            tracing::error!(
                merge_action_id = %action_id,
                error = %e,
                "Background merge task failed"
            );
        }
    });

    Ok((StatusCode::ACCEPTED, Json(MergeAcceptedResponse { merge_action_id })))
}

/// GET /merges/:id
pub async fn get_merge_status(
    State(state): State<AppState>,
    Path(merge_action_id): Path<String>,
) -> ApiResult<Json<MergeStatus>> {
    let status = state
        .merges
        .get_merge_status(&merge_action_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Merge action not found: {}", merge_action_id)))?;
    Ok(Json(status))
}

/// POST /unmerges
pub async fn start_unmerge(
    State(state): State<AppState>,
    Json(request): Json<StartUnmergeRequest>,
) -> ApiResult<Json<MergeAcceptedResponse>> {
    let merge_action_id = state
        .unmerges
        .start_unmerge(
            &request.primary_id,
            &request.secondary_id,
            request.action_by.as_deref(),
        )
        .await?;
    Ok(Json(MergeAcceptedResponse { merge_action_id }))
}

/// Build merge routes
pub fn merge_routes() -> Router<AppState> {
    Router::new()
        .route("/merges", post(start_merge))
        .route("/merges/:id", get(get_merge_status))
        .route("/unmerges", post(start_unmerge))
}
