//! Affiliation API handlers
//!
//! GET /members/:id/affiliation, PUT /members/:id/affiliations

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use crowd_common::events::CrowdEvent;
use serde::{Deserialize, Serialize};

use crate::{error::{ApiError, ApiResult}, models::SegmentAffiliationInput, AppState};

/// GET /members/:id/affiliation query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffiliationQuery {
    pub segment_id: String,
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

/// GET /members/:id/affiliation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffiliationResponse {
    pub member_id: String,
    pub segment_id: String,
    pub timestamp: DateTime<Utc>,
    /// `null` when the member is unaffiliated at that moment
    pub organization_id: Option<String>,
}

/// PUT /members/:id/affiliations request
#[derive(Debug, Deserialize)]
pub struct ReplaceAffiliationsRequest {
    pub affiliations: Vec<SegmentAffiliationInput>,
}

/// PUT /members/:id/affiliations response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceAffiliationsResponse {
    pub member_id: String,
    pub overrides: usize,
    pub activities_updated: u64,
}

/// GET /members/:id/affiliation
pub async fn get_affiliation(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    Query(query): Query<AffiliationQuery>,
) -> ApiResult<Json<AffiliationResponse>> {
    if query.segment_id.trim().is_empty() {
        return Err(ApiError::BadRequest("segmentId must not be empty".to_string()));
    }

    let timestamp = query.timestamp.unwrap_or_else(Utc::now);
    let organization_id = state
        .resolver
        .resolve_affiliation(&member_id, &query.segment_id, Some(timestamp))
        .await?;

    Ok(Json(AffiliationResponse {
        member_id,
        segment_id: query.segment_id,
        timestamp,
        organization_id,
    }))
}

/// PUT /members/:id/affiliations
///
/// Replaces all manual overrides of the member, then restamps its activities.
pub async fn replace_affiliations(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
    Json(request): Json<ReplaceAffiliationsRequest>,
) -> ApiResult<Json<ReplaceAffiliationsResponse>> {
    let overrides = request.affiliations.len();
    let activities_updated = state
        .resolver
        .replace_member_affiliations(&member_id, request.affiliations)
        .await?;

    state
        .event_bus
        .emit_lossy(CrowdEvent::MemberChanged {
            member_id: member_id.clone(),
            timestamp: Utc::now(),
        });

    tracing::info!(member_id = %member_id, overrides, activities_updated, "Manual affiliations replaced");

    Ok(Json(ReplaceAffiliationsResponse {
        member_id,
        overrides,
        activities_updated,
    }))
}

/// Build affiliation routes
pub fn affiliation_routes() -> Router<AppState> {
    Router::new()
        .route("/members/:id/affiliation", get(get_affiliation))
        .route("/members/:id/affiliations", put(replace_affiliations))
}
