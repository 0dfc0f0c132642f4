//! Aggregate counters for the dashboard.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::models::event::OrgStats;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/dashboard/stats", get(dashboard_stats))
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct DashboardParams {
    pub org_id: Option<String>,
}

// ---------------------------------------------------------------------------
// GET /api/dashboard/stats?orgId=
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/dashboard/stats",
    tag = "Dashboard",
    security(("bearer" = [])),
    params(DashboardParams),
    responses(
        (status = 200, description = "Organization counters", body = OrgStats),
        (status = 400, description = "Missing orgId", body = crate::error::ApiErrorBody),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorBody),
        (status = 403, description = "Not a member of the organization", body = crate::error::ApiErrorBody),
    ),
)]
pub async fn dashboard_stats(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<Json<OrgStats>, ApiError> {
    let org_id = params
        .org_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("orgId parameter is required"))?;

    if !state.store.is_member(&user_id, &org_id).await? {
        return Err(ApiError::forbidden(
            "You do not have access to this organization",
        ));
    }

    let stats = state.store.org_stats(&org_id, Utc::now()).await?;
    Ok(Json(stats))
}
