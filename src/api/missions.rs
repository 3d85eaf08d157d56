//! Mission API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateMissionRequest, Mission, MissionQuery, MissionStatus, StatusChangeRequest};
use crate::AppState;

/// GET /api/missions - List missions, optionally filtered by status.
pub async fn list_missions(
    State(state): State<AppState>,
    Query(query): Query<MissionQuery>,
) -> ApiResult<Vec<Mission>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_missions(query.status).await {
        Ok(missions) => success(missions, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/missions/pending - Missions open for applications.
pub async fn list_pending_missions(State(state): State<AppState>) -> ApiResult<Vec<Mission>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_missions(Some(MissionStatus::Pending)).await {
        Ok(missions) => success(missions, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/missions/:id - Get a single mission.
pub async fn get_mission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_mission(&id).await {
        Ok(Some(mission)) => success(mission, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Mission {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/missions - Publish a new mission.
pub async fn create_mission(
    State(state): State<AppState>,
    Json(request): Json<CreateMissionRequest>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    // Validate required fields
    if request.title.trim().is_empty() {
        return error(
            AppError::Validation("Title is required".to_string()),
            revision_id,
        );
    }
    if request.origin.trim().is_empty() {
        return error(
            AppError::Validation("Origin is required".to_string()),
            revision_id,
        );
    }
    if request.obc_amount < 1 {
        return error(
            AppError::Validation("obcAmount must be at least 1".to_string()),
            revision_id,
        );
    }

    match state.repo.create_mission(&request).await {
        Ok(mission) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(mission, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/missions/:id/status - Admin status override.
pub async fn change_mission_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.change_mission_status(&id, &request).await {
        Ok(mission) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(mission, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
