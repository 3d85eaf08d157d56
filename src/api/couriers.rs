//! Courier registry and courier-scoped API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    Courier, CourierLocation, Mission, NewNotification, NotificationType, RegisterCourierRequest,
};
use crate::AppState;

/// POST /api/couriers - Register a courier pending approval.
pub async fn register_courier(
    State(state): State<AppState>,
    Json(request): Json<RegisterCourierRequest>,
) -> ApiResult<Courier> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.id.trim().is_empty() {
        return error(AppError::Validation("id is required".to_string()), revision_id);
    }
    if request.name.trim().is_empty() {
        return error(AppError::Validation("name is required".to_string()), revision_id);
    }

    match state.repo.register_courier(&request).await {
        Ok(courier) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(courier, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/couriers/pending - Registrations awaiting approval.
pub async fn list_pending_couriers(State(state): State<AppState>) -> ApiResult<Vec<Courier>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_pending_couriers().await {
        Ok(couriers) => success(couriers, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/couriers/:obc_id - Courier profile.
pub async fn get_courier(
    State(state): State<AppState>,
    Path(obc_id): Path<String>,
) -> ApiResult<Courier> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_courier(&obc_id).await {
        Ok(Some(courier)) => success(courier, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Courier {} not found", obc_id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/couriers/:obc_id/approve - Approve a registration and assign its OBC number.
pub async fn approve_courier(
    State(state): State<AppState>,
    Path(obc_id): Path<String>,
) -> ApiResult<Courier> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.approve_courier(&obc_id).await {
        Ok(courier) => {
            let welcome = NewNotification {
                user_id: courier.id.clone(),
                message: format!(
                    "Welcome aboard, {}! Your OBC number is {}.",
                    courier.name,
                    courier.obc_number.as_deref().unwrap_or("N/A")
                ),
                kind: NotificationType::Generic,
                related_id: courier.id.clone(),
            };
            // Best effort; the approval already landed
            if let Err(e) = state.repo.add_notification(&welcome).await {
                tracing::warn!("Failed to send welcome notification to {}: {}", courier.id, e);
            }

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(courier, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/couriers/:obc_id/missions - Missions assigned to a courier, Booked first.
pub async fn list_courier_missions(
    State(state): State<AppState>,
    Path(obc_id): Path<String>,
) -> ApiResult<Vec<Mission>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_missions_for_courier(&obc_id).await {
        Ok(missions) => success(missions, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/couriers/:obc_id/active-mission - The Booked or Completed mission, or null.
pub async fn get_active_mission(
    State(state): State<AppState>,
    Path(obc_id): Path<String>,
) -> ApiResult<Option<Mission>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.active_mission_for_courier(&obc_id).await {
        Ok(mission) => success(mission, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/couriers/:obc_id/location - Last reported position.
pub async fn get_courier_location(
    State(state): State<AppState>,
    Path(obc_id): Path<String>,
) -> ApiResult<CourierLocation> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_courier_location(&obc_id).await {
        Ok(Some(location)) => success(location, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("No location reported for courier {}", obc_id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}
