//! Mission application API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    ApplicationQuery, ApplyRequest, ApprovalResult, MissionApplication, NewNotification,
    NotificationType,
};
use crate::AppState;

/// GET /api/applications - List applications, optionally for one courier.
pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ApplicationQuery>,
) -> ApiResult<Vec<MissionApplication>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_applications(&query).await {
        Ok(applications) => success(applications, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/missions/:id/applications - Apply to a pending mission as an approved courier.
pub async fn apply_for_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
    Json(request): Json<ApplyRequest>,
) -> ApiResult<MissionApplication> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.obc_id.trim().is_empty() {
        return error(
            AppError::Validation("obcId is required".to_string()),
            revision_id,
        );
    }

    match state.repo.create_application(&mission_id, &request).await {
        Ok(application) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(application, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/missions/:id/applications/:obc_id - Withdraw a pending application.
pub async fn withdraw_application(
    State(state): State<AppState>,
    Path((mission_id, obc_id)): Path<(String, String)>,
) -> ApiResult<bool> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.withdraw_application(&mission_id, &obc_id).await {
        Ok(removed) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(removed, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/applications/:id/approve - Assign the applicant if there is room.
pub async fn approve_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApprovalResult> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.approve_application(&id).await {
        Ok(result) => {
            let application = &result.application;
            notify_courier(
                &state,
                application,
                format!(
                    "Your application for mission '{}' has been approved.",
                    application.mission_title
                ),
            )
            .await;

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(result, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/applications/:id/reject - Reject an application.
pub async fn reject_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MissionApplication> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.reject_application(&id).await {
        Ok(application) => {
            notify_courier(
                &state,
                &application,
                format!(
                    "Your application for mission '{}' has been rejected.",
                    application.mission_title
                ),
            )
            .await;

            tracing::info!(application_id = %id, "Application rejected");

            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(application, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// Best-effort notification; failures are logged and never fail the request.
async fn notify_courier(state: &AppState, application: &MissionApplication, message: String) {
    let notification = NewNotification {
        user_id: application.obc_id.clone(),
        message,
        kind: NotificationType::MissionUpdate,
        related_id: application.mission_id.clone(),
    };

    if let Err(e) = state.repo.add_notification(&notification).await {
        tracing::warn!(
            "Failed to notify courier {} about application {}: {}",
            application.obc_id,
            application.id,
            e
        );
    }
}
