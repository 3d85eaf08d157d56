//! Notification API endpoints.

use axum::extract::{Path, State};

use super::{error, success, ApiResult};
use crate::models::Notification;
use crate::AppState;

/// GET /api/users/:user_id/notifications - Newest first, at most ten.
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Notification>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_notifications(&user_id).await {
        Ok(notifications) => success(notifications, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/users/:user_id/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path((user_id, id)): Path<(String, String)>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.mark_notification_read(&user_id, &id).await {
        Ok(()) => success((), revision_id),
        Err(e) => error(e, revision_id),
    }
}
