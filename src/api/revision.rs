//! Revision API endpoint.

use axum::extract::State;

use super::{error, success, ApiResult};
use crate::models::RevisionInfo;
use crate::AppState;

/// GET /api/revision - Current revision, for cheap change polling.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    match state.repo.get_revision_info().await {
        Ok(info) => {
            let revision_id = info.revision_id;
            success(info, revision_id)
        }
        Err(e) => error(e, 0),
    }
}
