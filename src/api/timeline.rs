//! Timeline API endpoints.
//!
//! Completing a stage resolves the courier's position to a location code
//! once the write has landed; the lookup never fails the request.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;

use super::{error, parse_stage, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    AttachFilesRequest, Mission, StageToggleResult, TimelineStage, ToggleStageRequest,
    UpdateStageRequest,
};
use crate::timeline::{self, Timeline, LOCATION_UNAVAILABLE};
use crate::AppState;

/// GET /api/missions/:id/timeline - The full 23-stage timeline.
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<TimelineStage>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_mission(&id).await {
        Ok(Some(mission)) => success(mission.timeline, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Mission {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/missions/:id/timeline/:stage/toggle - Complete or reset a stage.
pub async fn toggle_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<ToggleStageRequest>,
) -> ApiResult<StageToggleResult> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let key = match parse_stage(&stage) {
        Ok(key) => key,
        Err(e) => return error(e, revision_id),
    };

    let location = request.location;
    let mut completed = false;

    let result = state
        .repo
        .update_timeline(&id, request.expected_version, |current, timeline| {
            let toggled = timeline.toggle(key, location, Utc::now(), current.status);
            completed = toggled.completed;
            Ok((toggled.timeline, toggled.status))
        })
        .await;

    match result {
        Ok(mission) => {
            // Only a completion records a position
            let location_code = if completed {
                timeline::resolve_location_code(state.geo.as_ref(), location).await
            } else {
                LOCATION_UNAVAILABLE.to_string()
            };

            if completed {
                if let (Some(obc_id), Some(point)) = (&request.obc_id, location) {
                    if let Err(e) = state
                        .repo
                        .upsert_courier_location(obc_id, point, &location_code)
                        .await
                    {
                        tracing::warn!("Failed to update courier location for {}: {}", obc_id, e);
                    }
                }
            }

            tracing::info!(
                mission_id = %id,
                stage = %key,
                completed,
                status = mission.status.as_str(),
                "Timeline stage toggled"
            );

            let stage = mission.timeline[key as usize].clone();
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(
                StageToggleResult {
                    mission,
                    stage,
                    location_code,
                },
                new_revision,
            )
        }
        Err(e) => error(e, revision_id),
    }
}

/// PATCH /api/missions/:id/timeline/:stage - Edit box count or ETA.
pub async fn update_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<UpdateStageRequest>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let key = match parse_stage(&stage) {
        Ok(key) => key,
        Err(e) => return error(e, revision_id),
    };

    if request.amount_of_boxes.is_none() && request.eta.is_none() {
        return error(
            AppError::Validation("Nothing to update: provide amountOfBoxes or eta".to_string()),
            revision_id,
        );
    }

    let result = state
        .repo
        .update_timeline(&id, request.expected_version, |current, mut timeline: Timeline| {
            if let Some(amount) = request.amount_of_boxes {
                timeline.set_amount_of_boxes(key, amount)?;
            }
            if let Some(eta) = &request.eta {
                timeline.set_eta(key, eta)?;
            }
            Ok((timeline, current.status))
        })
        .await;

    match result {
        Ok(mission) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(mission, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/missions/:id/timeline/:stage/attachments - Attach uploaded file URLs.
pub async fn attach_stage_files(
    State(state): State<AppState>,
    Path((id, stage)): Path<(String, String)>,
    Json(request): Json<AttachFilesRequest>,
) -> ApiResult<Mission> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let key = match parse_stage(&stage) {
        Ok(key) => key,
        Err(e) => return error(e, revision_id),
    };

    let result = state
        .repo
        .update_timeline(&id, request.expected_version, |current, mut timeline: Timeline| {
            timeline.attach(key, request.kind, &request.urls)?;
            Ok((timeline, current.status))
        })
        .await;

    match result {
        Ok(mission) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(mission, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
