//! Mission status derivation.
//!
//! ```text
//! Pending ──approval fills capacity / stage completed──▶ Booked ──Delivered──▶ Completed
//!    │                                                    │
//!    └──────── admin: Lost(reason) | Canceled | Postponed ┘
//! ```
//!
//! `Paid` is reached only through the expense workflow, which lives elsewhere.

use crate::errors::AppError;
use crate::models::{MissionStatus, StageKey};

/// Statuses the timeline no longer moves.
fn is_closed(status: MissionStatus) -> bool {
    matches!(
        status,
        MissionStatus::Paid | MissionStatus::Lost | MissionStatus::Canceled
    )
}

/// Statuses an admin override cannot leave.
pub fn is_terminal(status: MissionStatus) -> bool {
    is_closed(status) || status == MissionStatus::Completed
}

/// Status after `stage` is marked complete.
pub fn after_stage_completed(current: MissionStatus, stage: StageKey) -> MissionStatus {
    if is_closed(current) {
        return current;
    }
    if stage.is_terminal() || current == MissionStatus::Completed {
        MissionStatus::Completed
    } else {
        MissionStatus::Booked
    }
}

/// Status after a stage is reset to its default.
///
/// Stays `Booked` even if no completed stage remains: progress status is sticky.
pub fn after_stage_reset(current: MissionStatus) -> MissionStatus {
    if is_closed(current) {
        current
    } else {
        MissionStatus::Booked
    }
}

/// Status after an approval brought the assignment to `assigned` couriers.
pub fn after_assignment(current: MissionStatus, assigned: usize, obc_amount: i64) -> MissionStatus {
    if assigned as i64 >= obc_amount && !is_terminal(current) {
        MissionStatus::Booked
    } else {
        current
    }
}

/// Validate an admin override and return the status and lost reason to store.
pub fn admin_override(
    current: MissionStatus,
    target: MissionStatus,
    lost_reason: Option<&str>,
) -> Result<(MissionStatus, Option<String>), AppError> {
    if is_terminal(current) {
        return Err(AppError::Validation(format!(
            "Mission status {} is final and cannot be changed",
            current.as_str()
        )));
    }

    match target {
        MissionStatus::Lost => {
            let reason = lost_reason.map(str::trim).filter(|r| !r.is_empty());
            match reason {
                Some(reason) => Ok((MissionStatus::Lost, Some(reason.to_string()))),
                None => Err(AppError::Validation(
                    "A reason is required to mark a mission as Lost".to_string(),
                )),
            }
        }
        MissionStatus::Canceled | MissionStatus::Postponed | MissionStatus::Booked => {
            Ok((target, None))
        }
        other => Err(AppError::Validation(format!(
            "Status {} cannot be set manually",
            other.as_str()
        ))),
    }
}
