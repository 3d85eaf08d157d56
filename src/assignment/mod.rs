//! Assignment engine.
//!
//! Decides what an approval does to a mission. The repository runs the
//! decision inside a version-checked transaction and re-plans when another
//! approval got there first, so the capacity check always sees the latest
//! `obc_ids`.

use crate::errors::AppError;
use crate::models::{Mission, MissionStatus};
use crate::status;

/// How many times an approval re-reads the mission after losing a race.
pub const MAX_APPROVAL_ATTEMPTS: usize = 16;

/// What approving one courier does to the mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalPlan {
    /// Courier already assigned; only the application is marked approved.
    AlreadyAssigned,
    /// Append the courier and write the new assignment state.
    Assign {
        obc_ids: Vec<String>,
        status: MissionStatus,
    },
}

/// Plan the approval of `obc_id` for `mission`.
pub fn plan_approval(mission: &Mission, obc_id: &str) -> Result<ApprovalPlan, AppError> {
    if mission.is_assigned(obc_id) {
        return Ok(ApprovalPlan::AlreadyAssigned);
    }

    if mission.obc_ids.len() as i64 >= mission.obc_amount {
        return Err(AppError::CapacityExceeded {
            mission_id: mission.id.clone(),
            obc_amount: mission.obc_amount,
        });
    }

    let mut obc_ids = mission.obc_ids.clone();
    obc_ids.push(obc_id.to_string());
    let status = status::after_assignment(mission.status, obc_ids.len(), mission.obc_amount);

    Ok(ApprovalPlan::Assign { obc_ids, status })
}

/// A courier may apply only to a pending mission.
pub fn check_open_for_applications(mission: &Mission) -> Result<(), AppError> {
    if mission.status != MissionStatus::Pending {
        return Err(AppError::Validation(format!(
            "Mission {} is {} and no longer accepts applications",
            mission.id,
            mission.status.as_str()
        )));
    }
    Ok(())
}

/// An active mission is one the courier is assigned to that is Booked or Completed.
pub fn is_active_for(mission: &Mission, obc_id: &str) -> bool {
    mission.is_assigned(obc_id)
        && matches!(
            mission.status,
            MissionStatus::Booked | MissionStatus::Completed
        )
}
