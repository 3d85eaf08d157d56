//! Mission model and the request bodies that act on it.

use serde::{Deserialize, Serialize};

use super::{GeoPoint, TimelineStage};

/// Lifecycle status of a mission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MissionStatus {
    Pending,
    Booked,
    Completed,
    Canceled,
    Postponed,
    Lost,
    Paid,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Pending => "Pending",
            MissionStatus::Booked => "Booked",
            MissionStatus::Completed => "Completed",
            MissionStatus::Canceled => "Canceled",
            MissionStatus::Postponed => "Postponed",
            MissionStatus::Lost => "Lost",
            MissionStatus::Paid => "Paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(MissionStatus::Pending),
            "Booked" => Some(MissionStatus::Booked),
            "Completed" => Some(MissionStatus::Completed),
            "Canceled" => Some(MissionStatus::Canceled),
            "Postponed" => Some(MissionStatus::Postponed),
            "Lost" => Some(MissionStatus::Lost),
            "Paid" => Some(MissionStatus::Paid),
            _ => None,
        }
    }
}

/// Kind of service a mission covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceType {
    #[serde(rename = "OBC")]
    Obc,
    #[serde(rename = "First Mile")]
    FirstMile,
    #[serde(rename = "Last Mile")]
    LastMile,
}

/// A courier job with its assignment state and progress timeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    pub title: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mission_date: Option<String>,
    pub service_type: Vec<ServiceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub obc_amount: i64,
    pub obc_ids: Vec<String>,
    pub status: MissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lost_reason: Option<String>,
    /// Always the full template, merged with stored progress
    pub timeline: Vec<TimelineStage>,
    pub created_at: String,
    pub updated_at: String,
    /// Internal version for optimistic concurrency control
    pub version: i64,
}

impl Mission {
    pub fn is_assigned(&self, obc_id: &str) -> bool {
        self.obc_ids.iter().any(|id| id == obc_id)
    }
}

/// Request body for publishing a new mission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMissionRequest {
    pub title: String,
    pub origin: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_obc_amount")]
    pub obc_amount: i64,
    #[serde(default)]
    pub mission_date: Option<String>,
    #[serde(default)]
    pub service_type: Vec<ServiceType>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_obc_amount() -> i64 {
    1
}

/// Request body for an admin status override.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub status: MissionStatus,
    #[serde(default)]
    pub lost_reason: Option<String>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Query parameters for listing missions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionQuery {
    #[serde(default)]
    pub status: Option<MissionStatus>,
}

/// Request body for completing or resetting a stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleStageRequest {
    /// Courier reporting the stage; their last known location is updated
    #[serde(default)]
    pub obc_id: Option<String>,
    /// Device position, absent when the device could not provide one
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for editing stage values ahead of or after completion.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStageRequest {
    #[serde(default)]
    pub amount_of_boxes: Option<u32>,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Which stage list an uploaded file URL is appended to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Attachment,
    Pod,
}

/// Request body for attaching already-uploaded files to a stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachFilesRequest {
    pub kind: AttachmentKind,
    pub urls: Vec<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Result of a stage toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageToggleResult {
    pub mission: Mission,
    pub stage: TimelineStage,
    /// Resolved location code, coordinate fallback, or `Location N/A`
    pub location_code: String,
}
