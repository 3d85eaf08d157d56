//! Mission application model.

use serde::{Deserialize, Serialize};

use super::ServiceType;

/// Review state of an application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApplicationStatus::Pending),
            "approved" => Some(ApplicationStatus::Approved),
            "rejected" => Some(ApplicationStatus::Rejected),
            _ => None,
        }
    }
}

/// A courier's request to be assigned to a pending mission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionApplication {
    pub id: String,
    pub mission_id: String,
    pub mission_title: String,
    pub service_type: Vec<ServiceType>,
    pub obc_id: String,
    pub obc_name: String,
    pub obc_number: String,
    pub application_date: String,
    pub status: ApplicationStatus,
}

/// Request body for applying to a mission.
///
/// Name and OBC number are copied from the courier registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub obc_id: String,
}

/// Query parameters for listing applications.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationQuery {
    #[serde(default)]
    pub obc_id: Option<String>,
}

/// Outcome of an approval.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    pub application: MissionApplication,
    pub obc_ids: Vec<String>,
    pub mission_status: super::MissionStatus,
    /// False when the courier was already assigned and nothing changed
    pub newly_assigned: bool,
}
