//! In-app notification model.

use serde::{Deserialize, Serialize};

/// At most this many notifications are kept per user.
pub const NOTIFICATIONS_PER_USER: i64 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    MissionUpdate,
    Generic,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::MissionUpdate => "mission_update",
            NotificationType::Generic => "generic",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "mission_update" => NotificationType::MissionUpdate,
            _ => NotificationType::Generic,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub related_id: String,
    pub read: bool,
    pub created_at: String,
}

/// A notification waiting to be stored.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub message: String,
    pub kind: NotificationType,
    pub related_id: String,
}

/// Last reported position of a courier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourierLocation {
    pub obc_id: String,
    pub location: super::GeoPoint,
    pub location_code: String,
    pub updated_at: String,
}
