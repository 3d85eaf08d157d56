//! Courier registry model.

use serde::{Deserialize, Serialize};

/// Onboarding state of a courier account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Approved,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "pending",
            RegistrationStatus::Approved => "approved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RegistrationStatus::Pending),
            "approved" => Some(RegistrationStatus::Approved),
            _ => None,
        }
    }
}

/// A registered on-board courier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Courier {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Assigned on approval.
    pub obc_number: Option<String>,
    pub registration_status: RegistrationStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Courier {
    pub fn is_approved(&self) -> bool {
        self.registration_status == RegistrationStatus::Approved
    }
}

/// Request body for registering a courier.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCourierRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Build an OBC number from the courier's initials and the last six digits
/// of a millisecond timestamp, e.g. "AML" + "123456".
pub fn obc_number(name: &str, now_millis: i64) -> String {
    let initials: String = name
        .split(' ')
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    let initials = if initials.is_empty() {
        "NA".to_string()
    } else {
        initials
    };

    let digits = now_millis.unsigned_abs().to_string();
    let tail = &digits[digits.len().saturating_sub(6)..];
    format!("{}{}", initials, tail)
}
