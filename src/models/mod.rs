//! Data models for the OBC mission backend.
//!
//! Field names serialize in camelCase to match the mobile and web clients.

mod application;
mod courier;
mod mission;
mod notification;
mod stage;

pub use application::*;
pub use courier::*;
pub use mission::*;
pub use notification::*;
pub use stage::*;

use serde::{Deserialize, Serialize};

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}
