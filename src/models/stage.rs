//! Timeline stage model: the fixed stage keys and their typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One checkpoint of the fixed mission progress template, in template order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKey {
    OnMyWayToAto,
    OnMyWayToPickup,
    ArrivalInAto,
    ArrivalInPickup,
    ReceivedGoods,
    OnMyWayToAtoAfterPickup,
    ArrivalInAtoAfterPickup,
    StartedCustomsClearance,
    FinishedCustomsClearance,
    OnMyWayToCheckIn,
    FinishedCheckIn,
    OnBoard,
    LandingInConnectingHub,
    OnMyWayToMigration,
    OnMyWayToCustoms,
    FinishedCustoms,
    CollectedAtConnectionHub,
    OnMyWayToConnectingFlight,
    OnBoardConnectingFlight,
    LandingFinalDestination,
    CollectedAtFinalDestination,
    OnMyWayToDeliver,
    Delivered,
}

impl StageKey {
    pub const COUNT: usize = 23;

    /// Every stage in template order.
    pub const ALL: [StageKey; StageKey::COUNT] = [
        StageKey::OnMyWayToAto,
        StageKey::OnMyWayToPickup,
        StageKey::ArrivalInAto,
        StageKey::ArrivalInPickup,
        StageKey::ReceivedGoods,
        StageKey::OnMyWayToAtoAfterPickup,
        StageKey::ArrivalInAtoAfterPickup,
        StageKey::StartedCustomsClearance,
        StageKey::FinishedCustomsClearance,
        StageKey::OnMyWayToCheckIn,
        StageKey::FinishedCheckIn,
        StageKey::OnBoard,
        StageKey::LandingInConnectingHub,
        StageKey::OnMyWayToMigration,
        StageKey::OnMyWayToCustoms,
        StageKey::FinishedCustoms,
        StageKey::CollectedAtConnectionHub,
        StageKey::OnMyWayToConnectingFlight,
        StageKey::OnBoardConnectingFlight,
        StageKey::LandingFinalDestination,
        StageKey::CollectedAtFinalDestination,
        StageKey::OnMyWayToDeliver,
        StageKey::Delivered,
    ];

    /// Persisted key. Stored mission documents depend on these exact strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::OnMyWayToAto => "On my way to ATO",
            StageKey::OnMyWayToPickup => "On my way to PU",
            StageKey::ArrivalInAto => "Arrival in ATO",
            StageKey::ArrivalInPickup => "Arrival in PU",
            StageKey::ReceivedGoods => "Received goods",
            StageKey::OnMyWayToAtoAfterPickup => "On my way to ATO after PU",
            StageKey::ArrivalInAtoAfterPickup => "Arrival in ATO after PU",
            StageKey::StartedCustomsClearance => "Started Customs Clearance",
            StageKey::FinishedCustomsClearance => "Finished Customs Clearance",
            StageKey::OnMyWayToCheckIn => "On my way to check in goods",
            StageKey::FinishedCheckIn => "Finished check-in",
            StageKey::OnBoard => "OBC and goods on board",
            StageKey::LandingInConnectingHub => "Landing in connecting Hub",
            StageKey::OnMyWayToMigration => "On my way to migration",
            StageKey::OnMyWayToCustoms => "On my way to Customs",
            StageKey::FinishedCustoms => "Finished Customs",
            StageKey::CollectedAtConnectionHub => "goods are collected connection Hub",
            StageKey::OnMyWayToConnectingFlight => "On my way to connecting flight",
            StageKey::OnBoardConnectingFlight => "OBC and goods on board connecting flight",
            StageKey::LandingFinalDestination => "Landing Final destination",
            StageKey::CollectedAtFinalDestination => "Goods are collected final destination",
            StageKey::OnMyWayToDeliver => "On my way to deliver",
            StageKey::Delivered => "Delivered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        StageKey::ALL.into_iter().find(|key| key.as_str() == s)
    }

    /// Display text. Always taken from here, never from stored data.
    pub fn label(&self) -> &'static str {
        match self {
            StageKey::CollectedAtConnectionHub => "Goods are collected connection Hub",
            other => other.as_str(),
        }
    }

    pub fn category(&self) -> StageCategory {
        match self {
            StageKey::ReceivedGoods => StageCategory::Receiving,
            StageKey::FinishedCheckIn | StageKey::OnBoard | StageKey::OnBoardConnectingFlight => {
                StageCategory::CheckIn
            }
            StageKey::FinishedCustoms => StageCategory::Customs,
            StageKey::OnMyWayToDeliver => StageCategory::EnRoute,
            StageKey::Delivered => StageCategory::Delivery,
            _ => StageCategory::Plain,
        }
    }

    /// Completing this stage completes the mission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageKey::Delivered)
    }
}

impl std::fmt::Display for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which payload shape a stage carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCategory {
    Receiving,
    CheckIn,
    Customs,
    EnRoute,
    Delivery,
    Plain,
}

/// Latitude/longitude pair reported by a courier device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Coordinate fallback used when no location code can be resolved.
    pub fn coordinate_label(&self) -> String {
        format!("Lat: {:.2}, Lon: {:.2}", self.lat, self.lng)
    }
}

/// Stage-specific data, selected by [`StageKey::category`].
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    Receiving {
        amount_of_boxes: u32,
        photo_urls: Vec<String>,
    },
    CheckIn {
        photo_urls: Vec<String>,
        attachment_urls: Vec<String>,
    },
    Customs {
        photo_urls: Vec<String>,
    },
    EnRoute {
        eta: Option<String>,
    },
    Delivery {
        photo_urls: Vec<String>,
        pod_url: Option<String>,
    },
    None,
}

impl StagePayload {
    /// Empty payload for a category.
    pub fn empty(category: StageCategory) -> Self {
        match category {
            StageCategory::Receiving => StagePayload::Receiving {
                amount_of_boxes: 0,
                photo_urls: Vec::new(),
            },
            StageCategory::CheckIn => StagePayload::CheckIn {
                photo_urls: Vec::new(),
                attachment_urls: Vec::new(),
            },
            StageCategory::Customs => StagePayload::Customs {
                photo_urls: Vec::new(),
            },
            StageCategory::EnRoute => StagePayload::EnRoute { eta: None },
            StageCategory::Delivery => StagePayload::Delivery {
                photo_urls: Vec::new(),
                pod_url: None,
            },
            StageCategory::Plain => StagePayload::None,
        }
    }

    /// Pick the fields of `category` out of a stored record, defaulting the rest.
    fn from_record(category: StageCategory, record: &StageRecord) -> Self {
        let photos = || record.photo_urls.clone().unwrap_or_default();
        match category {
            StageCategory::Receiving => StagePayload::Receiving {
                amount_of_boxes: record.amount_of_boxes.unwrap_or(0),
                photo_urls: photos(),
            },
            StageCategory::CheckIn => StagePayload::CheckIn {
                photo_urls: photos(),
                attachment_urls: record.attachment_urls.clone().unwrap_or_default(),
            },
            StageCategory::Customs => StagePayload::Customs {
                photo_urls: photos(),
            },
            StageCategory::EnRoute => StagePayload::EnRoute {
                eta: record.eta.clone().filter(|eta| !eta.is_empty()),
            },
            StageCategory::Delivery => StagePayload::Delivery {
                photo_urls: photos(),
                pod_url: record.pod_url.clone().filter(|url| !url.is_empty()),
            },
            StageCategory::Plain => StagePayload::None,
        }
    }

    fn write_into(&self, record: &mut StageRecord) {
        match self {
            StagePayload::Receiving {
                amount_of_boxes,
                photo_urls,
            } => {
                record.amount_of_boxes = Some(*amount_of_boxes);
                record.photo_urls = Some(photo_urls.clone());
            }
            StagePayload::CheckIn {
                photo_urls,
                attachment_urls,
            } => {
                record.photo_urls = Some(photo_urls.clone());
                record.attachment_urls = Some(attachment_urls.clone());
            }
            StagePayload::Customs { photo_urls } => {
                record.photo_urls = Some(photo_urls.clone());
            }
            StagePayload::EnRoute { eta } => {
                record.eta = eta.clone();
            }
            StagePayload::Delivery {
                photo_urls,
                pod_url,
            } => {
                record.photo_urls = Some(photo_urls.clone());
                record.pod_url = pod_url.clone();
            }
            StagePayload::None => {}
        }
    }
}

/// A stage of a mission's timeline, always keyed by the template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "StageRecord")]
pub struct TimelineStage {
    pub key: StageKey,
    pub completed: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub payload: StagePayload,
}

impl TimelineStage {
    /// Template default: pending, no timestamp, no location, empty payload.
    pub fn pending(key: StageKey) -> Self {
        Self {
            key,
            completed: false,
            timestamp: None,
            location: None,
            payload: StagePayload::empty(key.category()),
        }
    }

    /// Overlay a stored record on the template default for `key`.
    pub fn from_record(key: StageKey, record: &StageRecord) -> Self {
        Self {
            key,
            completed: record.completed,
            timestamp: record.timestamp,
            location: record.location,
            payload: StagePayload::from_record(key.category(), record),
        }
    }

    pub fn label(&self) -> &'static str {
        self.key.label()
    }
}

/// Stored and wire form of a stage.
///
/// Only the fields belonging to the stage's category are written out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_of_boxes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_url: Option<String>,
}

impl From<TimelineStage> for StageRecord {
    fn from(stage: TimelineStage) -> Self {
        let mut record = StageRecord {
            stage: stage.key.as_str().to_string(),
            label: stage.key.label().to_string(),
            completed: stage.completed,
            timestamp: stage.timestamp,
            location: stage.location,
            ..StageRecord::default()
        };
        stage.payload.write_into(&mut record);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_keys_round_trip_through_strings() {
        for key in StageKey::ALL {
            assert_eq!(StageKey::from_str(key.as_str()), Some(key));
        }
        assert_eq!(StageKey::from_str("Teleported"), None);
    }

    #[test]
    fn test_template_has_unique_keys() {
        let mut seen = std::collections::HashSet::new();
        for key in StageKey::ALL {
            assert!(seen.insert(key.as_str()), "duplicate stage {}", key);
        }
        assert_eq!(seen.len(), 23);
        assert_eq!(StageKey::ALL.last(), Some(&StageKey::Delivered));
    }

    #[test]
    fn test_label_differs_only_for_connection_hub() {
        assert_eq!(
            StageKey::CollectedAtConnectionHub.label(),
            "Goods are collected connection Hub"
        );
        assert_eq!(StageKey::Delivered.label(), "Delivered");
    }

    #[test]
    fn test_record_only_carries_category_fields() {
        let stage = TimelineStage::pending(StageKey::OnMyWayToDeliver);
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(json["stage"], "On my way to deliver");
        assert!(json.get("eta").is_none());
        assert!(json.get("photoUrls").is_none());
        assert!(json["timestamp"].is_null());

        let stage = TimelineStage::pending(StageKey::ReceivedGoods);
        let json = serde_json::to_value(&stage).unwrap();
        assert_eq!(json["amountOfBoxes"], 0);
        assert_eq!(json["photoUrls"], serde_json::json!([]));
        assert!(json.get("podUrl").is_none());
    }

    #[test]
    fn test_from_record_ignores_foreign_fields() {
        let record = StageRecord {
            stage: "Arrival in ATO".to_string(),
            completed: true,
            amount_of_boxes: Some(3),
            pod_url: Some("https://files/pod.pdf".to_string()),
            ..StageRecord::default()
        };
        let stage = TimelineStage::from_record(StageKey::ArrivalInAto, &record);
        assert!(stage.completed);
        assert_eq!(stage.payload, StagePayload::None);
    }

    #[test]
    fn test_coordinate_label() {
        let point = GeoPoint {
            lat: 19.4326,
            lng: -99.1332,
        };
        assert_eq!(point.coordinate_label(), "Lat: 19.43, Lon: -99.13");
    }
}
