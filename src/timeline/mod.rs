//! Timeline engine.
//!
//! A mission's progress is the fixed 23-stage template overlaid with whatever
//! the store holds. Everything here is pure: callers load the stored records,
//! apply one change and persist the resulting timeline and status in a single
//! write.

use chrono::{DateTime, Utc};

use crate::errors::AppError;
use crate::geo::LocationLookup;
use crate::models::{
    AttachmentKind, GeoPoint, Mission, MissionStatus, StageKey, StagePayload, StageRecord, TimelineStage,
};
use crate::status;

/// Location code reported when the device sent no coordinates.
pub const LOCATION_UNAVAILABLE: &str = "Location N/A";

/// The complete ordered timeline of one mission.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    stages: Vec<TimelineStage>,
}

/// Result of toggling one stage.
#[derive(Debug, Clone)]
pub struct Toggled {
    pub timeline: Timeline,
    pub status: MissionStatus,
    /// True when the stage was completed, false when it was reset
    pub completed: bool,
}

impl Timeline {
    /// Template only, every stage pending.
    pub fn template() -> Self {
        Self {
            stages: StageKey::ALL.into_iter().map(TimelineStage::pending).collect(),
        }
    }

    /// Merge stored progress over the template.
    ///
    /// Always yields all 23 stages in template order. For each key the last
    /// stored record wins over the default, except the label. Records with
    /// unknown keys are dropped.
    pub fn build(persisted: &[StageRecord]) -> Self {
        let stages = StageKey::ALL
            .into_iter()
            .map(|key| {
                persisted
                    .iter()
                    .rev()
                    .find(|record| record.stage == key.as_str())
                    .map(|record| TimelineStage::from_record(key, record))
                    .unwrap_or_else(|| TimelineStage::pending(key))
            })
            .collect();
        Self { stages }
    }

    /// Timeline of a loaded mission.
    pub fn from_mission(mission: &Mission) -> Self {
        let records: Vec<StageRecord> = mission
            .timeline
            .iter()
            .cloned()
            .map(StageRecord::from)
            .collect();
        Self::build(&records)
    }

    pub fn stages(&self) -> &[TimelineStage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<TimelineStage> {
        self.stages
    }

    pub fn stage(&self, key: StageKey) -> &TimelineStage {
        &self.stages[key as usize]
    }

    fn stage_mut(&mut self, key: StageKey) -> &mut TimelineStage {
        &mut self.stages[key as usize]
    }

    /// Stored form, one record per stage.
    pub fn to_records(&self) -> Vec<StageRecord> {
        self.stages.iter().cloned().map(StageRecord::from).collect()
    }

    /// Complete an incomplete stage, or reset a completed one.
    ///
    /// Completing keeps whatever payload was entered beforehand. Resetting
    /// restores the template default, dropping timestamp, location and payload.
    pub fn toggle(
        &self,
        key: StageKey,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
        current: MissionStatus,
    ) -> Toggled {
        let mut timeline = self.clone();
        let stage = timeline.stage_mut(key);

        if stage.completed {
            *stage = TimelineStage::pending(key);
            Toggled {
                timeline,
                status: status::after_stage_reset(current),
                completed: false,
            }
        } else {
            stage.completed = true;
            stage.timestamp = Some(now);
            stage.location = location;
            Toggled {
                timeline,
                status: status::after_stage_completed(current, key),
                completed: true,
            }
        }
    }

    pub fn set_amount_of_boxes(&mut self, key: StageKey, amount: u32) -> Result<(), AppError> {
        match &mut self.stage_mut(key).payload {
            StagePayload::Receiving {
                amount_of_boxes, ..
            } => {
                *amount_of_boxes = amount;
                Ok(())
            }
            _ => Err(unsupported(key, "an amount of boxes")),
        }
    }

    /// Set or clear (empty string) the delivery ETA.
    pub fn set_eta(&mut self, key: StageKey, value: &str) -> Result<(), AppError> {
        match &mut self.stage_mut(key).payload {
            StagePayload::EnRoute { eta } => {
                let value = value.trim();
                *eta = (!value.is_empty()).then(|| value.to_string());
                Ok(())
            }
            _ => Err(unsupported(key, "an ETA")),
        }
    }

    /// Append uploaded file URLs to the stage. A POD replaces the previous one.
    pub fn attach(
        &mut self,
        key: StageKey,
        kind: AttachmentKind,
        urls: &[String],
    ) -> Result<(), AppError> {
        let urls: Vec<String> = urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if urls.is_empty() {
            return Err(AppError::Validation(
                "At least one file URL is required".to_string(),
            ));
        }

        match (&mut self.stage_mut(key).payload, kind) {
            (
                StagePayload::Receiving { photo_urls, .. }
                | StagePayload::CheckIn { photo_urls, .. }
                | StagePayload::Customs { photo_urls }
                | StagePayload::Delivery { photo_urls, .. },
                AttachmentKind::Photo,
            ) => photo_urls.extend(urls),
            (StagePayload::CheckIn { attachment_urls, .. }, AttachmentKind::Attachment) => {
                attachment_urls.extend(urls)
            }
            (StagePayload::Delivery { pod_url, .. }, AttachmentKind::Pod) => {
                *pod_url = urls.into_iter().next();
            }
            (_, kind) => {
                let what = match kind {
                    AttachmentKind::Photo => "photos",
                    AttachmentKind::Attachment => "attachments",
                    AttachmentKind::Pod => "a proof of delivery",
                };
                return Err(unsupported(key, what));
            }
        }
        Ok(())
    }
}

fn unsupported(key: StageKey, what: &str) -> AppError {
    AppError::Validation(format!("Stage '{}' does not take {}", key, what))
}

/// Resolve the code recorded for a courier position.
///
/// Never fails: a lookup error falls back to the coordinates, and a missing
/// position to [`LOCATION_UNAVAILABLE`].
pub async fn resolve_location_code(lookup: &dyn LocationLookup, point: Option<GeoPoint>) -> String {
    let Some(point) = point else {
        return LOCATION_UNAVAILABLE.to_string();
    };

    match lookup.location_code(point).await {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!(
                lat = point.lat,
                lng = point.lng,
                "Location lookup failed, using coordinates: {}",
                e
            );
            point.coordinate_label()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{DisabledLookup, StaticLookup};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn mexico_city() -> GeoPoint {
        GeoPoint {
            lat: 19.4361,
            lng: -99.0719,
        }
    }

    #[test]
    fn test_stage_index_matches_template_order() {
        for (index, key) in StageKey::ALL.into_iter().enumerate() {
            assert_eq!(key as usize, index);
        }
    }

    #[test]
    fn test_build_from_empty_yields_full_template() {
        let timeline = Timeline::build(&[]);
        assert_eq!(timeline.stages().len(), 23);
        assert_eq!(timeline, Timeline::template());
        assert!(timeline.stages().iter().all(|s| !s.completed));
    }

    #[test]
    fn test_build_keeps_template_order_and_labels() {
        let persisted = vec![
            StageRecord {
                stage: "Delivered".to_string(),
                label: "Old delivered label".to_string(),
                completed: true,
                timestamp: Some(now()),
                pod_url: Some("https://files/pod.pdf".to_string()),
                ..StageRecord::default()
            },
            StageRecord {
                stage: "goods are collected connection Hub".to_string(),
                label: "stale".to_string(),
                completed: true,
                ..StageRecord::default()
            },
            StageRecord {
                stage: "Beamed up".to_string(),
                completed: true,
                ..StageRecord::default()
            },
        ];

        let timeline = Timeline::build(&persisted);
        let keys: Vec<StageKey> = timeline.stages().iter().map(|s| s.key).collect();
        assert_eq!(keys, StageKey::ALL.to_vec());

        let delivered = timeline.stage(StageKey::Delivered);
        assert!(delivered.completed);
        assert_eq!(delivered.label(), "Delivered");
        assert_eq!(
            delivered.payload,
            StagePayload::Delivery {
                photo_urls: vec![],
                pod_url: Some("https://files/pod.pdf".to_string()),
            }
        );

        let records = timeline.to_records();
        assert_eq!(records[16].label, "Goods are collected connection Hub");
        assert!(records[16].completed);
        assert_eq!(
            timeline.stages().iter().filter(|s| s.completed).count(),
            2
        );
    }

    #[test]
    fn test_build_takes_last_record_for_duplicate_key() {
        let persisted = vec![
            StageRecord {
                stage: "Delivered".to_string(),
                completed: false,
                ..StageRecord::default()
            },
            StageRecord {
                stage: "Delivered".to_string(),
                completed: true,
                timestamp: Some(now()),
                ..StageRecord::default()
            },
        ];

        let timeline = Timeline::build(&persisted);
        let delivered = timeline.stage(StageKey::Delivered);
        assert!(delivered.completed);
        assert_eq!(delivered.timestamp, Some(now()));
    }

    #[test]
    fn test_build_is_restartable_from_its_own_records() {
        let mut timeline = Timeline::template();
        timeline
            .set_amount_of_boxes(StageKey::ReceivedGoods, 4)
            .unwrap();
        let toggled = timeline.toggle(
            StageKey::ReceivedGoods,
            Some(mexico_city()),
            now(),
            MissionStatus::Booked,
        );

        let rebuilt = Timeline::build(&toggled.timeline.to_records());
        assert_eq!(rebuilt, toggled.timeline);
    }

    #[test]
    fn test_complete_received_goods_keeps_boxes_and_books() {
        let mut timeline = Timeline::template();
        timeline
            .set_amount_of_boxes(StageKey::ReceivedGoods, 5)
            .unwrap();

        let toggled = timeline.toggle(
            StageKey::ReceivedGoods,
            Some(mexico_city()),
            now(),
            MissionStatus::Pending,
        );
        assert!(toggled.completed);
        assert_eq!(toggled.status, MissionStatus::Booked);

        let stage = toggled.timeline.stage(StageKey::ReceivedGoods);
        assert!(stage.completed);
        assert_eq!(stage.timestamp, Some(now()));
        assert_eq!(stage.location, Some(mexico_city()));
        assert_eq!(
            stage.payload,
            StagePayload::Receiving {
                amount_of_boxes: 5,
                photo_urls: vec![],
            }
        );

        // Resetting drops the boxes and leaves the mission Booked.
        let reset = toggled.timeline.toggle(
            StageKey::ReceivedGoods,
            None,
            now(),
            toggled.status,
        );
        assert!(!reset.completed);
        assert_eq!(reset.status, MissionStatus::Booked);
        assert_eq!(
            reset.timeline.stage(StageKey::ReceivedGoods),
            &TimelineStage::pending(StageKey::ReceivedGoods)
        );
    }

    #[test]
    fn test_reset_twice_equals_reset_once() {
        let timeline = Timeline::template()
            .toggle(StageKey::FinishedCheckIn, None, now(), MissionStatus::Booked)
            .timeline;
        let once = timeline
            .toggle(StageKey::FinishedCheckIn, None, now(), MissionStatus::Booked)
            .timeline;

        // A second reset goes through completion first, then back to default.
        let completed_again = once
            .toggle(StageKey::FinishedCheckIn, None, now(), MissionStatus::Booked)
            .timeline;
        let twice = completed_again
            .toggle(StageKey::FinishedCheckIn, None, now(), MissionStatus::Booked)
            .timeline;

        assert_eq!(once, twice);
        assert_eq!(once, Timeline::template());
    }

    #[test]
    fn test_delivered_completes_mission() {
        let toggled =
            Timeline::template().toggle(StageKey::Delivered, None, now(), MissionStatus::Booked);
        assert_eq!(toggled.status, MissionStatus::Completed);
        let stage = toggled.timeline.stage(StageKey::Delivered);
        assert!(stage.completed);
        assert!(stage.location.is_none());
    }

    #[test]
    fn test_stages_toggle_out_of_order() {
        let toggled = Timeline::template().toggle(
            StageKey::LandingFinalDestination,
            None,
            now(),
            MissionStatus::Pending,
        );
        assert_eq!(toggled.status, MissionStatus::Booked);
        assert_eq!(
            toggled
                .timeline
                .stages()
                .iter()
                .filter(|s| s.completed)
                .count(),
            1
        );
    }

    #[test]
    fn test_eta_may_be_set_before_completion() {
        let mut timeline = Timeline::template();
        timeline
            .set_eta(StageKey::OnMyWayToDeliver, "2024-05-02T10:30")
            .unwrap();
        let stage = timeline.stage(StageKey::OnMyWayToDeliver);
        assert!(!stage.completed);
        assert_eq!(
            stage.payload,
            StagePayload::EnRoute {
                eta: Some("2024-05-02T10:30".to_string())
            }
        );

        timeline.set_eta(StageKey::OnMyWayToDeliver, "").unwrap();
        assert_eq!(
            timeline.stage(StageKey::OnMyWayToDeliver).payload,
            StagePayload::EnRoute { eta: None }
        );
    }

    #[test]
    fn test_payload_edits_rejected_on_wrong_stage() {
        let mut timeline = Timeline::template();
        let before = timeline.clone();

        assert!(matches!(
            timeline.set_amount_of_boxes(StageKey::Delivered, 3),
            Err(AppError::Validation(_))
        ));
        assert!(timeline.set_eta(StageKey::ReceivedGoods, "tomorrow").is_err());
        assert!(timeline
            .attach(
                StageKey::FinishedCustoms,
                AttachmentKind::Attachment,
                &["https://files/a.pdf".to_string()]
            )
            .is_err());
        assert!(timeline
            .attach(
                StageKey::ArrivalInAto,
                AttachmentKind::Photo,
                &["https://files/p.jpg".to_string()]
            )
            .is_err());

        assert_eq!(timeline, before);
    }

    #[test]
    fn test_attach_appends_photos_and_replaces_pod() {
        let mut timeline = Timeline::template();
        timeline
            .attach(
                StageKey::Delivered,
                AttachmentKind::Photo,
                &["https://files/1.jpg".to_string()],
            )
            .unwrap();
        timeline
            .attach(
                StageKey::Delivered,
                AttachmentKind::Photo,
                &["https://files/2.jpg".to_string(), " ".to_string()],
            )
            .unwrap();
        timeline
            .attach(
                StageKey::Delivered,
                AttachmentKind::Pod,
                &["https://files/pod-1.pdf".to_string()],
            )
            .unwrap();
        timeline
            .attach(
                StageKey::Delivered,
                AttachmentKind::Pod,
                &[
                    "https://files/pod-2.pdf".to_string(),
                    "https://files/ignored.pdf".to_string(),
                ],
            )
            .unwrap();

        assert_eq!(
            timeline.stage(StageKey::Delivered).payload,
            StagePayload::Delivery {
                photo_urls: vec![
                    "https://files/1.jpg".to_string(),
                    "https://files/2.jpg".to_string()
                ],
                pod_url: Some("https://files/pod-2.pdf".to_string()),
            }
        );
    }

    #[test]
    fn test_attach_requires_urls() {
        let mut timeline = Timeline::template();
        let err = timeline
            .attach(StageKey::FinishedCheckIn, AttachmentKind::Photo, &[])
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_location_code_prefers_lookup() {
        let lookup = StaticLookup::new("MEX");
        let code = resolve_location_code(&lookup, Some(mexico_city())).await;
        assert_eq!(code, "MEX");
    }

    #[tokio::test]
    async fn test_location_code_falls_back_to_coordinates() {
        let code = resolve_location_code(&DisabledLookup, Some(mexico_city())).await;
        assert_eq!(code, "Lat: 19.44, Lon: -99.07");
    }

    #[tokio::test]
    async fn test_location_code_without_position() {
        let code = resolve_location_code(&StaticLookup::new("MEX"), None).await;
        assert_eq!(code, LOCATION_UNAVAILABLE);
    }
}
