//! Database repository for mission, application, courier and notification records.
//!
//! Mission writes are conditional on the row version; approvals additionally
//! re-plan and retry when a concurrent approval won the race.

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::assignment::{self, ApprovalPlan, MAX_APPROVAL_ATTEMPTS};
use crate::errors::AppError;
use crate::models::{
    obc_number, ApplicationQuery, ApplicationStatus, ApplyRequest, ApprovalResult, Courier,
    CourierLocation, CreateMissionRequest, GeoPoint, Mission, MissionApplication, MissionStatus,
    NewNotification, Notification, NotificationType, RegisterCourierRequest, RegistrationStatus,
    RevisionInfo, StageRecord, StatusChangeRequest, NOTIFICATIONS_PER_USER,
};
use crate::status;
use crate::timeline::Timeline;

const MISSION_COLUMNS: &str = "id, title, origin, destination, description, mission_date, \
     service_type, created_by, obc_amount, obc_ids, status, lost_reason, timeline, \
     created_at, updated_at, version";

const COURIER_COLUMNS: &str =
    "id, name, email, obc_number, registration_status, created_at, updated_at";

const APPLICATION_COLUMNS: &str = "id, mission_id, mission_title, service_type, obc_id, \
     obc_name, obc_number, application_date, status";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    // ==================== MISSION OPERATIONS ====================

    /// List missions, newest mission date first, optionally by status.
    pub async fn list_missions(
        &self,
        status: Option<MissionStatus>,
    ) -> Result<Vec<Mission>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {MISSION_COLUMNS} FROM missions WHERE status = ? \
                     ORDER BY mission_date IS NULL, mission_date DESC, created_at DESC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {MISSION_COLUMNS} FROM missions \
                     ORDER BY mission_date IS NULL, mission_date DESC, created_at DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(mission_from_row).collect()
    }

    /// Get a mission by ID.
    pub async fn get_mission(&self, id: &str) -> Result<Option<Mission>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {MISSION_COLUMNS} FROM missions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mission_from_row).transpose()
    }

    /// Publish a new mission with an untouched timeline.
    pub async fn create_mission(&self, request: &CreateMissionRequest) -> Result<Mission, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let timeline = Timeline::template();
        let timeline_json = serde_json::to_string(&timeline.to_records())?;
        let service_type_json = serde_json::to_string(&request.service_type)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO missions (
                id, title, origin, destination, description, mission_date, service_type,
                created_by, obc_amount, obc_ids, status, lost_reason, timeline,
                created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', ?, NULL, ?, ?, ?, 1)"#,
        )
        .bind(&id)
        .bind(request.title.trim())
        .bind(request.origin.trim())
        .bind(&request.destination)
        .bind(&request.description)
        .bind(&request.mission_date)
        .bind(&service_type_json)
        .bind(&request.created_by)
        .bind(request.obc_amount)
        .bind(MissionStatus::Pending.as_str())
        .bind(&timeline_json)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(mission_id = %id, obc_amount = request.obc_amount, "Mission published");

        Ok(Mission {
            id,
            title: request.title.trim().to_string(),
            origin: request.origin.trim().to_string(),
            destination: request.destination.clone(),
            description: request.description.clone(),
            mission_date: request.mission_date.clone(),
            service_type: request.service_type.clone(),
            created_by: request.created_by.clone(),
            obc_amount: request.obc_amount,
            obc_ids: Vec::new(),
            status: MissionStatus::Pending,
            lost_reason: None,
            timeline: timeline.into_stages(),
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        })
    }

    /// Apply an admin status override.
    pub async fn change_mission_status(
        &self,
        id: &str,
        request: &StatusChangeRequest,
    ) -> Result<Mission, AppError> {
        let existing = self.require_mission(id).await?;
        check_expected_version(&existing, request.expected_version)?;

        let (status, lost_reason) = status::admin_override(
            existing.status,
            request.status,
            request.lost_reason.as_deref(),
        )?;

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE missions SET status = ?, lost_reason = ?, updated_at = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(status.as_str())
        .bind(&lost_reason)
        .bind(&now)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.concurrent_modification(id).await);
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(
            mission_id = %id,
            from = existing.status.as_str(),
            to = status.as_str(),
            "Mission status overridden"
        );

        Ok(Mission {
            status,
            lost_reason,
            updated_at: now,
            version: existing.version + 1,
            ..existing
        })
    }

    /// Read-modify-write of a mission's timeline and status.
    ///
    /// `change` receives the loaded mission and its merged timeline and
    /// returns the timeline and status to store. Nothing is written if it
    /// fails or if the mission changed since it was read.
    pub async fn update_timeline<F>(
        &self,
        id: &str,
        expected_version: Option<i64>,
        change: F,
    ) -> Result<Mission, AppError>
    where
        F: FnOnce(&Mission, Timeline) -> Result<(Timeline, MissionStatus), AppError>,
    {
        let existing = self.require_mission(id).await?;
        check_expected_version(&existing, expected_version)?;

        let (timeline, status) = change(&existing, Timeline::from_mission(&existing))?;
        let timeline_json = serde_json::to_string(&timeline.to_records())?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE missions SET timeline = ?, status = ?, updated_at = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(&timeline_json)
        .bind(status.as_str())
        .bind(&now)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.concurrent_modification(id).await);
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        Ok(Mission {
            status,
            timeline: timeline.into_stages(),
            updated_at: now,
            version: existing.version + 1,
            ..existing
        })
    }

    /// Missions a courier is assigned to, Booked ones first.
    pub async fn list_missions_for_courier(&self, obc_id: &str) -> Result<Vec<Mission>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MISSION_COLUMNS} FROM missions \
             WHERE EXISTS (SELECT 1 FROM json_each(missions.obc_ids) WHERE json_each.value = ?) \
             ORDER BY mission_date IS NULL, mission_date DESC, created_at DESC"
        ))
        .bind(obc_id)
        .fetch_all(&self.pool)
        .await?;

        let mut missions = rows
            .iter()
            .map(mission_from_row)
            .collect::<Result<Vec<Mission>, AppError>>()?;
        // Stable sort keeps date order within each group
        missions.sort_by_key(|m| m.status != MissionStatus::Booked);
        Ok(missions)
    }

    /// The mission a courier is currently working, if any.
    pub async fn active_mission_for_courier(&self, obc_id: &str) -> Result<Option<Mission>, AppError> {
        let missions = self.list_missions_for_courier(obc_id).await?;
        Ok(missions
            .into_iter()
            .find(|m| assignment::is_active_for(m, obc_id)))
    }

    async fn require_mission(&self, id: &str) -> Result<Mission, AppError> {
        self.get_mission(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Mission {} not found", id)))
    }

    async fn concurrent_modification(&self, id: &str) -> AppError {
        let current = self.get_mission(id).await.ok().flatten();
        AppError::VersionMismatch {
            message: "Concurrent modification detected".to_string(),
            current_version: current.map(|m| m.version).unwrap_or(0),
        }
    }

    // ==================== APPLICATION OPERATIONS ====================

    /// List applications, newest first, optionally for one courier.
    pub async fn list_applications(
        &self,
        query: &ApplicationQuery,
    ) -> Result<Vec<MissionApplication>, AppError> {
        let rows = match &query.obc_id {
            Some(obc_id) => {
                sqlx::query(&format!(
                    "SELECT {APPLICATION_COLUMNS} FROM mission_applications WHERE obc_id = ? \
                     ORDER BY application_date DESC"
                ))
                .bind(obc_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {APPLICATION_COLUMNS} FROM mission_applications \
                     ORDER BY application_date DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(application_from_row).collect())
    }

    /// Get an application by ID.
    pub async fn get_application(&self, id: &str) -> Result<Option<MissionApplication>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM mission_applications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(application_from_row))
    }

    /// Record a courier's application to a pending mission.
    pub async fn create_application(
        &self,
        mission_id: &str,
        request: &ApplyRequest,
    ) -> Result<MissionApplication, AppError> {
        let obc_id = request.obc_id.trim();
        let courier = self.require_approved_courier(obc_id).await?;

        let mission = self.require_mission(mission_id).await?;
        assignment::check_open_for_applications(&mission)?;

        if let Some(active) = self.active_mission_for_courier(obc_id).await? {
            return Err(AppError::Conflict(format!(
                "Courier {} is already on mission {}",
                obc_id, active.id
            )));
        }

        let application = MissionApplication {
            id: uuid::Uuid::new_v4().to_string(),
            mission_id: mission.id.clone(),
            mission_title: mission.title.clone(),
            service_type: mission.service_type.clone(),
            obc_id: courier.id,
            obc_name: courier.name,
            obc_number: courier.obc_number.unwrap_or_else(|| "N/A".to_string()),
            application_date: Utc::now().to_rfc3339(),
            status: ApplicationStatus::Pending,
        };
        let service_type_json = serde_json::to_string(&application.service_type)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO mission_applications ({APPLICATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&application.id)
        .bind(&application.mission_id)
        .bind(&application.mission_title)
        .bind(&service_type_json)
        .bind(&application.obc_id)
        .bind(&application.obc_name)
        .bind(&application.obc_number)
        .bind(&application.application_date)
        .bind(application.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| already_applied(e, &application.obc_id, mission_id))?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(
            application_id = %application.id,
            mission_id = %mission_id,
            obc_id = %application.obc_id,
            "Courier applied to mission"
        );

        Ok(application)
    }

    /// Approve an application, assigning the courier if there is room.
    ///
    /// The mission update only lands if the version read for planning is still
    /// current; otherwise the read, the capacity check and the write run
    /// again. Two approvals can therefore never both take the last slot.
    pub async fn approve_application(&self, id: &str) -> Result<ApprovalResult, AppError> {
        for attempt in 1..=MAX_APPROVAL_ATTEMPTS {
            let application = self
                .get_application(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;
            let mission = self.require_mission(&application.mission_id).await?;

            let plan = assignment::plan_approval(&mission, &application.obc_id)?;

            let mut tx = self.pool.begin().await?;

            let (obc_ids, mission_status, newly_assigned) = match plan {
                ApprovalPlan::AlreadyAssigned => (mission.obc_ids.clone(), mission.status, false),
                ApprovalPlan::Assign { obc_ids, status } => {
                    let obc_ids_json = serde_json::to_string(&obc_ids)?;
                    let result = sqlx::query(
                        "UPDATE missions SET obc_ids = ?, status = ?, updated_at = ?, \
                         version = version + 1 WHERE id = ? AND version = ?",
                    )
                    .bind(&obc_ids_json)
                    .bind(status.as_str())
                    .bind(Utc::now().to_rfc3339())
                    .bind(&mission.id)
                    .bind(mission.version)
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() == 0 {
                        tx.rollback().await?;
                        tracing::debug!(
                            application_id = %id,
                            mission_id = %mission.id,
                            attempt,
                            "Mission changed during approval, retrying"
                        );
                        continue;
                    }
                    (obc_ids, status, true)
                }
            };

            sqlx::query("UPDATE mission_applications SET status = ? WHERE id = ?")
                .bind(ApplicationStatus::Approved.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| already_applied(e, &application.obc_id, &mission.id))?;

            bump_revision(&mut tx).await?;
            tx.commit().await?;

            tracing::info!(
                application_id = %id,
                mission_id = %mission.id,
                obc_id = %application.obc_id,
                assigned = obc_ids.len(),
                obc_amount = mission.obc_amount,
                newly_assigned,
                "Application approved"
            );

            return Ok(ApprovalResult {
                application: MissionApplication {
                    status: ApplicationStatus::Approved,
                    ..application
                },
                obc_ids,
                mission_status,
                newly_assigned,
            });
        }

        tracing::warn!(application_id = %id, "Approval gave up after repeated conflicts");
        Err(AppError::VersionMismatch {
            message: format!(
                "Mission kept changing while approving application {}",
                id
            ),
            current_version: 0,
        })
    }

    /// Reject an application. The mission is left untouched.
    pub async fn reject_application(&self, id: &str) -> Result<MissionApplication, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE mission_applications SET status = ? WHERE id = ?")
            .bind(ApplicationStatus::Rejected.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Application {} not found", id)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        self.get_application(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))
    }

    /// Delete a courier's own pending application.
    ///
    /// Returns false when there was nothing to withdraw.
    pub async fn withdraw_application(&self, mission_id: &str, obc_id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "DELETE FROM mission_applications WHERE mission_id = ? AND obc_id = ? AND status = ?",
        )
        .bind(mission_id)
        .bind(obc_id)
        .bind(ApplicationStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::warn!(
                mission_id = %mission_id,
                obc_id = %obc_id,
                "No pending application to withdraw"
            );
            return Ok(false);
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(true)
    }

    // ==================== COURIER REGISTRY ====================

    /// Register a courier awaiting approval.
    pub async fn register_courier(
        &self,
        request: &RegisterCourierRequest,
    ) -> Result<Courier, AppError> {
        let now = Utc::now().to_rfc3339();
        let courier = Courier {
            id: request.id.trim().to_string(),
            name: request.name.trim().to_string(),
            email: request
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            obc_number: None,
            registration_status: RegistrationStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO couriers ({COURIER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&courier.id)
        .bind(&courier.name)
        .bind(&courier.email)
        .bind(&courier.obc_number)
        .bind(courier.registration_status.as_str())
        .bind(&courier.created_at)
        .bind(&courier.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(format!("Courier {} is already registered", courier.id))
            }
            _ => e.into(),
        })?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(obc_id = %courier.id, "Courier registered");

        Ok(courier)
    }

    pub async fn get_courier(&self, id: &str) -> Result<Option<Courier>, AppError> {
        let row = sqlx::query(&format!("SELECT {COURIER_COLUMNS} FROM couriers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(courier_from_row))
    }

    /// Couriers awaiting approval, oldest registration first.
    pub async fn list_pending_couriers(&self) -> Result<Vec<Courier>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {COURIER_COLUMNS} FROM couriers WHERE registration_status = ? \
             ORDER BY created_at ASC"
        ))
        .bind(RegistrationStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(courier_from_row).collect())
    }

    /// Approve a registration and assign its OBC number.
    ///
    /// Approving an already approved courier keeps the existing number.
    pub async fn approve_courier(&self, id: &str) -> Result<Courier, AppError> {
        let courier = self
            .get_courier(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Courier {} not found", id)))?;

        if courier.is_approved() {
            return Ok(courier);
        }

        let number = obc_number(&courier.name, Utc::now().timestamp_millis());
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE couriers SET registration_status = ?, obc_number = ?, updated_at = ? \
             WHERE id = ? AND registration_status = ?",
        )
        .bind(RegistrationStatus::Approved.as_str())
        .bind(&number)
        .bind(&now)
        .bind(id)
        .bind(RegistrationStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // A concurrent approval got there first
            tx.rollback().await?;
            return self
                .get_courier(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Courier {} not found", id)));
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(obc_id = %id, obc_number = %number, "Courier approved");

        Ok(Courier {
            obc_number: Some(number),
            registration_status: RegistrationStatus::Approved,
            updated_at: now,
            ..courier
        })
    }

    async fn require_approved_courier(&self, id: &str) -> Result<Courier, AppError> {
        let courier = self
            .get_courier(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Courier {} is not registered", id)))?;

        if !courier.is_approved() {
            return Err(AppError::Validation(format!(
                "Courier {} is awaiting registration approval",
                id
            )));
        }
        Ok(courier)
    }

    // ==================== COURIER LOCATION ====================

    /// Store a courier's last reported position.
    pub async fn upsert_courier_location(
        &self,
        obc_id: &str,
        point: GeoPoint,
        location_code: &str,
    ) -> Result<CourierLocation, AppError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO courier_locations (obc_id, lat, lng, location_code, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(obc_id) DO UPDATE SET
                   lat = excluded.lat, lng = excluded.lng,
                   location_code = excluded.location_code, updated_at = excluded.updated_at"#,
        )
        .bind(obc_id)
        .bind(point.lat)
        .bind(point.lng)
        .bind(location_code)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(CourierLocation {
            obc_id: obc_id.to_string(),
            location: point,
            location_code: location_code.to_string(),
            updated_at: now,
        })
    }

    pub async fn get_courier_location(&self, obc_id: &str) -> Result<Option<CourierLocation>, AppError> {
        let row = sqlx::query(
            "SELECT obc_id, lat, lng, location_code, updated_at FROM courier_locations WHERE obc_id = ?",
        )
        .bind(obc_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CourierLocation {
            obc_id: row.get("obc_id"),
            location: GeoPoint {
                lat: row.get("lat"),
                lng: row.get("lng"),
            },
            location_code: row.get("location_code"),
            updated_at: row.get("updated_at"),
        }))
    }

    // ==================== NOTIFICATIONS ====================

    /// Store a notification and prune the user's oldest beyond the cap.
    pub async fn add_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<Notification, AppError> {
        let stored = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: notification.user_id.clone(),
            message: notification.message.clone(),
            kind: notification.kind,
            related_id: notification.related_id.clone(),
            read: false,
            created_at: Utc::now().to_rfc3339(),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO notifications (id, user_id, message, kind, related_id, read, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&stored.id)
        .bind(&stored.user_id)
        .bind(&stored.message)
        .bind(stored.kind.as_str())
        .bind(&stored.related_id)
        .bind(&stored.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"DELETE FROM notifications WHERE user_id = ? AND id NOT IN (
                   SELECT id FROM notifications WHERE user_id = ?
                   ORDER BY created_at DESC, rowid DESC LIMIT ?
               )"#,
        )
        .bind(&stored.user_id)
        .bind(&stored.user_id)
        .bind(NOTIFICATIONS_PER_USER)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    /// A user's notifications, newest first.
    pub async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>, AppError> {
        let rows = sqlx::query(
            "SELECT id, user_id, message, kind, related_id, read, created_at FROM notifications \
             WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(notification_from_row).collect())
    }

    pub async fn mark_notification_read(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }
        Ok(())
    }
}

/// Increment the revision counter inside the caller's transaction.
async fn bump_revision(conn: &mut SqliteConnection) -> Result<(), AppError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(conn)
        .await?;
    Ok(())
}

fn check_expected_version(mission: &Mission, expected: Option<i64>) -> Result<(), AppError> {
    match expected {
        Some(expected) if expected != mission.version => Err(AppError::VersionMismatch {
            message: format!(
                "Version mismatch: expected {}, current {}",
                expected, mission.version
            ),
            current_version: mission.version,
        }),
        _ => Ok(()),
    }
}

/// Map the open-application unique index violation to a conflict.
fn already_applied(err: sqlx::Error, obc_id: &str, mission_id: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AppError::Conflict(
            format!(
                "Courier {} already has an open application for mission {}",
                obc_id, mission_id
            ),
        ),
        _ => err.into(),
    }
}

// Helper functions for row conversion

/// Mission rows feed read-modify-write cycles, so unreadable stored state is
/// an error rather than a default that would later be written back.
fn mission_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Mission, AppError> {
    let id: String = row.get("id");
    let service_type_str: String = row.get("service_type");
    let obc_ids_str: String = row.get("obc_ids");
    let status_str: String = row.get("status");
    let timeline_str: String = row.get("timeline");

    let records: Vec<StageRecord> = parse_stored(&id, "timeline", &timeline_str)?;
    let status = MissionStatus::from_str(&status_str).ok_or_else(|| {
        tracing::error!(mission_id = %id, status = %status_str, "Unknown stored mission status");
        AppError::Database(format!(
            "Mission {} has unknown status '{}'",
            id, status_str
        ))
    })?;

    Ok(Mission {
        service_type: parse_stored(&id, "service_type", &service_type_str)?,
        obc_ids: parse_stored(&id, "obc_ids", &obc_ids_str)?,
        timeline: Timeline::build(&records).into_stages(),
        id,
        title: row.get("title"),
        origin: row.get("origin"),
        destination: row.get("destination"),
        description: row.get("description"),
        mission_date: row.get("mission_date"),
        created_by: row.get("created_by"),
        obc_amount: row.get("obc_amount"),
        status,
        lost_reason: row.get("lost_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    })
}

fn application_from_row(row: &sqlx::sqlite::SqliteRow) -> MissionApplication {
    let service_type_str: String = row.get("service_type");
    let status_str: String = row.get("status");

    MissionApplication {
        id: row.get("id"),
        mission_id: row.get("mission_id"),
        mission_title: row.get("mission_title"),
        service_type: serde_json::from_str(&service_type_str).unwrap_or_default(),
        obc_id: row.get("obc_id"),
        obc_name: row.get("obc_name"),
        obc_number: row.get("obc_number"),
        application_date: row.get("application_date"),
        status: ApplicationStatus::from_str(&status_str).unwrap_or(ApplicationStatus::Pending),
    }
}

fn courier_from_row(row: &sqlx::sqlite::SqliteRow) -> Courier {
    let status_str: String = row.get("registration_status");

    Courier {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        obc_number: row.get("obc_number"),
        registration_status: RegistrationStatus::from_str(&status_str)
            .unwrap_or(RegistrationStatus::Pending),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn notification_from_row(row: &sqlx::sqlite::SqliteRow) -> Notification {
    let kind_str: String = row.get("kind");
    let read: i32 = row.get("read");

    Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        message: row.get("message"),
        kind: NotificationType::from_str(&kind_str),
        related_id: row.get("related_id"),
        read: read != 0,
        created_at: row.get("created_at"),
    }
}

fn parse_stored<T: serde::de::DeserializeOwned>(
    mission_id: &str,
    column: &str,
    raw: &str,
) -> Result<T, AppError> {
    serde_json::from_str(raw).map_err(|e| {
        tracing::error!(mission_id = %mission_id, column, "Corrupt stored JSON: {}", e);
        AppError::Database(format!(
            "Mission {} has unreadable {}: {}",
            mission_id, column, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::db::init_database;
    use crate::models::{StageKey, StagePayload};

    async fn repo() -> (Repository, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (Repository::new(pool), dir)
    }

    async fn mission(repo: &Repository, obc_amount: i64) -> Mission {
        repo.create_mission(&CreateMissionRequest {
            title: "Samples MEX-MIA".to_string(),
            origin: "MEX".to_string(),
            destination: Some("MIA".to_string()),
            description: None,
            obc_amount,
            mission_date: Some("2024-05-01T08:00:00Z".to_string()),
            service_type: vec![],
            created_by: Some("admin-1".to_string()),
        })
        .await
        .unwrap()
    }

    async fn register(repo: &Repository, obc_id: &str) -> Courier {
        repo.register_courier(&RegisterCourierRequest {
            id: obc_id.to_string(),
            name: format!("Courier {}", obc_id),
            email: None,
        })
        .await
        .unwrap()
    }

    fn apply_request(obc_id: &str) -> ApplyRequest {
        ApplyRequest {
            obc_id: obc_id.to_string(),
        }
    }

    /// Apply as an approved courier, onboarding it first if needed.
    async fn apply(repo: &Repository, mission_id: &str, obc_id: &str) -> MissionApplication {
        if repo.get_courier(obc_id).await.unwrap().is_none() {
            register(repo, obc_id).await;
            repo.approve_courier(obc_id).await.unwrap();
        }
        repo.create_application(mission_id, &apply_request(obc_id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_mission_has_full_pending_timeline() {
        let (repo, _dir) = repo().await;
        let created = mission(&repo, 1).await;

        let loaded = repo.get_mission(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MissionStatus::Pending);
        assert_eq!(loaded.timeline.len(), 23);
        assert!(loaded.timeline.iter().all(|s| !s.completed));
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn test_two_slot_mission_books_on_second_approval() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 2).await;
        let x = apply(&repo, &m.id, "x").await;
        let y = apply(&repo, &m.id, "y").await;

        let first = repo.approve_application(&x.id).await.unwrap();
        assert_eq!(first.obc_ids, vec!["x".to_string()]);
        assert_eq!(first.mission_status, MissionStatus::Pending);

        let second = repo.approve_application(&y.id).await.unwrap();
        assert_eq!(second.obc_ids, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(second.mission_status, MissionStatus::Booked);

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.obc_ids, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(stored.status, MissionStatus::Booked);
    }

    #[tokio::test]
    async fn test_full_mission_rejects_extra_approval() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;
        let x = apply(&repo, &m.id, "x").await;
        let z = apply(&repo, &m.id, "z").await;

        repo.approve_application(&x.id).await.unwrap();
        let err = repo.approve_application(&z.id).await.unwrap_err();
        assert!(matches!(err, AppError::CapacityExceeded { .. }));

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.obc_ids, vec!["x".to_string()]);
        let z_after = repo.get_application(&z.id).await.unwrap().unwrap();
        assert_eq!(z_after.status, ApplicationStatus::Pending);
    }

    #[tokio::test]
    async fn test_repeat_approval_is_idempotent() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;
        let x = apply(&repo, &m.id, "x").await;

        let first = repo.approve_application(&x.id).await.unwrap();
        assert!(first.newly_assigned);
        let version_after_first = repo.get_mission(&m.id).await.unwrap().unwrap().version;

        let second = repo.approve_application(&x.id).await.unwrap();
        assert!(!second.newly_assigned);
        assert_eq!(second.obc_ids, vec!["x".to_string()]);
        assert_eq!(second.application.status, ApplicationStatus::Approved);

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.version, version_after_first);
        assert_eq!(stored.obc_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_never_exceed_capacity() {
        let (repo, _dir) = repo().await;
        let repo = Arc::new(repo);
        let m = mission(&repo, 2).await;

        let mut application_ids = Vec::new();
        for courier in ["a", "b", "c", "d", "e"] {
            application_ids.push(apply(&repo, &m.id, courier).await.id);
        }

        let handles: Vec<_> = application_ids
            .into_iter()
            .map(|id| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move { repo.approve_application(&id).await })
            })
            .collect();

        let mut approved = 0;
        let mut over_capacity = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => approved += 1,
                Err(AppError::CapacityExceeded { .. }) => over_capacity += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(approved, 2);
        assert_eq!(over_capacity, 3);

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.obc_ids.len(), 2);
        assert_eq!(stored.status, MissionStatus::Booked);
    }

    #[tokio::test]
    async fn test_approve_unknown_application() {
        let (repo, _dir) = repo().await;
        let err = repo.approve_application("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_open_application_conflicts() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 2).await;
        let first = apply(&repo, &m.id, "x").await;

        let err = repo
            .create_application(&m.id, &apply_request("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // A rejected application no longer blocks a new one
        repo.reject_application(&first.id).await.unwrap();
        let again = apply(&repo, &m.id, "x").await;
        assert_eq!(again.status, ApplicationStatus::Pending);
        assert_eq!(again.obc_name, "Courier x");
        assert!(again.obc_number.starts_with("CX"));
    }

    #[tokio::test]
    async fn test_courier_with_active_mission_cannot_apply() {
        let (repo, _dir) = repo().await;
        let busy = mission(&repo, 1).await;
        let application = apply(&repo, &busy.id, "x").await;
        repo.approve_application(&application.id).await.unwrap();

        let other = mission(&repo, 1).await;
        let err = repo
            .create_application(&other.id, &apply_request("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let active = repo.active_mission_for_courier("x").await.unwrap().unwrap();
        assert_eq!(active.id, busy.id);
    }

    #[tokio::test]
    async fn test_booked_mission_rejects_applications() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;
        let x = apply(&repo, &m.id, "x").await;
        repo.approve_application(&x.id).await.unwrap();
        register(&repo, "y").await;
        repo.approve_courier("y").await.unwrap();

        let err = repo
            .create_application(&m.id, &apply_request("y"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_withdraw_only_removes_pending() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 2).await;
        let x = apply(&repo, &m.id, "x").await;
        apply(&repo, &m.id, "y").await;
        repo.approve_application(&x.id).await.unwrap();

        assert!(!repo.withdraw_application(&m.id, "x").await.unwrap());
        assert!(repo.withdraw_application(&m.id, "y").await.unwrap());
        assert!(!repo.withdraw_application(&m.id, "y").await.unwrap());

        let remaining = repo
            .list_applications(&ApplicationQuery::default())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].obc_id, "x");

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.obc_ids, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_timeline_update_persists_payload_and_status() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;

        repo.update_timeline(&m.id, None, |mission, mut timeline| {
            timeline.set_amount_of_boxes(StageKey::ReceivedGoods, 5)?;
            Ok((timeline, mission.status))
        })
        .await
        .unwrap();

        let updated = repo
            .update_timeline(&m.id, Some(2), |mission, timeline| {
                let toggled =
                    timeline.toggle(StageKey::ReceivedGoods, None, Utc::now(), mission.status);
                Ok((toggled.timeline, toggled.status))
            })
            .await
            .unwrap();
        assert_eq!(updated.status, MissionStatus::Booked);
        assert_eq!(updated.version, 3);

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        let stage = &stored.timeline[StageKey::ReceivedGoods as usize];
        assert!(stage.completed);
        assert_eq!(
            stage.payload,
            StagePayload::Receiving {
                amount_of_boxes: 5,
                photo_urls: vec![],
            }
        );
    }

    #[tokio::test]
    async fn test_timeline_update_rejects_stale_version() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;

        let err = repo
            .update_timeline(&m.id, Some(7), |mission, timeline| {
                Ok((timeline, mission.status))
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::VersionMismatch {
                current_version: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_change_writes_nothing() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;
        let revision = repo.get_revision_id().await.unwrap();

        let err = repo
            .update_timeline(&m.id, None, |_, mut timeline| {
                timeline.set_eta(StageKey::Delivered, "soon")?;
                Ok((timeline, MissionStatus::Booked))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let stored = repo.get_mission(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, MissionStatus::Pending);
        assert_eq!(repo.get_revision_id().await.unwrap(), revision);
    }

    #[tokio::test]
    async fn test_status_override_lost_requires_reason() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;

        let err = repo
            .change_mission_status(
                &m.id,
                &StatusChangeRequest {
                    status: MissionStatus::Lost,
                    lost_reason: None,
                    expected_version: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let lost = repo
            .change_mission_status(
                &m.id,
                &StatusChangeRequest {
                    status: MissionStatus::Lost,
                    lost_reason: Some("Pricing".to_string()),
                    expected_version: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(lost.status, MissionStatus::Lost);
        assert_eq!(lost.lost_reason.as_deref(), Some("Pricing"));

        let filtered = repo.list_missions(Some(MissionStatus::Lost)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(repo
            .list_missions(Some(MissionStatus::Pending))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_notifications_are_capped_per_user() {
        let (repo, _dir) = repo().await;

        for i in 0..12 {
            repo.add_notification(&NewNotification {
                user_id: "x".to_string(),
                message: format!("update {}", i),
                kind: NotificationType::MissionUpdate,
                related_id: "m-1".to_string(),
            })
            .await
            .unwrap();
        }
        repo.add_notification(&NewNotification {
            user_id: "y".to_string(),
            message: "hello".to_string(),
            kind: NotificationType::Generic,
            related_id: String::new(),
        })
        .await
        .unwrap();

        let for_x = repo.list_notifications("x").await.unwrap();
        assert_eq!(for_x.len(), 10);
        assert_eq!(for_x[0].message, "update 11");
        assert_eq!(repo.list_notifications("y").await.unwrap().len(), 1);

        repo.mark_notification_read("x", &for_x[0].id).await.unwrap();
        assert!(repo.list_notifications("x").await.unwrap()[0].read);
        assert!(repo.mark_notification_read("y", &for_x[0].id).await.is_err());
    }

    #[tokio::test]
    async fn test_courier_location_upsert() {
        let (repo, _dir) = repo().await;
        let first = GeoPoint { lat: 19.4, lng: -99.1 };
        let second = GeoPoint { lat: 25.8, lng: -80.3 };

        repo.upsert_courier_location("x", first, "MEX").await.unwrap();
        repo.upsert_courier_location("x", second, "MIA").await.unwrap();

        let location = repo.get_courier_location("x").await.unwrap().unwrap();
        assert_eq!(location.location, second);
        assert_eq!(location.location_code, "MIA");
        assert!(repo.get_courier_location("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_timeline_is_never_overwritten() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;
        let stored = r#"[
            {"stage":"Delivered","completed":true,"podUrl":"https://files/pod.pdf"},
            {"stage":"Received goods","amountOfBoxes":"5"}
        ]"#;
        sqlx::query("UPDATE missions SET timeline = ? WHERE id = ?")
            .bind(stored)
            .bind(&m.id)
            .execute(&repo.pool)
            .await
            .unwrap();

        let err = repo.get_mission(&m.id).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(repo.list_missions(None).await.is_err());

        let err = repo
            .update_timeline(&m.id, None, |mission, timeline| {
                let toggled =
                    timeline.toggle(StageKey::ArrivalInAto, None, Utc::now(), mission.status);
                Ok((toggled.timeline, toggled.status))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        let row = sqlx::query("SELECT timeline, version FROM missions WHERE id = ?")
            .bind(&m.id)
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        let timeline: String = row.get("timeline");
        let version: i64 = row.get("version");
        assert!(timeline.contains("https://files/pod.pdf"));
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_padded_courier_id_is_still_busy() {
        let (repo, _dir) = repo().await;
        let busy = mission(&repo, 1).await;
        let application = apply(&repo, &busy.id, "x").await;
        repo.approve_application(&application.id).await.unwrap();

        let other = mission(&repo, 1).await;
        let err = repo
            .create_application(&other.id, &apply_request(" x "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(repo
            .list_applications(&ApplicationQuery {
                obc_id: Some("x".to_string()),
            })
            .await
            .unwrap()
            .iter()
            .all(|a| a.mission_id == busy.id));
    }

    #[tokio::test]
    async fn test_apply_requires_approved_courier() {
        let (repo, _dir) = repo().await;
        let m = mission(&repo, 1).await;

        let err = repo
            .create_application(&m.id, &apply_request("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        register(&repo, "x").await;
        let err = repo
            .create_application(&m.id, &apply_request("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let approved = repo.approve_courier("x").await.unwrap();
        let application = repo
            .create_application(&m.id, &apply_request("x"))
            .await
            .unwrap();
        assert_eq!(application.obc_name, "Courier x");
        assert_eq!(Some(application.obc_number), approved.obc_number);
    }

    #[tokio::test]
    async fn test_courier_approval_assigns_number_once() {
        let (repo, _dir) = repo().await;
        register(&repo, "a").await;
        let b = repo
            .register_courier(&RegisterCourierRequest {
                id: " b ".to_string(),
                name: "Ana Maria Lopez".to_string(),
                email: Some("ana@example.com".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(b.id, "b");
        assert_eq!(b.registration_status, RegistrationStatus::Pending);
        assert!(b.obc_number.is_none());

        let pending = repo.list_pending_couriers().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "a");

        let revision = repo.get_revision_id().await.unwrap();
        let approved = repo.approve_courier("b").await.unwrap();
        let number = approved.obc_number.clone().unwrap();
        assert!(number.starts_with("AML"));
        assert_eq!(number.len(), 9);
        assert!(number[3..].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(repo.get_revision_id().await.unwrap(), revision + 1);

        let again = repo.approve_courier("b").await.unwrap();
        assert_eq!(again.obc_number.as_deref(), Some(number.as_str()));
        assert_eq!(repo.get_revision_id().await.unwrap(), revision + 1);

        let pending = repo.list_pending_couriers().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a");

        let stored = repo.get_courier("b").await.unwrap().unwrap();
        assert!(stored.is_approved());
        assert_eq!(stored.email.as_deref(), Some("ana@example.com"));

        let err = repo.approve_courier("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = repo
            .register_courier(&RegisterCourierRequest {
                id: "a".to_string(),
                name: "Someone Else".to_string(),
                email: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
