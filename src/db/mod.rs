//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for missions, applications, the courier
//! registry, courier locations and notifications.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    // obc_ids, service_type and timeline hold JSON arrays
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS missions (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            origin TEXT NOT NULL,
            destination TEXT,
            description TEXT,
            mission_date TEXT,
            service_type TEXT NOT NULL DEFAULT '[]',
            created_by TEXT,
            obc_amount INTEGER NOT NULL DEFAULT 1 CHECK (obc_amount >= 1),
            obc_ids TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'Pending',
            lost_reason TEXT,
            timeline TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mission_applications (
            id TEXT PRIMARY KEY,
            mission_id TEXT NOT NULL,
            mission_title TEXT NOT NULL,
            service_type TEXT NOT NULL DEFAULT '[]',
            obc_id TEXT NOT NULL,
            obc_name TEXT NOT NULL,
            obc_number TEXT NOT NULL,
            application_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS couriers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            obc_number TEXT,
            registration_status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS courier_locations (
            obc_id TEXT PRIMARY KEY,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            location_code TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            message TEXT NOT NULL,
            kind TEXT NOT NULL,
            related_id TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // One open (non-rejected) application per courier and mission
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_applications_open
            ON mission_applications(mission_id, obc_id) WHERE status != 'rejected';
        CREATE INDEX IF NOT EXISTS idx_applications_obc ON mission_applications(obc_id);
        CREATE INDEX IF NOT EXISTS idx_applications_date ON mission_applications(application_date);
        CREATE INDEX IF NOT EXISTS idx_missions_status ON missions(status);
        CREATE INDEX IF NOT EXISTS idx_missions_date ON missions(mission_date);
        CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_couriers_status ON couriers(registration_status, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
