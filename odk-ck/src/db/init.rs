//! Database initialization functions
//!
//! Creates required tables and initializes missing settings with defaults
//! on every startup.

use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::config::TuningConfig;
use crate::error::Result;

/// Create tables used by the kiosk service
pub async fn init_database(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Autoincrement id preserves strict FIFO order across restarts
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS offline_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id TEXT NOT NULL,
            event_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            source TEXT NOT NULL,
            confidence_tag TEXT,
            queued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize settings table with default values
///
/// Only the operationally tunable subset lives in the database; anything
/// already present is left untouched.
pub async fn init_settings_defaults(pool: &Pool<Sqlite>, tuning: &TuningConfig) -> Result<()> {
    info!("Initializing default settings");

    let defaults = vec![
        (
            "hold_countdown_seconds",
            tuning.hold_countdown_seconds.to_string(),
        ),
        (
            "grace_miss_threshold",
            tuning.grace_miss_threshold.to_string(),
        ),
        (
            "scan_debounce_window_ms",
            tuning.scan_debounce_window_ms.to_string(),
        ),
        (
            "match_distance_ceiling",
            tuning.match_distance_ceiling.to_string(),
        ),
        (
            "count_poll_interval_ms",
            tuning.count_poll_interval_ms.to_string(),
        ),
    ];

    for (key, default_value) in defaults {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
                .bind(key)
                .fetch_one(pool)
                .await?;

        if !exists {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(&default_value)
                .execute(pool)
                .await?;

            info!(
                "Initialized setting '{}' with default value: {}",
                key, default_value
            );
        }
    }

    Ok(())
}
