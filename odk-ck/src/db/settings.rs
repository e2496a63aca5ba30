//! Settings database access
//!
//! Read/write settings from the settings table (key-value store). All
//! settings are kiosk-wide; the database value wins over the compiled
//! default so an operator adjustment survives restarts.

use std::str::FromStr;

use sqlx::{Pool, Sqlite};
use tracing::warn;

use crate::config::TuningConfig;
use crate::error::Result;

/// Get a setting value by key with type conversion
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value {
        Some(raw) => match raw.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => {
                warn!("Setting '{}' has unparseable value '{}', ignoring", key, raw);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Set a setting value by key
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

/// Overlay database-stored tuning values onto the compiled/TOML config
///
/// Only the operational subset is database-backed; everything else keeps
/// its config-file value.
pub async fn apply_tuning_overrides(db: &Pool<Sqlite>, tuning: &mut TuningConfig) -> Result<()> {
    if let Some(v) = get_setting::<u32>(db, "hold_countdown_seconds").await? {
        tuning.hold_countdown_seconds = v;
    }
    if let Some(v) = get_setting::<u32>(db, "grace_miss_threshold").await? {
        tuning.grace_miss_threshold = v;
    }
    if let Some(v) = get_setting::<u64>(db, "scan_debounce_window_ms").await? {
        tuning.scan_debounce_window_ms = v;
    }
    if let Some(v) = get_setting::<f32>(db, "match_distance_ceiling").await? {
        tuning.match_distance_ceiling = v;
    }
    if let Some(v) = get_setting::<u64>(db, "count_poll_interval_ms").await? {
        tuning.count_poll_interval_ms = v;
    }
    Ok(())
}
