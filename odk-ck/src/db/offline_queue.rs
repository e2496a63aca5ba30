//! Offline check-in queue persistence
//!
//! Check-in attempts made while the attendance service is unreachable are
//! appended here and drained strictly oldest-first once connectivity
//! returns. A failing item is logged and deleted, never retried, so the
//! queue cannot grow without bound behind one poisoned entry. No
//! cross-session durability is required, but surviving a kiosk restart is
//! harmless and comes free with the table.

use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use odk_common::events::CheckinSource;

use crate::engine::submit::CheckinAttempt;
use crate::error::{Error, Result};

/// A queued attempt with its FIFO position
#[derive(Debug, Clone)]
pub struct QueuedAttempt {
    /// Autoincrement row id; drain order
    pub id: i64,
    pub attempt: CheckinAttempt,
}

/// Append an attempt to the back of the queue
pub async fn enqueue(db: &Pool<Sqlite>, attempt: &CheckinAttempt) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO offline_queue
            (subject_id, event_id, display_name, source, confidence_tag, queued_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(attempt.subject_id.to_string())
    .bind(attempt.event_id.to_string())
    .bind(&attempt.display_name)
    .bind(attempt.source.as_str())
    .bind(&attempt.confidence_tag)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(db)
    .await?;
    Ok(())
}

/// Peek the oldest queued attempt, if any
pub async fn oldest(db: &Pool<Sqlite>) -> Result<Option<QueuedAttempt>> {
    let row = sqlx::query(
        r#"
        SELECT id, subject_id, event_id, display_name, source, confidence_tag
        FROM offline_queue
        ORDER BY id ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let subject_raw: String = row.get("subject_id");
    let event_raw: String = row.get("event_id");
    let source_raw: String = row.get("source");

    let attempt = CheckinAttempt {
        subject_id: Uuid::parse_str(&subject_raw)
            .map_err(|e| Error::Internal(format!("corrupt queue row subject_id: {}", e)))?,
        event_id: Uuid::parse_str(&event_raw)
            .map_err(|e| Error::Internal(format!("corrupt queue row event_id: {}", e)))?,
        display_name: row.get("display_name"),
        source: parse_source(&source_raw)?,
        confidence_tag: row.get("confidence_tag"),
    };

    Ok(Some(QueuedAttempt {
        id: row.get("id"),
        attempt,
    }))
}

/// Remove a drained (or poisoned) item by id
pub async fn remove(db: &Pool<Sqlite>, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM offline_queue WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Number of queued attempts
pub async fn depth(db: &Pool<Sqlite>) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM offline_queue")
        .fetch_one(db)
        .await?;
    Ok(count as u64)
}

fn parse_source(raw: &str) -> Result<CheckinSource> {
    match raw {
        "optical" => Ok(CheckinSource::Optical),
        "face" => Ok(CheckinSource::Face),
        "manual" => Ok(CheckinSource::Manual),
        other => Err(Error::Internal(format!("corrupt queue row source: {}", other))),
    }
}
