//! Attendance count refresh task
//!
//! Polls the remote count endpoint on a coarse interval for UI feedback.
//! Best-effort only: failures are logged at debug and skipped, never
//! surfaced.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use odk_common::events::KioskEvent;

use crate::clients::AttendanceService;
use crate::config::TuningConfig;
use crate::state::SharedState;

/// Spawn the attendance count poll task
pub fn spawn_count_poller(
    attendance: Arc<dyn AttendanceService>,
    state: Arc<SharedState>,
    tuning: TuningConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(tuning.count_poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Attendance count poller started ({}ms interval)",
            tuning.count_poll_interval_ms
        );

        loop {
            interval.tick().await;

            let Some(session) = state.session().await else {
                continue;
            };

            match attendance.count(session.event_id).await {
                Ok(count) => {
                    if count != state.attendance_count() {
                        state.set_attendance_count(count);
                        state.broadcast_event(KioskEvent::AttendanceCountUpdated {
                            event_id: session.event_id,
                            count,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                }
                Err(e) => {
                    debug!("Attendance count refresh failed (ignored): {}", e);
                }
            }
        }
    })
}
