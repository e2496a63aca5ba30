//! Detection loop watchdog
//!
//! Supervisor task on a slow cadence that restarts the detection loop when
//! it should be live but its tick stamp has gone stale (or the task is
//! gone entirely). Liveness is judged from the loop's own last-tick
//! timestamp rather than inferred from UI state, so recovery is
//! deterministic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use odk_common::events::KioskEvent;

use crate::config::TuningConfig;
use crate::engine::detector::DetectionLoop;
use crate::engine::submit::SubmissionCoordinator;
use crate::state::SharedState;

/// Spawn the watchdog task
pub fn spawn_watchdog(
    detector: Arc<DetectionLoop>,
    coordinator: Arc<SubmissionCoordinator>,
    state: Arc<SharedState>,
    tuning: TuningConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(tuning.watchdog_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Watchdog started ({}ms interval, stale after {}ms)",
            tuning.watchdog_interval_ms, tuning.watchdog_stale_after_ms
        );

        loop {
            interval.tick().await;

            // Detection should be live only when a session is running with
            // the camera on and no submission outstanding
            let should_be_live = state.session_active().await
                && state.camera_active()
                && !coordinator.in_flight();
            if !should_be_live {
                continue;
            }

            let stale_after = Duration::from_millis(tuning.watchdog_stale_after_ms);
            let needs_restart = match (detector.is_running(), detector.last_tick_at()) {
                (false, _) => {
                    warn!("Watchdog: detection loop absent while camera is live");
                    true
                }
                (true, None) => false,
                (true, Some(last_tick)) => {
                    let age = last_tick.elapsed();
                    if age > stale_after {
                        warn!(
                            "Watchdog: detection tick stale ({}ms old)",
                            age.as_millis()
                        );
                        true
                    } else {
                        false
                    }
                }
            };

            if needs_restart {
                detector.restart().await;
                let restart_count = state.increment_watchdog_restarts();
                state.broadcast_event(KioskEvent::DetectorRestarted {
                    restart_count,
                    timestamp: chrono::Utc::now(),
                });
                debug!("Watchdog restart #{} complete", restart_count);
            }
        }
    })
}
