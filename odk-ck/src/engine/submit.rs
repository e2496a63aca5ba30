//! Check-in submission coordination
//!
//! Both identification streams funnel through one coordinator that
//! guarantees at most one submission in flight. The in-flight flag is
//! checked and set synchronously (compare-exchange before any await), so
//! two near-simultaneous triggers cannot both pass the check: the loser
//! silently no-ops. No ordering is guaranteed between the streams; first
//! to take the flag wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::{Pool, Sqlite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use odk_common::api::types::CheckinRequest;
use odk_common::events::{CheckinSource, FaceStatus, KioskEvent};

use crate::clients::{AttendanceError, AttendanceService, MatchResolver};
use crate::config::TuningConfig;
use crate::db::offline_queue;
use crate::engine::camera::Frame;
use crate::engine::detector::DetectorGate;
use crate::engine::hold::{HoldEffect, HoldState};
use crate::error::Result;
use crate::state::SharedState;

/// One check-in attempt headed for the attendance service
#[derive(Debug, Clone)]
pub struct CheckinAttempt {
    /// Subject being checked in
    pub subject_id: Uuid,
    /// Event the check-in belongs to
    pub event_id: Uuid,
    /// Display name for feedback events
    pub display_name: String,
    /// Originating stream
    pub source: CheckinSource,
    /// Free-form confidence annotation
    pub confidence_tag: Option<String>,
}

/// What happened to a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    /// The attendance service accepted the check-in
    Accepted {
        /// True when the subject was already checked in (idempotent re-scan)
        already_checked_in: bool,
    },
    /// Device offline; the attempt went to the local queue
    Queued,
    /// The service rejected the attempt; message is user-facing
    Failed { message: String },
    /// Another submission already held the flag; this one no-oped
    AlreadyInFlight,
}

/// Serializes check-in writes and manages the offline queue
pub struct SubmissionCoordinator {
    attendance: Arc<dyn AttendanceService>,
    matcher: Arc<dyn MatchResolver>,
    db: Pool<Sqlite>,
    state: Arc<SharedState>,
    hold: Arc<Mutex<HoldState>>,
    gate: Arc<DetectorGate>,
    tuning: TuningConfig,
    tenant: String,

    /// At-most-one-submission guard; taken synchronously
    in_flight: AtomicBool,
    /// Last known connectivity; flipped by call outcomes
    online: AtomicBool,
}

impl SubmissionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attendance: Arc<dyn AttendanceService>,
        matcher: Arc<dyn MatchResolver>,
        db: Pool<Sqlite>,
        state: Arc<SharedState>,
        hold: Arc<Mutex<HoldState>>,
        gate: Arc<DetectorGate>,
        tuning: TuningConfig,
        tenant: String,
    ) -> Self {
        Self {
            attendance,
            matcher,
            db,
            state,
            hold,
            gate,
            tuning,
            tenant,
            in_flight: AtomicBool::new(false),
            online: AtomicBool::new(true),
        }
    }

    /// True while a submission is outstanding
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Last known connectivity
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Submit one check-in attempt
    ///
    /// `frame` is the frame that produced a face match, used only for the
    /// best-effort enrollment-learning capture after a fresh check-in.
    /// Regardless of outcome the hold machine resets to Idle and detection
    /// re-arms after the configured dismiss delay.
    pub async fn submit(&self, attempt: CheckinAttempt, frame: Option<Frame>) -> Result<SubmitResult> {
        // Synchronous check-and-set; the losing trigger no-ops
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                "Submission already in flight, dropping {} trigger for {}",
                attempt.source.as_str(),
                attempt.subject_id
            );
            return Ok(SubmitResult::AlreadyInFlight);
        }

        let result = if self.is_online() {
            self.submit_online(&attempt, frame).await
        } else {
            self.queue_offline(&attempt).await
        };

        // Always: reset the machine, then re-arm detection after the
        // outcome-dependent dismiss delay, then release the flag
        let dismiss = match &result {
            Ok(SubmitResult::Accepted { .. }) => Duration::from_millis(self.tuning.success_dismiss_ms),
            _ => Duration::from_millis(self.tuning.failure_dismiss_ms),
        };
        let reset_effect = self.hold.lock().expect("hold lock poisoned").reset();
        if let HoldEffect::Canceled { subject_id, reason } = reset_effect {
            // An optical or manual submission preempted an active hold
            self.state.broadcast_event(KioskEvent::HoldCanceled {
                subject_id,
                reason: reason.as_str().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        self.state.set_face_status(FaceStatus::Idle).await;
        self.gate.suppress_for(dismiss);
        self.in_flight.store(false, Ordering::Release);

        result
    }

    async fn submit_online(
        &self,
        attempt: &CheckinAttempt,
        frame: Option<Frame>,
    ) -> Result<SubmitResult> {
        let request = CheckinRequest {
            subject_id: attempt.subject_id,
            event_id: attempt.event_id,
            tenant: self.tenant.clone(),
            source: attempt.source.as_str().to_string(),
            confidence_tag: attempt.confidence_tag.clone(),
        };

        match self.attendance.checkin(request).await {
            Ok(response) => {
                self.online.store(true, Ordering::Relaxed);
                info!(
                    "Check-in accepted for {} (already={})",
                    attempt.subject_id, response.already_checked_in
                );

                if !response.already_checked_in {
                    // Celebratory side effects only for genuinely new check-ins
                    self.state.increment_attendance_count();
                    self.spawn_enrollment_capture(attempt.subject_id, frame);
                }

                let display_name = response
                    .display_name
                    .clone()
                    .unwrap_or_else(|| attempt.display_name.clone());
                self.state.broadcast_event(KioskEvent::CheckinAccepted {
                    subject_id: attempt.subject_id,
                    display_name,
                    already_checked_in: response.already_checked_in,
                    source: attempt.source,
                    timestamp: chrono::Utc::now(),
                });

                Ok(SubmitResult::Accepted {
                    already_checked_in: response.already_checked_in,
                })
            }
            Err(AttendanceError::Offline(reason)) => {
                info!("Attendance service unreachable ({}), queueing attempt", reason);
                self.online.store(false, Ordering::Relaxed);
                self.queue_offline(attempt).await
            }
            Err(error) => {
                let message = match error {
                    AttendanceError::Rejected(message) => message,
                    other => other.to_string(),
                };
                warn!("Check-in failed for {}: {}", attempt.subject_id, message);
                self.state.broadcast_event(KioskEvent::CheckinFailed {
                    subject_id: attempt.subject_id,
                    message: message.clone(),
                    timestamp: chrono::Utc::now(),
                });
                Ok(SubmitResult::Failed { message })
            }
        }
    }

    async fn queue_offline(&self, attempt: &CheckinAttempt) -> Result<SubmitResult> {
        offline_queue::enqueue(&self.db, attempt).await?;
        let depth = offline_queue::depth(&self.db).await?;
        info!(
            "Queued offline check-in for {} (queue depth {})",
            attempt.subject_id, depth
        );
        self.state.broadcast_event(KioskEvent::CheckinFailed {
            subject_id: attempt.subject_id,
            message: "Offline: check-in saved and will sync automatically".to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(SubmitResult::Queued)
    }

    /// Fire-and-forget enrollment-learning capture; failures never
    /// interrupt the check-in flow
    fn spawn_enrollment_capture(&self, subject_id: Uuid, frame: Option<Frame>) {
        let Some(frame) = frame else {
            return;
        };
        let matcher = Arc::clone(&self.matcher);
        tokio::spawn(async move {
            if let Err(e) = matcher.enroll_sample(subject_id, &frame).await {
                debug!("Enrollment capture for {} failed (ignored): {}", subject_id, e);
            }
        });
    }

    /// Drain the offline queue strictly oldest-first
    ///
    /// Stops at the first connectivity failure (still offline). Any other
    /// failure logs and drops the item so one poisoned entry cannot block
    /// the rest. Returns (submitted, dropped).
    pub async fn drain_offline_queue(&self) -> Result<(u64, u64)> {
        let mut submitted = 0u64;
        let mut dropped = 0u64;

        while let Some(queued) = offline_queue::oldest(&self.db).await? {
            let request = CheckinRequest {
                subject_id: queued.attempt.subject_id,
                event_id: queued.attempt.event_id,
                tenant: self.tenant.clone(),
                source: queued.attempt.source.as_str().to_string(),
                confidence_tag: queued.attempt.confidence_tag.clone(),
            };

            match self.attendance.checkin(request).await {
                Ok(response) => {
                    self.online.store(true, Ordering::Relaxed);
                    offline_queue::remove(&self.db, queued.id).await?;
                    submitted += 1;
                    if !response.already_checked_in {
                        self.state.increment_attendance_count();
                    }
                    debug!(
                        "Drained queued check-in for {}",
                        queued.attempt.subject_id
                    );
                }
                Err(AttendanceError::Offline(reason)) => {
                    debug!("Still offline ({}), drain paused", reason);
                    self.online.store(false, Ordering::Relaxed);
                    break;
                }
                Err(error) => {
                    // Logged and discarded, never retried
                    warn!(
                        "Dropping queued check-in for {}: {}",
                        queued.attempt.subject_id, error
                    );
                    offline_queue::remove(&self.db, queued.id).await?;
                    dropped += 1;
                }
            }
        }

        if submitted > 0 || dropped > 0 {
            self.state.broadcast_event(KioskEvent::OfflineQueueDrained {
                submitted,
                dropped,
                timestamp: chrono::Utc::now(),
            });
        }
        Ok((submitted, dropped))
    }

    /// Spawn the reconnect probe: attempts a drain on a coarse cadence
    /// whenever the queue is non-empty. The drain call itself doubles as
    /// the connectivity probe.
    pub fn spawn_drain_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval_ms = coordinator.tuning.offline_drain_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let depth = match offline_queue::depth(&coordinator.db).await {
                    Ok(depth) => depth,
                    Err(e) => {
                        warn!("Offline queue depth check failed: {}", e);
                        continue;
                    }
                };
                if depth == 0 {
                    continue;
                }
                if let Err(e) = coordinator.drain_offline_queue().await {
                    warn!("Offline queue drain failed: {}", e);
                }
            }
        })
    }

    /// Current offline queue depth (for the status endpoint)
    pub async fn queue_depth(&self) -> Result<u64> {
        offline_queue::depth(&self.db).await
    }

    #[cfg(test)]
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}
