//! Face detection loop
//!
//! A fixed-cadence polling task that samples frames, runs local presence
//! detection, and triggers remote matching. All hold-machine mutation
//! happens inside the tick handler; the remote match call is the only
//! suspension point, and every continuation re-validates liveness (loop
//! generation, session, camera) after the await before touching state.
//!
//! Cancellation is a generation counter: every loop start/stop bumps it,
//! and a continuation holding a stale generation treats its result as
//! ignorable rather than mutating state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use odk_common::events::{CheckinSource, FaceStatus, KioskEvent};

use crate::clients::{MatchResolver, MatcherError};
use crate::config::TuningConfig;
use crate::engine::camera::{CaptureDevice, Frame};
use crate::engine::hold::{Candidate, HoldEffect, HoldState};
use crate::engine::presence::PresenceDetector;
use crate::engine::submit::{CheckinAttempt, SubmissionCoordinator};
use crate::state::SharedState;

/// Re-arm gate between the coordinator and the detection loop
///
/// After a submission outcome the loop stays suppressed for the dismiss
/// delay; clearing happens implicitly when the deadline passes.
pub struct DetectorGate {
    suppressed_until: Mutex<Option<Instant>>,
}

impl DetectorGate {
    pub fn new() -> Self {
        Self {
            suppressed_until: Mutex::new(None),
        }
    }

    /// Suppress detection processing for the given duration
    pub fn suppress_for(&self, duration: Duration) {
        let mut guard = self.suppressed_until.lock().expect("gate lock poisoned");
        *guard = Some(Instant::now() + duration);
    }

    /// Drop any pending suppression
    pub fn clear(&self) {
        let mut guard = self.suppressed_until.lock().expect("gate lock poisoned");
        *guard = None;
    }

    /// True while the suppression window is open
    pub fn is_suppressed(&self) -> bool {
        let mut guard = self.suppressed_until.lock().expect("gate lock poisoned");
        match *guard {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }
}

impl Default for DetectorGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed-cadence detection loop
pub struct DetectionLoop {
    device: Arc<dyn CaptureDevice>,
    presence: Arc<dyn PresenceDetector>,
    matcher: Arc<dyn MatchResolver>,
    coordinator: Arc<SubmissionCoordinator>,
    hold: Arc<Mutex<HoldState>>,
    gate: Arc<DetectorGate>,
    state: Arc<SharedState>,
    tuning: TuningConfig,

    /// Cancellation signal: bumped on every start/stop
    generation: AtomicU64,
    /// True between start() and stop()
    running: AtomicBool,
    /// Previous tick's remote match call still unresolved
    match_in_flight: AtomicBool,
    /// Liveness stamp read by the watchdog
    last_tick: Mutex<Option<Instant>>,
    /// Frame that produced the current hold's match (enrollment capture)
    last_match_frame: Mutex<Option<Frame>>,
    /// Interval task handle
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DetectionLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        presence: Arc<dyn PresenceDetector>,
        matcher: Arc<dyn MatchResolver>,
        coordinator: Arc<SubmissionCoordinator>,
        hold: Arc<Mutex<HoldState>>,
        gate: Arc<DetectorGate>,
        state: Arc<SharedState>,
        tuning: TuningConfig,
    ) -> Self {
        Self {
            device,
            presence,
            matcher,
            coordinator,
            hold,
            gate,
            state,
            tuning,
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            match_in_flight: AtomicBool::new(false),
            last_tick: Mutex::new(None),
            last_match_frame: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start the loop; a second start while running is a no-op
    pub async fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Detection loop already running");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.stamp_tick();

        let loop_ref = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(loop_ref.tuning.detect_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                "Detection loop started ({}ms interval, generation {})",
                loop_ref.tuning.detect_interval_ms, generation
            );

            loop {
                interval.tick().await;
                if !loop_ref.running.load(Ordering::Acquire)
                    || loop_ref.generation.load(Ordering::Acquire) != generation
                {
                    break;
                }
                loop_ref.run_tick(generation).await;
            }
            info!("Detection loop stopped (generation {})", generation);
        });

        *self.task.lock().expect("task lock poisoned") = Some(handle);
    }

    /// Stop the loop, invalidate in-flight continuations, reset the hold
    ///
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        // Bump even when not running: any orphaned continuation dies
        self.generation.fetch_add(1, Ordering::AcqRel);

        if let Some(handle) = self.task.lock().expect("task lock poisoned").take() {
            handle.abort();
        }

        let effect = self.hold.lock().expect("hold lock poisoned").reset();
        self.emit_cancel(effect);

        if was_running {
            debug!("Detection loop stop complete");
        }
    }

    /// Stop and start again (watchdog recovery, post-failure re-arm)
    pub async fn restart(self: &Arc<Self>) {
        self.stop().await;
        self.start().await;
    }

    /// True between start and stop
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// When the loop last entered its tick handler
    pub fn last_tick_at(&self) -> Option<Instant> {
        *self.last_tick.lock().expect("tick stamp lock poisoned")
    }

    fn stamp_tick(&self) {
        *self.last_tick.lock().expect("tick stamp lock poisoned") = Some(Instant::now());
    }

    /// Liveness: a continuation is stale once the generation moved on
    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation
            || !self.running.load(Ordering::Acquire)
    }

    /// One detection tick
    async fn run_tick(&self, generation: u64) {
        self.stamp_tick();

        // Skip conditions, checked before any work
        if !self.state.session_active().await {
            return;
        }
        if !self.state.camera_active() {
            return;
        }
        if self.gate.is_suppressed() {
            trace!("Detection suppressed (dismiss window)");
            return;
        }
        if self.coordinator.in_flight() {
            trace!("Detection suppressed (submission in flight)");
            return;
        }
        if self.match_in_flight.load(Ordering::Acquire) {
            trace!("Detection skipped (previous match call unresolved)");
            return;
        }

        let now = Instant::now();
        let require_confirmation = self
            .state
            .session()
            .await
            .map(|s| s.require_confirmation)
            .unwrap_or(false);

        // Advance countdowns first; they are pure time
        let (effects, awaiting_confirmation) = {
            let mut hold = self.hold.lock().expect("hold lock poisoned");
            if hold.is_submitting() {
                return;
            }
            let mut effects = hold.tick_countdown(now, require_confirmation, &self.tuning);
            effects.push(hold.tick_confirmation(now));
            (effects, hold.is_awaiting_confirmation())
        };
        if self.process_effects(effects).await {
            // A submission ran; this tick is done
            return;
        }
        if awaiting_confirmation {
            // The pending candidate is pinned until staff decide; no frame
            // processing or matching in the meantime
            return;
        }

        // Sample a frame; device errors count as a plain miss
        let frame = match self.device.grab_frame() {
            Ok(frame) => frame,
            Err(e) => {
                trace!("Frame grab failed: {}", e);
                self.apply_miss(now).await;
                return;
            }
        };

        // Local presence gate (filtered-out counts as no-presence)
        let Some(_detection) = self.presence.detect(&frame) else {
            self.apply_miss(now).await;
            return;
        };

        // Sticky-match cache: a recently confirmed hold skips the remote
        // call entirely, reducing backend load and UI flicker
        {
            let mut hold = self.hold.lock().expect("hold lock poisoned");
            if hold.sticky_fresh(now, self.tuning.sticky_match_window()) {
                hold.note_sticky_confirm();
                hold.note_presence();
                return;
            }
        }

        // The one genuine suspension point
        self.match_in_flight.store(true, Ordering::Release);
        let match_result = self.matcher.match_frame(&frame).await;
        self.match_in_flight.store(false, Ordering::Release);

        // Re-validate liveness after the await; the kiosk page may have
        // torn down while the call was outstanding
        if self.is_stale(generation) {
            debug!("Match result arrived for a stale loop generation, ignored");
            return;
        }
        if !self.state.session_active().await || !self.state.camera_active() {
            return;
        }

        let now = Instant::now();
        match match_result {
            Ok(response) if response.found => {
                let distance = response.distance.unwrap_or(f32::MAX);
                match (response.subject_id, distance <= self.tuning.match_distance_ceiling) {
                    (Some(subject_id), true) => {
                        let candidate = Candidate {
                            subject_id,
                            display_name: response
                                .display_name
                                .unwrap_or_else(|| "Member".to_string()),
                            distance,
                            photo_ref: response.photo_ref,
                            observed_at: now,
                        };
                        *self
                            .last_match_frame
                            .lock()
                            .expect("frame cache lock poisoned") = Some(frame);

                        let effects = {
                            let mut hold = self.hold.lock().expect("hold lock poisoned");
                            hold.apply_match(candidate, now, &self.tuning)
                        };
                        self.state.set_face_status(FaceStatus::Holding).await;
                        self.process_effects(effects).await;
                    }
                    _ => {
                        trace!("Match above distance ceiling ({:.3}), treated as miss", distance);
                        self.apply_miss(now).await;
                    }
                }
            }
            Ok(_) => {
                self.apply_miss(now).await;
            }
            Err(e) => {
                // Resolver errors are misses inside the grace mechanism,
                // never surfaced directly
                self.note_matcher_error(&e);
                self.apply_miss(now).await;
            }
        }
    }

    fn note_matcher_error(&self, error: &MatcherError) {
        match error {
            MatcherError::Network(reason) => debug!("Match call network error: {}", reason),
            other => warn!("Match call failed: {}", other),
        }
    }

    async fn apply_miss(&self, now: Instant) {
        let was_holding;
        let effects = {
            let mut hold = self.hold.lock().expect("hold lock poisoned");
            was_holding = hold.is_holding();
            hold.apply_miss(now, &self.tuning)
        };
        self.process_effects(effects).await;

        // With nothing held, an idle kiosk shows "detecting" until the
        // unknown signal claims the status
        if !was_holding && self.state.face_status().await == FaceStatus::Idle {
            self.state.set_face_status(FaceStatus::Detecting).await;
        }
    }

    /// Turn machine effects into events and submissions; returns true when
    /// a submission ran
    async fn process_effects(&self, effects: Vec<HoldEffect>) -> bool {
        let mut submitted = false;
        for effect in effects {
            match effect {
                HoldEffect::None => {}
                HoldEffect::HoldStarted {
                    candidate,
                    countdown_seconds,
                } => {
                    self.state.broadcast_event(KioskEvent::HoldStarted {
                        subject_id: candidate.subject_id,
                        display_name: candidate.display_name.clone(),
                        countdown_seconds,
                        timestamp: chrono::Utc::now(),
                    });
                    self.state.set_face_status(FaceStatus::Holding).await;
                }
                HoldEffect::CountdownTick {
                    subject_id,
                    remaining_seconds,
                } => {
                    self.state.broadcast_event(KioskEvent::HoldProgress {
                        subject_id,
                        remaining_seconds,
                        timestamp: chrono::Utc::now(),
                    });
                }
                HoldEffect::BeginSubmit { candidate } => {
                    submitted = true;
                    self.submit_candidate(candidate).await;
                }
                HoldEffect::AwaitConfirmation {
                    candidate,
                    cancel_seconds,
                } => {
                    self.state.broadcast_event(KioskEvent::AwaitingConfirmation {
                        subject_id: candidate.subject_id,
                        display_name: candidate.display_name.clone(),
                        cancel_seconds,
                        timestamp: chrono::Utc::now(),
                    });
                }
                HoldEffect::Canceled { .. } => {
                    self.emit_cancel(effect);
                    self.state.set_face_status(FaceStatus::Detecting).await;
                }
                HoldEffect::SurfaceUnknown => {
                    self.state.set_face_status(FaceStatus::Unknown).await;
                }
            }
        }
        submitted
    }

    fn emit_cancel(&self, effect: HoldEffect) {
        if let HoldEffect::Canceled { subject_id, reason } = effect {
            self.state.broadcast_event(KioskEvent::HoldCanceled {
                subject_id,
                reason: reason.as_str().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    async fn submit_candidate(&self, candidate: Candidate) {
        let Some(session) = self.state.session().await else {
            return;
        };
        let frame = self
            .last_match_frame
            .lock()
            .expect("frame cache lock poisoned")
            .take();

        let attempt = CheckinAttempt {
            subject_id: candidate.subject_id,
            event_id: session.event_id,
            display_name: candidate.display_name.clone(),
            source: CheckinSource::Face,
            confidence_tag: Some(format!("dist:{:.3}", candidate.distance)),
        };

        if let Err(e) = self.coordinator.submit(attempt, frame).await {
            warn!("Face-hold submission error: {}", e);
        }
    }
}
