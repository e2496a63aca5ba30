//! Shared test helpers: in-memory database, scripted service fakes, and an
//! engine builder with fast tuning values.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use odk_common::api::types::{CheckinRequest, CheckinResponse, MatchResponse};

use odk_ck::clients::{AttendanceError, AttendanceService, MatchResolver, MatcherError};
use odk_ck::config::{Config, TuningConfig};
use odk_ck::db::init::init_database;
use odk_ck::engine::camera::{CaptureDevice, Frame, TestPatternDevice};
use odk_ck::engine::presence::CenterWeightedDetector;
use odk_ck::engine::CheckinEngine;
use odk_ck::state::SharedState;

/// Create in-memory test database with schema
///
/// Single connection: each pooled sqlite connection would otherwise get
/// its own private in-memory database.
pub async fn create_test_db() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_database(&pool).await.unwrap();
    pool
}

/// Tuning values scaled down so integration tests run in seconds
pub fn fast_tuning() -> TuningConfig {
    TuningConfig {
        detect_interval_ms: 25,
        hold_countdown_seconds: 1,
        grace_miss_threshold: 3,
        presence_miss_threshold: 3,
        unknown_surface_delay_ms: 50,
        sticky_match_window_ms: 100,
        scan_debounce_window_ms: 500,
        scan_debounce_horizon_ms: 5000,
        match_distance_ceiling: 0.6,
        watchdog_interval_ms: 100,
        watchdog_stale_after_ms: 400,
        success_dismiss_ms: 100,
        failure_dismiss_ms: 50,
        count_poll_interval_ms: 60_000,
        confirm_cancel_seconds: 1,
        offline_drain_interval_ms: 60_000,
    }
}

pub fn test_config(tuning: TuningConfig) -> Config {
    Config {
        data_folder: std::env::temp_dir(),
        tenant: "test-tenant".to_string(),
        matcher_base_url: "http://unused".to_string(),
        attendance_base_url: "http://unused".to_string(),
        tuning,
    }
}

// ============================================================================
// Scripted match resolver
// ============================================================================

/// Match resolver fake driven by a response script
///
/// With an empty script every call returns `found: false`.
pub struct ScriptedResolver {
    script: Mutex<VecDeque<Result<MatchResponse, MatcherError>>>,
    /// When set, an exhausted script keeps returning this subject
    steady_subject: Mutex<Option<(Uuid, String)>>,
    pub match_calls: AtomicU64,
    pub enroll_calls: AtomicU64,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            steady_subject: Mutex::new(None),
            match_calls: AtomicU64::new(0),
            enroll_calls: AtomicU64::new(0),
        }
    }

    pub fn push_found(&self, subject_id: Uuid, name: &str, distance: f32) {
        self.script.lock().unwrap().push_back(Ok(MatchResponse {
            found: true,
            subject_id: Some(subject_id),
            display_name: Some(name.to_string()),
            distance: Some(distance),
            photo_ref: None,
        }));
    }

    pub fn push_not_found(&self) {
        self.script.lock().unwrap().push_back(Ok(MatchResponse {
            found: false,
            subject_id: None,
            display_name: None,
            distance: None,
            photo_ref: None,
        }));
    }

    pub fn push_error(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(MatcherError::Network("connection refused".to_string())));
    }

    /// After the script drains, keep matching this subject forever
    pub fn set_steady_subject(&self, subject_id: Uuid, name: &str) {
        *self.steady_subject.lock().unwrap() = Some((subject_id, name.to_string()));
    }

    pub fn clear_steady_subject(&self) {
        *self.steady_subject.lock().unwrap() = None;
    }
}

#[async_trait]
impl MatchResolver for ScriptedResolver {
    async fn match_frame(&self, _frame: &Frame) -> Result<MatchResponse, MatcherError> {
        self.match_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }
        if let Some((subject_id, name)) = self.steady_subject.lock().unwrap().clone() {
            return Ok(MatchResponse {
                found: true,
                subject_id: Some(subject_id),
                display_name: Some(name),
                distance: Some(0.3),
                photo_ref: None,
            });
        }
        Ok(MatchResponse {
            found: false,
            subject_id: None,
            display_name: None,
            distance: None,
            photo_ref: None,
        })
    }

    async fn enroll_sample(
        &self,
        _subject_id: Uuid,
        _frame: &Frame,
    ) -> Result<(), MatcherError> {
        self.enroll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Fake attendance service
// ============================================================================

/// What the fake answers with
#[derive(Debug, Clone)]
pub enum AttendanceMode {
    /// Accept; `already` controls the duplicate flag
    Accept { already: bool },
    /// Accept new once, then report duplicates (event-session semantics)
    AcceptOnce,
    /// Reject with a user-facing message
    Reject(String),
    /// Connectivity failure
    Offline,
}

/// Attendance service fake with a call log and settable behavior
pub struct FakeAttendance {
    pub calls: Mutex<Vec<CheckinRequest>>,
    mode: Mutex<AttendanceMode>,
    /// Subjects always rejected regardless of mode (poisoned entries)
    reject_subjects: Mutex<Vec<Uuid>>,
    /// Subjects already recorded (drives AcceptOnce)
    seen: Mutex<Vec<Uuid>>,
    /// Optional artificial latency before answering
    delay: Mutex<Option<Duration>>,
    pub count_value: AtomicU64,
}

impl FakeAttendance {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            mode: Mutex::new(AttendanceMode::AcceptOnce),
            reject_subjects: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            count_value: AtomicU64::new(0),
        }
    }

    pub fn set_mode(&self, mode: AttendanceMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Always reject this subject (poisoned queue entry)
    pub fn reject_subject(&self, subject_id: Uuid) {
        self.reject_subjects.lock().unwrap().push(subject_id);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, subject_id: Uuid) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.subject_id == subject_id)
            .count()
    }
}

#[async_trait]
impl AttendanceService for FakeAttendance {
    async fn checkin(&self, request: CheckinRequest) -> Result<CheckinResponse, AttendanceError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mode = self.mode.lock().unwrap().clone();
        // Every attempt that reaches the wire is logged, including ones
        // that find the service unreachable
        self.calls.lock().unwrap().push(request.clone());
        if matches!(mode, AttendanceMode::Offline) {
            return Err(AttendanceError::Offline("connect refused".to_string()));
        }

        if self
            .reject_subjects
            .lock()
            .unwrap()
            .contains(&request.subject_id)
        {
            return Err(AttendanceError::Rejected("subject is blocked".to_string()));
        }

        match mode {
            AttendanceMode::Accept { already } => Ok(CheckinResponse {
                accepted: true,
                already_checked_in: already,
                display_name: None,
            }),
            AttendanceMode::AcceptOnce => {
                let mut seen = self.seen.lock().unwrap();
                let already = seen.contains(&request.subject_id);
                if !already {
                    seen.push(request.subject_id);
                    self.count_value.fetch_add(1, Ordering::SeqCst);
                }
                Ok(CheckinResponse {
                    accepted: true,
                    already_checked_in: already,
                    display_name: None,
                })
            }
            AttendanceMode::Reject(message) => Err(AttendanceError::Rejected(message)),
            AttendanceMode::Offline => unreachable!(),
        }
    }

    async fn count(&self, _event_id: Uuid) -> Result<u64, AttendanceError> {
        Ok(self.count_value.load(Ordering::SeqCst))
    }
}

/// Await the first broadcast event matching `pred`, with a timeout
pub async fn wait_for_event<F>(
    rx: &mut tokio::sync::broadcast::Receiver<odk_common::events::KioskEvent>,
    timeout: Duration,
    mut pred: F,
) -> odk_common::events::KioskEvent
where
    F: FnMut(&odk_common::events::KioskEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

// ============================================================================
// Engine builder
// ============================================================================

/// Everything a test needs to drive the engine
pub struct TestRig {
    pub engine: Arc<CheckinEngine>,
    pub state: Arc<SharedState>,
    pub pool: Pool<Sqlite>,
    pub device: Arc<TestPatternDevice>,
    pub resolver: Arc<ScriptedResolver>,
    pub attendance: Arc<FakeAttendance>,
    pub tuning: TuningConfig,
}

impl TestRig {
    pub async fn new() -> Self {
        Self::with_tuning(fast_tuning()).await
    }

    pub async fn with_tuning(tuning: TuningConfig) -> Self {
        let pool = create_test_db().await;
        let state = Arc::new(SharedState::new());
        let device = Arc::new(TestPatternDevice::new());
        let resolver = Arc::new(ScriptedResolver::new());
        let attendance = Arc::new(FakeAttendance::new());
        let config = test_config(tuning.clone());

        let engine = Arc::new(CheckinEngine::new(
            pool.clone(),
            Arc::clone(&state),
            &config,
            Arc::clone(&device) as Arc<dyn CaptureDevice>,
            Arc::new(CenterWeightedDetector::default()),
            Arc::clone(&resolver) as Arc<dyn MatchResolver>,
            Arc::clone(&attendance) as Arc<dyn AttendanceService>,
        ));

        Self {
            engine,
            state,
            pool,
            device,
            resolver,
            attendance,
            tuning,
        }
    }

    /// Start a session for a fixed test event
    pub async fn start_session(&self) -> Uuid {
        self.start_session_with(false).await
    }

    pub async fn start_session_with(&self, require_confirmation: bool) -> Uuid {
        let event_id = Uuid::from_u128(9);
        self.engine
            .start_session(
                event_id,
                "Test Event".to_string(),
                "staff-token".to_string(),
                require_confirmation,
            )
            .await
            .unwrap();
        event_id
    }
}
