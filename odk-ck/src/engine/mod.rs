//! Check-in engine
//!
//! Orchestrates the kiosk's identity-resolution components: the camera
//! resource manager, the optical-code intake, the face detection loop, the
//! hold-confirmation state machine, and the submission coordinator, plus
//! the watchdog and attendance-count background tasks.

pub mod camera;
pub mod counter;
pub mod detector;
pub mod hold;
pub mod presence;
pub mod scan;
pub mod submit;
pub mod watchdog;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use sqlx::{Pool, Sqlite};
use tracing::info;
use uuid::Uuid;

use odk_common::events::{CheckinSource, FaceStatus, KioskEvent};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::{Session, SharedState};

use camera::{CameraManager, CaptureDevice};
use detector::{DetectionLoop, DetectorGate};
use hold::HoldState;
use presence::PresenceDetector;
use scan::ScanStream;
use submit::{CheckinAttempt, SubmissionCoordinator, SubmitResult};

use crate::clients::{AttendanceService, MatchResolver};

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub camera_active: bool,
    pub engine_ready: bool,
    pub detector_running: bool,
    pub face_status: FaceStatus,
    pub attendance_count: u64,
    pub offline_queue_depth: u64,
    pub watchdog_restarts: u64,
    pub session: Option<SessionSummary>,
}

/// Session fields exposed over the API
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub event_id: Uuid,
    pub event_name: String,
}

/// Top-level coordinator for the check-in kiosk
pub struct CheckinEngine {
    db: Pool<Sqlite>,
    state: Arc<SharedState>,
    hold: Arc<Mutex<HoldState>>,
    coordinator: Arc<SubmissionCoordinator>,
    scan: Arc<ScanStream>,
    detector: Arc<DetectionLoop>,
    camera: CameraManager,

    /// Background task handles, aborted on teardown
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CheckinEngine {
    /// Wire all components and start the background tasks
    pub fn new(
        db: Pool<Sqlite>,
        state: Arc<SharedState>,
        config: &Config,
        device: Arc<dyn CaptureDevice>,
        presence: Arc<dyn PresenceDetector>,
        matcher: Arc<dyn MatchResolver>,
        attendance: Arc<dyn AttendanceService>,
    ) -> Self {
        info!("Creating check-in engine");
        let tuning = config.tuning.clone();

        let hold = Arc::new(Mutex::new(HoldState::new()));
        let gate = Arc::new(DetectorGate::new());

        let coordinator = Arc::new(SubmissionCoordinator::new(
            Arc::clone(&attendance),
            Arc::clone(&matcher),
            db.clone(),
            Arc::clone(&state),
            Arc::clone(&hold),
            Arc::clone(&gate),
            tuning.clone(),
            config.tenant.clone(),
        ));

        let scan = Arc::new(ScanStream::new(
            tuning.scan_debounce_window(),
            tuning.scan_debounce_horizon(),
        ));

        let detector = Arc::new(DetectionLoop::new(
            Arc::clone(&device),
            presence,
            matcher,
            Arc::clone(&coordinator),
            Arc::clone(&hold),
            Arc::clone(&gate),
            Arc::clone(&state),
            tuning.clone(),
        ));

        let camera = CameraManager::new(
            device,
            Arc::clone(&scan),
            Arc::clone(&detector),
            Arc::clone(&state),
        );

        let tasks = vec![
            watchdog::spawn_watchdog(
                Arc::clone(&detector),
                Arc::clone(&coordinator),
                Arc::clone(&state),
                tuning.clone(),
            ),
            counter::spawn_count_poller(attendance, Arc::clone(&state), tuning.clone()),
            coordinator.spawn_drain_task(),
        ];

        state.set_engine_ready(true);
        info!("Check-in engine ready");

        Self {
            db,
            state,
            hold,
            coordinator,
            scan,
            detector,
            camera,
            tasks: Mutex::new(tasks),
        }
    }

    /// Shared state handle for the HTTP layer
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Database pool handle
    pub fn db(&self) -> &Pool<Sqlite> {
        &self.db
    }

    /// Start a check-in session for the selected event and acquire the
    /// camera
    pub async fn start_session(
        &self,
        event_id: Uuid,
        event_name: String,
        staff_token: String,
        require_confirmation: bool,
    ) -> Result<()> {
        if let Some(existing) = self.state.session().await {
            return Err(Error::SessionActive(existing.event_name));
        }

        let session = Session {
            event_id,
            event_name: event_name.clone(),
            staff_token,
            require_confirmation,
            started_at: chrono::Utc::now(),
        };
        self.state.set_session(Some(session)).await;
        self.state.set_attendance_count(0);
        self.state.broadcast_event(KioskEvent::SessionStarted {
            event_id,
            event_name,
            timestamp: chrono::Utc::now(),
        });

        // Camera failures leave the session up; the operator can retry
        // from the camera endpoint
        match self.camera.acquire().await {
            Ok(()) => {
                self.state.set_face_status(FaceStatus::Detecting).await;
                Ok(())
            }
            Err(e) => Err(Error::Camera(e)),
        }
    }

    /// Leave check-in mode: release the camera, clear the session
    pub async fn end_session(&self) -> Result<()> {
        let Some(session) = self.state.session().await else {
            return Err(Error::NoSession);
        };

        self.camera.release().await;
        self.state.set_session(None).await;
        self.state.broadcast_event(KioskEvent::SessionEnded {
            event_id: session.event_id,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Start capture for the active session (retry path after a device
    /// failure)
    pub async fn camera_start(&self) -> Result<()> {
        if !self.state.session_active().await {
            return Err(Error::NoSession);
        }
        self.camera.acquire().await?;
        self.state.set_face_status(FaceStatus::Detecting).await;
        Ok(())
    }

    /// Stop capture without ending the session
    pub async fn camera_stop(&self) -> Result<()> {
        self.camera.release().await;
        Ok(())
    }

    /// Handle one decoded optical payload
    ///
    /// Returns `Ok(None)` when the payload was a silent duplicate drop.
    /// Structural and scope rejections surface as `Error::Scan` after a
    /// `ScanRejected` event; no network call has happened on any rejection
    /// path.
    pub async fn handle_scan(&self, raw: &str) -> Result<Option<SubmitResult>> {
        let Some(session) = self.state.session().await else {
            return Err(Error::NoSession);
        };

        let code = match self.scan.accept(raw, session.event_id, Instant::now()) {
            Ok(code) => code,
            Err(scan::ScanRejection::Duplicate) => return Ok(None),
            Err(rejection) => {
                self.state.broadcast_event(KioskEvent::ScanRejected {
                    reason: rejection.reason_code().to_string(),
                    timestamp: chrono::Utc::now(),
                });
                return Err(Error::Scan(rejection));
            }
        };

        // A deliberate code presentation bypasses the hold countdown
        let attempt = CheckinAttempt {
            subject_id: code.subject_id(),
            event_id: session.event_id,
            display_name: String::new(),
            source: CheckinSource::Optical,
            confidence_tag: Some(code.confidence_tag().to_string()),
        };
        let result = self.coordinator.submit(attempt, None).await?;
        Ok(Some(result))
    }

    /// Staff-driven manual check-in
    pub async fn manual_checkin(
        &self,
        subject_id: Uuid,
        display_name: String,
    ) -> Result<SubmitResult> {
        let Some(session) = self.state.session().await else {
            return Err(Error::NoSession);
        };

        let attempt = CheckinAttempt {
            subject_id,
            event_id: session.event_id,
            display_name,
            source: CheckinSource::Manual,
            confidence_tag: None,
        };
        self.coordinator.submit(attempt, None).await
    }

    /// Confirm the pending candidate (explicit-confirmation flow)
    pub async fn confirm_hold(&self) -> Result<SubmitResult> {
        let Some(session) = self.state.session().await else {
            return Err(Error::NoSession);
        };

        let candidate = {
            let mut hold = self.hold.lock().expect("hold lock poisoned");
            hold.confirm()
        };
        let Some(candidate) = candidate else {
            return Err(Error::InvalidState(
                "no candidate awaiting confirmation".to_string(),
            ));
        };

        let attempt = CheckinAttempt {
            subject_id: candidate.subject_id,
            event_id: session.event_id,
            display_name: candidate.display_name.clone(),
            source: CheckinSource::Face,
            confidence_tag: Some(format!("dist:{:.3} confirmed", candidate.distance)),
        };
        self.coordinator.submit(attempt, None).await
    }

    /// Decline the pending candidate
    pub async fn cancel_hold(&self) -> Result<()> {
        let effect = {
            let mut hold = self.hold.lock().expect("hold lock poisoned");
            hold.decline()
        };
        let Some(hold::HoldEffect::Canceled { subject_id, reason }) = effect else {
            return Err(Error::InvalidState(
                "no candidate awaiting confirmation".to_string(),
            ));
        };

        self.state.broadcast_event(KioskEvent::HoldCanceled {
            subject_id,
            reason: reason.as_str().to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.state.set_face_status(FaceStatus::Detecting).await;
        Ok(())
    }

    /// Status snapshot for the front-end
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let session = self.state.session().await.map(|s| SessionSummary {
            event_id: s.event_id,
            event_name: s.event_name,
        });

        Ok(StatusSnapshot {
            camera_active: self.state.camera_active(),
            engine_ready: self.state.engine_ready(),
            detector_running: self.detector.is_running(),
            face_status: self.state.face_status().await,
            attendance_count: self.state.attendance_count(),
            offline_queue_depth: self.coordinator.queue_depth().await?,
            watchdog_restarts: self.state.watchdog_restarts(),
            session,
        })
    }

    /// Release all resources and stop background tasks
    ///
    /// Safe to call repeatedly; used from graceful shutdown.
    pub async fn teardown(&self) {
        self.camera.release().await;
        self.state.set_session(None).await;
        self.state.set_engine_ready(false);
        for task in self.tasks.lock().expect("task list lock poisoned").drain(..) {
            task.abort();
        }
        info!("Check-in engine torn down");
    }
}
