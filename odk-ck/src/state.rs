//! Shared kiosk state
//!
//! Thread-safe shared state for coordination between the engine components
//! and the HTTP surface. All mutation happens inside tick handlers and API
//! handlers; readers are the status endpoint and the SSE bridge.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use odk_common::events::{EventBus, FaceStatus, KioskEvent};

/// Active check-in session
///
/// Created when an event is chosen on the kiosk, destroyed when the kiosk
/// leaves check-in mode. At most one session exists at a time.
#[derive(Debug, Clone)]
pub struct Session {
    /// Event being checked into
    pub event_id: Uuid,
    /// Display name of the event
    pub event_name: String,
    /// Opaque staff identity that opened the session
    pub staff_token: String,
    /// When true, face holds park in AwaitingConfirmation instead of
    /// submitting automatically
    pub require_confirmation: bool,
    /// When the session started
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Shared state accessible by all components
///
/// Uses RwLock for fields with concurrent read access and rare writes,
/// atomics for flags read on every tick.
pub struct SharedState {
    /// Active session (None when the kiosk is outside check-in mode)
    session: RwLock<Option<Session>>,

    /// Face engine status surfaced to the front-end
    face_status: RwLock<FaceStatus>,

    /// True while the capture device is running
    camera_active: AtomicBool,

    /// True once the engine finished wiring and can accept work
    engine_ready: AtomicBool,

    /// Coarse attendance count for UI feedback (not correctness-critical)
    attendance_count: AtomicU64,

    /// Event bus feeding the SSE bridge
    events: EventBus,

    /// Total watchdog-driven detector restarts since startup
    ///
    /// Surfaced via /health for monitoring detector liveness.
    watchdog_restarts_total: AtomicU64,
}

impl SharedState {
    /// Create new shared state with default values
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            face_status: RwLock::new(FaceStatus::Idle),
            camera_active: AtomicBool::new(false),
            engine_ready: AtomicBool::new(false),
            attendance_count: AtomicU64::new(0),
            events: EventBus::new(100),
            watchdog_restarts_total: AtomicU64::new(0),
        }
    }

    /// Broadcast an event to all SSE listeners (no receivers is OK)
    pub fn broadcast_event(&self, event: KioskEvent) {
        self.events.emit(event);
    }

    /// Subscribe to the event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<KioskEvent> {
        self.events.subscribe()
    }

    /// Get the active session, if any
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Install a new session
    pub async fn set_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }

    /// True while a session is active
    pub async fn session_active(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Current face engine status
    pub async fn face_status(&self) -> FaceStatus {
        *self.face_status.read().await
    }

    /// Update face status, broadcasting the transition when it changes
    pub async fn set_face_status(&self, new_status: FaceStatus) {
        let mut status = self.face_status.write().await;
        if *status != new_status {
            let old_status = *status;
            *status = new_status;
            drop(status);
            self.broadcast_event(KioskEvent::FaceStatusChanged {
                old_status,
                new_status,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// True while the capture device is running
    pub fn camera_active(&self) -> bool {
        self.camera_active.load(Ordering::Relaxed)
    }

    /// Update the camera-active flag, broadcasting on change
    pub fn set_camera_active(&self, active: bool) {
        let was = self.camera_active.swap(active, Ordering::Relaxed);
        if was != active {
            self.broadcast_event(KioskEvent::CameraStateChanged {
                active,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// True once the engine is wired and accepting work
    pub fn engine_ready(&self) -> bool {
        self.engine_ready.load(Ordering::Relaxed)
    }

    /// Mark the engine ready/not ready
    pub fn set_engine_ready(&self, ready: bool) {
        self.engine_ready.store(ready, Ordering::Relaxed);
    }

    /// Current attendance count
    pub fn attendance_count(&self) -> u64 {
        self.attendance_count.load(Ordering::Relaxed)
    }

    /// Replace the attendance count (from the poll task)
    pub fn set_attendance_count(&self, count: u64) {
        self.attendance_count.store(count, Ordering::Relaxed);
    }

    /// Bump the attendance count locally after a new check-in
    pub fn increment_attendance_count(&self) -> u64 {
        self.attendance_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a watchdog-driven detector restart
    pub fn increment_watchdog_restarts(&self) -> u64 {
        self.watchdog_restarts_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total watchdog restarts since startup
    pub fn watchdog_restarts(&self) -> u64 {
        self.watchdog_restarts_total.load(Ordering::Relaxed)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
