//! Event types for the OrgDesk kiosk event system
//!
//! Provides the shared event definitions and EventBus used by the check-in
//! kiosk service and forwarded to connected front-ends over SSE.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Face engine status as surfaced to the kiosk front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceStatus {
    /// No session or camera inactive
    Idle,
    /// Camera running, looking for a face
    Detecting,
    /// A candidate is held and counting down
    Holding,
    /// Presence seen repeatedly with no successful match
    Unknown,
}

/// Where a check-in attempt originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckinSource {
    /// Decoded optical code presented to the camera or scanner gun
    Optical,
    /// Face match hold that completed its countdown
    Face,
    /// Staff-driven manual check-in
    Manual,
}

impl CheckinSource {
    /// Wire representation used by the attendance service
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinSource::Optical => "optical",
            CheckinSource::Face => "face",
            CheckinSource::Manual => "manual",
        }
    }
}

/// OrgDesk kiosk event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// All events use this central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KioskEvent {
    /// A check-in session started (event selected on the kiosk)
    ///
    /// Triggers:
    /// - SSE: Front-end switches to check-in mode
    SessionStarted {
        /// Event being checked into
        event_id: Uuid,
        /// Display name of the event
        event_name: String,
        /// When the session started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The check-in session ended (kiosk left check-in mode)
    SessionEnded {
        /// Event that was being checked into
        event_id: Uuid,
        /// When the session ended
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Camera acquired or released
    ///
    /// Triggers:
    /// - SSE: Update camera indicator
    CameraStateChanged {
        /// True when capture is running
        active: bool,
        /// When the state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Face engine status transition (idle/detecting/holding/unknown)
    FaceStatusChanged {
        /// Status before change
        old_status: FaceStatus,
        /// Status after change
        new_status: FaceStatus,
        /// When status changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A face candidate entered the hold countdown
    ///
    /// Triggers:
    /// - SSE: Show candidate name and countdown ring
    HoldStarted {
        /// Matched subject
        subject_id: Uuid,
        /// Display name for the kiosk screen
        display_name: String,
        /// Countdown length in seconds
        countdown_seconds: u32,
        /// When the hold started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Hold countdown progressed by one second
    HoldProgress {
        /// Subject being held
        subject_id: Uuid,
        /// Seconds remaining before automatic submission
        remaining_seconds: u32,
        /// When the tick occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An active hold was canceled before submission
    ///
    /// Reasons include grace-period exhaustion, a different subject
    /// matching, camera stop, and session teardown.
    HoldCanceled {
        /// Subject whose hold ended
        subject_id: Uuid,
        /// Human-readable cancel reason
        reason: String,
        /// When the hold was canceled
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A hold completed its countdown in confirmation mode and now waits
    /// for explicit staff confirm/cancel
    AwaitingConfirmation {
        /// Subject awaiting confirmation
        subject_id: Uuid,
        /// Display name for the confirmation dialog
        display_name: String,
        /// Seconds before the pending confirmation auto-cancels
        cancel_seconds: u32,
        /// When confirmation began
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A check-in submission was accepted by the attendance service
    ///
    /// Triggers:
    /// - SSE: Celebratory feedback (only when not already checked in)
    CheckinAccepted {
        /// Subject checked in
        subject_id: Uuid,
        /// Display name for the welcome screen
        display_name: String,
        /// True when the subject had already been checked in this event
        already_checked_in: bool,
        /// Which stream produced the submission
        source: CheckinSource,
        /// When the result arrived
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A check-in submission failed
    CheckinFailed {
        /// Subject whose submission failed
        subject_id: Uuid,
        /// User-facing error message (auto-cleared by the front-end)
        message: String,
        /// When the failure occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An optical payload was rejected before any network activity
    ScanRejected {
        /// Typed rejection reason identifier
        reason: String,
        /// When the payload was rejected
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The coarse attendance count was refreshed
    AttendanceCountUpdated {
        /// Event the count belongs to
        event_id: Uuid,
        /// Current attendance count
        count: u64,
        /// When the count was refreshed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The watchdog restarted a stale detection loop
    DetectorRestarted {
        /// Total watchdog restarts since startup
        restart_count: u64,
        /// When the restart happened
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The offline queue finished a drain pass
    OfflineQueueDrained {
        /// Items submitted successfully
        submitted: u64,
        /// Items dropped after a failed submission
        dropped: u64,
        /// When the drain completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast-based event bus shared by engine components
///
/// Wraps a tokio broadcast channel; senders never block and send errors
/// (no receivers) are ignored.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KioskEvent>,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all subscribers (no receivers is OK)
    pub fn emit(&self, event: KioskEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<KioskEvent> {
        self.tx.subscribe()
    }

    /// Current number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
