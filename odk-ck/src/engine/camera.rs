//! Camera resource management
//!
//! The capture device is the one exclusive hardware resource in the kiosk.
//! Only the `CameraManager` may start or stop it; the optical-code intake
//! and the detection loop only read frames. Acquire is idempotent and
//! guarded against re-entrant starts; release tears consumers down in a
//! fixed order so a decoder callback firing after stream teardown is a
//! no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use odk_common::events::FaceStatus;

use crate::engine::detector::DetectionLoop;
use crate::engine::scan::ScanStream;
use crate::state::SharedState;

/// One captured frame
///
/// Frames are owned JPEG buffers; consumers decode what they need.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG-encoded image data
    pub jpeg: Vec<u8>,
    /// When the frame was grabbed
    pub captured_at: Instant,
}

/// Camera device failures, classified by cause
///
/// Each category maps to a distinct retryable user-facing message; none is
/// fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The platform denied camera access
    #[error("camera permission denied")]
    PermissionDenied,

    /// No capture device is present
    #[error("camera not found")]
    NotFound,

    /// The device is held by another process
    #[error("camera busy")]
    Busy,

    /// Anything else the backend reported
    #[error("camera failed: {0}")]
    Failed(String),
}

impl CameraError {
    /// User-facing message for the kiosk screen
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied => {
                "Camera access is blocked. Allow camera access and try again."
            }
            CameraError::NotFound => "No camera was found. Connect a camera and try again.",
            CameraError::Busy => "The camera is in use by another program. Close it and try again.",
            CameraError::Failed(_) => "The camera could not be started. Try again.",
        }
    }
}

/// Hardware seam for capture backends
///
/// Implementations wrap the platform capture API. `grab_frame` returns the
/// most recent frame; it must not block on capture cadence.
pub trait CaptureDevice: Send + Sync {
    /// Start capturing. Must be safe to call when already started.
    fn start(&self) -> Result<(), CameraError>;

    /// Stop capturing. Must be safe to call when already stopped.
    fn stop(&self);

    /// Grab the latest frame. Errors while stopped are expected.
    fn grab_frame(&self) -> Result<Frame, CameraError>;
}

/// Owns the capture device and mediates start/stop across UI transitions
pub struct CameraManager {
    device: Arc<dyn CaptureDevice>,
    scan: Arc<ScanStream>,
    detector: Arc<DetectionLoop>,
    state: Arc<SharedState>,

    /// Guard so at most one acquisition attempt is in flight
    starting: AtomicBool,
    /// True between a successful acquire and the matching release
    active: AtomicBool,
}

impl CameraManager {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        scan: Arc<ScanStream>,
        detector: Arc<DetectionLoop>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            device,
            scan,
            detector,
            state,
            starting: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Idempotently start capture
    ///
    /// A second call while capture runs is a no-op; a call while a prior
    /// start is still pending is also a no-op (the starting flag prevents
    /// re-entrant starts). Every failure path leaves the manager in "not
    /// active" so acquire can be retried.
    pub async fn acquire(&self) -> Result<(), CameraError> {
        if self.active.load(Ordering::Acquire) {
            debug!("Camera already active, acquire is a no-op");
            return Ok(());
        }

        if self
            .starting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Camera start already pending, acquire is a no-op");
            return Ok(());
        }

        let result = self.device.start();
        match result {
            Ok(()) => {
                self.active.store(true, Ordering::Release);
                self.starting.store(false, Ordering::Release);
                self.scan.resume_intake();
                self.detector.start().await;
                self.state.set_camera_active(true);
                info!("Camera acquired");
                Ok(())
            }
            Err(e) => {
                // Clean "not active" state so a retry can succeed
                self.starting.store(false, Ordering::Release);
                self.active.store(false, Ordering::Release);
                self.state.set_camera_active(false);
                warn!("Camera acquire failed: {} ({})", e, e.user_message());
                Err(e)
            }
        }
    }

    /// Stop capture and all consumers
    ///
    /// Order matters: the optical-code intake closes first, then the
    /// detection loop, then the hardware stream, then the transient UI
    /// indicators reset. Double-release is a no-op; safe to call from
    /// lifecycle teardown.
    pub async fn release(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            debug!("Camera not active, release is a no-op");
            return;
        }

        self.scan.pause_intake();
        self.detector.stop().await;
        self.device.stop();
        self.state.set_camera_active(false);
        self.state.set_face_status(FaceStatus::Idle).await;
        info!("Camera released");
    }

    /// True between acquire and release
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Grab the latest frame from the device
    pub fn grab_frame(&self) -> Result<Frame, CameraError> {
        self.device.grab_frame()
    }
}

/// Deterministic capture device for tests and the dev profile
///
/// Produces small synthetic JPEG frames with a bright center block so the
/// presence heuristic sees a centered subject. Real deployments provide a
/// platform-backed `CaptureDevice`.
pub struct TestPatternDevice {
    running: AtomicBool,
    /// When false, grab_frame yields an empty dark frame (no presence)
    subject_present: AtomicBool,
    /// Optional injected failure for acquire-path tests
    start_error: std::sync::Mutex<Option<CameraError>>,
}

impl TestPatternDevice {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            subject_present: AtomicBool::new(true),
            start_error: std::sync::Mutex::new(None),
        }
    }

    /// Toggle whether generated frames contain a centered subject
    pub fn set_subject_present(&self, present: bool) {
        self.subject_present.store(present, Ordering::Relaxed);
    }

    /// Make the next start() call fail with the given error
    pub fn fail_next_start(&self, error: CameraError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn encode(present: bool) -> Vec<u8> {
        use image::codecs::jpeg::JpegEncoder;
        use image::{GrayImage, Luma};

        let mut img = GrayImage::from_pixel(64, 64, Luma([16u8]));
        if present {
            // Bright centered 24x24 block reads as a centered subject
            for y in 20..44 {
                for x in 20..44 {
                    img.put_pixel(x, y, Luma([((x + y) % 64 + 160) as u8]));
                }
            }
        }

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, 85);
        img.write_with_encoder(encoder)
            .expect("in-memory JPEG encode cannot fail");
        jpeg
    }
}

impl Default for TestPatternDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for TestPatternDevice {
    fn start(&self) -> Result<(), CameraError> {
        if let Some(error) = self.start_error.lock().unwrap().take() {
            return Err(error);
        }
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn grab_frame(&self) -> Result<Frame, CameraError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(CameraError::Failed("device stopped".to_string()));
        }
        Ok(Frame {
            jpeg: Self::encode(self.subject_present.load(Ordering::Relaxed)),
            captured_at: Instant::now(),
        })
    }
}
