//! Wire types for the match-resolver and attendance services
//!
//! The kiosk treats both services as black boxes: the match resolver turns a
//! still frame into a candidate, the attendance service records check-ins
//! and reports the coarse attendance count. All types here are plain serde
//! structs shared by the reqwest clients and the test fakes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ========================================
// Match resolver
// ========================================

/// Request body for `POST /face/match`
///
/// A single still frame plus the tenant scope. The frame travels as a
/// base64 string because the resolver accepts JSON only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    /// Tenant/organization scope for the lookup
    pub tenant: String,
    /// JPEG frame, base64-encoded
    pub image_b64: String,
}

/// Response body from `POST /face/match`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    /// True when a subject was matched above the resolver's own floor
    pub found: bool,
    /// Matched subject identifier (present when found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    /// Display name for the kiosk screen (present when found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Embedding distance; lower is closer (present when found)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// Reference to the subject's enrollment photo (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}

/// Request body for the best-effort `POST /face/enroll-sample` capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollSampleRequest {
    /// Tenant/organization scope
    pub tenant: String,
    /// Subject the sample belongs to
    pub subject_id: Uuid,
    /// JPEG frame, base64-encoded
    pub image_b64: String,
}

// ========================================
// Attendance service
// ========================================

/// Request body for `POST /attendance/checkin`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinRequest {
    /// Subject being checked in
    pub subject_id: Uuid,
    /// Event the check-in belongs to
    pub event_id: Uuid,
    /// Tenant/organization scope
    pub tenant: String,
    /// Originating stream: "optical", "face", or "manual"
    pub source: String,
    /// Free-form confidence annotation (e.g. match distance)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_tag: Option<String>,
}

/// Response body from `POST /attendance/checkin`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinResponse {
    /// True when the service recorded (or had already recorded) the check-in
    pub accepted: bool,
    /// True when the subject was already checked in for this event
    pub already_checked_in: bool,
    /// Resolved display name, when the service knows it (optical scans
    /// carry only a subject id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Response body from `GET /attendance/count`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceCountResponse {
    /// Current attendance count for the event
    pub count: u64,
}

// ========================================
// Error payloads
// ========================================

/// A structured validation error for one request field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// Field the error applies to
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Error body returned by either service
///
/// The services are inconsistent: some endpoints return a single message,
/// others a list of structured field errors. Both shapes deserialize here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    /// Single human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl ServiceErrorBody {
    /// Flatten either error shape into one user-facing line
    pub fn to_display_message(&self) -> String {
        if let Some(errors) = &self.errors {
            if !errors.is_empty() {
                return errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
            }
        }
        self.message
            .clone()
            .unwrap_or_else(|| "Check-in failed".to_string())
    }
}

// ========================================
// Tests
// ========================================
