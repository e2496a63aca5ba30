//! Optical-code intake
//!
//! Decoded payloads arrive from the hardware decoder callback (or the
//! front-end decoder via POST /scan). Structural validation runs before any
//! network activity; invalid payloads are rejected locally with a typed
//! reason. Valid payloads are debounced and then submitted directly: a
//! deliberate code presentation is a high-confidence, user-intentional
//! action and bypasses the hold countdown entirely.
//!
//! Accepted payload forms:
//! - `RSVP|<event>|<subject>|<session>|<code>`: scoped to a specific event
//! - `MBR|<subject>`: generic subject reference
//! - `{"member_id": "<uuid>"}`: JSON object form
//! - bare canonical UUID

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a payload was rejected before reaching the network
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanRejection {
    /// Payload prefix is not in the closed TYPE set
    #[error("unknown code type: {0}")]
    UnknownType(String),

    /// Payload has the wrong number of fields for its type
    #[error("malformed payload")]
    Malformed,

    /// A subject identifier field is not a canonical UUID
    #[error("invalid subject id: {0}")]
    BadSubjectId(String),

    /// An event-scoped code names a different event than the active one
    #[error("code is for a different event")]
    WrongEvent {
        /// Event the code was issued for
        scanned: Uuid,
        /// Event of the active session
        active: Uuid,
    },

    /// Payload seen again within the debounce window
    #[error("duplicate scan")]
    Duplicate,

    /// Intake is closed (camera released or session torn down)
    #[error("scan intake closed")]
    IntakeClosed,
}

impl ScanRejection {
    /// Stable identifier used in events and logs
    pub fn reason_code(&self) -> &'static str {
        match self {
            ScanRejection::UnknownType(_) => "unknown_type",
            ScanRejection::Malformed => "malformed",
            ScanRejection::BadSubjectId(_) => "bad_subject_id",
            ScanRejection::WrongEvent { .. } => "wrong_event",
            ScanRejection::Duplicate => "duplicate",
            ScanRejection::IntakeClosed => "intake_closed",
        }
    }
}

/// A structurally valid optical code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCode {
    /// `RSVP|event|subject|session|code`: valid only for the named event
    EventScoped {
        event_id: Uuid,
        subject_id: Uuid,
        session_ref: String,
        code: String,
    },
    /// `MBR|subject`, JSON object, or bare UUID
    SubjectOnly { subject_id: Uuid },
}

impl ParsedCode {
    /// Subject the code refers to
    pub fn subject_id(&self) -> Uuid {
        match self {
            ParsedCode::EventScoped { subject_id, .. } => *subject_id,
            ParsedCode::SubjectOnly { subject_id } => *subject_id,
        }
    }

    /// Confidence tag recorded with the resulting check-in attempt
    pub fn confidence_tag(&self) -> &'static str {
        match self {
            ParsedCode::EventScoped { .. } => "code:rsvp",
            ParsedCode::SubjectOnly { .. } => "code:subject",
        }
    }
}

/// Parse a raw decoded payload into a structurally valid code
///
/// Purely local. No network, no debounce, no event scoping; those come
/// after.
pub fn parse_payload(raw: &str) -> Result<ParsedCode, ScanRejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanRejection::Malformed);
    }

    // Bare canonical UUID
    if let Ok(subject_id) = Uuid::parse_str(trimmed) {
        return Ok(ParsedCode::SubjectOnly { subject_id });
    }

    // JSON object carrying a subject identifier
    if trimmed.starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|_| ScanRejection::Malformed)?;
        let id = value
            .get("member_id")
            .and_then(|v| v.as_str())
            .ok_or(ScanRejection::Malformed)?;
        let subject_id = Uuid::parse_str(id)
            .map_err(|_| ScanRejection::BadSubjectId(id.to_string()))?;
        return Ok(ParsedCode::SubjectOnly { subject_id });
    }

    // Pipe-delimited typed form
    let fields: Vec<&str> = trimmed.split('|').collect();
    match fields[0] {
        "RSVP" => {
            if fields.len() != 5 {
                return Err(ScanRejection::Malformed);
            }
            let event_id = Uuid::parse_str(fields[1]).map_err(|_| ScanRejection::Malformed)?;
            let subject_id = Uuid::parse_str(fields[2])
                .map_err(|_| ScanRejection::BadSubjectId(fields[2].to_string()))?;
            Ok(ParsedCode::EventScoped {
                event_id,
                subject_id,
                session_ref: fields[3].to_string(),
                code: fields[4].to_string(),
            })
        }
        "MBR" => {
            if fields.len() != 2 {
                return Err(ScanRejection::Malformed);
            }
            let subject_id = Uuid::parse_str(fields[1])
                .map_err(|_| ScanRejection::BadSubjectId(fields[1].to_string()))?;
            Ok(ParsedCode::SubjectOnly { subject_id })
        }
        other => Err(ScanRejection::UnknownType(other.to_string())),
    }
}

/// Check an event-scoped code against the active event
pub fn validate_scope(code: &ParsedCode, active_event: Uuid) -> Result<(), ScanRejection> {
    match code {
        ParsedCode::EventScoped { event_id, .. } if *event_id != active_event => {
            Err(ScanRejection::WrongEvent {
                scanned: *event_id,
                active: active_event,
            })
        }
        _ => Ok(()),
    }
}

/// Capped-lifetime table suppressing repeated payloads
///
/// A payload seen within the debounce window is dropped silently: a code
/// held in front of the camera decodes many times per second. Entries
/// older than the horizon are purged on every insert so the table stays
/// bounded.
pub struct DebounceTable {
    entries: HashMap<String, Instant>,
    window: Duration,
    horizon: Duration,
}

impl DebounceTable {
    pub fn new(window: Duration, horizon: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
            horizon,
        }
    }

    /// Record a payload sighting; false when it falls inside the window
    pub fn check_and_record(&mut self, payload: &str, now: Instant) -> bool {
        self.purge(now);

        if let Some(last_seen) = self.entries.get(payload) {
            if now.duration_since(*last_seen) < self.window {
                // Refresh so a code held continuously stays suppressed
                self.entries.insert(payload.to_string(), now);
                return false;
            }
        }
        self.entries.insert(payload.to_string(), now);
        true
    }

    fn purge(&mut self, now: Instant) {
        let horizon = self.horizon;
        self.entries
            .retain(|_, last_seen| now.duration_since(*last_seen) < horizon);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Optical-code intake: gate + debounce + validation front door
///
/// The intake gate closes before the camera stream tears down, so a decoder
/// callback that fires after teardown lands here and becomes a no-op.
pub struct ScanStream {
    accepting: AtomicBool,
    debounce: Mutex<DebounceTable>,
}

impl ScanStream {
    pub fn new(window: Duration, horizon: Duration) -> Self {
        Self {
            accepting: AtomicBool::new(false),
            debounce: Mutex::new(DebounceTable::new(window, horizon)),
        }
    }

    /// Open intake (camera acquired)
    pub fn resume_intake(&self) {
        self.accepting.store(true, Ordering::Release);
        debug!("Scan intake open");
    }

    /// Close intake (first step of camera release)
    pub fn pause_intake(&self) {
        self.accepting.store(false, Ordering::Release);
        debug!("Scan intake closed");
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Full local pipeline for one decoded payload: gate, parse, scope
    /// check, debounce. Returns the accepted code; every rejection is
    /// local and typed, and no network call has happened either way.
    pub fn accept(
        &self,
        raw: &str,
        active_event: Uuid,
        now: Instant,
    ) -> Result<ParsedCode, ScanRejection> {
        if !self.is_accepting() {
            return Err(ScanRejection::IntakeClosed);
        }

        let code = parse_payload(raw).inspect_err(|e| {
            warn!("Rejected scan payload ({}): {}", e.reason_code(), e);
        })?;

        validate_scope(&code, active_event).inspect_err(|e| {
            warn!("Rejected scan payload ({}): {}", e.reason_code(), e);
        })?;

        let fresh = self
            .debounce
            .lock()
            .expect("debounce table lock poisoned")
            .check_and_record(raw, now);
        if !fresh {
            debug!("Duplicate scan within debounce window, dropped");
            return Err(ScanRejection::Duplicate);
        }

        info!(
            "Accepted {} scan for subject {}",
            code.confidence_tag(),
            code.subject_id()
        );
        Ok(code)
    }
}
