//! Attendance service client
//!
//! Records check-ins and reports the coarse attendance count. Connectivity
//! failures are classified separately from rejections so the submission
//! coordinator can route offline attempts to the local queue instead of
//! failing them.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use odk_common::api::types::{
    AttendanceCountResponse, CheckinRequest, CheckinResponse, ServiceErrorBody,
};

const USER_AGENT: &str = concat!("odk-ck/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Attendance service call failures
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Connect/timeout class: the device is (or just went) offline
    #[error("Offline: {0}")]
    Offline(String),

    /// The service refused the request; carries the user-facing message
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Remote attendance recording, behind a trait for test fakes
#[async_trait]
pub trait AttendanceService: Send + Sync {
    /// Record one check-in attempt
    async fn checkin(&self, request: CheckinRequest) -> Result<CheckinResponse, AttendanceError>;

    /// Coarse attendance count for an event
    async fn count(&self, event_id: Uuid) -> Result<u64, AttendanceError>;
}

/// reqwest-backed attendance client
pub struct HttpAttendanceService {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpAttendanceService {
    pub fn new(base_url: String) -> Result<Self, AttendanceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AttendanceError::Offline(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Connect and timeout errors mean "offline"; anything else that
    /// reaches the wire is a rejection
    fn classify_transport(e: reqwest::Error) -> AttendanceError {
        if e.is_connect() || e.is_timeout() {
            AttendanceError::Offline(e.to_string())
        } else {
            AttendanceError::Rejected(e.to_string())
        }
    }
}

#[async_trait]
impl AttendanceService for HttpAttendanceService {
    async fn checkin(&self, request: CheckinRequest) -> Result<CheckinResponse, AttendanceError> {
        let response = self
            .http_client
            .post(format!("{}/attendance/checkin", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            // The service answers with a single message or a structured
            // field-error list; flatten either into one display line
            let message = match response.json::<ServiceErrorBody>().await {
                Ok(body) => body.to_display_message(),
                Err(_) => format!("Check-in failed ({})", status.as_u16()),
            };
            return Err(AttendanceError::Rejected(message));
        }

        let parsed: CheckinResponse = response
            .json()
            .await
            .map_err(|e| AttendanceError::Parse(e.to_string()))?;
        debug!(
            "Attendance checkin: accepted={} already={}",
            parsed.accepted, parsed.already_checked_in
        );
        Ok(parsed)
    }

    async fn count(&self, event_id: Uuid) -> Result<u64, AttendanceError> {
        let response = self
            .http_client
            .get(format!("{}/attendance/count", self.base_url))
            .query(&[("event_id", event_id.to_string())])
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttendanceError::Rejected(format!(
                "count endpoint returned {}",
                status.as_u16()
            )));
        }

        let parsed: AttendanceCountResponse = response
            .json()
            .await
            .map_err(|e| AttendanceError::Parse(e.to_string()))?;
        Ok(parsed.count)
    }
}
