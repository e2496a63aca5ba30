//! Match resolver client
//!
//! The resolver is a black-box remote service: one still frame in, a
//! candidate (or nothing) out. The engine treats it as rate-limited,
//! possibly slow, and possibly failing: a resolver error is just a miss
//! for the grace-period mechanism, never surfaced directly.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;
use tracing::debug;

use odk_common::api::types::{EnrollSampleRequest, MatchRequest, MatchResponse};

use crate::engine::camera::Frame;

const USER_AGENT: &str = concat!("odk-ck/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// Match resolver call failures
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Black-box remote face matching
#[async_trait]
pub trait MatchResolver: Send + Sync {
    /// Resolve one frame to a candidate
    async fn match_frame(&self, frame: &Frame) -> Result<MatchResponse, MatcherError>;

    /// Best-effort enrollment-learning capture after a fresh check-in.
    /// Failures are the caller's to swallow.
    async fn enroll_sample(&self, subject_id: uuid::Uuid, frame: &Frame)
        -> Result<(), MatcherError>;
}

/// reqwest-backed resolver client
pub struct HttpMatchResolver {
    http_client: reqwest::Client,
    base_url: String,
    tenant: String,
}

impl HttpMatchResolver {
    pub fn new(base_url: String, tenant: String) -> Result<Self, MatcherError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MatcherError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            tenant,
        })
    }

    fn encode_frame(frame: &Frame) -> String {
        base64::engine::general_purpose::STANDARD.encode(&frame.jpeg)
    }
}

#[async_trait]
impl MatchResolver for HttpMatchResolver {
    async fn match_frame(&self, frame: &Frame) -> Result<MatchResponse, MatcherError> {
        let request = MatchRequest {
            tenant: self.tenant.clone(),
            image_b64: Self::encode_frame(frame),
        };

        let response = self
            .http_client
            .post(format!("{}/face/match", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| MatcherError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatcherError::Api(status.as_u16(), body));
        }

        let parsed: MatchResponse = response
            .json()
            .await
            .map_err(|e| MatcherError::Parse(e.to_string()))?;
        debug!(
            "Match resolver: found={} distance={:?}",
            parsed.found, parsed.distance
        );
        Ok(parsed)
    }

    async fn enroll_sample(
        &self,
        subject_id: uuid::Uuid,
        frame: &Frame,
    ) -> Result<(), MatcherError> {
        let request = EnrollSampleRequest {
            tenant: self.tenant.clone(),
            subject_id,
            image_b64: Self::encode_frame(frame),
        };

        let response = self
            .http_client
            .post(format!("{}/face/enroll-sample", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| MatcherError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatcherError::Api(status.as_u16(), body));
        }
        Ok(())
    }
}
