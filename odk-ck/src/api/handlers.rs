//! HTTP request handlers
//!
//! Thin delegation to the check-in engine; all coordination logic lives in
//! the engine modules.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::engine::submit::SubmitResult;
use crate::engine::StatusSnapshot;
use crate::error::Error;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    event_id: Uuid,
    event_name: String,
    staff_token: String,
    #[serde(default)]
    require_confirmation: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    payload: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    status: String,
    already_checked_in: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ManualCheckinRequest {
    subject_id: Uuid,
    display_name: String,
}

#[derive(Debug, Serialize)]
pub struct CheckinResultResponse {
    status: String,
    already_checked_in: Option<bool>,
}

type HandlerError = (StatusCode, Json<StatusResponse>);

/// Map engine errors to HTTP status codes
fn map_error(e: Error) -> HandlerError {
    let status = match &e {
        Error::NoSession => StatusCode::CONFLICT,
        Error::SessionActive(_) => StatusCode::CONFLICT,
        Error::Scan(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Camera(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", e),
        }),
    )
}

fn submit_result_response(result: SubmitResult) -> CheckinResultResponse {
    match result {
        SubmitResult::Accepted { already_checked_in } => CheckinResultResponse {
            status: "accepted".to_string(),
            already_checked_in: Some(already_checked_in),
        },
        SubmitResult::Queued => CheckinResultResponse {
            status: "queued_offline".to_string(),
            already_checked_in: None,
        },
        SubmitResult::Failed { message } => CheckinResultResponse {
            status: format!("failed: {}", message),
            already_checked_in: None,
        },
        SubmitResult::AlreadyInFlight => CheckinResultResponse {
            status: "dropped_in_flight".to_string(),
            already_checked_in: None,
        },
    }
}

// ============================================================================
// Session Endpoints
// ============================================================================

/// POST /session - Select an event and enter check-in mode
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<StatusCode, HandlerError> {
    info!("Start session request for event '{}'", req.event_name);

    state
        .engine
        .start_session(
            req.event_id,
            req.event_name,
            req.staff_token,
            req.require_confirmation,
        )
        .await
        .map_err(|e| {
            error!("Failed to start session: {}", e);
            map_error(e)
        })?;

    Ok(StatusCode::OK)
}

/// DELETE /session - Leave check-in mode
pub async fn end_session(State(state): State<AppState>) -> Result<StatusCode, HandlerError> {
    state.engine.end_session().await.map_err(|e| {
        error!("Failed to end session: {}", e);
        map_error(e)
    })?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Camera Endpoints
// ============================================================================

/// POST /camera/start - Acquire the capture device (retryable)
pub async fn camera_start(State(state): State<AppState>) -> Result<StatusCode, HandlerError> {
    state.engine.camera_start().await.map_err(|e| {
        warn!("Camera start failed: {}", e);
        // Device failures carry a distinct retryable user message
        if let Error::Camera(camera_error) = &e {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusResponse {
                    status: camera_error.user_message().to_string(),
                }),
            );
        }
        map_error(e)
    })?;
    Ok(StatusCode::OK)
}

/// POST /camera/stop - Release the capture device
pub async fn camera_stop(State(state): State<AppState>) -> Result<StatusCode, HandlerError> {
    state.engine.camera_stop().await.map_err(map_error)?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Scan Endpoint
// ============================================================================

/// POST /scan - Decoded optical payload intake
///
/// The hardware decoder (or front-end decoder) posts raw payload strings.
/// Duplicates inside the debounce window return 200 with a
/// `duplicate_ignored` status; structural/scope rejections return 422 with
/// the typed reason.
pub async fn scan(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, HandlerError> {
    match state.engine.handle_scan(&req.payload).await {
        Ok(Some(result)) => {
            let mapped = submit_result_response(result);
            Ok(Json(ScanResponse {
                status: mapped.status,
                already_checked_in: mapped.already_checked_in,
            }))
        }
        Ok(None) => Ok(Json(ScanResponse {
            status: "duplicate_ignored".to_string(),
            already_checked_in: None,
        })),
        Err(e) => {
            warn!("Scan rejected: {}", e);
            Err(map_error(e))
        }
    }
}

// ============================================================================
// Confirmation Flow Endpoints
// ============================================================================

/// POST /hold/confirm - Staff confirms the pending candidate
pub async fn confirm_hold(
    State(state): State<AppState>,
) -> Result<Json<CheckinResultResponse>, HandlerError> {
    let result = state.engine.confirm_hold().await.map_err(map_error)?;
    Ok(Json(submit_result_response(result)))
}

/// POST /hold/cancel - Staff declines the pending candidate
pub async fn cancel_hold(State(state): State<AppState>) -> Result<StatusCode, HandlerError> {
    state.engine.cancel_hold().await.map_err(map_error)?;
    Ok(StatusCode::OK)
}

// ============================================================================
// Manual Check-in Endpoint
// ============================================================================

/// POST /checkin/manual - Staff-driven check-in from member search
pub async fn manual_checkin(
    State(state): State<AppState>,
    Json(req): Json<ManualCheckinRequest>,
) -> Result<Json<CheckinResultResponse>, HandlerError> {
    info!("Manual check-in request for {}", req.subject_id);
    let result = state
        .engine
        .manual_checkin(req.subject_id, req.display_name)
        .await
        .map_err(map_error)?;
    Ok(Json(submit_result_response(result)))
}

// ============================================================================
// Status + SSE Endpoints
// ============================================================================

/// GET /status - Status snapshot for the front-end
pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<StatusSnapshot>, HandlerError> {
    let snapshot = state.engine.status().await.map_err(|e| {
        error!("Status snapshot failed: {}", e);
        map_error(e)
    })?;
    Ok(Json(snapshot))
}

/// GET /events - SSE stream of kiosk events
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    crate::api::sse::event_stream(state.engine.state())
}
