//! REST API implementation for the check-in kiosk
//!
//! Exposes the engine to the kiosk front-end: session lifecycle, camera
//! control, optical payload intake, the confirmation flow, status, and the
//! SSE event stream.

pub mod handlers;
pub mod sse;

use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::CheckinEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Check-in engine
    pub engine: Arc<CheckinEngine>,
    /// Server port
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(health_check))

        // API v1 routes
        .nest("/api/v1", Router::new()
            // Session lifecycle
            .route("/session", post(handlers::start_session))
            .route("/session", delete(handlers::end_session))

            // Camera control
            .route("/camera/start", post(handlers::camera_start))
            .route("/camera/stop", post(handlers::camera_stop))

            // Optical payload intake
            .route("/scan", post(handlers::scan))

            // Explicit-confirmation flow
            .route("/hold/confirm", post(handlers::confirm_hold))
            .route("/hold/cancel", post(handlers::cancel_hold))

            // Manual check-in
            .route("/checkin/manual", post(handlers::manual_checkin))

            // Status snapshot
            .route("/status", get(handlers::get_status))

            // SSE events
            .route("/events", get(handlers::sse_handler))
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let shared = state.engine.state();
    Json(json!({
        "status": "ok",
        "module": "odk-ck",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "camera_active": shared.camera_active(),
        "engine_ready": shared.engine_ready(),
        "watchdog_restarts": shared.watchdog_restarts(),
    }))
}
