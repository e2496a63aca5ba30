//! Error types for odk-ck
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.

use thiserror::Error;

use crate::engine::camera::CameraError;
use crate::engine::scan::ScanRejection;

/// Main error type for the odk-ck module
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Camera device errors, classified by cause
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    /// Match resolver call failures
    #[error("Match resolver error: {0}")]
    Matcher(String),

    /// Optical payload rejected before any network activity
    #[error("Scan rejected: {0}")]
    Scan(#[from] ScanRejection),

    /// Check-in submission failures (user-facing message)
    #[error("Submission error: {0}")]
    Submission(String),

    /// No active check-in session
    #[error("No active session")]
    NoSession,

    /// A session is already active
    #[error("Session already active: {0}")]
    SessionActive(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the odk-ck Error
pub type Result<T> = std::result::Result<T, Error>;
