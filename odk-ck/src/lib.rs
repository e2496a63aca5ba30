//! # OrgDesk Check-in Kiosk Library (odk-ck)
//!
//! Identity-resolution engine for the unattended event check-in kiosk.
//!
//! **Purpose:** Fuse two continuously-running identification streams
//! (optical-code scanning and face detection/matching) into a single,
//! race-free check-in decision with a human-confirmable hold period,
//! debouncing, grace-period tolerance, offline queueing, and clean camera
//! resource lifecycle, plus the HTTP/SSE control interface the kiosk
//! front-end drives.

pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
