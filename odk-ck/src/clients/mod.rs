//! HTTP clients for the kiosk's external collaborators
//!
//! Both services sit behind traits so the engine and the tests never care
//! whether a real network is attached.

pub mod attendance;
pub mod matcher;

pub use attendance::{AttendanceError, AttendanceService, HttpAttendanceService};
pub use matcher::{HttpMatchResolver, MatchResolver, MatcherError};
