//! Database access for the kiosk service
//!
//! One sqlite database holds the settings key/value table and the offline
//! check-in queue. Candidates and scan debounce entries are never
//! persisted.

pub mod init;
pub mod offline_queue;
pub mod settings;
