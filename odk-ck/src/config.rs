//! odk-ck configuration
//!
//! All engine thresholds are tuning values, not hard-coded constants. The
//! shipped defaults are starting points with no claimed optimality; deploys
//! override them via the TOML config file, and the operational subset is
//! additionally persisted in the settings table.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Service configuration assembled at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Folder holding the sqlite database
    pub data_folder: PathBuf,
    /// Tenant/organization scope sent with every remote call
    pub tenant: String,
    /// Base URL of the match resolver service
    pub matcher_base_url: String,
    /// Base URL of the attendance service
    pub attendance_base_url: String,
    /// Engine tuning values
    pub tuning: TuningConfig,
}

/// Engine tuning values
///
/// The hold countdown and grace threshold together form the single UX lever
/// trading false-positive auto-check-ins against responsiveness: a larger
/// grace threshold tolerates more motion but cancels more slowly when the
/// subject walks away.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Detection loop cadence in milliseconds
    pub detect_interval_ms: u64,
    /// Hold countdown length in seconds
    pub hold_countdown_seconds: u32,
    /// Consecutive misses (detection or match failure) tolerated while a
    /// candidate is held
    pub grace_miss_threshold: u32,
    /// Consecutive no-presence ticks before the unknown signal is armed
    pub presence_miss_threshold: u32,
    /// Delay before an armed unknown signal is surfaced, in milliseconds
    pub unknown_surface_delay_ms: u64,
    /// Trust window during which a held candidate skips the remote match
    /// call, in milliseconds
    pub sticky_match_window_ms: u64,
    /// Window in which a repeated optical payload is dropped, in milliseconds
    pub scan_debounce_window_ms: u64,
    /// Lifetime horizon for debounce table entries, in milliseconds
    pub scan_debounce_horizon_ms: u64,
    /// Maximum accepted embedding distance for a positive match
    pub match_distance_ceiling: f32,
    /// Watchdog cadence in milliseconds
    pub watchdog_interval_ms: u64,
    /// Detector tick age beyond which the watchdog restarts the loop, in
    /// milliseconds
    pub watchdog_stale_after_ms: u64,
    /// Re-arm delay after a successful submission, in milliseconds
    pub success_dismiss_ms: u64,
    /// Re-arm delay after a failed submission, in milliseconds
    pub failure_dismiss_ms: u64,
    /// Attendance count poll cadence in milliseconds
    pub count_poll_interval_ms: u64,
    /// Cancel countdown for the explicit-confirmation flow, in seconds
    pub confirm_cancel_seconds: u32,
    /// Offline queue drain probe cadence in milliseconds
    pub offline_drain_interval_ms: u64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            detect_interval_ms: 350,
            hold_countdown_seconds: 2,
            grace_miss_threshold: 3,
            presence_miss_threshold: 5,
            unknown_surface_delay_ms: 1500,
            sticky_match_window_ms: 2500,
            scan_debounce_window_ms: 4000,
            scan_debounce_horizon_ms: 30_000,
            match_distance_ceiling: 0.6,
            watchdog_interval_ms: 5000,
            watchdog_stale_after_ms: 3000,
            success_dismiss_ms: 5000,
            failure_dismiss_ms: 3000,
            count_poll_interval_ms: 15_000,
            confirm_cancel_seconds: 20,
            offline_drain_interval_ms: 10_000,
        }
    }
}

impl TuningConfig {
    /// Detection loop cadence as a Duration
    pub fn detect_interval(&self) -> Duration {
        Duration::from_millis(self.detect_interval_ms)
    }

    /// Sticky match trust window as a Duration
    pub fn sticky_match_window(&self) -> Duration {
        Duration::from_millis(self.sticky_match_window_ms)
    }

    /// Debounce window as a Duration
    pub fn scan_debounce_window(&self) -> Duration {
        Duration::from_millis(self.scan_debounce_window_ms)
    }

    /// Debounce table purge horizon as a Duration
    pub fn scan_debounce_horizon(&self) -> Duration {
        Duration::from_millis(self.scan_debounce_horizon_ms)
    }
}

/// TOML file shape: top-level service keys plus a `[tuning]` table
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    tenant: Option<String>,
    matcher_base_url: Option<String>,
    attendance_base_url: Option<String>,
    #[serde(default)]
    tuning: Option<TuningConfig>,
}

impl Config {
    /// Build configuration from defaults plus an optional TOML file
    pub fn load(data_folder: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        let mut config = Self {
            data_folder,
            tenant: "default".to_string(),
            matcher_base_url: "http://127.0.0.1:7810".to_string(),
            attendance_base_url: "http://127.0.0.1:7820".to_string(),
            tuning: TuningConfig::default(),
        };

        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
            let file: ConfigFile = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Cannot parse {}: {}", path.display(), e)))?;

            if let Some(tenant) = file.tenant {
                config.tenant = tenant;
            }
            if let Some(url) = file.matcher_base_url {
                config.matcher_base_url = url;
            }
            if let Some(url) = file.attendance_base_url {
                config.attendance_base_url = url;
            }
            if let Some(tuning) = file.tuning {
                config.tuning = tuning;
            }
        }

        Ok(config)
    }

    /// Path of the sqlite database inside the data folder
    pub fn db_path(&self) -> PathBuf {
        self.data_folder.join("kiosk.db")
    }
}
