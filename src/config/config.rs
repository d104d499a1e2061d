//! # Configuration Module
//!
//! Runtime configuration for live attendance sessions. It is the common
//! interface between the CLI and the session pipeline.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Range | Description |
//! |-----------|------|-------|-------------|
//! | `service_url` | `String` | http(s) URL | Recognition service base URL |
//! | `interval_ms` | `u64` | 100-60000 | Sampling cadence |
//! | `failure_threshold` | `u32` | 1-100 | Consecutive dispatch failures before halting |
//! | `jpeg_quality` | `u8` | 1-100 | JPEG quality of dispatched frames |
//! | `request_timeout_ms` | `Option<u64>` | >0 | Per-request timeout, transport default when unset |
//! | `camera_index` | `u32` | any | Camera device index |
//! | `state_dir` | `Option<PathBuf>` | any | Where the selection is persisted |
//!
//! ## Sources
//!
//! Values are layered (later wins):
//! 1. Compiled defaults
//! 2. A TOML file (`--config` or `<config dir>/attend.toml`)
//! 3. Environment variables `ATTEND_SERVICE_URL`, `ATTEND_INTERVAL_MS`,
//!    `ATTEND_FAILURE_THRESHOLD`
//!
//! ## Example
//!
//! ```rust
//! use live_attendance::config::SessionConfig;
//!
//! let config = SessionConfig::from_toml_str(r#"
//!     service_url = "http://10.0.0.5:5000"
//!     failure_threshold = 5
//! "#).unwrap();
//!
//! assert_eq!(config.interval_ms, 1000);
//! assert!(config.validate().is_ok());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Name used for the per-user config and state directories.
pub const APP_NAME: &str = "live-attendance";

/// Configuration for a live attendance session.
///
/// Missing keys in a TOML file fall back to [`SessionConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the recognition service.
    pub service_url: String,

    /// Milliseconds between sampling cycles. Cycles are started on this
    /// cadence whether or not the previous one has finished.
    pub interval_ms: u64,

    /// Consecutive dispatch failures tolerated before the scheduler halts.
    pub failure_threshold: u32,

    /// JPEG quality for dispatched frames. 92 matches what browsers use
    /// for canvas snapshots.
    pub jpeg_quality: u8,

    /// Optional per-request timeout. `None` leaves the transport default.
    pub request_timeout_ms: Option<u64>,

    /// Index of the camera device to open.
    pub camera_index: u32,

    /// Directory for the persisted selection. `None` uses the platform
    /// data directory.
    pub state_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    /// Defaults matching the reference deployment:
    /// - `service_url`: "http://127.0.0.1:5000"
    /// - `interval_ms`: 1000
    /// - `failure_threshold`: 3
    /// - `jpeg_quality`: 92
    fn default() -> Self {
        Self {
            service_url: attend_api::DEFAULT_BASE_URL.to_string(),
            interval_ms: 1000,
            failure_threshold: 3,
            jpeg_quality: 92,
            request_timeout_ms: None,
            camera_index: 0,
            state_dir: None,
        }
    }
}

impl SessionConfig {
    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(document: &str) -> SessionResult<Self> {
        toml::from_str(document).map_err(|e| SessionError::config("<toml>", "", e.message()))
    }

    /// Load a TOML file on top of the defaults.
    pub fn from_file(path: &Path) -> SessionResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| {
            SessionError::io("read config", Some(path.display().to_string()), e)
        })?;
        Self::from_toml_str(&document)
            .map_err(|e| e.with_context(format!("loading {}", path.display())))
    }

    /// Resolve configuration from an explicit file, the user config file if
    /// it exists, and environment overrides.
    pub fn load(explicit: Option<&Path>) -> SessionResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::user_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// `<config dir>/attend.toml` for the current user.
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("attend.toml"))
    }

    /// Apply `ATTEND_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> SessionResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ATTEND_SERVICE_URL") {
            self.service_url = url;
        }
        if let Some(raw) = lookup("ATTEND_INTERVAL_MS") {
            self.interval_ms = raw
                .trim()
                .parse()
                .map_err(|_| SessionError::config("ATTEND_INTERVAL_MS", &raw, "not an integer"))?;
        }
        if let Some(raw) = lookup("ATTEND_FAILURE_THRESHOLD") {
            self.failure_threshold = raw.trim().parse().map_err(|_| {
                SessionError::config("ATTEND_FAILURE_THRESHOLD", &raw, "not an integer")
            })?;
        }
        Ok(())
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.service_url.starts_with("http://") || self.service_url.starts_with("https://")) {
            return Err(format!(
                "Service URL must start with http:// or https:// (got '{}')",
                self.service_url
            ));
        }
        if !(100..=60_000).contains(&self.interval_ms) {
            return Err("Sampling interval must be between 100 and 60000 ms".to_string());
        }
        if !(1..=100).contains(&self.failure_threshold) {
            return Err("Failure threshold must be between 1 and 100".to_string());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.request_timeout_ms == Some(0) {
            return Err("Request timeout must be greater than 0 ms".to_string());
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Directory holding the persisted selection.
    pub fn resolve_state_dir(&self) -> SessionResult<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                SessionError::config("state_dir", "", "no home directory; set state_dir explicitly")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.service_url, "http://127.0.0.1:5000");
        assert_eq!(config.interval(), Duration::from_secs(1));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.jpeg_quality, 92);
        assert_eq!(config.request_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();

        config.interval_ms = 0;
        assert!(config.validate().is_err());
        config.interval_ms = 1000;

        config.failure_threshold = 0;
        assert!(config.validate().is_err());
        config.failure_threshold = 3;

        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.jpeg_quality = 92;

        config.service_url = "127.0.0.1:5000".to_string();
        assert!(config.validate().is_err());
        config.service_url = "https://attendance.example.edu".to_string();

        config.request_timeout_ms = Some(0);
        assert!(config.validate().is_err());
        config.request_timeout_ms = Some(5000);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            failure_threshold = 5
            state_dir = "/tmp/attend-state"
            "#,
        )
        .unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.interval_ms, 1000);
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/attend-state")));
        assert_eq!(config.resolve_state_dir().unwrap(), PathBuf::from("/tmp/attend-state"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = SessionConfig::from_toml_str("interval_ms = \"fast\"").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ATTEND_SERVICE_URL", "http://10.1.1.1:8000"),
            ("ATTEND_FAILURE_THRESHOLD", " 7 "),
        ]);
        let mut config = SessionConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.service_url, "http://10.1.1.1:8000");
        assert_eq!(config.failure_threshold, 7);
        assert_eq!(config.interval_ms, 1000);

        let mut config = SessionConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "ATTEND_INTERVAL_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
