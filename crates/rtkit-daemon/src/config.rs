//! rtkit service configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtkit_daemon::config::DaemonConfig;
//!
//! let config = DaemonConfig::from_env()
//!     .min_nice_level(-10)
//!     .idle_wait(Duration::from_millis(100));
//! config.validate()?;
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rtkit_core::priority::{PriorityLimits, DEFAULT_MIN_NICE_LEVEL};
use thiserror::Error;

/// Library defaults
pub mod defaults {
    /// polkit's command-line checker
    pub const PKCHECK_PATH: &str = "/usr/bin/pkcheck";
    pub const MIN_NICE_LEVEL: i32 = rtkit_core::priority::DEFAULT_MIN_NICE_LEVEL;
    /// How long the event loop sleeps on its waker when idle
    pub const IDLE_WAIT_MS: u64 = 500;
    pub const RESET_KNOWN_ON_EXIT: bool = true;
}

/// Get environment variable parsed as type T, or return default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Service configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Path of the `pkcheck` helper
    pub pkcheck_path: PathBuf,
    /// Lowest nice level a caller may request
    pub min_nice_level: i32,
    /// Optional cap below the platform's maximum realtime priority
    pub max_realtime_priority: Option<i32>,
    /// Event-loop idle wait
    pub idle_wait: Duration,
    /// Reset known processes on `Exit` / shutdown
    pub reset_known_on_exit: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DaemonConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `RTKIT_PKCHECK` - Path of the pkcheck helper
    /// - `RTKIT_MIN_NICE_LEVEL` - Lowest grantable nice level
    /// - `RTKIT_MAX_REALTIME_PRIORITY` - Cap on grantable realtime priority
    /// - `RTKIT_IDLE_WAIT_MS` - Event-loop idle wait in milliseconds
    /// - `RTKIT_RESET_KNOWN_ON_EXIT` - Reset granted processes on exit (0/1)
    pub fn from_env() -> Self {
        Self {
            pkcheck_path: env_get("RTKIT_PKCHECK", PathBuf::from(defaults::PKCHECK_PATH)),
            min_nice_level: env_get("RTKIT_MIN_NICE_LEVEL", defaults::MIN_NICE_LEVEL),
            max_realtime_priority: env_get_opt("RTKIT_MAX_REALTIME_PRIORITY"),
            idle_wait: Duration::from_millis(env_get("RTKIT_IDLE_WAIT_MS", defaults::IDLE_WAIT_MS)),
            reset_known_on_exit: env_get_bool(
                "RTKIT_RESET_KNOWN_ON_EXIT",
                defaults::RESET_KNOWN_ON_EXIT,
            ),
        }
    }

    /// Create config with library defaults (no env override).
    pub fn new() -> Self {
        Self {
            pkcheck_path: PathBuf::from(defaults::PKCHECK_PATH),
            min_nice_level: DEFAULT_MIN_NICE_LEVEL,
            max_realtime_priority: None,
            idle_wait: Duration::from_millis(defaults::IDLE_WAIT_MS),
            reset_known_on_exit: defaults::RESET_KNOWN_ON_EXIT,
        }
    }

    pub fn pkcheck_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pkcheck_path = path.into();
        self
    }

    pub fn min_nice_level(mut self, nice: i32) -> Self {
        self.min_nice_level = nice;
        self
    }

    pub fn max_realtime_priority(mut self, cap: Option<i32>) -> Self {
        self.max_realtime_priority = cap;
        self
    }

    pub fn idle_wait(mut self, d: Duration) -> Self {
        self.idle_wait = d;
        self
    }

    pub fn reset_known_on_exit(mut self, enable: bool) -> Self {
        self.reset_known_on_exit = enable;
        self
    }

    /// Limits advertised to callers, given the platform's maximum realtime
    /// priority.
    pub fn limits(&self, platform_max_realtime: i32) -> PriorityLimits {
        let max = match self.max_realtime_priority {
            Some(cap) => cap.min(platform_max_realtime),
            None => platform_max_realtime,
        };
        PriorityLimits::new(self.min_nice_level, max)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pkcheck_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("pkcheck_path must not be empty"));
        }
        if !(-20..=19).contains(&self.min_nice_level) {
            return Err(ConfigError::InvalidValue("min_nice_level must be within -20..=19"));
        }
        if matches!(self.max_realtime_priority, Some(p) if p < 1) {
            return Err(ConfigError::InvalidValue("max_realtime_priority must be >= 1"));
        }
        if self.idle_wait.is_zero() {
            return Err(ConfigError::InvalidValue("idle_wait must be > 0"));
        }
        Ok(())
    }

    /// Log configuration at info level
    pub fn log(&self) {
        tracing::info!(
            pkcheck = %self.pkcheck_path.display(),
            min_nice_level = self.min_nice_level,
            max_realtime_priority = ?self.max_realtime_priority,
            idle_wait = ?self.idle_wait,
            reset_known_on_exit = self.reset_known_on_exit,
            "rtkit configuration"
        );
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    InvalidValue(&'static str),
}
