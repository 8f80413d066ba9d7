//! Run configuration: duration and per-backend intensity.
//!
//! [`RunConfig`] is a plain value object. It is built once (from defaults,
//! an optional TOML file and CLI overrides) and handed to the
//! [`Orchestrator`](crate::engine::Orchestrator), which never mutates it.
//!
//! # Example TOML
//!
//! ```toml
//! duration = "30m"
//! sql_intensity = 20
//! cache_intensity = 15
//! function_intensity = 10
//! http_intensity = 5
//! progress_interval = "10s"
//! shutdown_grace = "10s"
//! ```
//!
//! Every key is optional; omitted keys keep their defaults.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::LoadTestError;

/// Default run duration: 30 minutes.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30 * 60);
/// Default SQL intensity (also the SQL pool's maximum size).
pub const DEFAULT_SQL_INTENSITY: u32 = 20;
/// Default cache intensity.
pub const DEFAULT_CACHE_INTENSITY: u32 = 15;
/// Default function intensity.
pub const DEFAULT_FUNCTION_INTENSITY: u32 = 10;
/// Default HTTP intensity.
pub const DEFAULT_HTTP_INTENSITY: u32 = 5;
/// Default interval between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);
/// Default time each backend task gets to return after cancellation.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shortest pause a generator takes between two operations.
///
/// One unit of intensity buys one operation per interval of the run
/// duration, so a paced generator cannot spend its budget before the
/// deadline.
pub const MIN_OPERATION_INTERVAL: Duration = Duration::from_millis(10);

/// Immutable parameters for one load test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Total wall-clock duration of the run.
    pub duration: Duration,
    /// Sizes the SQL connection pool and the SQL iteration budget.
    pub sql_intensity: u32,
    /// Sizes the cache iteration budget.
    pub cache_intensity: u32,
    /// Sizes the function invocation budget.
    pub function_intensity: u32,
    /// Sizes the HTTP request budget.
    pub http_intensity: u32,
    /// Sleep between progress log lines while the run is in flight.
    pub progress_interval: Duration,
    /// Bounded wait for each backend task after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            sql_intensity: DEFAULT_SQL_INTENSITY,
            cache_intensity: DEFAULT_CACHE_INTENSITY,
            function_intensity: DEFAULT_FUNCTION_INTENSITY,
            http_intensity: DEFAULT_HTTP_INTENSITY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// On-disk shape of the TOML config; every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunConfigFile {
    duration: Option<String>,
    sql_intensity: Option<u32>,
    cache_intensity: Option<u32>,
    function_intensity: Option<u32>,
    http_intensity: Option<u32>,
    progress_interval: Option<String>,
    shutdown_grace: Option<String>,
}

impl RunConfig {
    /// Set the total run duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the SQL intensity.
    pub fn with_sql_intensity(mut self, intensity: u32) -> Self {
        self.sql_intensity = intensity;
        self
    }

    /// Set the cache intensity.
    pub fn with_cache_intensity(mut self, intensity: u32) -> Self {
        self.cache_intensity = intensity;
        self
    }

    /// Set the function intensity.
    pub fn with_function_intensity(mut self, intensity: u32) -> Self {
        self.function_intensity = intensity;
        self
    }

    /// Set the HTTP intensity.
    pub fn with_http_intensity(mut self, intensity: u32) -> Self {
        self.http_intensity = intensity;
        self
    }

    /// Set the interval between progress log lines.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the per-task shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Returns the configured intensity for one backend.
    pub fn intensity(&self, kind: BackendKind) -> u32 {
        match kind {
            BackendKind::Sql => self.sql_intensity,
            BackendKind::Cache => self.cache_intensity,
            BackendKind::Function => self.function_intensity,
            BackendKind::Http => self.http_intensity,
        }
    }

    /// Returns the iteration budget handed to one backend's generator.
    ///
    /// `intensity * (duration / MIN_OPERATION_INTERVAL)`, saturating.
    pub fn budget(&self, kind: BackendKind) -> u64 {
        let slots = self.duration.as_millis() / MIN_OPERATION_INTERVAL.as_millis();
        u64::try_from(slots)
            .unwrap_or(u64::MAX)
            .saturating_mul(u64::from(self.intensity(kind)))
    }

    /// Parse a TOML string on top of the defaults and validate the result.
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let file: RunConfigFile = toml::from_str(content)?;
        let mut config = Self::default();
        if let Some(value) = file.duration {
            config.duration = parse_duration(&value)?;
        }
        if let Some(value) = file.progress_interval {
            config.progress_interval = parse_duration(&value)?;
        }
        if let Some(value) = file.shutdown_grace {
            config.shutdown_grace = parse_duration(&value)?;
        }
        config.sql_intensity = file.sql_intensity.unwrap_or(config.sql_intensity);
        config.cache_intensity = file.cache_intensity.unwrap_or(config.cache_intensity);
        config.function_intensity = file
            .function_intensity
            .unwrap_or(config.function_intensity);
        config.http_intensity = file.http_intensity.unwrap_or(config.http_intensity);
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`RunConfig`] from a TOML file.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Reject values that would make a run meaningless.
    ///
    /// Programmatic construction never calls this; it guards config coming
    /// from files and CLI flags.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        for kind in BackendKind::ALL {
            if self.intensity(kind) == 0 {
                return Err(LoadTestError::ConfigValidation {
                    message: format!("{kind} intensity must be greater than 0"),
                });
            }
        }
        if self.progress_interval.is_zero() {
            return Err(LoadTestError::ConfigValidation {
                message: "progress_interval must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a duration string like `"1h"`, `"30m"`, `"90s"`, `"250ms"` or `"300"`.
///
/// A bare number is interpreted as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, LoadTestError> {
    let s = value.trim();
    let invalid = |reason: &str| LoadTestError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if s.is_empty() {
        return Err(invalid("empty duration string"));
    }

    let (digits, unit_ms): (&str, u64) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else {
        (s, 1_000)
    };

    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| invalid("expected a non-negative integer with optional h/m/s/ms suffix"))?;
    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| invalid("duration overflows"))
}
