//! JSON report for a finished run.
//!
//! The report is schema-versioned so CI pipelines can parse it safely:
//!
//! ```json
//! {
//!   "schema_version": "1.0",
//!   "timestamp": "2026-01-01T00:00:00Z",
//!   "region": "us-east-1",
//!   "configured_duration_secs": 1800.0,
//!   "elapsed_secs": 1800.4,
//!   "state": "completed",
//!   "totals": { "attempts": 1234, "errors": 5 },
//!   "backends": [ { "kind": "sql", "attempts": 600, "errors": 0, ... } ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::backend::{BackendKind, BackendResult};
use crate::engine::RunState;
use crate::error::LoadTestError;
use crate::summary::render_summary;

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
pub const SCHEMA_VERSION: &str = "1.0";

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Report format version for parser compatibility.
    pub schema_version: String,
    /// RFC 3339 timestamp of when the run started.
    pub timestamp: String,
    /// Region from the manifest, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub configured_duration_secs: f64,
    pub elapsed_secs: f64,
    /// `completed` or `degraded`.
    pub state: RunState,
    pub totals: Totals,
    /// One entry per backend, in `sql`, `cache`, `function`, `http` order.
    pub backends: Vec<BackendResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub attempts: u64,
    pub errors: u64,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        region: Option<String>,
        configured: Duration,
        elapsed: Duration,
        state: RunState,
        backends: Vec<BackendResult>,
    ) -> Self {
        let totals = backends.iter().fold(Totals::default(), |acc, r| Totals {
            attempts: acc.attempts + r.attempts,
            errors: acc.errors + r.errors,
        });
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            region,
            configured_duration_secs: configured.as_secs_f64(),
            elapsed_secs: elapsed.as_secs_f64(),
            state,
            totals,
            backends,
        }
    }

    pub fn total_attempts(&self) -> u64 {
        self.totals.attempts
    }

    pub fn total_errors(&self) -> u64 {
        self.totals.errors
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&BackendResult> {
        self.backends.iter().find(|r| r.kind == kind)
    }

    /// Terminal summary of this report.
    pub fn render(&self) -> String {
        render_summary(self)
    }

    pub fn to_json(&self) -> Result<String, LoadTestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Write `report` as pretty JSON to `path`, creating parent directories.
pub fn write_report(report: &RunReport, path: &Path) -> Result<(), LoadTestError> {
    let io_err = |source| LoadTestError::ReportIo {
        source,
        path: path.display().to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = report.to_json()?;
    std::fs::write(path, json).map_err(io_err)
}
