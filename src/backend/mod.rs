//! Backend load generators and the contract they share.
//!
//! Every backend implements [`LoadGenerator`]. A generator is built once per
//! run, either live (holding one driver handle) or inert (holding an
//! [`InertReason`]). Inert generators return a zeroed [`BackendResult`]
//! from [`LoadGenerator::run`] without touching the network.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use rand::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::MIN_OPERATION_INTERVAL;
use crate::error::OperationError;

pub mod cache;
pub mod function;
pub mod http;
pub mod sql;

#[cfg(feature = "lambda")]
pub mod lambda;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis_cache;

/// The four backends a run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sql,
    Cache,
    Function,
    Http,
}

impl BackendKind {
    /// All backends in report order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Sql,
        BackendKind::Cache,
        BackendKind::Function,
        BackendKind::Http,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Cache => "cache",
            Self::Function => "function",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql" | "postgres" | "database" => Ok(Self::Sql),
            "cache" | "redis" => Ok(Self::Cache),
            "function" | "lambda" => Ok(Self::Function),
            "http" => Ok(Self::Http),
            other => Err(format!(
                "unknown backend '{other}' (expected sql, cache, function or http)"
            )),
        }
    }
}

/// Why a generator was built inert.
///
/// Setup problems never fail a run. They are logged once at `warn` and the
/// backend reports zero attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InertReason {
    #[error("{0} driver not available in this build")]
    CapabilityUnavailable(BackendKind),

    #[error("manifest has no '{key}' entry")]
    MissingEndpoint { key: &'static str },

    #[error("manifest has no database secret reference")]
    MissingSecretRef,

    #[error("credential lookup failed: {0}")]
    Credentials(String),

    #[error("connection pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),

    #[error("manifest lists no function ARNs")]
    NoFunctions,

    #[error("client construction failed: {0}")]
    ClientBuild(String),
}

/// How a backend task ended once the run was cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Task has not been collected yet.
    #[default]
    Pending,
    /// Task returned within the grace period.
    Completed,
    /// Task missed the grace period and was aborted.
    TimedOut,
    /// Task panicked.
    Panicked,
}

impl ShutdownOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Panicked)
    }
}

/// Counters produced by one backend over one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendResult {
    pub kind: BackendKind,
    pub attempts: u64,
    pub errors: u64,
    pub inert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inert_reason: Option<String>,
    pub shutdown: ShutdownOutcome,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub status_codes: BTreeMap<u16, u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub error_categories: BTreeMap<String, u64>,
}

impl BackendResult {
    /// Zeroed counters for `kind`.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            attempts: 0,
            errors: 0,
            inert: false,
            inert_reason: None,
            shutdown: ShutdownOutcome::Pending,
            status_codes: BTreeMap::new(),
            error_categories: BTreeMap::new(),
        }
    }

    /// Zeroed counters marked inert with `reason`.
    pub fn inert(kind: BackendKind, reason: &InertReason) -> Self {
        Self {
            inert: true,
            inert_reason: Some(reason.to_string()),
            ..Self::new(kind)
        }
    }

    pub fn record_success(&mut self) {
        self.attempts += 1;
    }

    pub fn record_error(&mut self, err: &OperationError) {
        self.attempts += 1;
        self.errors += 1;
        *self
            .error_categories
            .entry(err.error_category().to_string())
            .or_default() += 1;
    }

    /// Count one HTTP status in the histogram. Does not touch `attempts`.
    pub fn record_status(&mut self, status: u16) {
        *self.status_codes.entry(status).or_default() += 1;
    }

    /// Record a task that timed out or panicked at shutdown.
    pub fn record_shutdown_failure(&mut self, outcome: ShutdownOutcome) {
        self.shutdown = outcome;
        self.errors += 1;
        *self
            .error_categories
            .entry("shutdown".to_string())
            .or_default() += 1;
    }
}

/// Jittered delay between consecutive operations of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    range_ms: RangeInclusive<u64>,
}

/// Upper bound of the default jitter.
const DEFAULT_PACING_MAX: Duration = Duration::from_millis(100);

impl Default for Pacing {
    fn default() -> Self {
        Self::new(MIN_OPERATION_INTERVAL, DEFAULT_PACING_MAX)
    }
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.as_millis() as u64;
        let max = (max.as_millis() as u64).max(min);
        Self { range_ms: min..=max }
    }

    /// No delay between operations.
    pub fn none() -> Self {
        Self { range_ms: 0..=0 }
    }

    /// Sleep a random interval from the range, racing cancellation.
    ///
    /// Returns `false` if `cancel` fired, `true` otherwise.
    pub async fn pause(&self, rng: &mut StdRng, cancel: &CancellationToken) -> bool {
        let ms = rng.random_range(self.range_ms.clone());
        if ms == 0 {
            tokio::task::yield_now().await;
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// A source of synthetic traffic for one backend.
#[async_trait]
pub trait LoadGenerator: Send {
    fn kind(&self) -> BackendKind;

    /// Why this generator is inert, if it is.
    fn inert_reason(&self) -> Option<&InertReason>;

    fn is_inert(&self) -> bool {
        self.inert_reason().is_some()
    }

    /// Issue operations until `budget` iterations are spent or `cancel` fires.
    ///
    /// Operation failures are counted, never returned.
    async fn run(&mut self, budget: u64, cancel: CancellationToken) -> BackendResult;
}

/// Seeded per-task RNG. `StdRng` is `Send`, unlike the thread-local one.
pub(crate) fn task_rng() -> StdRng {
    StdRng::from_rng(&mut rand::rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backend_kind_display_and_parse() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Cache);
        assert_eq!("Lambda".parse::<BackendKind>().unwrap(), BackendKind::Function);
        assert!("mongo".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_record_error_counts_category() {
        let mut result = BackendResult::new(BackendKind::Http);
        result.record_success();
        result.record_error(&OperationError::Http { status: 503 });
        result.record_error(&OperationError::Timeout);
        result.record_status(200);
        result.record_status(503);

        assert_eq!(result.attempts, 3);
        assert_eq!(result.errors, 2);
        assert_eq!(result.error_categories.get("http"), Some(&1));
        assert_eq!(result.error_categories.get("timeout"), Some(&1));
        assert_eq!(result.status_codes.len(), 2);
    }

    #[test]
    fn test_inert_result_is_zeroed() {
        let result = BackendResult::inert(BackendKind::Function, &InertReason::NoFunctions);
        assert!(result.inert);
        assert_eq!(result.attempts, 0);
        assert_eq!(result.errors, 0);
        assert_eq!(
            result.inert_reason.as_deref(),
            Some("manifest lists no function ARNs")
        );
    }

    #[test]
    fn test_shutdown_failure_adds_error() {
        let mut result = BackendResult::new(BackendKind::Sql);
        result.record_shutdown_failure(ShutdownOutcome::TimedOut);
        assert_eq!(result.errors, 1);
        assert_eq!(result.attempts, 0);
        assert!(result.shutdown.is_failure());
    }

    #[test]
    fn test_serializes_lowercase_kind() {
        let json = serde_json::to_value(BackendResult::new(BackendKind::Cache)).unwrap();
        assert_eq!(json["kind"], "cache");
        assert_eq!(json["shutdown"], "pending");
        assert!(json.get("status_codes").is_none());
    }

    #[tokio::test]
    async fn test_pause_returns_false_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rng = task_rng();
        assert!(!Pacing::default().pause(&mut rng, &cancel).await);
        assert!(!Pacing::none().pause(&mut rng, &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_sleeps_within_range() {
        let cancel = CancellationToken::new();
        let mut rng = task_rng();
        let start = tokio::time::Instant::now();
        assert!(Pacing::new(Duration::from_millis(20), Duration::from_millis(40))
            .pause(&mut rng, &cancel)
            .await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed <= Duration::from_millis(41));
    }
}
