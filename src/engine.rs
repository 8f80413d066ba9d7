//! Run orchestration: one task per backend, one shared cancellation token.
//!
//! [`Orchestrator`] is the top-level entry point that:
//! - Builds the four generators through a [`GeneratorFactory`]
//! - Spawns each generator's loop as its own tokio task
//! - Sleeps out the run duration, logging progress
//! - Cancels the shared [`CancellationToken`] and collects every task with a
//!   bounded grace period
//!
//! No failure inside a backend escapes [`Orchestrator::run`]. Inert backends,
//! operation errors, hung tasks and panics all end up as counters in the
//! returned [`RunReport`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::cache::CacheLoadGenerator;
use crate::backend::function::FunctionLoadGenerator;
use crate::backend::http::HttpLoadGenerator;
use crate::backend::sql::SqlLoadGenerator;
use crate::backend::{BackendKind, BackendResult, LoadGenerator, Pacing, ShutdownOutcome};
use crate::capability::Capabilities;
use crate::config::RunConfig;
use crate::registry::EndpointRegistry;
use crate::report::RunReport;
use crate::summary::render_summary;

/// Deadline used when the configured duration overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Constructed,
    Running,
    /// Every backend was live and returned within its grace period.
    Completed,
    /// At least one backend was inert, timed out or panicked.
    Degraded,
    Reported,
}

/// What a factory gets to build one generator from.
#[derive(Debug, Clone)]
pub struct GeneratorContext {
    pub registry: Arc<EndpointRegistry>,
    pub region: Option<String>,
    pub config: RunConfig,
}

/// Builds the generator for one backend.
///
/// Construction must not fail: a backend that cannot be reached is returned
/// as an inert generator.
#[async_trait]
pub trait GeneratorFactory: Send + Sync {
    async fn build(&self, kind: BackendKind, ctx: &GeneratorContext) -> Box<dyn LoadGenerator>;
}

/// Factory wired to the real drivers compiled into this build.
#[derive(Debug, Clone)]
pub struct LiveGeneratorFactory {
    capabilities: Capabilities,
    pacing: Pacing,
}

impl LiveGeneratorFactory {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            pacing: Pacing::default(),
        }
    }

    /// Override the inter-operation delay for every generator.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[cfg(feature = "postgres")]
    async fn sql(&self, ctx: &GeneratorContext) -> SqlLoadGenerator {
        let secrets = crate::secrets::AwsSecretLookup::new(ctx.region.clone());
        SqlLoadGenerator::connect(
            &ctx.registry,
            &secrets,
            &crate::backend::postgres::PgConnector,
            self.capabilities.sql,
            ctx.config.sql_intensity,
        )
        .await
    }

    #[cfg(not(feature = "postgres"))]
    async fn sql(&self, _ctx: &GeneratorContext) -> SqlLoadGenerator {
        SqlLoadGenerator::inert(crate::backend::InertReason::CapabilityUnavailable(
            BackendKind::Sql,
        ))
    }

    #[cfg(feature = "redis")]
    async fn cache(&self, ctx: &GeneratorContext) -> CacheLoadGenerator {
        CacheLoadGenerator::connect(
            &ctx.registry,
            &crate::backend::redis_cache::RedisConnector,
            self.capabilities.cache,
        )
        .await
    }

    #[cfg(not(feature = "redis"))]
    async fn cache(&self, _ctx: &GeneratorContext) -> CacheLoadGenerator {
        CacheLoadGenerator::inert(crate::backend::InertReason::CapabilityUnavailable(
            BackendKind::Cache,
        ))
    }

    #[cfg(feature = "lambda")]
    fn function(&self, ctx: &GeneratorContext) -> FunctionLoadGenerator {
        let region = ctx.region.clone();
        FunctionLoadGenerator::new(&ctx.registry, self.capabilities.function, move || {
            Box::new(crate::backend::lambda::LambdaInvoker::new(region))
        })
    }

    #[cfg(not(feature = "lambda"))]
    fn function(&self, _ctx: &GeneratorContext) -> FunctionLoadGenerator {
        FunctionLoadGenerator::inert(crate::backend::InertReason::CapabilityUnavailable(
            BackendKind::Function,
        ))
    }

    #[cfg(feature = "http")]
    fn http(&self, ctx: &GeneratorContext) -> HttpLoadGenerator {
        HttpLoadGenerator::new(&ctx.registry, self.capabilities.http, || {
            crate::backend::http::ReqwestGetter::new()
                .map(|getter| Box::new(getter) as Box<dyn crate::backend::http::HttpGetter>)
                .map_err(|e| e.to_string())
        })
    }

    #[cfg(not(feature = "http"))]
    fn http(&self, _ctx: &GeneratorContext) -> HttpLoadGenerator {
        HttpLoadGenerator::inert(crate::backend::InertReason::CapabilityUnavailable(
            BackendKind::Http,
        ))
    }
}

#[async_trait]
impl GeneratorFactory for LiveGeneratorFactory {
    async fn build(&self, kind: BackendKind, ctx: &GeneratorContext) -> Box<dyn LoadGenerator> {
        let pacing = self.pacing.clone();
        match kind {
            BackendKind::Sql => Box::new(self.sql(ctx).await.with_pacing(pacing)),
            BackendKind::Cache => Box::new(self.cache(ctx).await.with_pacing(pacing)),
            BackendKind::Function => Box::new(self.function(ctx).with_pacing(pacing)),
            BackendKind::Http => Box::new(self.http(ctx).with_pacing(pacing)),
        }
    }
}

/// Drives one load test run across all four backends.
pub struct Orchestrator {
    registry: Arc<EndpointRegistry>,
    region: Option<String>,
    config: RunConfig,
    factory: Arc<dyn GeneratorFactory>,
    cancel: CancellationToken,
    state: RunState,
    results: BTreeMap<BackendKind, BackendResult>,
    print_summary: bool,
}

impl Orchestrator {
    /// Load the manifest at `manifest` and prepare a run.
    ///
    /// A missing or unreadable manifest yields an empty registry; every
    /// backend will then be inert.
    pub fn new(
        manifest: impl AsRef<Path>,
        config: RunConfig,
        factory: Arc<dyn GeneratorFactory>,
    ) -> Self {
        Self::from_registry(EndpointRegistry::load(manifest), config, factory)
    }

    pub fn from_registry(
        registry: EndpointRegistry,
        config: RunConfig,
        factory: Arc<dyn GeneratorFactory>,
    ) -> Self {
        let region = registry.region().map(str::to_string);
        Self {
            registry: Arc::new(registry),
            region,
            config,
            factory,
            cancel: CancellationToken::new(),
            state: RunState::Constructed,
            results: zeroed_results(),
            print_summary: true,
        }
    }

    /// Print the summary to stdout at the end of [`run`](Self::run).
    /// Enabled by default.
    pub fn with_print_summary(mut self, print: bool) -> Self {
        self.print_summary = print;
        self
    }

    /// Handle to the run's cancellation token.
    ///
    /// Cancelling it ends the run early; shutdown and reporting still
    /// happen.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Per-backend counters, in report order.
    pub fn results(&self) -> impl Iterator<Item = &BackendResult> {
        self.results.values()
    }

    /// Run the load test to completion and return its report.
    ///
    /// Meant to be called once: the token it cancels at the end is the one
    /// created at construction.
    pub async fn run(&mut self) -> RunReport {
        self.state = RunState::Running;
        self.results = zeroed_results();
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let deadline = start
            .checked_add(self.config.duration)
            .unwrap_or_else(|| start + FAR_FUTURE);

        let ctx = GeneratorContext {
            registry: Arc::clone(&self.registry),
            region: self.region.clone(),
            config: self.config.clone(),
        };

        let mut handles: Vec<(BackendKind, JoinHandle<BackendResult>)> =
            Vec::with_capacity(BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            let mut generator = self.factory.build(kind, &ctx).await;
            let budget = self.config.budget(kind);
            let cancel = self.cancel.clone();
            info!(backend = %kind, budget, inert = generator.is_inert(), "Starting backend");
            let handle = tokio::spawn(async move { generator.run(budget, cancel).await });
            handles.push((kind, handle));
        }

        info!(
            duration_secs = self.config.duration.as_secs(),
            region = self.region.as_deref().unwrap_or("default"),
            "Load test running"
        );
        self.wait_for_deadline(start, deadline, &handles).await;

        self.cancel.cancel();
        info!("Cancellation signalled, collecting backends");

        for (kind, handle) in handles {
            let result = self.collect(kind, handle).await;
            self.results.insert(kind, result);
        }

        let degraded = self
            .results
            .values()
            .any(|r| r.inert || r.shutdown.is_failure());
        self.state = if degraded {
            RunState::Degraded
        } else {
            RunState::Completed
        };

        let report = RunReport::new(
            started_at,
            self.region.clone(),
            self.config.duration,
            start.elapsed(),
            self.state,
            self.results.values().cloned().collect(),
        );
        info!(
            state = ?self.state,
            attempts = report.total_attempts(),
            errors = report.total_errors(),
            "Load test finished"
        );
        if self.print_summary {
            println!("{}", render_summary(&report));
        }
        self.state = RunState::Reported;
        report
    }

    /// Sleep until `deadline`, logging progress every interval.
    ///
    /// Returns early if the token is cancelled from outside.
    async fn wait_for_deadline(
        &self,
        start: Instant,
        deadline: Instant,
        handles: &[(BackendKind, JoinHandle<BackendResult>)],
    ) {
        loop {
            let now = Instant::now();
            if now >= deadline || self.cancel.is_cancelled() {
                return;
            }
            let nap = self.config.progress_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = self.cancel.cancelled() => {
                    info!("Run cancelled before deadline");
                    return;
                }
            }
            let finished = handles.iter().filter(|(_, h)| h.is_finished()).count();
            info!(
                elapsed_secs = start.elapsed().as_secs(),
                remaining_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                backends_finished = finished,
                "Load test in progress"
            );
        }
    }

    /// Wait for one task within the grace period.
    ///
    /// A timed-out task is aborted. Timeouts and panics add one error to that
    /// backend and never affect the others.
    async fn collect(&self, kind: BackendKind, mut handle: JoinHandle<BackendResult>) -> BackendResult {
        match tokio::time::timeout(self.config.shutdown_grace, &mut handle).await {
            Ok(Ok(mut result)) => {
                result.shutdown = ShutdownOutcome::Completed;
                info!(
                    backend = %kind,
                    attempts = result.attempts,
                    errors = result.errors,
                    "Backend finished"
                );
                result
            }
            Ok(Err(join_err)) => {
                let outcome = if join_err.is_panic() {
                    ShutdownOutcome::Panicked
                } else {
                    ShutdownOutcome::TimedOut
                };
                warn!(backend = %kind, error = %join_err, "Backend task failed");
                let mut result = self.last_known(kind);
                result.record_shutdown_failure(outcome);
                result
            }
            Err(_) => {
                handle.abort();
                warn!(
                    backend = %kind,
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    "Backend did not stop within grace period, aborted"
                );
                let mut result = self.last_known(kind);
                result.record_shutdown_failure(ShutdownOutcome::TimedOut);
                result
            }
        }
    }

    fn last_known(&self, kind: BackendKind) -> BackendResult {
        self.results
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| BackendResult::new(kind))
    }
}

fn zeroed_results() -> BTreeMap<BackendKind, BackendResult> {
    BackendKind::ALL
        .into_iter()
        .map(|kind| (kind, BackendResult::new(kind)))
        .collect()
}

/// Cancel `cancel` on the first Ctrl+C and exit the process on the second.
pub async fn handle_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to install Ctrl+C handler");
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    // Second Ctrl+C: hard abort
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}
