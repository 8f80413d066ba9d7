//! End-to-end orchestrator runs with counting and misbehaving factories.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use stack_loadtest::backend::http::{HttpGetter, HttpLoadGenerator};
use stack_loadtest::backend::{
    BackendKind, BackendResult, InertReason, LoadGenerator, Pacing, ShutdownOutcome,
};
use stack_loadtest::capability::Capabilities;
use stack_loadtest::config::RunConfig;
use stack_loadtest::engine::{
    GeneratorContext, GeneratorFactory, LiveGeneratorFactory, Orchestrator, RunState,
};
use stack_loadtest::error::OperationError;
use stack_loadtest::registry::EndpointRegistry;

fn sample_manifest() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("manifest.sample.json")
}

/// Wraps another factory and counts builds per backend.
struct CountingFactory {
    inner: Arc<dyn GeneratorFactory>,
    builds: Mutex<HashMap<BackendKind, usize>>,
}

impl CountingFactory {
    fn new(inner: Arc<dyn GeneratorFactory>) -> Self {
        Self {
            inner,
            builds: Mutex::new(HashMap::new()),
        }
    }

    fn builds(&self, kind: BackendKind) -> usize {
        self.builds.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GeneratorFactory for CountingFactory {
    async fn build(&self, kind: BackendKind, ctx: &GeneratorContext) -> Box<dyn LoadGenerator> {
        *self.builds.lock().unwrap().entry(kind).or_default() += 1;
        self.inner.build(kind, ctx).await
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    /// Ignores cancellation and never returns.
    Hang,
    Panic,
    /// Returns promptly once cancelled.
    Cooperate,
}

struct ScriptedGenerator {
    kind: BackendKind,
    behaviour: Behaviour,
}

#[async_trait]
impl LoadGenerator for ScriptedGenerator {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn inert_reason(&self) -> Option<&InertReason> {
        None
    }

    async fn run(&mut self, _budget: u64, cancel: CancellationToken) -> BackendResult {
        match self.behaviour {
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Panic => panic!("{} generator exploded", self.kind),
            Behaviour::Cooperate => {
                cancel.cancelled().await;
                let mut result = BackendResult::new(self.kind);
                result.record_success();
                result
            }
        }
    }
}

struct ScriptedFactory(HashMap<BackendKind, Behaviour>);

#[async_trait]
impl GeneratorFactory for ScriptedFactory {
    async fn build(&self, kind: BackendKind, _ctx: &GeneratorContext) -> Box<dyn LoadGenerator> {
        let behaviour = self.0.get(&kind).copied().unwrap_or(Behaviour::Cooperate);
        Box::new(ScriptedGenerator { kind, behaviour })
    }
}

#[tokio::test]
async fn test_sample_manifest_zero_duration_builds_each_backend_once() {
    let live: Arc<dyn GeneratorFactory> =
        Arc::new(LiveGeneratorFactory::new(Capabilities::none()));
    let factory = Arc::new(CountingFactory::new(live));
    let config = RunConfig::default().with_duration(Duration::ZERO);
    let mut orchestrator =
        Orchestrator::new(sample_manifest(), config, factory.clone()).with_print_summary(false);
    assert_eq!(orchestrator.registry().function_names().len(), 3);

    let report = orchestrator.run().await;

    assert_eq!(orchestrator.state(), RunState::Reported);
    for kind in BackendKind::ALL {
        assert_eq!(factory.builds(kind), 1, "{kind} built more than once");
    }
    assert_eq!(report.backends.len(), 4);
    assert_eq!(report.region.as_deref(), Some("us-east-1"));

    colored::control::set_override(false);
    let summary = report.render();
    for name in ["sql", "cache", "function", "http"] {
        assert!(summary.contains(name), "summary missing {name}:\n{summary}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_precancelled_run_records_hung_tasks() {
    let factory = Arc::new(ScriptedFactory(
        BackendKind::ALL
            .into_iter()
            .map(|kind| (kind, Behaviour::Hang))
            .collect(),
    ));
    let config = RunConfig::default()
        .with_duration(Duration::from_secs(3600))
        .with_shutdown_grace(Duration::from_millis(50));
    let mut orchestrator = Orchestrator::from_registry(EndpointRegistry::default(), config, factory)
        .with_print_summary(false);
    orchestrator.cancel_token().cancel();

    let report = orchestrator.run().await;

    assert_eq!(report.state, RunState::Degraded);
    assert_eq!(report.backends.len(), 4);
    for result in &report.backends {
        assert_eq!(result.shutdown, ShutdownOutcome::TimedOut);
        assert_eq!(result.errors, 1);
        assert_eq!(result.attempts, 0);
    }
    assert_eq!(report.total_errors(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_one_bad_backend_does_not_affect_others() {
    let factory = Arc::new(ScriptedFactory(HashMap::from([
        (BackendKind::Cache, Behaviour::Panic),
        (BackendKind::Function, Behaviour::Hang),
    ])));
    let config = RunConfig::default()
        .with_duration(Duration::from_secs(1))
        .with_shutdown_grace(Duration::from_millis(100));
    let mut orchestrator = Orchestrator::from_registry(EndpointRegistry::default(), config, factory)
        .with_print_summary(false);

    let report = orchestrator.run().await;

    let outcome = |kind| report.backend(kind).map(|r| (r.shutdown, r.attempts, r.errors));
    assert_eq!(
        outcome(BackendKind::Sql),
        Some((ShutdownOutcome::Completed, 1, 0))
    );
    assert_eq!(
        outcome(BackendKind::Cache),
        Some((ShutdownOutcome::Panicked, 0, 1))
    );
    assert_eq!(
        outcome(BackendKind::Function),
        Some((ShutdownOutcome::TimedOut, 0, 1))
    );
    assert_eq!(
        outcome(BackendKind::Http),
        Some((ShutdownOutcome::Completed, 1, 0))
    );
    assert_eq!(report.state, RunState::Degraded);
}

/// Always answers 200 and remembers when it was last called.
#[derive(Clone, Default)]
struct OkGetter {
    last_call: Arc<Mutex<Option<Instant>>>,
}

#[async_trait]
impl HttpGetter for OkGetter {
    async fn get(&self, _url: &str) -> Result<u16, OperationError> {
        *self.last_call.lock().unwrap() = Some(Instant::now());
        Ok(200)
    }
}

/// Live HTTP generator over a fake getter; everything else inert.
struct HttpOnlyFactory {
    getter: OkGetter,
    pacing: Pacing,
}

impl HttpOnlyFactory {
    fn new(pacing: Pacing) -> Self {
        Self {
            getter: OkGetter::default(),
            pacing,
        }
    }
}

#[async_trait]
impl GeneratorFactory for HttpOnlyFactory {
    async fn build(&self, kind: BackendKind, ctx: &GeneratorContext) -> Box<dyn LoadGenerator> {
        match kind {
            BackendKind::Http => {
                let getter = self.getter.clone();
                Box::new(
                    HttpLoadGenerator::new(&ctx.registry, true, move || {
                        Ok(Box::new(getter) as Box<dyn HttpGetter>)
                    })
                    .with_pacing(self.pacing.clone()),
                )
            }
            other => LiveGeneratorFactory::new(Capabilities::none())
                .build(other, ctx)
                .await,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_budget_bounds_attempts() {
    let registry = EndpointRegistry::from_map([("NlbDnsName", "lb.internal")]);
    let config = RunConfig::default()
        .with_duration(Duration::from_millis(200))
        .with_http_intensity(1);
    let mut orchestrator =
        Orchestrator::from_registry(
            registry,
            config.clone(),
            Arc::new(HttpOnlyFactory::new(Pacing::none())),
        )
            .with_print_summary(false);

    let report = orchestrator.run().await;

    let http = report.backend(BackendKind::Http).unwrap();
    assert!(!http.inert);
    assert_eq!(http.attempts, config.budget(BackendKind::Http));
    assert_eq!(http.status_codes.get(&200), Some(&config.budget(BackendKind::Http)));
    assert!(report.backend(BackendKind::Sql).unwrap().inert);
    assert_eq!(report.state, RunState::Degraded);
}

#[tokio::test(start_paused = true)]
async fn test_default_config_generates_until_deadline() {
    let factory = Arc::new(HttpOnlyFactory::new(Pacing::default()));
    let last_call = Arc::clone(&factory.getter.last_call);
    let registry = EndpointRegistry::from_map([("NlbDnsName", "lb.internal")]);
    let config = RunConfig::default();
    let mut orchestrator = Orchestrator::from_registry(registry, config.clone(), factory)
        .with_print_summary(false);

    let start = Instant::now();
    let report = orchestrator.run().await;

    let http = report.backend(BackendKind::Http).unwrap();
    assert_eq!(http.shutdown, ShutdownOutcome::Completed);
    assert!(http.attempts < config.budget(BackendKind::Http));
    let last = last_call.lock().unwrap().expect("getter never called");
    // Default pacing pauses at most 100ms between requests.
    assert!(
        last + Duration::from_millis(200) >= start + config.duration,
        "last request {:?} before the deadline",
        (start + config.duration) - last
    );
}

/// Every manifest key the backends read, pointed at closed local ports.
/// No secret reference and no function ARNs, so nothing reaches AWS.
fn local_manifest(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("outputs.json");
    std::fs::write(
        &path,
        r#"{
  "DatabaseEndpoint": "127.0.0.1",
  "DatabasePort": "1",
  "DatabaseName": "app",
  "RedisEndpoint": "127.0.0.1",
  "RedisPort": "1",
  "NlbDnsName": "127.0.0.1:1",
  "Region": "us-east-1"
}"#,
    )
    .unwrap();
    path
}

#[tokio::test]
async fn test_live_capabilities_over_local_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let capabilities = Capabilities::probe();
    let factory = Arc::new(LiveGeneratorFactory::new(capabilities));
    let config = RunConfig::default().with_duration(Duration::from_millis(300));
    let mut orchestrator =
        Orchestrator::new(local_manifest(&dir), config, factory).with_print_summary(false);

    let report = orchestrator.run().await;

    assert_eq!(report.state, RunState::Degraded);
    assert_eq!(report.backends.len(), 4);
    assert_eq!(report.region.as_deref(), Some("us-east-1"));

    let sql = report.backend(BackendKind::Sql).unwrap();
    assert!(sql.inert && sql.attempts == 0);
    let function = report.backend(BackendKind::Function).unwrap();
    assert!(function.inert && function.attempts == 0);
    // Nothing listens on port 1, so the cache PING cannot succeed.
    assert!(report.backend(BackendKind::Cache).unwrap().inert);

    let http = report.backend(BackendKind::Http).unwrap();
    if capabilities.http {
        assert!(!http.inert);
        assert!(http.attempts > 0);
        assert_eq!(http.errors, http.attempts);
        assert_eq!(http.error_categories.get("connection"), Some(&http.attempts));
    } else {
        assert!(http.inert);
    }
    assert!(report.backends.iter().all(|r| r.shutdown == ShutdownOutcome::Completed));

    colored::control::set_override(false);
    let summary = report.render();
    for name in ["sql", "cache", "function", "http"] {
        assert!(summary.contains(name), "summary missing {name}:\n{summary}");
    }
}
