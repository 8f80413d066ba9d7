//! Concurrent multi-backend load generator for deployed stacks.
//!
//! Given the deployed-resource manifest of a system under test, the
//! [`Orchestrator`](engine::Orchestrator) drives synthetic traffic against four
//! backends at once for a fixed wall-clock duration:
//!
//! - a PostgreSQL database ([`SqlLoadGenerator`](backend::sql::SqlLoadGenerator)),
//! - a Redis cache ([`CacheLoadGenerator`](backend::cache::CacheLoadGenerator)),
//! - AWS Lambda functions ([`FunctionLoadGenerator`](backend::function::FunctionLoadGenerator)),
//! - an HTTP endpoint ([`HttpLoadGenerator`](backend::http::HttpLoadGenerator)).
//!
//! Each backend runs as one tokio task. The tasks share a single
//! [`CancellationToken`](tokio_util::sync::CancellationToken) that the
//! orchestrator cancels once the duration elapses. A backend whose driver,
//! endpoint or credentials are unavailable degrades to an inert generator
//! instead of failing the run, so every run ends with a per-backend
//! `{attempts, errors}` summary.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use stack_loadtest::capability::Capabilities;
//! use stack_loadtest::config::RunConfig;
//! use stack_loadtest::engine::{LiveGeneratorFactory, Orchestrator};
//!
//! # async fn example() {
//! let config = RunConfig::default().with_duration(Duration::from_secs(60));
//! let factory = Arc::new(LiveGeneratorFactory::new(Capabilities::probe()));
//! let mut orchestrator = Orchestrator::new("outputs.json", config, factory);
//! let report = orchestrator.run().await;
//! assert_eq!(report.backends.len(), 4);
//! # }
//! ```

pub mod backend;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod report;
pub mod secrets;
pub mod summary;

pub use backend::{BackendKind, BackendResult, LoadGenerator};
pub use config::RunConfig;
pub use engine::{GeneratorFactory, LiveGeneratorFactory, Orchestrator, RunState};
pub use error::{LoadTestError, OperationError};
pub use registry::EndpointRegistry;
pub use report::RunReport;
