//! Cache load generator.
//!
//! Issues a uniform mix of string, hash, counter and list commands. All keys
//! live under the [`KEY_PREFIX`] namespace so a run never touches
//! application data.

use async_trait::async_trait;
use rand::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{task_rng, BackendKind, BackendResult, InertReason, LoadGenerator, Pacing};
use crate::error::OperationError;
use crate::registry::{EndpointRegistry, KEY_CACHE_ENDPOINT};

/// Port used when the manifest has no `RedisPort`.
pub const DEFAULT_CACHE_PORT: u16 = 6379;
/// Prefix of every key the generator writes.
pub const KEY_PREFIX: &str = "loadtest:";

/// Number of distinct keys per data type.
const KEYSPACE: u32 = 100;

/// One cache command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCommand {
    Set { key: String, value: String },
    Get { key: String },
    HashSet { key: String, field: String, value: String },
    HashGet { key: String, field: String },
    Increment { key: String },
    Decrement { key: String },
    ListPush { key: String, value: String },
    ListPop { key: String },
}

impl CacheCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Get { .. } => "get",
            Self::HashSet { .. } => "hset",
            Self::HashGet { .. } => "hget",
            Self::Increment { .. } => "incr",
            Self::Decrement { .. } => "decr",
            Self::ListPush { .. } => "lpush",
            Self::ListPop { .. } => "rpop",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. }
            | Self::Get { key }
            | Self::HashSet { key, .. }
            | Self::HashGet { key, .. }
            | Self::Increment { key }
            | Self::Decrement { key }
            | Self::ListPush { key, .. }
            | Self::ListPop { key } => key,
        }
    }
}

/// Connected cache client.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn ping(&self) -> Result<(), OperationError>;

    async fn execute(&self, command: &CacheCommand) -> Result<(), OperationError>;
}

/// Builds a [`CacheClient`] for `host:port`.
#[async_trait]
pub trait CacheConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn CacheClient>, OperationError>;
}

/// Drives the cache backend.
pub struct CacheLoadGenerator {
    client: Option<Box<dyn CacheClient>>,
    inert: Option<InertReason>,
    pacing: Pacing,
}

impl CacheLoadGenerator {
    /// Connect and PING the cache. Any failure leaves the generator inert.
    pub async fn connect(
        registry: &EndpointRegistry,
        connector: &dyn CacheConnector,
        capable: bool,
    ) -> Self {
        if !capable {
            return Self::inert(InertReason::CapabilityUnavailable(BackendKind::Cache));
        }
        let Some(host) = registry.cache_endpoint() else {
            return Self::inert(InertReason::MissingEndpoint {
                key: KEY_CACHE_ENDPOINT,
            });
        };
        let port = registry
            .cache_port()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_CACHE_PORT);

        let client = match connector.connect(host, port).await {
            Ok(client) => client,
            Err(err) => return Self::inert(InertReason::ProbeFailed(err.to_string())),
        };
        if let Err(err) = client.ping().await {
            return Self::inert(InertReason::ProbeFailed(err.to_string()));
        }
        info!(backend = %BackendKind::Cache, host, port, "Cache reachable");
        Self::with_client(client)
    }

    pub fn with_client(client: Box<dyn CacheClient>) -> Self {
        Self {
            client: Some(client),
            inert: None,
            pacing: Pacing::default(),
        }
    }

    pub fn inert(reason: InertReason) -> Self {
        warn!(backend = %BackendKind::Cache, reason = %reason, "Backend inert");
        Self {
            client: None,
            inert: Some(reason),
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn client(&self) -> Option<&dyn CacheClient> {
        self.client.as_deref()
    }
}

/// Pick one command uniformly from the eight supported kinds.
pub fn synthetic_command(rng: &mut StdRng) -> CacheCommand {
    let n = rng.random_range(0..KEYSPACE);
    let value = format!("value-{}", rng.random_range(0..u32::MAX));
    match rng.random_range(0..8u8) {
        0 => CacheCommand::Set {
            key: format!("{KEY_PREFIX}string:{n}"),
            value,
        },
        1 => CacheCommand::Get {
            key: format!("{KEY_PREFIX}string:{n}"),
        },
        2 => CacheCommand::HashSet {
            key: format!("{KEY_PREFIX}hash:{}", n % 10),
            field: format!("field:{n}"),
            value,
        },
        3 => CacheCommand::HashGet {
            key: format!("{KEY_PREFIX}hash:{}", n % 10),
            field: format!("field:{n}"),
        },
        4 => CacheCommand::Increment {
            key: format!("{KEY_PREFIX}counter:{n}"),
        },
        5 => CacheCommand::Decrement {
            key: format!("{KEY_PREFIX}counter:{n}"),
        },
        6 => CacheCommand::ListPush {
            key: format!("{KEY_PREFIX}list:{}", n % 10),
            value,
        },
        _ => CacheCommand::ListPop {
            key: format!("{KEY_PREFIX}list:{}", n % 10),
        },
    }
}

#[async_trait]
impl LoadGenerator for CacheLoadGenerator {
    fn kind(&self) -> BackendKind {
        BackendKind::Cache
    }

    fn inert_reason(&self) -> Option<&InertReason> {
        self.inert.as_ref()
    }

    async fn run(&mut self, budget: u64, cancel: CancellationToken) -> BackendResult {
        let Some(client) = self.client.as_deref() else {
            return match &self.inert {
                Some(reason) => BackendResult::inert(BackendKind::Cache, reason),
                None => BackendResult::new(BackendKind::Cache),
            };
        };
        let mut result = BackendResult::new(BackendKind::Cache);
        let mut rng = task_rng();

        for _ in 0..budget {
            if cancel.is_cancelled() {
                break;
            }
            let command = synthetic_command(&mut rng);
            match client.execute(&command).await {
                Ok(()) => result.record_success(),
                Err(err) => {
                    debug!(
                        backend = %BackendKind::Cache,
                        command = command.name(),
                        key = command.key(),
                        error = %err,
                        "Operation failed"
                    );
                    result.record_error(&err);
                }
            }
            if !self.pacing.pause(&mut rng, &cancel).await {
                break;
            }
        }
        result
    }
}
