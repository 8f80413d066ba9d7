//! SQL load generator.
//!
//! Runs a small fixed set of cheap statements against the database through
//! a bounded connection pool. Each statement executes in its own
//! transaction on a connection that goes back to the pool exactly once.
//!
//! The driver is reached only through [`SqlConnector`], [`SqlPool`] and
//! [`SqlConnection`]; the PostgreSQL implementation lives in
//! [`super::postgres`].

use async_trait::async_trait;
use rand::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{task_rng, BackendKind, BackendResult, InertReason, LoadGenerator, Pacing};
use crate::error::OperationError;
use crate::registry::{EndpointRegistry, KEY_DATABASE_ENDPOINT};
use crate::secrets::{resolve_credentials, DatabaseCredentials, SecretLookup};

/// Port used when the manifest has no `DatabasePort`.
pub const DEFAULT_DB_PORT: u16 = 5432;
/// Database used when the manifest has no `DatabaseName`.
pub const DEFAULT_DB_NAME: &str = "postgres";

/// Statements issued by the generator, picked uniformly.
pub const STATEMENTS: [&str; 6] = [
    "SELECT 1",
    "SELECT $1::BIGINT + $2::BIGINT",
    "SELECT md5($1::TEXT)",
    "SELECT count(*) FROM pg_stat_activity",
    "SELECT now()",
    "SET LOCAL application_name = 'stack-loadtest'",
];

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    BigInt(i64),
    Text(String),
}

/// Rows fetched by a statement that produces row metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: u64,
}

/// What a successfully committed statement produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    Rows(QueryRows),
    Done { affected: u64 },
}

/// Everything needed to open a pool.
#[derive(Debug, Clone)]
pub struct SqlPoolSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub credentials: DatabaseCredentials,
    pub min_size: usize,
    pub max_size: usize,
}

/// One pooled connection. Dropping it hands it back to the pool.
#[async_trait]
pub trait SqlConnection: Send {
    async fn begin(&mut self) -> Result<(), OperationError>;

    /// Prepare `sql` and return the names of the columns it yields.
    ///
    /// An empty list means the statement produces no row metadata.
    async fn prepare(&mut self, sql: &str) -> Result<Vec<String>, OperationError>;

    /// Run the last prepared statement and return the number of rows fetched.
    async fn query_prepared(&mut self, params: &[SqlParam]) -> Result<u64, OperationError>;

    /// Execute the last prepared statement and return the affected row count.
    async fn execute_prepared(&mut self, params: &[SqlParam]) -> Result<u64, OperationError>;

    async fn commit(&mut self) -> Result<(), OperationError>;

    async fn rollback(&mut self) -> Result<(), OperationError>;
}

/// Bounded pool of [`SqlConnection`]s.
#[async_trait]
pub trait SqlPool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn SqlConnection>, OperationError>;

    fn max_size(&self) -> usize;
}

/// Opens a [`SqlPool`].
#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn open(&self, settings: &SqlPoolSettings) -> Result<Box<dyn SqlPool>, OperationError>;
}

/// Drives the SQL backend.
pub struct SqlLoadGenerator {
    pool: Option<Box<dyn SqlPool>>,
    inert: Option<InertReason>,
    pacing: Pacing,
}

impl SqlLoadGenerator {
    /// Resolve credentials and open a pool sized to `intensity`.
    ///
    /// Every failure leaves the generator inert.
    pub async fn connect(
        registry: &EndpointRegistry,
        secrets: &dyn SecretLookup,
        connector: &dyn SqlConnector,
        capable: bool,
        intensity: u32,
    ) -> Self {
        if !capable {
            return Self::inert(InertReason::CapabilityUnavailable(BackendKind::Sql));
        }
        let Some(host) = registry.database_endpoint() else {
            return Self::inert(InertReason::MissingEndpoint {
                key: KEY_DATABASE_ENDPOINT,
            });
        };
        let Some(secret_ref) = registry.database_secret_ref() else {
            return Self::inert(InertReason::MissingSecretRef);
        };
        let credentials = match resolve_credentials(secrets, secret_ref).await {
            Ok(credentials) => credentials,
            Err(err) => return Self::inert(InertReason::Credentials(err.to_string())),
        };

        let settings = SqlPoolSettings {
            host: host.to_string(),
            port: registry
                .database_port()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            dbname: registry
                .database_name()
                .unwrap_or(DEFAULT_DB_NAME)
                .to_string(),
            credentials,
            min_size: 1,
            max_size: intensity.max(1) as usize,
        };

        match connector.open(&settings).await {
            Ok(pool) => {
                info!(
                    backend = %BackendKind::Sql,
                    host = %settings.host,
                    port = settings.port,
                    db = %settings.dbname,
                    max_size = pool.max_size(),
                    "Connection pool ready"
                );
                Self::with_pool(pool)
            }
            Err(err) => Self::inert(InertReason::PoolUnavailable(err.to_string())),
        }
    }

    /// A live generator over an existing pool.
    pub fn with_pool(pool: Box<dyn SqlPool>) -> Self {
        Self {
            pool: Some(pool),
            inert: None,
            pacing: Pacing::default(),
        }
    }

    pub fn inert(reason: InertReason) -> Self {
        warn!(backend = %BackendKind::Sql, reason = %reason, "Backend inert");
        Self {
            pool: None,
            inert: Some(reason),
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn pool(&self) -> Option<&dyn SqlPool> {
        self.pool.as_deref()
    }

    /// Run one statement and return its rows, if it produced any.
    ///
    /// Failures are logged and surface as `None`, the same as a statement
    /// without row metadata.
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Option<QueryRows> {
        if self.pool.is_none() {
            return None;
        }
        match self.try_query(sql, params).await {
            Ok(StatementOutcome::Rows(rows)) => Some(rows),
            Ok(StatementOutcome::Done { .. }) => None,
            Err(err) => {
                warn!(backend = %BackendKind::Sql, statement = sql, error = %err, "Query failed");
                None
            }
        }
    }

    /// Run one statement in its own transaction.
    ///
    /// The connection is acquired here and dropped before returning on
    /// every path. A failed statement is rolled back first.
    pub async fn try_query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<StatementOutcome, OperationError> {
        let pool = self.pool.as_ref().ok_or_else(|| OperationError::Connection {
            message: "no connection pool".to_string(),
        })?;
        let mut conn = pool.acquire().await?;
        let outcome = run_in_transaction(conn.as_mut(), sql, params).await;
        if outcome.is_err() {
            if let Err(err) = conn.rollback().await {
                debug!(backend = %BackendKind::Sql, error = %err, "Rollback failed");
            }
        }
        drop(conn);
        outcome
    }
}

async fn run_in_transaction(
    conn: &mut dyn SqlConnection,
    sql: &str,
    params: &[SqlParam],
) -> Result<StatementOutcome, OperationError> {
    conn.begin().await?;
    let columns = conn.prepare(sql).await?;
    let outcome = if columns.is_empty() {
        let affected = conn.execute_prepared(params).await?;
        StatementOutcome::Done { affected }
    } else {
        let rows = conn.query_prepared(params).await?;
        StatementOutcome::Rows(QueryRows { columns, rows })
    };
    conn.commit().await?;
    Ok(outcome)
}

/// Pick one statement from [`STATEMENTS`] together with fresh parameters.
pub fn synthetic_statement(rng: &mut StdRng) -> (&'static str, Vec<SqlParam>) {
    let index = rng.random_range(0..STATEMENTS.len());
    let params = match index {
        1 => vec![
            SqlParam::BigInt(rng.random_range(0..1_000_000)),
            SqlParam::BigInt(rng.random_range(0..1_000_000)),
        ],
        2 => vec![SqlParam::Text(format!(
            "loadtest-{}",
            rng.random_range(0..u32::MAX)
        ))],
        _ => Vec::new(),
    };
    (STATEMENTS[index], params)
}

#[async_trait]
impl LoadGenerator for SqlLoadGenerator {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn inert_reason(&self) -> Option<&InertReason> {
        self.inert.as_ref()
    }

    async fn run(&mut self, budget: u64, cancel: CancellationToken) -> BackendResult {
        if let Some(reason) = &self.inert {
            return BackendResult::inert(BackendKind::Sql, reason);
        }
        let mut result = BackendResult::new(BackendKind::Sql);
        let mut rng = task_rng();

        for _ in 0..budget {
            if cancel.is_cancelled() {
                break;
            }
            let (sql, params) = synthetic_statement(&mut rng);
            match self.try_query(sql, &params).await {
                Ok(_) => result.record_success(),
                Err(err) => {
                    debug!(backend = %BackendKind::Sql, statement = sql, error = %err, "Operation failed");
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
