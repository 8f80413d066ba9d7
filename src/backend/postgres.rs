//! PostgreSQL adapter for the SQL generator (`deadpool-postgres`).

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Statement};

use super::sql::{SqlConnection, SqlConnector, SqlParam, SqlPool, SqlPoolSettings};
use crate::error::OperationError;

/// How long to wait for a free connection or a new one.
const POOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a [`PgPool`] and warms it with one connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl SqlConnector for PgConnector {
    async fn open(&self, settings: &SqlPoolSettings) -> Result<Box<dyn SqlPool>, OperationError> {
        let mut cfg = Config::new();
        cfg.host = Some(settings.host.clone());
        cfg.port = Some(settings.port);
        cfg.dbname = Some(settings.dbname.clone());
        cfg.user = Some(settings.credentials.username.clone());
        cfg.password = Some(settings.credentials.password().to_string());
        cfg.application_name = Some("stack-loadtest".to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(settings.max_size);
        pool_cfg.timeouts.wait = Some(POOL_TIMEOUT);
        pool_cfg.timeouts.create = Some(POOL_TIMEOUT);
        pool_cfg.timeouts.recycle = Some(POOL_TIMEOUT);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| OperationError::Connection {
                message: format!("failed to create pool: {e}"),
            })?;

        // deadpool is lazy; open the minimum up front so bad credentials
        // surface here instead of on every operation.
        for _ in 0..settings.min_size {
            drop(pool.get().await.map_err(|e| classify_pool(&e))?);
        }

        Ok(Box::new(PgPool { pool }))
    }
}

/// [`SqlPool`] over a `deadpool_postgres::Pool`.
pub struct PgPool {
    pool: Pool,
}

#[async_trait]
impl SqlPool for PgPool {
    async fn acquire(&self) -> Result<Box<dyn SqlConnection>, OperationError> {
        let client = self.pool.get().await.map_err(|e| classify_pool(&e))?;
        Ok(Box::new(PgConnection {
            client,
            prepared: None,
        }))
    }

    fn max_size(&self) -> usize {
        self.pool.status().max_size
    }
}

/// A pooled client. The `Object` returns to the pool on drop.
struct PgConnection {
    client: Object,
    prepared: Option<Statement>,
}

impl PgConnection {
    fn statement(&self) -> Result<&Statement, OperationError> {
        self.prepared.as_ref().ok_or_else(|| OperationError::Sql {
            message: "no prepared statement".to_string(),
        })
    }
}

fn as_sql(param: &SqlParam) -> &(dyn ToSql + Sync) {
    match param {
        SqlParam::BigInt(v) => v,
        SqlParam::Text(s) => s,
    }
}

#[async_trait]
impl SqlConnection for PgConnection {
    async fn begin(&mut self) -> Result<(), OperationError> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| classify_pg(&e))
    }

    async fn prepare(&mut self, sql: &str) -> Result<Vec<String>, OperationError> {
        let stmt = self.client.prepare(sql).await.map_err(|e| classify_pg(&e))?;
        let columns = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        self.prepared = Some(stmt);
        Ok(columns)
    }

    async fn query_prepared(&mut self, params: &[SqlParam]) -> Result<u64, OperationError> {
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(as_sql).collect();
        let stmt = self.statement()?;
        let rows = self
            .client
            .query(stmt, &refs)
            .await
            .map_err(|e| classify_pg(&e))?;
        Ok(rows.len() as u64)
    }

    async fn execute_prepared(&mut self, params: &[SqlParam]) -> Result<u64, OperationError> {
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(as_sql).collect();
        let stmt = self.statement()?;
        self.client
            .execute(stmt, &refs)
            .await
            .map_err(|e| classify_pg(&e))
    }

    async fn commit(&mut self) -> Result<(), OperationError> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| classify_pg(&e))
    }

    async fn rollback(&mut self) -> Result<(), OperationError> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| classify_pg(&e))
    }
}

/// Map a driver error onto an [`OperationError`].
pub fn classify_pg(err: &tokio_postgres::Error) -> OperationError {
    if let Some(db) = err.as_db_error() {
        OperationError::Sql {
            message: format!("{}: {}", db.code().code(), db.message()),
        }
    } else if err.is_closed() {
        OperationError::Connection {
            message: err.to_string(),
        }
    } else {
        OperationError::Sql {
            message: err.to_string(),
        }
    }
}

fn classify_pool(err: &PoolError) -> OperationError {
    match err {
        PoolError::Timeout(_) => OperationError::Timeout,
        PoolError::Backend(e) => classify_pg(e),
        other => OperationError::Connection {
            message: other.to_string(),
        },
    }
}
