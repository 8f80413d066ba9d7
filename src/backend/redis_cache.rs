//! Redis adapter for the cache generator.
//!
//! Holds one [`MultiplexedConnection`]; every command clones it, and all
//! clones share the same TCP connection.

use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, RedisError};
use async_trait::async_trait;

use super::cache::{CacheClient, CacheCommand, CacheConnector};
use crate::error::OperationError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to `redis://host:port`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl CacheConnector for RedisConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn CacheClient>, OperationError> {
        let url = format!("redis://{host}:{port}");
        let client = ::redis::Client::open(url.as_str()).map_err(|e| classify_redis(&e))?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| OperationError::Timeout)?
            .map_err(|e| classify_redis(&e))?;
        Ok(Box::new(RedisCacheClient { conn }))
    }
}

#[derive(Clone)]
pub struct RedisCacheClient {
    conn: MultiplexedConnection,
}

#[async_trait]
impl CacheClient for RedisCacheClient {
    async fn ping(&self) -> Result<(), OperationError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify_redis(&e))?;
        Ok(())
    }

    async fn execute(&self, command: &CacheCommand) -> Result<(), OperationError> {
        let mut conn = self.conn.clone();
        let outcome: Result<(), RedisError> = match command {
            CacheCommand::Set { key, value } => conn.set(key, value).await,
            CacheCommand::Get { key } => conn.get(key).await.map(|_: Option<String>| ()),
            CacheCommand::HashSet { key, field, value } => {
                conn.hset(key, field, value).await.map(|_: i64| ())
            }
            CacheCommand::HashGet { key, field } => {
                conn.hget(key, field).await.map(|_: Option<String>| ())
            }
            CacheCommand::Increment { key } => conn.incr(key, 1).await.map(|_: i64| ()),
            CacheCommand::Decrement { key } => conn.decr(key, 1).await.map(|_: i64| ()),
            CacheCommand::ListPush { key, value } => {
                conn.lpush(key, value).await.map(|_: i64| ())
            }
            CacheCommand::ListPop { key } => {
                conn.rpop(key, None).await.map(|_: Option<String>| ())
            }
        };
        outcome.map_err(|e| classify_redis(&e))
    }
}

/// Map a Redis error onto an [`OperationError`].
pub fn classify_redis(err: &RedisError) -> OperationError {
    if err.is_timeout() {
        OperationError::Timeout
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        OperationError::Connection {
            message: err.to_string(),
        }
    } else {
        OperationError::Cache {
            message: err.to_string(),
        }
    }
}

/// Requires a running Redis; enable with `--features redis-tests`.
#[cfg(all(test, feature = "redis-tests"))]
mod integration_tests {
    use super::*;

    async fn test_client() -> Box<dyn CacheClient> {
        let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        RedisConnector
            .connect(&host, 6379)
            .await
            .expect("Redis connection failed -- is Redis running?")
    }

    #[tokio::test]
    async fn redis_ping_succeeds() {
        let client = test_client().await;
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn redis_executes_every_command_kind() {
        let client = test_client().await;
        let key = |kind: &str| format!("loadtest:it:{kind}");
        let commands = [
            CacheCommand::Set {
                key: key("s"),
                value: "v".to_string(),
            },
            CacheCommand::Get { key: key("s") },
            CacheCommand::HashSet {
                key: key("h"),
                field: "f".to_string(),
                value: "v".to_string(),
            },
            CacheCommand::HashGet {
                key: key("h"),
                field: "f".to_string(),
            },
            CacheCommand::Increment { key: key("c") },
            CacheCommand::Decrement { key: key("c") },
            CacheCommand::ListPush {
                key: key("l"),
                value: "v".to_string(),
            },
            CacheCommand::ListPop { key: key("l") },
        ];
        for command in &commands {
            client.execute(command).await.unwrap();
        }
    }
}
