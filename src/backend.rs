//! Backend client pool — spec §4.2.
//!
//! A pooled client over a sorted-set-capable store (redis-compatible),
//! exposing exactly the primitives the telemetry store needs: `ZADD`,
//! `ZRANGEBYSCORE`, `ZREMRANGEBYSCORE`, `ZRANGE`, `GET`/`INCR`/`EXPIRE`, and a
//! pipelined batch. Pooling is `deadpool-redis` over a `redis::Client`
//! connection, giving the idle-timeout contract a bare client doesn't.

use crate::config::Config;
use crate::error::BackendError;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;

#[derive(Clone)]
pub struct BackendPool {
    pool: Pool,
    idle_timeout: Duration,
}

impl BackendPool {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let mut pool_cfg = PoolConfig::from_url(config.backend_url());
        pool_cfg.pool = Some(deadpool_redis::PoolConfig {
            max_size: config.backend_pool_max_size,
            ..Default::default()
        });
        let pool = pool_cfg.create_pool(Some(Runtime::Tokio1))?;

        Ok(Self {
            pool,
            idle_timeout: Duration::from_millis(config.backend_idle_timeout_ms.max(1)),
        })
    }

    /// Acquire a connection, never waiting longer than the configured idle
    /// timeout (§4.2 contract). A connection that errors on I/O is simply not
    /// returned to the pool — `deadpool-redis`'s recycling check discards it.
    async fn conn(&self) -> Result<deadpool_redis::Connection, BackendError> {
        tokio::time::timeout(self.idle_timeout, self.pool.get())
            .await
            .map_err(|_| BackendError::PoolTimeout)?
            .map_err(BackendError::from)
    }

    pub async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrangebyscore(key, min, max).await?;
        Ok(members)
    }

    pub async fn zremrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<i64, BackendError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.zrembyscore(key, min, max).await?;
        Ok(removed)
    }

    pub async fn zrange_all(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrange(key, 0, -1).await?;
        Ok(members)
    }

    pub async fn get(&self, key: &str) -> Result<Option<i64>, BackendError> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    /// Run an arbitrary pipeline against a freshly-checked-out connection.
    /// Per-command error slots come for free: `redis::Pipeline::query_async`
    /// with a tuple/Vec target fails the whole batch only on a transport
    /// error, never on a single reply's shape — callers decode each element
    /// defensively (§4.5 "silently skip unparsable members").
    pub async fn pipeline(&self) -> Result<PipelineHandle, BackendError> {
        Ok(PipelineHandle {
            conn: self.conn().await?,
        })
    }
}

/// A checked-out connection paired with a `redis::Pipeline`, so call sites
/// build one pipeline and execute it in one round-trip (§4.5, §5: "at most
/// two pipelined backend round-trips").
pub struct PipelineHandle {
    conn: deadpool_redis::Connection,
}

impl PipelineHandle {
    pub async fn exec_raw(
        &mut self,
        pipe: redis::Pipeline,
    ) -> Result<Vec<redis::Value>, BackendError> {
        let value: redis::Value = pipe.query_async(&mut self.conn).await?;
        match value {
            redis::Value::Array(values) => Ok(values),
            other => Ok(vec![other]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_round_trips_through_pool_config() {
        // PoolConfig::from_url should accept whatever Config::backend_url produces.
        let url = "redis://127.0.0.1:6379/0";
        let cfg = PoolConfig::from_url(url);
        assert_eq!(cfg.url.as_deref(), Some(url));
    }
}
