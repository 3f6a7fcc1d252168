use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tokio::sync::Mutex;
use tracing::debug;

use super::{CacheBackend, StoreError};
use crate::cache::keys::CacheKey;
use crate::cache::pattern::KeyPattern;

const SCAN_BATCH: usize = 200;

/// Redis-backed store.
///
/// The connection is opened on first use and dropped after any command error, so a
/// restarted server is picked up again without restarting the process. Expiry is
/// delegated to Redis (`SET … PX`).
pub struct RedisBackend {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBackend {
    /// Parse `url` without connecting.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let connection = self.client.get_multiplexed_async_connection().await?;
        debug!("opened redis connection");
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn settle<T>(&self, result: RedisResult<T>) -> Result<T, StoreError> {
        if result.is_err() {
            *self.connection.lock().await = None;
        }
        result.map_err(StoreError::from)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let mut connection = self.connection().await?;
        let result: RedisResult<Option<Vec<u8>>> = redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut connection)
            .await;
        Ok(self.settle(result).await?.map(Bytes::from))
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        let mut command = redis::cmd("SET");
        command.arg(key.as_str()).arg(value.as_ref());
        if let Some(ttl) = ttl {
            command.arg("PX").arg(ttl_millis(ttl));
        }
        let result: RedisResult<()> = command.query_async(&mut connection).await;
        self.settle(result).await
    }

    async fn forget(&self, key: &CacheKey) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        let result: RedisResult<()> = redis::cmd("DEL")
            .arg(key.as_str())
            .query_async(&mut connection)
            .await;
        self.settle(result).await
    }

    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError> {
        let mut connection = self.connection().await?;
        // Redis globs differ from ours (no `{a,b}`), so scan by literal prefix and
        // confirm each candidate locally.
        let scan_match = format!("{}*", pattern.literal_prefix());

        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let result: RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&scan_match)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut connection)
                .await;
            let (next, candidates) = self.settle(result).await?;

            let doomed = candidates
                .into_iter()
                .filter(|key| pattern.matches(key))
                .collect::<Vec<_>>();
            if !doomed.is_empty() {
                let result: RedisResult<usize> = redis::cmd("DEL")
                    .arg(&doomed)
                    .query_async(&mut connection)
                    .await;
                removed += self.settle(result).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::build_key;

    #[test]
    fn ttl_is_rounded_up_to_one_millisecond() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2_000);
    }

    #[test]
    fn invalid_url_is_rejected_without_connecting() {
        assert!(RedisBackend::open("not a url").is_err());
        assert!(RedisBackend::open("redis://127.0.0.1:6379").is_ok());
    }

    #[tokio::test]
    async fn refused_connection_surfaces_an_error() {
        // Port 1 is reserved and closed on any sane test host.
        let backend = RedisBackend::open("redis://127.0.0.1:1").expect("valid url");
        let key = build_key("perf", ["unreachable"]);
        assert!(backend.get(&key).await.is_err());
    }
}
