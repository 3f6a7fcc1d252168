//! Fail-open adapter over a [`CacheBackend`].
//!
//! Callers never see a store failure: reads degrade to a miss and writes to a no-op, and
//! each swallowed failure is handed to the [`DiagnosticSink`]. Pattern syntax errors are
//! the exception and always reach the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::backend::{CacheBackend, StoreError};
use super::keys::CacheKey;
use super::pattern::{InvalidationError, KeyPattern};
use crate::instrumentation::{DiagnosticSink, StoreFailure};

const PROBE_NAMESPACE: &str = "probe";
const PROBE_TTL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    timeout: Duration,
    sink: Arc<dyn DiagnosticSink>,
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        timeout: Duration,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            backend,
            timeout,
            sink,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        match self.guard("get", self.backend.get(key)).await {
            Ok(value) => value,
            Err(err) => {
                self.report("get", key.as_str(), &err);
                None
            }
        }
    }

    /// Store `value` for `ttl`. A zero `ttl` removes the key instead.
    pub async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) {
        if ttl.is_zero() {
            self.forget(key).await;
            return;
        }
        self.write(key, value, Some(ttl)).await;
    }

    pub async fn forever(&self, key: &CacheKey, value: Bytes) {
        self.write(key, value, None).await;
    }

    pub async fn forget(&self, key: &CacheKey) {
        if let Err(err) = self.guard("forget", self.backend.forget(key)).await {
            self.report("forget", key.as_str(), &err);
        }
    }

    /// Remove every key matching the glob `pattern`, returning how many went away.
    ///
    /// An unreachable store counts as zero removals.
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, InvalidationError> {
        let pattern = KeyPattern::new(pattern)?;
        match self
            .guard("delete_by_pattern", self.backend.delete_matching(&pattern))
            .await
        {
            Ok(removed) => Ok(removed),
            Err(err) => {
                self.report("delete_by_pattern", pattern.as_str(), &err);
                Ok(0)
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                self.report(
                    "get_json",
                    key.as_str(),
                    &StoreError::corrupt(key.as_str(), err.to_string()),
                );
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        if let Some(encoded) = self.encode(key, value) {
            self.put(key, encoded, ttl).await;
        }
    }

    pub async fn forever_json<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if let Some(encoded) = self.encode(key, value) {
            self.forever(key, encoded).await;
        }
    }

    /// Write, read back and remove a throwaway key, returning the round-trip time.
    ///
    /// Unlike every other operation this one surfaces the backend error.
    pub async fn probe(&self) -> Result<Duration, StoreError> {
        let key = super::keys::build_key(PROBE_NAMESPACE, [Uuid::new_v4().to_string()]);
        let payload = Bytes::from_static(b"ok");
        let started = Instant::now();

        self.guard("put", self.backend.put(&key, payload.clone(), Some(PROBE_TTL)))
            .await?;
        let read = self.guard("get", self.backend.get(&key)).await?;
        self.guard("forget", self.backend.forget(&key)).await?;

        if read.as_ref() != Some(&payload) {
            return Err(StoreError::corrupt(
                key.as_str(),
                "probe value did not read back",
            ));
        }
        Ok(started.elapsed())
    }

    async fn write(&self, key: &CacheKey, value: Bytes, ttl: Option<Duration>) {
        if let Err(err) = self.guard("put", self.backend.put(key, value, ttl)).await {
            self.report("put", key.as_str(), &err);
        }
    }

    fn encode<T: Serialize>(&self, key: &CacheKey, value: &T) -> Option<Bytes> {
        match serde_json::to_vec(value) {
            Ok(encoded) => Some(Bytes::from(encoded)),
            Err(err) => {
                self.report(
                    "put_json",
                    key.as_str(),
                    &StoreError::corrupt(key.as_str(), err.to_string()),
                );
                None
            }
        }
    }

    async fn guard<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.timeout,
            }),
        }
    }

    fn report(&self, op: &'static str, key: &str, err: &StoreError) {
        self.sink.store_failed(&StoreFailure {
            op,
            backend: self.backend.name(),
            key: key.to_string(),
            error: err.to_string(),
        });
    }
}
