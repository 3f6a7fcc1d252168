//! Backing stores.
//!
//! A backend only moves bytes. Timeouts and the fail-open policy live one level up in
//! [`CacheStore`](super::store::CacheStore), so every backend reports its failures as-is.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::CacheKey;
use super::pattern::KeyPattern;

mod file;
mod memory;
mod remote;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use remote::RedisBackend;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("corrupt entry for `{key}`: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("store operation `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

impl StoreError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Uniform key-value contract over the supported stores.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short identifier used in diagnostics and metrics labels.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError>;

    /// Store `value`, replacing any existing entry. `None` means no expiry.
    async fn put(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Remove `key`. Absent keys are not an error.
    async fn forget(&self, key: &CacheKey) -> Result<(), StoreError>;

    /// Remove every key matching `pattern`, returning how many were removed.
    async fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError>;
}

/// Stored record for backends that do not track expiry themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    #[serde(with = "payload")]
    pub value: Bytes,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp::option", default)]
    pub expires_at: Option<OffsetDateTime>,
}

impl CacheEntry {
    /// A ttl too large to represent as a timestamp is stored without expiry.
    pub fn new(key: &CacheKey, value: Bytes, ttl: Option<Duration>, now: OffsetDateTime) -> Self {
        Self {
            key: key.as_str().to_string(),
            value,
            created_at: now,
            expires_at: ttl.and_then(|ttl| deadline(now, ttl)),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

fn deadline(now: OffsetDateTime, ttl: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
}

pub(crate) mod payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::build_key;

    #[test]
    fn entry_without_ttl_never_expires() {
        let now = OffsetDateTime::now_utc();
        let entry = CacheEntry::new(&build_key("perf", ["a"]), Bytes::from("v"), None, now);
        assert!(!entry.is_expired(now + Duration::from_secs(10 * 365 * 86_400)));
    }

    #[test]
    fn unrepresentable_ttl_is_stored_without_expiry() {
        let now = OffsetDateTime::now_utc();
        for ttl in [Duration::from_secs(1_000_000_000_000), Duration::MAX] {
            let entry =
                CacheEntry::new(&build_key("perf", ["a"]), Bytes::from("v"), Some(ttl), now);
            assert_eq!(entry.expires_at, None);
            assert!(!entry.is_expired(now));
        }
    }

    #[test]
    fn entry_expires_at_its_deadline() {
        let now = OffsetDateTime::now_utc();
        let entry = CacheEntry::new(
            &build_key("perf", ["a"]),
            Bytes::from("v"),
            Some(Duration::from_secs(60)),
            now,
        );
        assert!(!entry.is_expired(now + Duration::from_secs(59)));
        assert!(entry.is_expired(now + Duration::from_secs(60)));
    }

    #[test]
    fn entry_survives_json_encoding() {
        let now = OffsetDateTime::now_utc();
        let entry = CacheEntry::new(
            &build_key("perf", ["binary"]),
            Bytes::from_static(&[0, 159, 146, 150]),
            Some(Duration::from_secs(5)),
            now,
        );
        let encoded = serde_json::to_vec(&entry).expect("entry should encode");
        let decoded: CacheEntry = serde_json::from_slice(&encoded).expect("entry should decode");
        assert_eq!(decoded.value, entry.value);
        assert_eq!(decoded.key, "perf:binary");
        assert!(decoded.expires_at.is_some());
    }
}
