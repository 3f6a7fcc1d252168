//! Cache key definitions.
//!
//! Keys are `:`-separated segments under a namespace prefix. Segments that are not plain
//! identifiers are replaced by a digest so keys stay path-safe for the file backend and
//! can never smuggle glob metacharacters into an invalidation pattern.

use std::borrow::Cow;
use std::fmt;

use sha2::{Digest, Sha256};

/// Segment separator.
pub const SEPARATOR: char = ':';

/// Prefix marking a digested segment. Never produced by a verbatim segment.
const DIGEST_MARKER: char = '~';
const SEGMENT_DIGEST_LEN: usize = 32;

/// Longest segment kept verbatim. Longer ones are digested so file names stay well under
/// filesystem limits however many segments a key has.
pub const MAX_PLAIN_SEGMENT_LEN: usize = 64;

/// A fully-qualified cache key.
///
/// Only constructed through [`build_key`] / [`KeyBuilder`], so every key is path-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds a key from a namespace and logical identity parts.
pub fn build_key<I, S>(namespace: &str, parts: I) -> CacheKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    join(&segment(namespace), parts)
}

fn join<I, S>(namespace: &str, parts: I) -> CacheKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::from(namespace);
    for part in parts {
        key.push(SEPARATOR);
        key.push_str(&segment(part.as_ref()));
    }
    CacheKey(key)
}

/// Encode one key segment.
///
/// Plain identifiers (`[A-Za-z0-9_.-]+`, not starting with `.`, at most
/// [`MAX_PLAIN_SEGMENT_LEN`] bytes) pass through unchanged. Anything else is digested.
pub fn segment(raw: &str) -> Cow<'_, str> {
    if is_plain_segment(raw) {
        Cow::Borrowed(raw)
    } else {
        let digest = content_hash(raw.as_bytes());
        Cow::Owned(format!(
            "{DIGEST_MARKER}{}",
            &digest[..SEGMENT_DIGEST_LEN]
        ))
    }
}

pub(crate) fn is_plain_segment(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_PLAIN_SEGMENT_LEN
        && !raw.starts_with('.')
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Lowercase hex SHA-256 of `body`.
pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Strong entity tag derived from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ETag(String);

impl ETag {
    pub fn from_body(body: &[u8]) -> Self {
        Self(content_hash(body))
    }

    /// Opaque tag value without quotes.
    pub fn opaque(&self) -> &str {
        &self.0
    }

    /// Value for the `ETag` response header.
    pub fn header_value(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

/// Derives keys for the families used across the crate.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
}

impl KeyBuilder {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: segment(namespace).into_owned(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn build<I, S>(&self, parts: I) -> CacheKey
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        join(&self.namespace, parts)
    }

    /// `model:<entity>:<id>`; the entity type is lowercased so `Product` and `product`
    /// share entries.
    pub fn model(&self, entity_type: &str, id: &str) -> CacheKey {
        self.build(["model", &entity_type.to_ascii_lowercase(), id])
    }

    /// `forever:<parts…>`.
    pub fn forever<I, S>(&self, parts: I) -> CacheKey
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts = parts
            .into_iter()
            .map(|part| part.as_ref().to_string())
            .collect::<Vec<_>>();
        self.build(std::iter::once("forever".to_string()).chain(parts))
    }

    /// `response:<tag>:<route>:<digest of path and query>`.
    pub fn response(&self, tag: &str, route: &str, path: &str, query: Option<&str>) -> CacheKey {
        let target = match query {
            Some(query) if !query.is_empty() => format!("{path}?{query}"),
            _ => path.to_string(),
        };
        let digest = content_hash(target.as_bytes());
        self.build(["response", tag, route, &digest[..SEGMENT_DIGEST_LEN]])
    }

    /// Pattern for the model entry of one entity.
    pub fn model_pattern(&self, entity_type: &str, id: &str) -> String {
        self.model(entity_type, id).0
    }

    /// Prefix a key-suffix glob with the namespace.
    pub fn qualify_pattern(&self, suffix: &str) -> String {
        format!("{}{SEPARATOR}{suffix}", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_segments_are_joined_verbatim() {
        let key = build_key("perf", ["model", "product", "5"]);
        assert_eq!(key.as_str(), "perf:model:product:5");
    }

    #[test]
    fn separator_inside_a_part_cannot_collide() {
        let left = build_key("perf", ["a:b", "c"]);
        let right = build_key("perf", ["a", "b:c"]);
        assert_ne!(left, right);
        assert!(left.as_str().starts_with("perf:~"));
    }

    #[test]
    fn unsafe_segments_are_digested() {
        let key = build_key("perf", ["../../etc/passwd"]);
        assert!(!key.as_str().contains('/'));
        assert_eq!(key.as_str().len(), "perf:~".len() + SEGMENT_DIGEST_LEN);

        let glob = build_key("perf", ["*"]);
        assert!(!glob.as_str().contains('*'));

        let empty = build_key("perf", [""]);
        assert!(empty.as_str().starts_with("perf:~"));
    }

    #[test]
    fn long_segments_are_digested() {
        let slug = "a".repeat(230);
        let key = KeyBuilder::new("perf").model("product", &slug);
        assert_eq!(
            key.as_str().len(),
            "perf:model:product:~".len() + SEGMENT_DIGEST_LEN
        );

        let bound = "b".repeat(MAX_PLAIN_SEGMENT_LEN);
        assert_eq!(segment(&bound), bound.as_str());
        let over = "b".repeat(MAX_PLAIN_SEGMENT_LEN + 1);
        assert!(segment(&over).starts_with(DIGEST_MARKER));
    }

    #[test]
    fn digested_namespace_is_not_digested_twice() {
        let keys = KeyBuilder::new("shop front");
        let key = keys.build(["a"]);
        assert_eq!(key.as_str(), format!("{}:a", keys.namespace()));
        assert!(keys.qualify_pattern("*").starts_with(keys.namespace()));
    }

    #[test]
    fn key_derivation_is_deterministic() {
        let keys = KeyBuilder::new("perf");
        assert_eq!(keys.model("Product", "42"), keys.model("product", "42"));
        assert_eq!(
            keys.response("tag", "shop.home.index", "/", Some("page=2")),
            keys.response("tag", "shop.home.index", "/", Some("page=2"))
        );
        assert_ne!(
            keys.response("tag", "shop.home.index", "/", Some("page=2")),
            keys.response("tag", "shop.home.index", "/", Some("page=3"))
        );
    }

    #[test]
    fn empty_query_matches_missing_query() {
        let keys = KeyBuilder::new("perf");
        assert_eq!(
            keys.response("tag", "route", "/a", Some("")),
            keys.response("tag", "route", "/a", None)
        );
    }

    #[test]
    fn forever_keys_live_under_their_own_prefix() {
        let keys = KeyBuilder::new("perf");
        assert_eq!(
            keys.forever(["settings", "locale"]).as_str(),
            "perf:forever:settings:locale"
        );
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"hellp"));
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn etag_header_is_quoted() {
        let tag = ETag::from_body(b"body");
        assert_eq!(tag.header_value(), format!("\"{}\"", tag.opaque()));
    }

    #[test]
    fn patterns_are_namespaced() {
        let keys = KeyBuilder::new("perf");
        assert_eq!(keys.qualify_pattern("model:product:*"), "perf:model:product:*");
        assert_eq!(keys.model_pattern("Product", "7"), "perf:model:product:7");
    }
}
