//! Glob patterns over cache keys.

use globset::{Glob, GlobMatcher};
use thiserror::Error;

/// Raised when an invalidation pattern cannot be compiled.
///
/// Unlike store failures this one reaches the caller: a broken pattern would otherwise
/// leave stale entries behind without anyone noticing.
#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("invalid invalidation pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A compiled shell-style glob over fully-qualified keys.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    matcher: GlobMatcher,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<Self, InvalidationError> {
        if pattern.is_empty() {
            return Err(InvalidationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern must not be empty".to_string(),
            });
        }

        let glob = Glob::new(pattern).map_err(|err| InvalidationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.kind().to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    /// Longest prefix free of glob metacharacters.
    ///
    /// Backends that can only pre-filter by a simpler matcher scan `<prefix>*` and confirm
    /// each candidate with [`KeyPattern::matches`].
    pub fn literal_prefix(&self) -> &str {
        let end = self
            .raw
            .find(['*', '?', '[', '{', '\\'])
            .unwrap_or(self.raw.len());
        &self.raw[..end]
    }
}
