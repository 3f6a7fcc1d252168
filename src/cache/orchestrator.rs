//! Validator negotiation for a rendered response.
//!
//! [`evaluate`] picks the outcome from the policy decision, the client's validators and the
//! body; [`apply`] writes that outcome onto the response. Both are free of I/O so the
//! middleware can run them on fresh and stored responses alike.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, ETAG, LAST_MODIFIED, VARY};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use time::OffsetDateTime;

use super::headers::http_date;
use super::keys::ETag;
use super::policy::{CachePolicyDecision, RequestDescriptor};

/// Sent with every response the policy refuses to cache.
pub const NO_STORE: &str = "no-store, private";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Uncached,
    NotModified {
        etag: ETag,
    },
    Serve {
        etag: ETag,
        last_modified: OffsetDateTime,
    },
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Uncached => "uncached",
            CacheOutcome::NotModified { .. } => "not_modified",
            CacheOutcome::Serve { .. } => "serve",
        }
    }
}

pub fn evaluate(
    decision: &CachePolicyDecision,
    request: &RequestDescriptor,
    body: &[u8],
    now: OffsetDateTime,
) -> CacheOutcome {
    if !decision.is_cacheable() {
        return CacheOutcome::Uncached;
    }

    let etag = ETag::from_body(body);
    if request
        .incoming_validators
        .iter()
        .any(|candidate| candidate == etag.opaque())
    {
        return CacheOutcome::NotModified { etag };
    }

    CacheOutcome::Serve {
        etag,
        last_modified: now,
    }
}

pub fn apply(
    outcome: &CacheOutcome,
    decision: &CachePolicyDecision,
    mut response: Response,
) -> Response {
    match outcome {
        CacheOutcome::Uncached => {
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
            response
        }
        CacheOutcome::NotModified { etag } => {
            let mut not_modified = Response::new(Body::empty());
            *not_modified.status_mut() = StatusCode::NOT_MODIFIED;
            write_validators(not_modified.headers_mut(), etag, decision);
            not_modified
        }
        CacheOutcome::Serve {
            etag,
            last_modified,
        } => {
            let headers = response.headers_mut();
            write_validators(headers, etag, decision);
            if let Ok(value) = HeaderValue::from_str(&http_date(*last_modified)) {
                headers.insert(LAST_MODIFIED, value);
            }
            response
        }
    }
}

fn write_validators(headers: &mut HeaderMap, etag: &ETag, decision: &CachePolicyDecision) {
    if let Ok(value) = HeaderValue::from_str(&etag.header_value()) {
        headers.insert(ETAG, value);
    }
    if let Some(value) = decision
        .cache_control()
        .and_then(|value| HeaderValue::from_str(&value).ok())
    {
        headers.insert(CACHE_CONTROL, value);
    }
    if !decision.vary_on.is_empty()
        && let Ok(value) = HeaderValue::from_str(&decision.vary_on.join(", "))
    {
        headers.insert(VARY, value);
    }
}
