//! Conditional request header handling.

use axum::http::HeaderMap;
use axum::http::header::IF_NONE_MATCH;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// `Sun, 06 Nov 1994 08:49:37 GMT`
const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Strong entity tags listed in every `If-None-Match` header, quotes stripped.
///
/// Weak tags, the `*` wildcard and malformed entries are dropped, so they can never match.
pub fn if_none_match(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(strong_tag)
        .map(str::to_string)
        .collect()
}

fn strong_tag(raw: &str) -> Option<&str> {
    let opaque = raw.trim().strip_prefix('"')?.strip_suffix('"')?;
    if opaque.is_empty() || opaque.contains('"') {
        return None;
    }
    Some(opaque)
}

/// Format an instant for `Last-Modified`.
pub fn http_date(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(IMF_FIXDATE)
        .unwrap_or_default()
}
