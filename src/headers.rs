//! Header plumbing shared across the cache: the cache-status response
//! header, hop-by-hop stripping, stored-header freshening, conditional
//! request construction, `Age` emission, and the synthetic 504.

use std::collections::HashSet;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{
    CACHE_CONTROL, CONNECTION, CONTENT_LENGTH, DATE, ETAG, EXPIRES, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use once_cell::sync::Lazy;
use time::OffsetDateTime;

use crate::freshness::{Age, Clock};

/// Primary cache-status response header.
pub const CACHE_STATUS_HEADER: &str = "x-httpcache-status";

/// Compatibility alias set to `"1"` on any cache-served response, mirroring
/// the convention popularized by older Go HTTP caches.
pub const CACHE_STATUS_HEADER_LEGACY: &str = "x-cache-status";

/// How the cache handled a request, reported on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from cache.
    Hit,
    /// Not in cache; served from the origin and possibly stored.
    Miss,
    /// Served from cache although stale.
    Stale,
    /// Revalidated with the origin and served from cache.
    Revalidated,
    /// The cache stepped aside entirely.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Revalidated => "REVALIDATED",
            CacheStatus::Bypass => "BYPASS",
        }
    }

    fn served_from_cache(self) -> bool {
        matches!(self, CacheStatus::Hit | CacheStatus::Stale | CacheStatus::Revalidated)
    }

    pub(crate) fn apply_to(self, headers: &mut HeaderMap) {
        headers.insert(
            HeaderName::from_static(CACHE_STATUS_HEADER),
            HeaderValue::from_static(self.as_str()),
        );
        if self.served_from_cache() {
            headers.insert(
                HeaderName::from_static(CACHE_STATUS_HEADER_LEGACY),
                HeaderValue::from_static("1"),
            );
        } else {
            headers.remove(CACHE_STATUS_HEADER_LEGACY);
        }
    }
}

static HOP_BY_HOP: Lazy<HashSet<HeaderName>> = Lazy::new(|| {
    [
        // RFC 9110 §7.6.1
        "connection",
        "proxy-connection",
        "keep-alive",
        "te",
        "transfer-encoding",
        "upgrade",
        // RFC 9111 §3.1 proxy headers
        "proxy-authenticate",
        "proxy-authentication-info",
        "proxy-authorization",
    ]
    .into_iter()
    .map(HeaderName::from_static)
    .collect()
});

/// The hop-by-hop set plus every field the response's `Connection` header
/// nominates (RFC 9111 §3.1).
fn hop_by_hop_fields(headers: &HeaderMap) -> HashSet<HeaderName> {
    let mut fields = HOP_BY_HOP.clone();
    for value in headers.get_all(CONNECTION) {
        let Ok(listed) = value.to_str() else { continue };
        for field in crate::directives::split_unquoted_commas(listed) {
            if let Ok(name) = HeaderName::from_bytes(field.as_bytes()) {
                fields.insert(name);
            }
        }
    }
    fields
}

/// Strips hop-by-hop fields in place before a response is stored.
pub(crate) fn remove_hop_by_hop(headers: &mut HeaderMap) {
    for name in hop_by_hop_fields(headers) {
        headers.remove(name);
    }
}

/// Freshens stored headers from a validation response per RFC 9111 §3.2:
/// every field of the new response replaces the stored one, except
/// hop-by-hop fields and `Content-Length`.
pub(crate) fn update_stored_headers(stored: &mut HeaderMap, fresh: &HeaderMap) {
    let mut omitted = hop_by_hop_fields(fresh);
    omitted.insert(CONTENT_LENGTH);
    for name in fresh.keys() {
        if omitted.contains(name) {
            continue;
        }
        let values: Vec<HeaderValue> = fresh.get_all(name).iter().cloned().collect();
        stored.remove(name);
        for value in values {
            stored.append(name.clone(), value);
        }
    }
}

/// Adds `If-None-Match`/`If-Modified-Since` from the stored response's
/// validators (RFC 9111 §4.3.1).
pub(crate) fn apply_conditional_headers(request: &mut HeaderMap, stored: &HeaderMap) {
    if let Some(etag) = stored.get(ETAG) {
        request.insert(IF_NONE_MATCH, etag.clone());
    }
    if let Some(last_modified) = stored.get(LAST_MODIFIED) {
        request.insert(IF_MODIFIED_SINCE, last_modified.clone());
    }
}

/// Emits `Age` in whole seconds, extrapolated from the recorded age to now.
pub(crate) fn set_age_header(headers: &mut HeaderMap, clock: &dyn Clock, age: &Age) {
    let seconds = age.extrapolated(clock).whole_seconds().max(0);
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        headers.insert(http::header::AGE, value);
    }
}

/// Ensures the stored response carries a `Date` header, synthesizing one
/// from the receipt time when the origin omitted it (RFC 9110 §6.6.1).
pub(crate) fn fix_date_header(headers: &mut HeaderMap, received_at: OffsetDateTime) {
    let missing = match headers.get(DATE) {
        Some(value) => value.to_str().map(|v| v.trim().is_empty()).unwrap_or(true),
        None => true,
    };
    if missing && let Ok(value) = HeaderValue::from_str(&fmt_http_date(received_at)) {
        headers.insert(DATE, value);
    }
}

/// The synthetic `504 Gateway Timeout` returned for `only-if-cached`
/// requests that miss (RFC 9111 §5.2.1.7).
pub(crate) fn gateway_timeout_response() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    CacheStatus::Bypass.apply_to(headers);
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Parses an HTTP-date string; `None` when absent or malformed.
pub(crate) fn http_date(raw: &str) -> Option<OffsetDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    httpdate::parse_http_date(trimmed).ok().map(OffsetDateTime::from)
}

pub(crate) fn fmt_http_date(instant: OffsetDateTime) -> String {
    httpdate::fmt_http_date(SystemTime::from(instant))
}

pub(crate) fn date_header(headers: &HeaderMap) -> Option<OffsetDateTime> {
    headers.get(DATE).and_then(|v| v.to_str().ok()).and_then(http_date)
}

pub(crate) fn expires_header(headers: &HeaderMap) -> Option<OffsetDateTime> {
    headers.get(EXPIRES).and_then(|v| v.to_str().ok()).and_then(http_date)
}

pub(crate) fn last_modified_header(headers: &HeaderMap) -> Option<OffsetDateTime> {
    headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()).and_then(http_date)
}
