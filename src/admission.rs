//! Storage admission per RFC 9111 §3.

use http::header::{CONTENT_RANGE, EXPIRES, RANGE};
use http::{HeaderMap, Method, Request, StatusCode};

use crate::directives::{RequestDirectives, ResponseDirectives};

/// A request this cache knows how to satisfy: GET or HEAD without a range
/// selector (RFC 9111 §3).
pub(crate) fn is_method_understood<B>(req: &Request<B>) -> bool {
    (req.method() == Method::GET || req.method() == Method::HEAD)
        && !req.headers().contains_key(RANGE)
}

/// Methods whose successful invocation invalidates stored responses
/// (RFC 9111 §4.4).
pub(crate) fn is_unsafe_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE | Method::PATCH)
}

pub(crate) fn is_non_error_status(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// The error statuses `stale-if-error` applies to (RFC 5861 §4).
pub(crate) fn is_stale_error_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

/// Status codes this cache understands for storage and freshness decisions.
/// 206 is deliberately absent: range responses are never stored.
fn status_understood(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 203 | 300 | 301 | 304 | 404 | 405 | 410 | 414 | 501 | 308
    )
}

/// Status codes a cache may assign heuristic freshness to (RFC 9111 §4.2.2).
fn heuristically_cacheable(status: StatusCode) -> bool {
    status_understood(status) || status.as_u16() == 206
}

/// Decides whether a response may be written to the cache.
pub(crate) fn can_store_response(
    status: StatusCode,
    headers: &HeaderMap,
    req_directives: &RequestDirectives,
    res_directives: &ResponseDirectives,
) -> bool {
    if status.is_informational() || !status_understood(status) {
        return false;
    }
    // Partial content is refused outright, whatever the status code says.
    if headers.contains_key(CONTENT_RANGE) {
        return false;
    }
    if req_directives.no_store() || res_directives.no_store() {
        return false;
    }
    if !heuristically_cacheable(status)
        && !res_directives.max_age_present()
        && !headers.contains_key(EXPIRES)
        && !res_directives.must_understand()
    {
        return false;
    }
    true
}
