//! Cache invalidation after unsafe-method success (RFC 9111 §4.4).

use std::collections::HashSet;

use http::HeaderMap;
use http::header::{CONTENT_LOCATION, LOCATION};
use tracing::{debug, trace};
use url::Url;

use crate::entry::ResponseRef;
use crate::key::{same_origin, url_key};
use crate::response_cache::ResponseCache;

/// Deletes every variant of the request URI, plus the variants of any
/// same-origin `Location`/`Content-Location` target, then the reference
/// lists themselves. Deletions are idempotent and best-effort.
pub(crate) async fn invalidate(
    cache: &ResponseCache,
    req_url: &Url,
    resp_headers: &HeaderMap,
    refs: &[ResponseRef],
    key: &str,
) {
    let mut deleted: HashSet<String> = HashSet::new();
    for reference in refs {
        delete_once(cache, &mut deleted, &reference.response_id).await;
    }

    for header in [LOCATION, CONTENT_LOCATION] {
        let Some(raw) = resp_headers.get(&header).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let Ok(target) = req_url.join(raw) else {
            debug!(location = raw, "ignoring unparsable location header");
            continue;
        };
        if !same_origin(req_url, &target) {
            trace!(location = %target, "skipping cross-origin invalidation");
            continue;
        }
        let target_key = url_key(&target);
        let target_refs = cache.refs(&target_key).await.unwrap_or_default();
        for reference in &target_refs {
            delete_once(cache, &mut deleted, &reference.response_id).await;
        }
        delete_once(cache, &mut deleted, &target_key).await;
    }

    delete_once(cache, &mut deleted, key).await;
}

async fn delete_once(cache: &ResponseCache, deleted: &mut HashSet<String>, key: &str) {
    if deleted.insert(key.to_string()) {
        cache.delete(key).await;
    }
}
