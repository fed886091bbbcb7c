//! Variant selection for content-negotiated responses (RFC 9111 §4.1).

use std::collections::BTreeMap;

use http::HeaderMap;

use crate::entry::ResponseRef;
use crate::normalize::normalize_header_value;

/// Resolves a response's `Vary` header against the storing request: each
/// listed field maps to the normalized value the request sent, or `""` when
/// the request omitted it. Field names are canonicalized to lowercase.
pub(crate) fn resolve_vary(vary: &str, req_headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut resolved = BTreeMap::new();
    for field in vary.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let canonical = field.to_ascii_lowercase();
        let value = req_headers
            .get(canonical.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| normalize_header_value(&canonical, v))
            .unwrap_or_default();
        resolved.insert(canonical, value);
    }
    resolved
}

/// Order-independent 64-bit hash over the resolved Vary map. The map is
/// already key-sorted, so hashing pairs in iteration order is stable.
fn vary_hash(resolved: &BTreeMap<String, String>) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for (field, value) in resolved {
        hasher.update(field.as_bytes());
        hasher.update(b"\0");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap_or_default())
}

/// Content-addressed entry key: `<url-key>#<hash>`, with an empty hash for
/// an empty map. The `#` suffix keeps entry keys disjoint from the
/// reference-list key, which is the bare URL key.
pub fn response_id(url_key: &str, resolved: &BTreeMap<String, String>) -> String {
    if resolved.is_empty() {
        format!("{url_key}#")
    } else {
        format!("{url_key}#{}", vary_hash(resolved))
    }
}

/// Sorts the references into preference order and returns the index of the
/// first one whose resolved Vary constraints the request satisfies.
///
/// Preference: `Vary: *` last, non-empty `Vary` before empty, older
/// `received_at` first so replacement lands deterministically. The sort
/// mutates `refs`; callers thread the returned index back to the storer
/// against this same ordering.
pub fn select_variant(refs: &mut [ResponseRef], req_headers: &HeaderMap) -> Option<usize> {
    refs.sort_by(|a, b| {
        let a_vary = a.vary.trim();
        let b_vary = b.vary.trim();
        let star = (a_vary == "*").cmp(&(b_vary == "*"));
        let no_vary = a_vary.is_empty().cmp(&b_vary.is_empty());
        star.then(no_vary).then(a.received_at.cmp(&b.received_at))
    });

    refs.iter()
        .position(|candidate| variant_matches(candidate, req_headers))
}

fn variant_matches(candidate: &ResponseRef, req_headers: &HeaderMap) -> bool {
    if candidate.vary.trim() == "*" {
        return false;
    }
    candidate.vary_resolved.iter().all(|(field, stored_value)| {
        req_headers
            .get(field.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|sent| normalize_header_value(field, sent) == *stored_value)
            .unwrap_or(false)
    })
}
