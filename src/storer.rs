//! Writes responses into the two-level reference/entry layout
//! (RFC 9111 §3.1).

use anyhow::Result;
use bytes::Bytes;
use http::{HeaderMap, Response};
use time::OffsetDateTime;

use crate::entry::{Entry, ResponseRef};
use crate::headers::{fix_date_header, remove_hop_by_hop};
use crate::response_cache::ResponseCache;
use crate::vary::{resolve_vary, response_id};

/// Persists `response` as the variant selected by the storing request's
/// headers, replacing the reference at `ref_index` when one matched, or the
/// reference with an identical resolved-Vary map, or appending otherwise.
///
/// Hop-by-hop fields are stripped from `response` in place, so the caller
/// forwards the same cleaned response it stored. Storing is a pure replace;
/// existing entries are never read.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn store_response(
    cache: &ResponseCache,
    req_headers: &HeaderMap,
    response: &mut Response<Bytes>,
    url_key: &str,
    mut refs: Vec<ResponseRef>,
    requested_at: OffsetDateTime,
    received_at: OffsetDateTime,
    ref_index: Option<usize>,
) -> Result<()> {
    remove_hop_by_hop(response.headers_mut());
    fix_date_header(response.headers_mut(), received_at);

    let vary = response
        .headers()
        .get(http::header::VARY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let vary_resolved = resolve_vary(&vary, req_headers);
    let id = response_id(url_key, &vary_resolved);

    let entry = Entry {
        id: id.clone(),
        status: response.status(),
        headers: response.headers().clone(),
        body: response.body().clone(),
        requested_at,
        received_at,
    };
    cache.set_entry(&entry).await?;

    let reference = ResponseRef {
        response_id: id,
        vary,
        vary_resolved,
        received_at: entry.date(),
    };

    let slot = ref_index
        .filter(|&i| i < refs.len())
        .or_else(|| refs.iter().position(|r| r.vary_resolved == reference.vary_resolved));
    match slot {
        Some(i) => refs[i] = reference,
        None => refs.push(reference),
    }

    cache.set_refs(url_key, &refs).await
}
