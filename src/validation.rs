//! Handling of responses to conditional revalidation requests
//! (RFC 9111 §4.3.3, §4.3.4) and the stale-if-error policy (RFC 5861 §4).

use anyhow::Result;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use time::OffsetDateTime;
use tracing::warn;
use url::Url;

use crate::admission::{
    can_store_response, is_non_error_status, is_stale_error_status, is_unsafe_method,
};
use crate::directives::{RequestDirectives, ResponseDirectives};
use crate::entry::{Entry, ResponseRef};
use crate::freshness::{Clock, Freshness};
use crate::headers::{
    CacheStatus, fix_date_header, set_age_header, update_stored_headers,
};
use crate::invalidator::invalidate;
use crate::response_cache::ResponseCache;
use crate::storer::store_response;

/// Everything the handler needs to know about the revalidation it is
/// finishing: the stored entry, its reference list and matched slot, the
/// freshness verdict that triggered revalidation, and the upstream timing.
pub(crate) struct RevalidationContext {
    pub url_key: String,
    pub requested_at: OffsetDateTime,
    pub received_at: OffsetDateTime,
    pub req_directives: RequestDirectives,
    pub entry: Entry,
    pub refs: Vec<ResponseRef>,
    pub ref_index: Option<usize>,
    pub freshness: Freshness,
}

/// RFC 5861 §4: a stale response may stand in for an error when either the
/// stored response or the request carries `stale-if-error` and the response
/// has not been stale longer than the allowance.
fn stale_if_error_permits(
    clock: &dyn Clock,
    freshness: &Freshness,
    req_directives: &RequestDirectives,
    stored_directives: &ResponseDirectives,
) -> bool {
    let stale_for = freshness.age.extrapolated(clock) - freshness.useful_life;
    stored_directives
        .stale_if_error()
        .into_iter()
        .chain(req_directives.stale_if_error())
        .any(|budget| budget.permits(stale_for))
}

/// Dispatches the outcome of a conditional request. First match wins:
/// a GET 304 freshens and serves the stored response; an error (transport
/// or 5xx) falls back to the stored response when stale-if-error permits;
/// remaining transport errors propagate; a storable response replaces the
/// variant; anything else bypasses, invalidating first when an unsafe
/// method succeeded.
pub(crate) async fn handle_validation_response(
    cache: &ResponseCache,
    clock: &dyn Clock,
    ctx: RevalidationContext,
    req: &Request<Bytes>,
    req_url: &Url,
    result: Result<Response<Bytes>>,
) -> Result<Response<Bytes>> {
    let mut ctx = ctx;
    let method = req.method();

    if let Ok(resp) = &result
        && *method == Method::GET
        && resp.status() == StatusCode::NOT_MODIFIED
    {
        update_stored_headers(&mut ctx.entry.headers, resp.headers());
        ctx.entry.requested_at = ctx.requested_at;
        ctx.entry.received_at = ctx.received_at;
        if let Err(err) = cache.set_entry(&ctx.entry).await {
            warn!(error = %err, key = %ctx.url_key, "failed to persist freshened entry");
        }
        let mut served = ctx.entry.to_response();
        CacheStatus::Revalidated.apply_to(served.headers_mut());
        return Ok(served);
    }

    let error_like = match &result {
        Err(_) => true,
        Ok(resp) => is_stale_error_status(resp.status()),
    };
    if error_like
        && *method == Method::GET
        && stale_if_error_permits(
            clock,
            &ctx.freshness,
            &ctx.req_directives,
            &ResponseDirectives::parse(&ctx.entry.headers),
        )
    {
        let mut served = ctx.entry.to_response();
        set_age_header(served.headers_mut(), clock, &ctx.freshness.age);
        CacheStatus::Stale.apply_to(served.headers_mut());
        return Ok(served);
    }

    let mut resp = result?;
    fix_date_header(resp.headers_mut(), ctx.received_at);

    let res_directives = ResponseDirectives::parse(resp.headers());
    if can_store_response(resp.status(), resp.headers(), &ctx.req_directives, &res_directives) {
        if let Err(err) = store_response(
            cache,
            req.headers(),
            &mut resp,
            &ctx.url_key,
            ctx.refs,
            ctx.requested_at,
            ctx.received_at,
            ctx.ref_index,
        )
        .await
        {
            warn!(error = %err, key = %ctx.url_key, "failed to store revalidated response");
        }
        CacheStatus::Miss.apply_to(resp.headers_mut());
        return Ok(resp);
    }

    if is_unsafe_method(method) && is_non_error_status(resp.status()) {
        invalidate(cache, req_url, resp.headers(), &ctx.refs, &ctx.url_key).await;
    }
    CacheStatus::Bypass.apply_to(resp.headers_mut());
    Ok(resp)
}
