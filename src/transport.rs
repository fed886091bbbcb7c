//! The cache decision engine: a caching round-tripper in front of an
//! arbitrary upstream transport.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::admission::{
    can_store_response, is_method_understood, is_non_error_status, is_unsafe_method,
};
use crate::directives::{NoCache, RequestDirectives, ResponseDirectives};
use crate::entry::{Entry, ResponseRef};
use crate::freshness::{self, Clock, Freshness, SystemClock};
use crate::headers::{
    CacheStatus, apply_conditional_headers, fix_date_header, gateway_timeout_response,
    set_age_header,
};
use crate::invalidator::invalidate;
use crate::key::{request_url, url_key};
use crate::response_cache::ResponseCache;
use crate::store::CacheStore;
use crate::storer::store_response;
use crate::validation::{RevalidationContext, handle_validation_response};
use crate::vary::select_variant;

/// Default deadline for background stale-while-revalidate refreshes.
pub const DEFAULT_SWR_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// The transport that actually talks to the network. Implementations must
/// preserve straight round-trip semantics; the cache layers on top.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>>;
}

/// A private (client-side) HTTP response cache per RFC 9111, with the
/// RFC 5861 staleness extensions and RFC 8246 `immutable`.
///
/// Cloning is cheap; clones share the same backend and upstream.
#[derive(Clone)]
pub struct CacheTransport {
    inner: Arc<Inner>,
}

struct Inner {
    cache: ResponseCache,
    upstream: Arc<dyn Upstream>,
    swr_timeout: StdDuration,
    clock: Arc<dyn Clock>,
}

/// Configures a [`CacheTransport`].
pub struct Builder {
    store: Arc<dyn CacheStore>,
    upstream: Arc<dyn Upstream>,
    swr_timeout: StdDuration,
    clock: Arc<dyn Clock>,
}

impl Builder {
    /// Deadline for background stale-while-revalidate refreshes. Zero
    /// restores the default.
    pub fn swr_timeout(mut self, timeout: StdDuration) -> Self {
        self.swr_timeout = if timeout.is_zero() {
            DEFAULT_SWR_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Substitute time source, mainly for tests.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> CacheTransport {
        CacheTransport {
            inner: Arc::new(Inner {
                cache: ResponseCache::new(self.store),
                upstream: self.upstream,
                swr_timeout: self.swr_timeout,
                clock: self.clock,
            }),
        }
    }
}

impl CacheTransport {
    pub fn builder(store: impl CacheStore, upstream: impl Upstream) -> Builder {
        Builder {
            store: Arc::new(store),
            upstream: Arc::new(upstream),
            swr_timeout: DEFAULT_SWR_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(store: impl CacheStore, upstream: impl Upstream) -> Self {
        Self::builder(store, upstream).build()
    }

    /// Performs one round trip, serving from cache, revalidating, or
    /// forwarding as RFC 9111 prescribes. Every response carries the
    /// cache-status header; only upstream failures surface as errors.
    pub async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>> {
        let url = match request_url(req.uri()) {
            Ok(url) => url,
            Err(err) => {
                debug!(error = %err, "request uri is not cacheable; bypassing");
                let mut resp = self.inner.upstream.round_trip(req).await?;
                CacheStatus::Bypass.apply_to(resp.headers_mut());
                return Ok(resp);
            }
        };
        let key = url_key(&url);

        if !is_method_understood(&req) {
            return self.handle_unrecognized_method(req, &url, &key).await;
        }

        let mut refs = match self.inner.cache.refs(&key).await {
            Ok(refs) => refs,
            Err(err) => {
                warn!(error = %err, key = %key, "failed to load cache references");
                Vec::new()
            }
        };

        let Some(idx) = select_variant(&mut refs, req.headers()) else {
            return self.handle_miss(req, key, refs, None).await;
        };

        match self.inner.cache.entry(&refs[idx].response_id).await {
            Ok(Some(entry)) => self.handle_hit(req, url, key, refs, idx, entry).await,
            Ok(None) => {
                debug!(key = %key, "referenced entry missing; treating as miss");
                self.handle_miss(req, key, refs, Some(idx)).await
            }
            Err(err) => {
                warn!(error = %err, key = %key, "failed to load cache entry; treating as miss");
                self.handle_miss(req, key, refs, Some(idx)).await
            }
        }
    }

    /// Methods the cache does not understand pass straight through; a
    /// successful unsafe method additionally invalidates the target URI and
    /// its Location peers.
    async fn handle_unrecognized_method(
        &self,
        req: Request<Bytes>,
        url: &Url,
        key: &str,
    ) -> Result<Response<Bytes>> {
        let unsafe_method = is_unsafe_method(req.method());
        let mut resp = self.inner.upstream.round_trip(req).await?;
        if unsafe_method && is_non_error_status(resp.status()) {
            let refs = self.inner.cache.refs(key).await.unwrap_or_default();
            invalidate(&self.inner.cache, url, resp.headers(), &refs, key).await;
        }
        CacheStatus::Bypass.apply_to(resp.headers_mut());
        Ok(resp)
    }

    async fn handle_miss(
        &self,
        req: Request<Bytes>,
        key: String,
        refs: Vec<ResponseRef>,
        ref_index: Option<usize>,
    ) -> Result<Response<Bytes>> {
        let req_directives = RequestDirectives::parse(req.headers());
        if req_directives.only_if_cached() {
            return Ok(gateway_timeout_response());
        }

        let requested_at = self.inner.clock.now();
        let mut resp = self.inner.upstream.round_trip(clone_request(&req)).await?;
        let received_at = self.inner.clock.now();
        fix_date_header(resp.headers_mut(), received_at);

        let res_directives = ResponseDirectives::parse(resp.headers());
        if can_store_response(resp.status(), resp.headers(), &req_directives, &res_directives) {
            if let Err(err) = store_response(
                &self.inner.cache,
                req.headers(),
                &mut resp,
                &key,
                refs,
                requested_at,
                received_at,
                ref_index,
            )
            .await
            {
                warn!(error = %err, key = %key, "failed to store response");
            }
        }
        CacheStatus::Miss.apply_to(resp.headers_mut());
        Ok(resp)
    }

    async fn handle_hit(
        &self,
        req: Request<Bytes>,
        url: Url,
        key: String,
        refs: Vec<ResponseRef>,
        ref_index: usize,
        entry: Entry,
    ) -> Result<Response<Bytes>> {
        let req_directives = RequestDirectives::parse(req.headers());
        let res_directives = ResponseDirectives::parse(&entry.headers);
        let freshness = freshness::evaluate(
            self.inner.clock.as_ref(),
            &entry.headers,
            entry.requested_at,
            entry.received_at,
            &req_directives,
            &res_directives,
        );
        let no_cache = res_directives.no_cache();
        let unqualified_no_cache = matches!(no_cache, Some(NoCache::Unqualified));

        // RFC 8246: a fresh immutable response skips revalidation outright
        // unless the request says no-cache.
        if !freshness.is_stale && res_directives.immutable() && !req_directives.no_cache() {
            return Ok(self.serve_from_cache(&entry, &freshness, no_cache.as_ref()));
        }

        let revalidation_forced = (freshness.is_stale && res_directives.must_revalidate())
            || unqualified_no_cache;
        if !revalidation_forced {
            if req_directives.only_if_cached()
                || (!freshness.is_stale && !req_directives.no_cache())
            {
                return Ok(self.serve_from_cache(&entry, &freshness, no_cache.as_ref()));
            }

            if freshness.is_stale
                && let Some(window) = res_directives.stale_while_revalidate()
            {
                let stale_for =
                    freshness.age.extrapolated(self.inner.clock.as_ref()) - freshness.useful_life;
                if stale_for >= Duration::ZERO && stale_for < window {
                    return Ok(self.serve_stale_while_revalidating(
                        &req,
                        url,
                        key,
                        refs,
                        ref_index,
                        entry,
                        freshness,
                        req_directives,
                    ));
                }
            }
        }

        let mut cond_req = clone_request(&req);
        apply_conditional_headers(cond_req.headers_mut(), &entry.headers);
        let pending = PendingRevalidation {
            url,
            url_key: key,
            req_directives,
            entry,
            refs,
            ref_index: Some(ref_index),
            freshness,
        };
        self.inner.revalidate(cond_req, pending).await
    }

    fn serve_from_cache(
        &self,
        entry: &Entry,
        freshness: &Freshness,
        no_cache: Option<&NoCache>,
    ) -> Response<Bytes> {
        let mut resp = entry.to_response();
        if let Some(NoCache::Qualified(fields)) = no_cache {
            // Qualified no-cache: serve without the named fields. The entry
            // is this request's own copy, so stripping cannot race.
            for field in fields {
                resp.headers_mut().remove(field.as_str());
            }
        }
        set_age_header(resp.headers_mut(), self.inner.clock.as_ref(), &freshness.age);
        CacheStatus::Hit.apply_to(resp.headers_mut());
        resp
    }

    /// RFC 5861 §3: serve the stale response now and refresh it from a
    /// fire-and-forget task with its own deadline. The task never blocks
    /// the caller and its failures are only logged.
    #[allow(clippy::too_many_arguments)]
    fn serve_stale_while_revalidating(
        &self,
        req: &Request<Bytes>,
        url: Url,
        key: String,
        refs: Vec<ResponseRef>,
        ref_index: usize,
        entry: Entry,
        freshness: Freshness,
        req_directives: RequestDirectives,
    ) -> Response<Bytes> {
        let mut cond_req = clone_request(req);
        apply_conditional_headers(cond_req.headers_mut(), &entry.headers);

        let mut served = entry.to_response();
        set_age_header(served.headers_mut(), self.inner.clock.as_ref(), &freshness.age);
        CacheStatus::Stale.apply_to(served.headers_mut());

        let pending = PendingRevalidation {
            url,
            url_key: key,
            req_directives,
            entry,
            refs,
            ref_index: Some(ref_index),
            freshness,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let deadline = inner.swr_timeout;
            debug!(key = %pending.url_key, "background revalidation started");
            match tokio::time::timeout(deadline, inner.revalidate(cond_req, pending)).await {
                Err(_) => debug!("background revalidation timed out"),
                Ok(Err(err)) => warn!(error = %err, "background revalidation failed"),
                Ok(Ok(_)) => debug!("background revalidation complete"),
            }
        });

        served
    }
}

struct PendingRevalidation {
    url: Url,
    url_key: String,
    req_directives: RequestDirectives,
    entry: Entry,
    refs: Vec<ResponseRef>,
    ref_index: Option<usize>,
    freshness: Freshness,
}

impl Inner {
    async fn revalidate(
        &self,
        cond_req: Request<Bytes>,
        pending: PendingRevalidation,
    ) -> Result<Response<Bytes>> {
        let requested_at = self.clock.now();
        let result = self.upstream.round_trip(clone_request(&cond_req)).await;
        let received_at = self.clock.now();

        let ctx = RevalidationContext {
            url_key: pending.url_key,
            requested_at,
            received_at,
            req_directives: pending.req_directives,
            entry: pending.entry,
            refs: pending.refs,
            ref_index: pending.ref_index,
            freshness: pending.freshness,
        };
        handle_validation_response(
            &self.cache,
            self.clock.as_ref(),
            ctx,
            &cond_req,
            &pending.url,
            result,
        )
        .await
    }
}

/// `http::Request` is not `Clone`; rebuild it field by field. Bodies are
/// `Bytes`, so this is cheap. Extensions do not carry over.
pub(crate) fn clone_request(req: &Request<Bytes>) -> Request<Bytes> {
    let mut clone = Request::new(req.body().clone());
    *clone.method_mut() = req.method().clone();
    *clone.uri_mut() = req.uri().clone();
    *clone.version_mut() = req.version();
    *clone.headers_mut() = req.headers().clone();
    clone
}
