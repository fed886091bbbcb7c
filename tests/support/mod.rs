//! Shared fixtures for the integration tests: a scriptable upstream and an
//! adjustable clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use cachet::{Clock, Upstream};
use http::{HeaderValue, Method, Request, Response};
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// Clock the tests wind forward by hand.
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl TestClock {
    pub fn start_at(now: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn start() -> Self {
        Self::start_at(time::macros::datetime!(2024-06-01 12:00 UTC))
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

type Responder = dyn Fn(usize, &Request<Bytes>) -> Result<Response<Bytes>> + Send + Sync;

/// Scriptable upstream transport that records every request it sees.
#[derive(Clone)]
pub struct MockUpstream {
    state: Arc<UpstreamState>,
}

struct UpstreamState {
    responder: Box<Responder>,
    delay: Option<StdDuration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(Method, http::HeaderMap)>>,
}

impl MockUpstream {
    pub fn respond_with(
        responder: impl Fn(usize, &Request<Bytes>) -> Result<Response<Bytes>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(UpstreamState {
                responder: Box::new(responder),
                delay: None,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Same upstream response on every call.
    pub fn always(status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        let template = (
            status,
            headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect::<Vec<_>>(),
            body.to_string(),
        );
        Self::respond_with(move |_, _| {
            let pairs: Vec<(&str, &str)> = template
                .1
                .iter()
                .map(|(n, v)| (n.as_str(), v.as_str()))
                .collect();
            Ok(response(template.0, &pairs, &template.2))
        })
    }

    /// Always fails with a transport error.
    pub fn failing() -> Self {
        Self::respond_with(|_, _| Err(anyhow!("connection refused")))
    }

    pub fn with_delay(mut self, delay: StdDuration) -> Self {
        let state = Arc::get_mut(&mut self.state).expect("set delay before sharing");
        state.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Method and headers of the `i`-th upstream request.
    pub fn request(&self, i: usize) -> (Method, http::HeaderMap) {
        self.state.requests.lock()[i].clone()
    }

    /// Polls until the upstream has served at least `count` calls.
    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..200 {
            if self.calls() >= count {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("upstream never reached {count} calls (got {})", self.calls());
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>> {
        if let Some(delay) = self.state.delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .requests
            .lock()
            .push((req.method().clone(), req.headers().clone()));
        let call = self.state.calls.fetch_add(1, Ordering::SeqCst);
        (self.state.responder)(call, &req)
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(body.to_string()));
    *response.status_mut() = http::StatusCode::from_u16(status).expect("test status");
    for (name, value) in headers {
        response.headers_mut().append(
            http::header::HeaderName::try_from(*name).expect("test header name"),
            HeaderValue::try_from(*value).expect("test header value"),
        );
    }
    response
}

pub fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> Request<Bytes> {
    let mut request = Request::new(Bytes::new());
    *request.method_mut() = method;
    *request.uri_mut() = uri.parse().expect("test uri");
    for (name, value) in headers {
        request.headers_mut().append(
            http::header::HeaderName::try_from(*name).expect("test header name"),
            HeaderValue::try_from(*value).expect("test header value"),
        );
    }
    request
}

pub fn get(uri: &str) -> Request<Bytes> {
    request(Method::GET, uri, &[])
}

pub fn status_of(response: &Response<Bytes>) -> &str {
    response
        .headers()
        .get(cachet::CACHE_STATUS_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<unset>")
}
