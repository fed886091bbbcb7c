//! Age and freshness lifetime calculation per RFC 9111 §4.2.

use std::fmt;

use http::HeaderMap;
use time::{Duration, OffsetDateTime};

use crate::directives::{RequestDirectives, ResponseDirectives};
use crate::headers::{date_header, expires_header, last_modified_header};

/// Time source for the cache. Swappable so freshness decisions are
/// deterministic under test.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;

    fn since(&self, earlier: OffsetDateTime) -> Duration {
        self.now() - earlier
    }
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A response's current age, captured at a known instant so later stages can
/// extrapolate forward instead of freezing "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Age {
    pub value: Duration,
    pub timestamp: OffsetDateTime,
}

impl Age {
    /// The age extrapolated to the clock's current instant.
    pub(crate) fn extrapolated(&self, clock: &dyn Clock) -> Duration {
        self.value + clock.since(self.timestamp)
    }
}

/// Result of evaluating a stored response against the request's and
/// response's freshness directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub is_stale: bool,
    pub age: Age,
    pub useful_life: Duration,
}

/// Current-age calculation per RFC 9111 §4.2.3.
pub(crate) fn current_age(
    clock: &dyn Clock,
    headers: &HeaderMap,
    date: OffsetDateTime,
    requested_at: OffsetDateTime,
    received_at: OffsetDateTime,
) -> Age {
    let apparent_age = (received_at - date).max(Duration::ZERO);
    let response_delay = received_at - requested_at;
    let age_header = headers
        .get(http::header::AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|secs| *secs >= 0)
        .map(Duration::seconds)
        .unwrap_or(Duration::ZERO);
    let corrected_initial_age = age_header.max(apparent_age) + response_delay;

    let now = clock.now();
    let resident_time = now - received_at;
    Age {
        value: corrected_initial_age + resident_time,
        timestamp: now,
    }
}

/// Nominal freshness lifetime per RFC 9111 §4.2.1, with the request
/// `max-age` capping whatever the response itself allows.
pub(crate) fn useful_life(
    headers: &HeaderMap,
    date: OffsetDateTime,
    req_directives: &RequestDirectives,
    res_directives: &ResponseDirectives,
) -> Duration {
    let response_life = if let Some(max_age) = res_directives.max_age() {
        max_age
    } else if let Some(expires) = expires_header(headers) {
        expires - date
    } else {
        heuristic_freshness(headers, date)
    };

    match req_directives.max_age() {
        Some(req_max_age) => req_max_age.min(response_life),
        None => response_life,
    }
}

/// Heuristic lifetime: a tenth of the Date/Last-Modified delta, zero when
/// Last-Modified is absent, invalid, or ahead of Date.
fn heuristic_freshness(headers: &HeaderMap, date: OffsetDateTime) -> Duration {
    match last_modified_header(headers) {
        Some(last_modified) if last_modified <= date => {
            Duration::seconds_f64((date - last_modified).as_seconds_f64() * 0.1)
        }
        _ => Duration::ZERO,
    }
}

/// Classifies the stored response as fresh or stale, applying the request's
/// `min-fresh` and `max-stale` adjustments.
pub(crate) fn evaluate(
    clock: &dyn Clock,
    headers: &HeaderMap,
    requested_at: OffsetDateTime,
    received_at: OffsetDateTime,
    req_directives: &RequestDirectives,
    res_directives: &ResponseDirectives,
) -> Freshness {
    let date = date_header(headers).unwrap_or(received_at);
    let age = current_age(clock, headers, date, requested_at, received_at);
    let life = useful_life(headers, date, req_directives, res_directives);

    let mut is_stale = age.value >= life;
    if let Some(min_fresh) = req_directives.min_fresh()
        && age.value + min_fresh >= life
    {
        is_stale = true;
    }
    if is_stale
        && let Some(budget) = req_directives.max_stale()
        && budget.permits(age.value - life)
    {
        is_stale = false;
    }

    Freshness {
        is_stale,
        age,
        useful_life: life,
    }
}
