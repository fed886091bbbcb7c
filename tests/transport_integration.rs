mod support;

use std::time::{Duration as StdDuration, Instant};

use anyhow::Result;
use cachet::{CACHE_STATUS_HEADER_LEGACY, CacheTransport, MemoryStore};
use http::Method;
use time::Duration;

use support::*;

fn transport(upstream: &MockUpstream, clock: &TestClock) -> CacheTransport {
    CacheTransport::builder(MemoryStore::unbounded(), upstream.clone())
        .clock(clock.clone())
        .build()
}

#[tokio::test]
async fn miss_then_hit_serves_from_cache_with_age() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(200, &[("cache-control", "max-age=60")], "x");
    let transport = transport(&upstream, &clock);

    let first = transport.round_trip(get("https://example.com/a")).await?;
    assert_eq!(status_of(&first), "MISS");
    assert_eq!(first.body().as_ref(), b"x");
    assert_eq!(upstream.calls(), 1);

    clock.advance(Duration::seconds(10));
    let second = transport.round_trip(get("https://example.com/a")).await?;
    assert_eq!(status_of(&second), "HIT");
    assert_eq!(second.body().as_ref(), b"x");
    assert_eq!(second.headers().get("age").unwrap(), "10");
    assert_eq!(second.headers().get(CACHE_STATUS_HEADER_LEGACY).unwrap(), "1");
    assert_eq!(upstream.calls(), 1, "hit must not consult the upstream");
    Ok(())
}

#[tokio::test]
async fn vary_negotiation_keeps_one_variant_per_language() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|_, req| {
        let lang = req
            .headers()
            .get("accept-language")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let body = if lang.starts_with("en") { "EN" } else { "FR" };
        Ok(response(
            200,
            &[("cache-control", "max-age=60"), ("vary", "Accept-Language")],
            body,
        ))
    });
    let transport = transport(&upstream, &clock);
    let uri = "https://example.com/v";

    let en = transport
        .round_trip(request(Method::GET, uri, &[("accept-language", "en-us")]))
        .await?;
    assert_eq!(status_of(&en), "MISS");
    assert_eq!(en.body().as_ref(), b"EN");

    let fr = transport
        .round_trip(request(Method::GET, uri, &[("accept-language", "fr-fr")]))
        .await?;
    assert_eq!(status_of(&fr), "MISS");
    assert_eq!(fr.body().as_ref(), b"FR");
    assert_eq!(upstream.calls(), 2);

    let en_again = transport
        .round_trip(request(Method::GET, uri, &[("accept-language", "en-us")]))
        .await?;
    assert_eq!(status_of(&en_again), "HIT");
    assert_eq!(en_again.body().as_ref(), b"EN");
    assert_eq!(upstream.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn revalidation_304_serves_stored_body_with_updated_headers() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|call, _| {
        if call == 0 {
            Ok(response(
                200,
                &[("cache-control", "max-age=0"), ("etag", "\"abc\"")],
                "cached-body",
            ))
        } else {
            Ok(response(304, &[("x-refreshed", "yes")], ""))
        }
    });
    let transport = transport(&upstream, &clock);
    let uri = "https://example.com/reval";

    let first = transport.round_trip(get(uri)).await?;
    assert_eq!(status_of(&first), "MISS");

    clock.advance(Duration::seconds(1));
    let second = transport.round_trip(get(uri)).await?;
    assert_eq!(status_of(&second), "REVALIDATED");
    assert_eq!(second.status(), 200);
    assert_eq!(second.body().as_ref(), b"cached-body");
    assert_eq!(second.headers().get("x-refreshed").unwrap(), "yes");
    assert_eq!(second.headers().get("etag").unwrap(), "\"abc\"");

    let (_, headers) = upstream.request(1);
    assert_eq!(headers.get("if-none-match").unwrap(), "\"abc\"");
    Ok(())
}

#[tokio::test]
async fn stale_while_revalidate_serves_immediately_and_refreshes_in_background() -> Result<()> {
    let clock = TestClock::start();
    let upstream_delay = StdDuration::from_millis(80);
    let upstream = MockUpstream::respond_with(|call, _| {
        if call == 0 {
            Ok(response(
                200,
                &[
                    ("cache-control", "max-age=0, stale-while-revalidate=15"),
                    ("etag", "\"v1\""),
                ],
                "swr-body",
            ))
        } else {
            Ok(response(304, &[], ""))
        }
    })
    .with_delay(upstream_delay);
    let transport = transport(&upstream, &clock);
    let uri = "https://example.com/swr";

    let first = transport.round_trip(get(uri)).await?;
    assert_eq!(status_of(&first), "MISS");
    assert_eq!(upstream.calls(), 1);

    clock.advance(Duration::seconds(5));
    let started = Instant::now();
    let second = transport.round_trip(get(uri)).await?;
    let foreground_latency = started.elapsed();

    assert_eq!(status_of(&second), "STALE");
    assert_eq!(second.body().as_ref(), b"swr-body");
    assert!(
        foreground_latency < upstream_delay,
        "stale response must not wait for the upstream ({foreground_latency:?})"
    );

    upstream.wait_for_calls(2).await;
    let (method, headers) = upstream.request(1);
    assert_eq!(method, Method::GET);
    assert_eq!(headers.get("if-none-match").unwrap(), "\"v1\"");
    Ok(())
}

#[tokio::test]
async fn stale_if_error_serves_stored_response_on_5xx() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|call, _| {
        if call == 0 {
            Ok(response(
                200,
                &[("cache-control", "max-age=0, stale-if-error=60")],
                "still-good",
            ))
        } else {
            Ok(response(503, &[], "origin down"))
        }
    });
    let transport = transport(&upstream, &clock);
    let uri = "https://example.com/sie";

    let first = transport.round_trip(get(uri)).await?;
    assert_eq!(status_of(&first), "MISS");

    clock.advance(Duration::seconds(3));
    let second = transport.round_trip(get(uri)).await?;
    assert_eq!(status_of(&second), "STALE");
    assert_eq!(second.status(), 200);
    assert_eq!(second.body().as_ref(), b"still-good");
    assert_eq!(second.headers().get("age").unwrap(), "3");
    assert_eq!(upstream.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn stale_if_error_also_covers_transport_errors() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|call, _| {
        if call == 0 {
            Ok(response(
                200,
                &[("cache-control", "max-age=0, stale-if-error=60")],
                "survivor",
            ))
        } else {
            Err(anyhow::anyhow!("connection reset"))
        }
    });
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/err")).await?;
    clock.advance(Duration::seconds(1));
    let second = transport.round_trip(get("https://example.com/err")).await?;
    assert_eq!(status_of(&second), "STALE");
    assert_eq!(second.body().as_ref(), b"survivor");
    Ok(())
}

#[tokio::test]
async fn unsafe_method_success_invalidates_url_and_location() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|_, req| {
        if req.method() == Method::POST {
            Ok(response(201, &[("location", "/resource/1")], "created"))
        } else {
            Ok(response(200, &[("cache-control", "max-age=60")], req.uri().path()))
        }
    });
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/resource")).await?;
    transport.round_trip(get("https://example.com/resource/1")).await?;
    assert_eq!(upstream.calls(), 2);
    // Both are now cached.
    let hit = transport.round_trip(get("https://example.com/resource")).await?;
    assert_eq!(status_of(&hit), "HIT");
    assert_eq!(upstream.calls(), 2);

    let post = transport
        .round_trip(request(Method::POST, "https://example.com/resource", &[]))
        .await?;
    assert_eq!(status_of(&post), "BYPASS");
    assert_eq!(upstream.calls(), 3);

    let after = transport.round_trip(get("https://example.com/resource")).await?;
    assert_eq!(status_of(&after), "MISS");
    let peer = transport.round_trip(get("https://example.com/resource/1")).await?;
    assert_eq!(status_of(&peer), "MISS");
    assert_eq!(upstream.calls(), 5);
    Ok(())
}

#[tokio::test]
async fn unsafe_method_error_does_not_invalidate() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|_, req| {
        if req.method() == Method::DELETE {
            Ok(response(500, &[], "boom"))
        } else {
            Ok(response(200, &[("cache-control", "max-age=60")], "kept"))
        }
    });
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/keep")).await?;
    let delete = transport
        .round_trip(request(Method::DELETE, "https://example.com/keep", &[]))
        .await?;
    assert_eq!(status_of(&delete), "BYPASS");

    let still_cached = transport.round_trip(get("https://example.com/keep")).await?;
    assert_eq!(status_of(&still_cached), "HIT");
    Ok(())
}

#[tokio::test]
async fn only_if_cached_miss_synthesizes_504() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::failing();
    let transport = transport(&upstream, &clock);

    let resp = transport
        .round_trip(request(
            Method::GET,
            "https://example.com/nope",
            &[("cache-control", "only-if-cached")],
        ))
        .await?;
    assert_eq!(resp.status(), 504);
    assert_eq!(status_of(&resp), "BYPASS");
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(resp.headers().get("content-length").unwrap(), "0");
    assert_eq!(resp.headers().get("connection").unwrap(), "close");
    assert_eq!(upstream.calls(), 0, "504 must be synthesized without I/O");
    Ok(())
}

#[tokio::test]
async fn only_if_cached_serves_even_stale_entries() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(200, &[("cache-control", "max-age=1")], "old");
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/oic")).await?;
    clock.advance(Duration::seconds(30));
    let resp = transport
        .round_trip(request(
            Method::GET,
            "https://example.com/oic",
            &[("cache-control", "only-if-cached")],
        ))
        .await?;
    assert_eq!(status_of(&resp), "HIT");
    assert_eq!(resp.body().as_ref(), b"old");
    assert_eq!(upstream.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn request_no_store_is_never_written() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(200, &[("cache-control", "max-age=60")], "x");
    let transport = transport(&upstream, &clock);

    let req = || request(Method::GET, "https://example.com/ns", &[("cache-control", "no-store")]);
    let first = transport.round_trip(req()).await?;
    assert_eq!(status_of(&first), "MISS");
    let second = transport.round_trip(req()).await?;
    assert_eq!(status_of(&second), "MISS");
    assert_eq!(upstream.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn qualified_no_cache_strips_named_fields_on_hit() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(
        200,
        &[
            ("cache-control", "max-age=60, no-cache=\"x-private\""),
            ("x-private", "secret"),
            ("x-public", "ok"),
        ],
        "body",
    );
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/qnc")).await?;
    let hit = transport.round_trip(get("https://example.com/qnc")).await?;
    assert_eq!(status_of(&hit), "HIT");
    assert!(hit.headers().get("x-private").is_none());
    assert_eq!(hit.headers().get("x-public").unwrap(), "ok");
    Ok(())
}

#[tokio::test]
async fn unqualified_no_cache_forces_revalidation() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::respond_with(|call, _| {
        if call == 0 {
            Ok(response(
                200,
                &[("cache-control", "no-cache, max-age=60"), ("etag", "\"e\"")],
                "validated",
            ))
        } else {
            Ok(response(304, &[], ""))
        }
    });
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/unc")).await?;
    let second = transport.round_trip(get("https://example.com/unc")).await?;
    assert_eq!(status_of(&second), "REVALIDATED");
    assert_eq!(upstream.calls(), 2, "fresh entry must still revalidate");
    Ok(())
}

#[tokio::test]
async fn immutable_serves_fresh_entries_despite_unqualified_no_cache() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(
        200,
        &[("cache-control", "max-age=60, no-cache, immutable")],
        "pinned",
    );
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/pin")).await?;
    let hit = transport.round_trip(get("https://example.com/pin")).await?;
    assert_eq!(status_of(&hit), "HIT");
    assert_eq!(upstream.calls(), 1, "immutable overrides no-cache while fresh");
    Ok(())
}

#[tokio::test]
async fn immutable_only_short_circuits_while_fresh() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(
        200,
        &[("cache-control", "max-age=60, immutable"), ("etag", "\"i\"")],
        "immutable-body",
    );
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/imm")).await?;
    let reload = transport
        .round_trip(request(
            Method::GET,
            "https://example.com/imm",
            &[("cache-control", "max-age=0")],
        ))
        .await?;
    // Request max-age=0 marks it stale, but a plain reload without no-cache
    // still revalidates; immutable only short-circuits while fresh.
    assert_eq!(upstream.calls(), 2);
    assert_eq!(status_of(&reload), "MISS");
    Ok(())
}

#[tokio::test]
async fn vary_star_is_stored_but_never_selected() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(
        200,
        &[("cache-control", "max-age=60"), ("vary", "*")],
        "uncacheable-variant",
    );
    let transport = transport(&upstream, &clock);

    for _ in 0..3 {
        let resp = transport.round_trip(get("https://example.com/star")).await?;
        assert_eq!(status_of(&resp), "MISS");
    }
    assert_eq!(upstream.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn age_header_is_monotonic_for_a_fixed_entry() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(200, &[("cache-control", "max-age=600")], "x");
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/mono")).await?;
    let mut last_age = 0i64;
    for advance in [5, 7, 0, 13] {
        clock.advance(Duration::seconds(advance));
        let resp = transport.round_trip(get("https://example.com/mono")).await?;
        let age: i64 = resp.headers().get("age").unwrap().to_str()?.parse()?;
        assert!(age >= last_age, "age went backwards: {last_age} -> {age}");
        last_age = age;
    }
    Ok(())
}

#[tokio::test]
async fn upstream_errors_propagate_when_nothing_is_stored() {
    let clock = TestClock::start();
    let upstream = MockUpstream::failing();
    let transport = transport(&upstream, &clock);

    let err = transport
        .round_trip(get("https://example.com/down"))
        .await
        .expect_err("no cached fallback exists");
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn range_requests_bypass_the_cache() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(200, &[("cache-control", "max-age=60")], "full");
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/r")).await?;
    let ranged = transport
        .round_trip(request(
            Method::GET,
            "https://example.com/r",
            &[("range", "bytes=0-1")],
        ))
        .await?;
    assert_eq!(status_of(&ranged), "BYPASS");
    assert_eq!(upstream.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn hop_by_hop_headers_never_reach_the_stored_response() -> Result<()> {
    let clock = TestClock::start();
    let upstream = MockUpstream::always(
        200,
        &[
            ("cache-control", "max-age=60"),
            ("connection", "x-conn-token"),
            ("x-conn-token", "abc"),
            ("keep-alive", "timeout=5"),
        ],
        "clean",
    );
    let transport = transport(&upstream, &clock);

    transport.round_trip(get("https://example.com/hop")).await?;
    let hit = transport.round_trip(get("https://example.com/hop")).await?;
    assert_eq!(status_of(&hit), "HIT");
    assert!(hit.headers().get("connection").is_none());
    assert!(hit.headers().get("x-conn-token").is_none());
    assert!(hit.headers().get("keep-alive").is_none());
    Ok(())
}
