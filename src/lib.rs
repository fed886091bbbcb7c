//! cachet is a private (client-side) HTTP response cache that sits between
//! your HTTP client and its transport, caching responses according to
//! RFC 9111 with the RFC 5861 staleness extensions
//! (`stale-while-revalidate`, `stale-if-error`) and RFC 8246 `immutable`.
//!
//! The cache is transport-agnostic: it speaks `http::Request<Bytes>` /
//! `http::Response<Bytes>` and delegates network I/O to an [`Upstream`]
//! implementation. Responses are stored in a pluggable key-value backend
//! ([`CacheStore`]); an in-memory and a filesystem backend are bundled.
//!
//! ```no_run
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use cachet::{CacheTransport, MemoryStore, Upstream};
//! use http::{Request, Response};
//!
//! struct Client;
//!
//! #[async_trait]
//! impl Upstream for Client {
//!     async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>> {
//!         // hand the request to your HTTP client of choice
//!         # let _ = req;
//!         Ok(Response::new(Bytes::new()))
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let transport = CacheTransport::builder(MemoryStore::unbounded(), Client)
//!     .swr_timeout(std::time::Duration::from_secs(10))
//!     .build();
//! let request = Request::get("https://example.com/").body(Bytes::new())?;
//! let response = transport.round_trip(request).await?;
//! println!("{:?}", response.headers().get(cachet::CACHE_STATUS_HEADER));
//! # Ok(())
//! # }
//! ```
//!
//! Every response carries [`CACHE_STATUS_HEADER`] (`HIT`, `MISS`, `STALE`,
//! `REVALIDATED`, or `BYPASS`). The cache never fails a request for cache
//! reasons: backend and serialization problems are logged and degrade to
//! misses, and only upstream transport errors reach the caller.

mod admission;
pub mod directives;
pub mod entry;
pub mod freshness;
mod headers;
mod invalidator;
pub mod key;
pub mod normalize;
mod response_cache;
pub mod store;
mod storer;
mod transport;
mod validation;
pub mod vary;

pub use freshness::{Age, Clock, Freshness, SystemClock};
pub use headers::{CACHE_STATUS_HEADER, CACHE_STATUS_HEADER_LEGACY, CacheStatus};
pub use key::url_key;
pub use store::{CacheStore, DiskStore, MemoryStore, StoreError};
pub use transport::{Builder, CacheTransport, DEFAULT_SWR_TIMEOUT, Upstream};
