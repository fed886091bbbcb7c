use anyhow::{Context, Result};
use http::Uri;
use url::Url;

/// Builds the primary cache key for a request URI per RFC 9111 §4.1.
///
/// The key is `scheme://host[:port]path[?query]` with the scheme and host
/// lowercased, the port omitted when it equals the scheme default, dot
/// segments removed, and the fragment dropped. Percent escapes of unreserved
/// characters are decoded; all other escapes keep their `%` form with the
/// hex digits uppercased. Opaque URIs (e.g. `mailto:`) reduce to the
/// lowercased opaque part.
pub fn url_key(url: &Url) -> String {
    if url.cannot_be_a_base() {
        return url.path().to_ascii_lowercase();
    }

    let mut key = String::with_capacity(url.as_str().len());
    key.push_str(url.scheme());
    key.push_str("://");
    key.push_str(url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key.push_str(&normalize_escapes(url.path()));
    if let Some(query) = url.query()
        && !query.is_empty()
    {
        key.push('?');
        key.push_str(&normalize_escapes(query));
    }
    key
}

/// Parses the request URI into a [`Url`], which also performs the RFC 3986
/// normalization (dot-segment removal, default-port stripping) the keyer
/// relies on.
pub(crate) fn request_url(uri: &Uri) -> Result<Url> {
    Url::parse(&uri.to_string()).with_context(|| format!("request uri {uri} is not a valid URL"))
}

/// Reports whether two URLs share scheme, host, and (default-resolved) port.
pub(crate) fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme().eq_ignore_ascii_case(b.scheme())
        && match (a.host_str(), b.host_str()) {
            (Some(ah), Some(bh)) => ah.eq_ignore_ascii_case(bh),
            (None, None) => true,
            _ => false,
        }
        && a.port_or_known_default() == b.port_or_known_default()
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn normalize_escapes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]))
        {
            let decoded = hi << 4 | lo;
            if is_unreserved(decoded) {
                out.push(decoded as char);
            } else {
                out.push('%');
                out.push(bytes[i + 1].to_ascii_uppercase() as char);
                out.push(bytes[i + 2].to_ascii_uppercase() as char);
            }
            i += 3;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}
