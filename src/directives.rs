//! Cache-Control parsing per RFC 9111 §5.2.
//!
//! The tokenizer splits on unquoted commas only, so a directive argument such
//! as `no-cache="Set-Cookie, WWW-Authenticate"` stays in one piece. Directive
//! names are lowercased; arguments are kept raw and interpreted lazily by the
//! typed accessors (quoted-string stripping, delta-seconds parsing). Invalid
//! arguments make the directive read as absent.

use std::collections::HashMap;

use http::HeaderMap;
use http::header::CACHE_CONTROL;
use thiserror::Error;
use time::Duration;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotedStringError {
    #[error("not a quoted string")]
    NotQuoted,
    #[error("unfinished escape sequence")]
    UnfinishedEscape,
    #[error("invalid character in quoted string")]
    InvalidCharacter,
}

/// A staleness allowance from `max-stale` or `stale-if-error`. An empty
/// argument means the client accepts any amount of staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StaleBudget {
    Unbounded,
    Bounded(Duration),
}

impl StaleBudget {
    pub(crate) fn permits(self, stale_for: Duration) -> bool {
        match self {
            StaleBudget::Unbounded => true,
            StaleBudget::Bounded(limit) => stale_for <= limit,
        }
    }
}

/// The `no-cache` response directive, either the bare token or the qualified
/// form carrying a quoted CSV of header field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NoCache {
    Unqualified,
    Qualified(Vec<String>),
}

#[derive(Debug, Clone, Default)]
struct Directives(HashMap<String, String>);

impl Directives {
    fn parse(headers: &HeaderMap) -> Self {
        let mut map = HashMap::new();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(raw) = value.to_str() else { continue };
            for part in split_unquoted_commas(raw) {
                let (name, argument) = match part.split_once('=') {
                    Some((name, argument)) => (name.trim(), argument.trim()),
                    None => (part.trim(), ""),
                };
                if name.is_empty() {
                    continue;
                }
                map.insert(name.to_ascii_lowercase(), argument.to_string());
            }
        }
        Self(map)
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn argument(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn duration(&self, name: &str) -> Option<Duration> {
        delta_seconds(self.argument(name)?)
    }

    fn stale_budget(&self, name: &str) -> Option<StaleBudget> {
        let raw = self.argument(name)?;
        if raw.is_empty() {
            return Some(StaleBudget::Unbounded);
        }
        delta_seconds(raw).map(StaleBudget::Bounded)
    }
}

/// Request directives from the `Cache-Control` header field.
#[derive(Debug, Clone, Default)]
pub struct RequestDirectives(Directives);

impl RequestDirectives {
    pub fn parse(headers: &HeaderMap) -> Self {
        Self(Directives::parse(headers))
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.0.duration("max-age")
    }

    pub fn min_fresh(&self) -> Option<Duration> {
        self.0.duration("min-fresh")
    }

    pub(crate) fn max_stale(&self) -> Option<StaleBudget> {
        self.0.stale_budget("max-stale")
    }

    pub fn no_cache(&self) -> bool {
        self.0.has("no-cache")
    }

    pub fn no_store(&self) -> bool {
        self.0.has("no-store")
    }

    pub fn no_transform(&self) -> bool {
        self.0.has("no-transform")
    }

    pub fn only_if_cached(&self) -> bool {
        self.0.has("only-if-cached")
    }

    pub(crate) fn stale_if_error(&self) -> Option<StaleBudget> {
        self.0.stale_budget("stale-if-error")
    }
}

/// Response directives from the `Cache-Control` header field.
///
/// `private`, `proxy-revalidate`, and `s-maxage` only constrain shared
/// caches; they parse but have no accessors.
#[derive(Debug, Clone, Default)]
pub struct ResponseDirectives(Directives);

impl ResponseDirectives {
    pub fn parse(headers: &HeaderMap) -> Self {
        Self(Directives::parse(headers))
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.0.duration("max-age")
    }

    pub fn max_age_present(&self) -> bool {
        self.0.has("max-age")
    }

    pub fn must_revalidate(&self) -> bool {
        self.0.has("must-revalidate")
    }

    pub fn must_understand(&self) -> bool {
        self.0.has("must-understand")
    }

    pub fn immutable(&self) -> bool {
        self.0.has("immutable")
    }

    pub(crate) fn no_cache(&self) -> Option<NoCache> {
        let raw = self.0.argument("no-cache")?;
        let unquoted = parse_quoted_string(raw).unwrap_or_else(|_| raw.to_string());
        let fields: Vec<String> = split_unquoted_commas(&unquoted)
            .map(|field| field.trim().to_string())
            .collect();
        if fields.is_empty() {
            Some(NoCache::Unqualified)
        } else {
            Some(NoCache::Qualified(fields))
        }
    }

    pub fn no_store(&self) -> bool {
        self.0.has("no-store")
    }

    pub fn no_transform(&self) -> bool {
        self.0.has("no-transform")
    }

    pub fn public(&self) -> bool {
        self.0.has("public")
    }

    pub(crate) fn stale_if_error(&self) -> Option<StaleBudget> {
        self.0.stale_budget("stale-if-error")
    }

    pub fn stale_while_revalidate(&self) -> Option<Duration> {
        self.0.duration("stale-while-revalidate")
    }
}

/// Parses a delta-seconds argument (RFC 9111 §1.2.2). A leading `-` or any
/// non-digit makes the value invalid; overflow clamps to the largest
/// representable duration.
fn delta_seconds(raw: &str) -> Option<Duration> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(seconds) => Some(Duration::seconds(seconds)),
        // All-digit input that fails to parse can only have overflowed.
        Err(_) => Some(Duration::seconds(i64::MAX)),
    }
}

/// Splits on commas outside double quotes, trimming each element and
/// skipping empties. Backslash escapes one character inside quotes.
pub(crate) fn split_unquoted_commas(input: &str) -> impl Iterator<Item = &str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, &byte) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts.into_iter().map(str::trim).filter(|part| !part.is_empty())
}

fn valid_qdtext_byte(byte: u8) -> bool {
    matches!(byte, b'\t' | b' ' | 0x21 | 0x23..=0x5B | 0x5D..=0x7E | 0x80..=0xFF)
}

/// Parses an RFC 9110 §5.6.4 quoted-string, resolving backslash escapes.
pub(crate) fn parse_quoted_string(input: &str) -> Result<String, QuotedStringError> {
    let bytes = input.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'"' || bytes[bytes.len() - 1] != b'"' {
        return Err(QuotedStringError::NotQuoted);
    }
    let inner = &bytes[1..bytes.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        match inner[i] {
            b'\\' => {
                let Some(&escaped) = inner.get(i + 1) else {
                    return Err(QuotedStringError::UnfinishedEscape);
                };
                out.push(escaped);
                i += 2;
            }
            byte if valid_qdtext_byte(byte) => {
                out.push(byte);
                i += 1;
            }
            _ => return Err(QuotedStringError::InvalidCharacter),
        }
    }
    // Lossy is fine: obs-text bytes are preserved as replacement chars only
    // for display; field-name lists are ASCII in practice.
    Ok(String::from_utf8_lossy(&out).into_owned())
}
