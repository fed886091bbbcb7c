//! Stored-response wire formats.
//!
//! An entry serializes as a tab-delimited metadata line (response ID,
//! request time, receipt time, both RFC 3339 with nanoseconds in UTC)
//! followed by the HTTP/1.1 serialization of the response. Reference lists
//! serialize as JSON arrays.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::headers::date_header;

/// A cached HTTP response together with the timing needed for age
/// calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Content-addressed key, `<url-key>#<vary-hash>`.
    pub id: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Instant the request was issued upstream.
    pub requested_at: OffsetDateTime,
    /// Instant the response was fully received.
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("failed to read metadata line")]
    ReadBytes,
    #[error("invalid metadata line: expected 3 fields, got {0}")]
    InvalidMetaLine(usize),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl Entry {
    /// The stored response's `Date` header; storage guarantees one exists.
    pub(crate) fn date(&self) -> OffsetDateTime {
        date_header(&self.headers).unwrap_or(self.received_at)
    }

    /// Builds a servable response from the stored fields.
    pub(crate) fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let requested = self
            .requested_at
            .format(&Rfc3339)
            .context("failed to format request time")?;
        let received = self
            .received_at
            .format(&Rfc3339)
            .context("failed to format receipt time")?;

        let mut buf = Vec::with_capacity(self.body.len() + 256);
        buf.extend_from_slice(self.id.as_bytes());
        buf.push(b'\t');
        buf.extend_from_slice(requested.as_bytes());
        buf.push(b'\t');
        buf.extend_from_slice(received.as_bytes());
        buf.push(b'\n');

        buf.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("")
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EntryError> {
        let newline = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(EntryError::ReadBytes)?;
        let meta = std::str::from_utf8(&data[..newline])
            .map_err(|_| EntryError::ReadBytes)?
            .trim_end_matches('\r');
        let fields: Vec<&str> = meta.split('\t').collect();
        if fields.len() != 3 {
            return Err(EntryError::InvalidMetaLine(fields.len()));
        }
        let id = fields[0].to_string();
        let requested_at = OffsetDateTime::parse(fields[1], &Rfc3339)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let received_at = OffsetDateTime::parse(fields[2], &Rfc3339)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        let (status, headers, body) = parse_http1_response(&data[newline + 1..])?;
        Ok(Self {
            id,
            status,
            headers,
            body,
            requested_at,
            received_at,
        })
    }
}

fn parse_http1_response(data: &[u8]) -> Result<(StatusCode, HeaderMap, Bytes), EntryError> {
    let mut rest = data;

    let status_line = read_line(&mut rest)
        .ok_or_else(|| EntryError::InvalidResponse("missing status line".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| EntryError::InvalidResponse("empty status line".into()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(EntryError::InvalidResponse(format!(
            "unsupported protocol {version:?}"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| EntryError::InvalidResponse("bad status code".into()))?;

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(&mut rest)
            .ok_or_else(|| EntryError::InvalidResponse("truncated header block".into()))?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| EntryError::InvalidResponse(format!("malformed header {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|err| EntryError::InvalidResponse(err.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|err| EntryError::InvalidResponse(err.to_string()))?;
        headers.append(name, value);
    }

    Ok((status, headers, Bytes::copy_from_slice(rest)))
}

/// Pops one CRLF- (or bare-LF-) terminated line off the front of `rest`.
fn read_line<'a>(rest: &mut &'a [u8]) -> Option<String> {
    let newline = rest.iter().position(|&b| b == b'\n')?;
    let line = &rest[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let parsed = String::from_utf8_lossy(line).into_owned();
    *rest = &rest[newline + 1..];
    Some(parsed)
}

/// Descriptor pointing from a URL key to one `Vary`-qualified variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRef {
    /// Content-addressed key of the variant's entry.
    #[serde(rename = "id")]
    pub response_id: String,
    /// Raw `Vary` header of the stored response.
    pub vary: String,
    /// Normalized storing-request value for each field `vary` lists.
    pub vary_resolved: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

pub(crate) fn encode_refs(refs: &[ResponseRef]) -> Result<Vec<u8>> {
    serde_json::to_vec(refs).context("failed to encode reference list")
}

pub(crate) fn decode_refs(data: &[u8]) -> Result<Vec<ResponseRef>> {
    serde_json::from_slice(data).context("failed to decode reference list")
}
