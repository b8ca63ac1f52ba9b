//! Request dumps: rendering an HTTP request back into its wire form and framing
//! it into a timestamped log record.

use axum::{
    body::{self, Body},
    http::{
        HeaderMap, Request, Version,
        header::{HOST, TRAILER, TRANSFER_ENCODING},
        request::Parts,
    },
};
use chrono::{DateTime, Local, TimeZone, Timelike};
use thiserror::Error;

const SEPARATOR: &[u8] = b"\n---\n";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unable to read request body: {0}")]
    Body(#[source] axum::Error),
}

/// Frames a captured request as `<timestamp>\n---\n<raw>\n---\n\n` using the
/// current local time.
pub fn serialize(raw: &[u8]) -> Vec<u8> {
    serialize_at(raw, &timestamp())
}

pub fn serialize_at(raw: &[u8], timestamp: &str) -> Vec<u8> {
    let mut record = Vec::with_capacity(timestamp.len() + raw.len() + 2 * SEPARATOR.len() + 1);
    record.extend_from_slice(timestamp.as_bytes());
    record.extend_from_slice(SEPARATOR);
    record.extend_from_slice(raw);
    record.extend_from_slice(SEPARATOR);
    record.push(b'\n');
    record
}

pub fn timestamp() -> String {
    format_timestamp(&Local::now())
}

/// `2024-01-02 03:04:05.5 +0100`: sub-second digits lose their trailing zeros
/// and disappear entirely on a whole second.
fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut rendered = at.format("%Y-%m-%d %H:%M:%S").to_string();

    let nanos = at.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let fraction = format!(".{nanos:09}");
        rendered.push_str(fraction.trim_end_matches('0'));
    }

    rendered.push_str(&at.format(" %z").to_string());
    rendered
}

/// Reads the whole request and renders it in on-the-wire form: request line,
/// headers, blank line, body.
pub async fn capture(request: Request<Body>) -> Result<Vec<u8>, CaptureError> {
    let (parts, body) = request.into_parts();
    let body = body::to_bytes(body, usize::MAX)
        .await
        .map_err(CaptureError::Body)?;

    Ok(render(&parts, &body))
}

fn render(parts: &Parts, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.len());

    let absolute = parts.uri.scheme().is_some();
    let request_uri = if absolute {
        parts.uri.to_string()
    } else {
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| "/".to_owned())
    };

    out.extend_from_slice(parts.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request_uri.as_bytes());
    out.push(b' ');
    out.extend_from_slice(version_label(parts.version).as_bytes());
    out.extend_from_slice(b"\r\n");

    if !absolute {
        let host = parts
            .headers
            .get(HOST)
            .map(|value| value.as_bytes())
            .or_else(|| parts.uri.authority().map(|authority| authority.as_str().as_bytes()));
        if let Some(host) = host.filter(|host| !host.is_empty()) {
            write_header_line(&mut out, "Host", host);
        }
    }

    let transfer_encoding = join_values(&parts.headers, TRANSFER_ENCODING.as_str());
    let chunked = transfer_encoding
        .as_ref()
        .is_some_and(|value| value.to_ascii_lowercase().ends_with(b"chunked"));
    if let Some(value) = &transfer_encoding {
        write_header_line(&mut out, "Transfer-Encoding", value);
    }

    write_remaining_headers(&mut out, &parts.headers);
    out.extend_from_slice(b"\r\n");

    if chunked {
        if !body.is_empty() {
            out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
    } else {
        out.extend_from_slice(body);
    }

    out
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn join_values(headers: &HeaderMap, name: &str) -> Option<Vec<u8>> {
    let values: Vec<&[u8]> = headers
        .get_all(name)
        .iter()
        .map(|value| value.as_bytes())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join(&b","[..]))
    }
}

fn write_remaining_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    let mut names: Vec<(String, &str)> = headers
        .keys()
        .filter(|name| **name != HOST && **name != TRANSFER_ENCODING && **name != TRAILER)
        .map(|name| (canonical_header_name(name.as_str()), name.as_str()))
        .collect();
    names.sort();

    for (canonical, name) in names {
        for value in headers.get_all(name) {
            write_header_line(out, &canonical, value.as_bytes());
        }
    }
}

fn write_header_line(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}

/// `x-forwarded-for` becomes `X-Forwarded-For`.
fn canonical_header_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|ch| {
            let mapped = if upper {
                ch.to_ascii_uppercase()
            } else {
                ch.to_ascii_lowercase()
            };
            upper = ch == '-';
            mapped
        })
        .collect()
}
