//! Minimal HTTP/1.x request-head reader.
//!
//! Only the request line and the `Host` header are interpreted. The body, if
//! any, is never read.

use std::io::{self, Read};
use thiserror::Error;

/// Largest request head accepted, terminator included.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

const HEAD_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Request target with any query string removed.
    pub target: String,
    /// Raw `Host` header value, or the authority of an absolute-form target.
    pub host: Option<String>,
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("connection closed before a complete request head")]
    Closed,
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    TooLarge,
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads from `reader` until the blank line ending the head, then parses it.
///
/// Bytes past the terminator that arrived in the same read are discarded.
pub fn read_head<R: Read>(reader: &mut R) -> Result<RequestHead, RequestError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0_u8; 1024];
    let mut scanned = 0_usize;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => return Err(RequestError::Closed),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        buf.extend_from_slice(&chunk[..n]);

        // Resume just before the previous tail so a split terminator is found.
        let from = scanned.saturating_sub(HEAD_END.len() - 1);
        if let Some(pos) = find(&buf[from..], HEAD_END) {
            let end = from + pos;
            if end + HEAD_END.len() > MAX_HEAD_BYTES {
                return Err(RequestError::TooLarge);
            }
            return parse_head(&buf[..end]);
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(RequestError::TooLarge);
        }
        scanned = buf.len();
    }
}

/// Parses a request head without its terminating blank line.
pub fn parse_head(raw: &[u8]) -> Result<RequestHead, RequestError> {
    let text = core::str::from_utf8(raw).map_err(|_| RequestError::Malformed("not utf-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(RequestError::Malformed("bad request line"));
    };
    if method.is_empty() || target.is_empty() {
        return Err(RequestError::Malformed("bad request line"));
    }
    if !version.starts_with("HTTP/1.") {
        return Err(RequestError::Malformed("unsupported version"));
    }

    let mut host = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(RequestError::Malformed("bad header line"));
        };
        if name.eq_ignore_ascii_case("host") {
            if host.is_some() {
                return Err(RequestError::Malformed("duplicate host header"));
            }
            host = Some(value.trim().to_string());
        }
    }

    let (target, authority) = split_target(target)?;
    Ok(RequestHead {
        method: Method::parse(method),
        target,
        host: authority.or(host),
    })
}

/// Splits an origin-form or absolute-form target into its path (without
/// query) and optional authority.
fn split_target(target: &str) -> Result<(String, Option<String>), RequestError> {
    let (authority, path) = match target.split_once("://") {
        Some((_scheme, rest)) => match rest.find('/') {
            Some(slash) => (Some(rest[..slash].to_string()), &rest[slash..]),
            None => (Some(rest.to_string()), "/"),
        },
        None if target.starts_with('/') => (None, target),
        None => return Err(RequestError::Malformed("bad request target")),
    };
    let path = path.split(['?', '#']).next().unwrap_or("/");
    Ok((path.to_string(), authority))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
