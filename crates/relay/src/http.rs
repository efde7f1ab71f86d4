//! Minimal HTTP/1.1 response writer.
//!
//! This is deliberately small: a status line, a handful of headers, and an
//! optional body. It is what the overload path writes on a raw connection and
//! what simple connection handlers can reuse; it makes no attempt at full
//! protocol coverage.

use core::fmt;
use std::io::{self, Write};

/// Status codes the relay writes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
    ServiceUnavailable,
    GatewayTimeout,
}

impl Status {
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::InternalServerError => 500,
            Self::ServiceUnavailable => 503,
            Self::GatewayTimeout => 504,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// An HTTP response that is written in one go and then followed by
/// `Connection: close`.
#[derive(Debug, Clone)]
pub struct Response {
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub const fn new(status: Status) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Response whose body is the status line itself, as plain text.
    pub fn plain(status: Status) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(status.to_string())
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Writes the status line and headers. `Content-Length` always reflects
    /// the body, even when the body itself is not sent.
    pub fn write_head<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut head = format!("HTTP/1.1 {}\r\n", self.status);
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str("Connection: close\r\n\r\n");
        out.write_all(head.as_bytes())
    }

    /// Writes the full response and flushes.
    pub fn send<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.write_head(out)?;
        out.write_all(&self.body)?;
        out.flush()
    }

    /// Writes only the head and flushes, as required for `HEAD` requests.
    pub fn send_head<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.write_head(out)?;
        out.flush()
    }
}
