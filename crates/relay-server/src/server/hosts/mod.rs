//! Content lookup by virtual host.

mod directory;

pub use directory::DirectoryHosts;

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Bytes of a served resource and the media type to label them with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl Resource {
    /// Labels `body` by the extension of `path`.
    pub fn new(path: &str, body: Vec<u8>) -> Self {
        Self {
            body,
            content_type: content_type(path),
        }
    }
}

/// Resolves a `Host` header value to something that can serve paths.
pub trait Hosts: Send + Sync + 'static {
    type Host: Host;

    fn resolve(&self, host: &str) -> Result<Self::Host, LookupError>;
}

pub trait Host {
    /// Fetches the resource at an absolute request path such as `/a/b.html`.
    fn fetch(&self, path: &str) -> Result<Resource, LookupError>;
}

/// Lowercases a `Host` header value and strips its port.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim().trim_end_matches('.');
    let name = match raw.strip_prefix('[') {
        // IPv6 literal, port follows the closing bracket.
        Some(rest) => rest.split(']').next().unwrap_or(rest),
        None => raw.split(':').next().unwrap_or(raw),
    };
    name.to_ascii_lowercase()
}

fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
