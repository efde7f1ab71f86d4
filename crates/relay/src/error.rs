//! Error types for the dispatcher.
//!
//! Only construction and final socket release surface errors to the caller.
//! Everything that happens per connection or per loop iteration (accept
//! failures, handoff timeouts, handler errors and panics) is contained and
//! logged by the thread that observed it.

use std::io;
use std::net::SocketAddr;

pub type Result<T> = core::result::Result<T, Error>;

/// All errors a [`crate::Dispatcher`] can return.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// An acceptor or worker thread could not be started.
    #[error("failed to spawn thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },

    /// The listening socket could not be reclaimed from the acceptor.
    #[error("failed to release listening socket: {reason}")]
    Release { reason: String },

    /// `listen` was called on a dispatcher that is already accepting.
    #[error("dispatcher is already listening")]
    AlreadyListening,

    /// The dispatcher has been closed and cannot be used again.
    #[error("dispatcher is closed")]
    Closed,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Bind { source, .. } | Error::Spawn { source } => source,
            other => io::Error::other(other),
        }
    }
}
