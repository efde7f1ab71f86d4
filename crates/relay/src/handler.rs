use std::io;
use std::net::TcpStream;

/// Serves one accepted connection.
///
/// This is the seam between the dispatcher and whatever actually speaks to
/// the client (request parsing, host lookup, content retrieval). A handler is
/// shared by every worker, so implementations must not keep per-connection
/// state between calls.
///
/// Errors and panics are contained to the connection that caused them: the
/// worker logs them and moves on to the next connection. During a forced
/// shutdown the stream is shut down underneath the handler, so blocking reads
/// and writes on it fail promptly; handlers should return once they see such
/// an error.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream) -> io::Result<()>;
}

impl<F> ConnectionHandler for F
where
    F: Fn(TcpStream) -> io::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, stream: TcpStream) -> io::Result<()> {
        self(stream)
    }
}
