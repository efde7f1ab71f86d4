use crate::http::{Response, Status};
use core::time::Duration;
use std::io;
use std::net::{Shutdown, TcpStream};

/// Status sent when no worker takes a connection within the handoff timeout.
pub const OVERLOAD_STATUS: Status = Status::GatewayTimeout;

/// Status sent to connections accepted after shutdown has begun.
pub const SHUTDOWN_STATUS: Status = Status::ServiceUnavailable;

/// Writes a minimal response carrying `status` on `stream` and closes it.
///
/// The stream is consumed: it is closed whether or not the write succeeds.
/// A write timeout bounds how long a slow or stalled peer can hold the caller.
///
/// # Errors
///
/// Returns the I/O error from writing the response. Callers on the accept path
/// treat it as non-fatal, typically because the peer has already gone away.
pub fn respond(mut stream: TcpStream, status: Status, write_timeout: Duration) -> io::Result<()> {
    if !write_timeout.is_zero() {
        stream.set_write_timeout(Some(write_timeout))?;
    }
    let sent = Response::plain(status).send(&mut stream);
    // Closing is best effort; the peer may have reset already.
    let _ = stream.shutdown(Shutdown::Both);
    sent
}
