use super::hosts::{Host, Hosts, LookupError};
use super::request::{Method, RequestError, read_head};
use core::time::Duration;
use relay::{ConnectionHandler, Response, Status};
use std::io;
use std::net::{Shutdown, TcpStream};

/// How long a client may take to send its request head.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How long writing a response may stall on a slow client.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers one HTTP request per connection from a [`Hosts`] backend.
pub struct HostsHandler<H> {
    hosts: H,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<H: Hosts> HostsHandler<H> {
    pub const fn new(hosts: H) -> Self {
        Self {
            hosts,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn serve(&self, stream: &mut TcpStream) -> io::Result<()> {
        let head = match read_head(stream) {
            Ok(head) => head,
            Err(RequestError::Closed) => return Ok(()),
            Err(RequestError::Io(e)) => return Err(e),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Rejecting request: {_e}");
                return Response::plain(Status::BadRequest).send(stream);
            }
        };

        let head_only = match head.method {
            Method::Get => false,
            Method::Head => true,
            Method::Other(_) => {
                return Response::plain(Status::MethodNotAllowed)
                    .with_header("Allow", "GET, HEAD")
                    .send(stream);
            }
        };

        let Some(host) = head.host.as_deref() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("Rejecting request for {} without Host", head.target);
            return Response::plain(Status::BadRequest).send(stream);
        };

        let response = match self.hosts.resolve(host).and_then(|h| h.fetch(&head.target)) {
            Ok(resource) => Response::new(Status::Ok)
                .with_header("Content-Type", resource.content_type)
                .with_body(resource.body),
            Err(_e @ (LookupError::UnknownHost(_) | LookupError::NotFound(_))) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("{host}{}: {_e}", head.target);
                Response::plain(Status::NotFound)
            }
            Err(LookupError::Io(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to read {host}{}: {_e}", head.target);
                Response::plain(Status::InternalServerError)
            }
        };

        if head_only {
            response.send_head(stream)
        } else {
            response.send(stream)
        }
    }
}

impl<H: Hosts> ConnectionHandler for HostsHandler<H> {
    fn handle(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        let served = self.serve(&mut stream);
        let _ = stream.shutdown(Shutdown::Both);
        served
    }
}
