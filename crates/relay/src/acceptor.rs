//! The accept loop.
//!
//! A single thread owns the listening socket while the dispatcher is
//! listening. For each connection it accepts, it offers the stream to the
//! workers for at most the handoff timeout; if no worker takes it, the client
//! gets an explicit overload response instead of waiting in an unbounded
//! backlog. The thread hands the listening socket back when it exits so the
//! shutdown sequence can release it.

use crate::config::{DispatchConfig, RetryPolicy};
use crate::error::Result;
use crate::handoff::{HandoffQueue, Rejected};
use crate::harness::{Harness, Stoppable};
use crate::http::Status;
use crate::overload::{self, OVERLOAD_STATUS, SHUTDOWN_STATUS};
use crate::stats::DispatchStats;
use crate::stop::StopSignal;
use core::time::Duration;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

/// How long a wake-up connection may take to reach our own listener.
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// Source of incoming connections for the accept loop.
pub(crate) trait Incoming: Send + 'static {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Incoming for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }
}

/// Unblocks a pending `accept` by connecting to our own listener.
///
/// The peer address of the last wake-up connection is remembered so the
/// acceptor can tell it apart from a real client.
pub(crate) struct Waker {
    target: SocketAddr,
    last_peer: Mutex<Option<SocketAddr>>,
}

impl Waker {
    pub(crate) fn new(local_addr: SocketAddr) -> Self {
        Self {
            target: wake_addr(local_addr),
            last_peer: Mutex::new(None),
        }
    }

    pub(crate) fn wake(&self) {
        // Held across the connect so `is_wake` cannot observe the accepted
        // connection before its address is recorded.
        let mut last_peer = self.last_peer.lock();
        if let Ok(stream) = TcpStream::connect_timeout(&self.target, WAKE_TIMEOUT) {
            *last_peer = stream.local_addr().ok();
        }
    }

    fn is_wake(&self, peer: SocketAddr) -> bool {
        *self.last_peer.lock() == Some(peer)
    }
}

/// Result of a single acceptor iteration.
enum Step {
    Dispatched,
    Overloaded,
    AcceptFailed(io::Error),
    Stopped,
}

struct Acceptor<L = TcpListener> {
    listener: L,
    queue: HandoffQueue<TcpStream>,
    stop: StopSignal,
    handoff_timeout: Duration,
    write_timeout: Duration,
    retry: RetryPolicy,
    stats: Arc<DispatchStats>,
    waker: Arc<Waker>,
}

impl<L: Incoming> Acceptor<L> {
    fn run(self) -> L {
        #[cfg(feature = "tracing")]
        tracing::debug!("Acceptor started");

        let mut failures = 0_u32;
        loop {
            match self.step() {
                Step::Dispatched | Step::Overloaded => failures = 0,
                Step::AcceptFailed(_e) => {
                    failures += 1;
                    self.stats.record_accept_failure();
                    if self.retry.exhausted(failures) {
                        #[cfg(feature = "tracing")]
                        tracing::error!(
                            "Acceptor giving up after {failures} consecutive accept failures: {_e}"
                        );
                        break;
                    }
                    let backoff = self.retry.backoff(failures);
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Accept failed ({failures}), retrying in {backoff:?}: {_e}");
                    if self.stop.wait_timeout(backoff) {
                        break;
                    }
                }
                Step::Stopped => break,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Acceptor stopped");
        self.listener
    }

    fn step(&self) -> Step {
        if self.stop.is_triggered() {
            return Step::Stopped;
        }

        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => return Step::AcceptFailed(e),
        };

        // A stop is always triggered before the wake-up connection is made.
        if self.stop.is_triggered() {
            if self.waker.is_wake(peer) {
                return Step::Stopped;
            }
            self.stats.record_accepted();
            self.stats.record_refused();
            self.refuse(stream, SHUTDOWN_STATUS);
            return Step::Stopped;
        }
        self.stats.record_accepted();

        match self
            .queue
            .offer_unless(stream, self.handoff_timeout, &self.stop)
        {
            Ok(()) => Step::Dispatched,
            Err(Rejected::Timeout(stream)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "No worker free within {:?}, sending {OVERLOAD_STATUS}",
                    self.handoff_timeout
                );
                self.stats.record_overloaded();
                self.refuse(stream, OVERLOAD_STATUS);
                Step::Overloaded
            }
            Err(Rejected::Stopped(stream)) => {
                self.stats.record_refused();
                self.refuse(stream, SHUTDOWN_STATUS);
                Step::Stopped
            }
        }
    }

    fn refuse(&self, stream: TcpStream, status: Status) {
        if let Err(_e) = overload::respond(stream, status, self.write_timeout) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Failed to send {status} response: {_e}");
        }
    }
}

/// Clears the acceptor's running flag when its thread leaves, by return or
/// by panic.
struct ExitFlag(Arc<AtomicBool>);

impl Drop for ExitFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What became of the listening socket after the acceptor was stopped.
pub(crate) enum Reclaim {
    /// The acceptor exited and returned the socket.
    Returned(TcpListener),
    /// The acceptor panicked; the socket was dropped while unwinding.
    Dropped,
    /// The acceptor thread has not exited, so it still owns the socket.
    Held,
}

/// Control side of a running acceptor thread.
pub(crate) struct AcceptorHandle {
    harness: Harness<TcpListener>,
    stop: StopSignal,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    listener: Mutex<Option<TcpListener>>,
    exited: Mutex<bool>,
}

impl AcceptorHandle {
    /// Moves `listener`, bound to `local_addr`, onto a new acceptor thread.
    pub(crate) fn spawn(
        listener: TcpListener,
        local_addr: SocketAddr,
        queue: &HandoffQueue<TcpStream>,
        config: &DispatchConfig,
        stats: &Arc<DispatchStats>,
    ) -> Result<Self> {
        let waker = Arc::new(Waker::new(local_addr));
        let stop = StopSignal::new();
        let acceptor = Acceptor {
            listener,
            queue: queue.clone(),
            stop: stop.clone(),
            handoff_timeout: config.handoff_timeout,
            write_timeout: config.write_timeout,
            retry: config.accept_retry,
            stats: Arc::clone(stats),
            waker: Arc::clone(&waker),
        };

        let running = Arc::new(AtomicBool::new(true));
        let flag = ExitFlag(Arc::clone(&running));
        let harness = Harness::new("relay-acceptor");
        harness.spawn(0, move || {
            let _flag = flag;
            acceptor.run()
        })?;

        #[cfg(feature = "tracing")]
        tracing::info!("Accepting connections (wake address {})", waker.target);

        Ok(Self {
            harness,
            stop,
            waker,
            running,
            listener: Mutex::new(None),
            exited: Mutex::new(false),
        })
    }

    /// Whether the acceptor thread is still inside its loop.
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn reclaim(&self) -> Reclaim {
        if let Some(listener) = self.listener.lock().take() {
            return Reclaim::Returned(listener);
        }
        if *self.exited.lock() {
            Reclaim::Dropped
        } else {
            Reclaim::Held
        }
    }
}

impl Stoppable for AcceptorHandle {
    fn name(&self) -> &'static str {
        "acceptor"
    }

    fn request_stop(&self) {
        self.stop.trigger();
        if self.is_running() {
            self.waker.wake();
        }
    }

    fn force_stop(&self) {
        self.stop.trigger();
        self.waker.wake();
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        if !self.harness.await_termination(timeout) {
            return false;
        }
        for result in self.harness.join() {
            match result {
                Ok(listener) => *self.listener.lock() = Some(listener),
                Err(_payload) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "Acceptor exited by panic: {}",
                        crate::harness::panic_message(_payload.as_ref())
                    );
                }
            }
        }
        *self.exited.lock() = true;
        true
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.stop.trigger();
        let _detached = self.harness.detach();
    }
}

/// Address a local client can use to reach a listener bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}
