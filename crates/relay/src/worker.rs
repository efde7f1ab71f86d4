use crate::handler::ConnectionHandler;
use crate::handoff::HandoffQueue;
use crate::harness::panic_message;
use crate::stats::DispatchStats;
use crate::stop::StopSignal;
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// What a worker is doing right now.
#[derive(Default)]
enum Slot {
    #[default]
    Idle,
    /// Inside the handler. Holds a duplicate of the connection's stream when
    /// one could be made, so a forced shutdown can interrupt the handler's
    /// blocking I/O from another thread.
    Busy(Option<TcpStream>),
}

#[derive(Default)]
pub(crate) struct InFlight(Mutex<Slot>);

impl InFlight {
    /// Marks the worker busy with the stream duplicated into `clone`.
    fn enter(&self, clone: io::Result<TcpStream>) {
        let clone = match clone {
            Ok(stream) => Some(stream),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Cannot duplicate connection, it will not be interruptible: {_e}");
                None
            }
        };
        *self.0.lock() = Slot::Busy(clone);
    }

    fn leave(&self) {
        *self.0.lock() = Slot::Idle;
    }

    pub(crate) fn is_busy(&self) -> bool {
        matches!(*self.0.lock(), Slot::Busy(_))
    }

    /// Shuts the in-flight stream down in both directions. Returns whether
    /// there was one to interrupt.
    pub(crate) fn interrupt(&self) -> bool {
        match &*self.0.lock() {
            Slot::Busy(Some(stream)) => {
                let _ = stream.shutdown(Shutdown::Both);
                true
            }
            Slot::Busy(None) | Slot::Idle => false,
        }
    }
}

/// Result of a single worker iteration.
enum Step {
    Served,
    Failed(io::Error),
    Panicked(String),
    Stopped,
}

/// One long-lived worker loop.
///
/// Each iteration takes one connection from the handoff queue and runs the
/// handler on it to completion. Nothing about the connection survives the
/// iteration except the counters.
pub(crate) struct Worker<H> {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) id: usize,
    pub(crate) queue: HandoffQueue<TcpStream>,
    pub(crate) handler: Arc<H>,
    pub(crate) stop: StopSignal,
    pub(crate) in_flight: Arc<InFlight>,
    pub(crate) stats: Arc<DispatchStats>,
}

impl<H: ConnectionHandler> Worker<H> {
    pub(crate) fn run(self) {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} started", self.id);

        loop {
            match self.step() {
                Step::Served => {}
                Step::Failed(_e) => {
                    self.stats.record_handler_failure();
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {} handler failed: {_e}", self.id);
                }
                Step::Panicked(_msg) => {
                    self.stats.record_handler_failure();
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {} handler panicked: {_msg}", self.id);
                }
                Step::Stopped => break,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} stopped", self.id);
    }

    fn step(&self) -> Step {
        let Some(stream) = self.queue.take_unless(&self.stop) else {
            return Step::Stopped;
        };
        self.stats.record_dispatched();

        self.in_flight.enter(stream.try_clone());
        let handler = &self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(stream)));
        self.in_flight.leave();

        match outcome {
            Ok(Ok(())) => Step::Served,
            Ok(Err(err)) => Step::Failed(err),
            Err(payload) => Step::Panicked(panic_message(payload.as_ref())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn interrupt_shuts_down_the_in_flight_stream() {
        let (mut client, server) = pair();
        let slot = InFlight::default();
        assert!(!slot.is_busy());

        slot.enter(server.try_clone());
        assert!(slot.is_busy());
        assert!(slot.interrupt());

        let mut buf = [0_u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        slot.leave();
        assert!(!slot.is_busy());
        assert!(!slot.interrupt());
    }

    #[test]
    fn failed_duplicate_still_counts_as_busy() {
        let slot = InFlight::default();
        slot.enter(Err(io::Error::other("out of file descriptors")));
        assert!(slot.is_busy());
        assert!(!slot.interrupt());
        slot.leave();
        assert!(!slot.is_busy());
    }
}
