//! Fixed-size pool of worker threads.
//!
//! All workers are started up front and consume from one shared
//! [`HandoffQueue`]. The pool takes part in shutdown through [`Stoppable`]:
//! a graceful stop releases every worker that is waiting for work and lets
//! busy ones finish their current connection; a forced stop additionally shuts
//! down the in-flight connections so handlers blocked on socket I/O return.

use crate::error::Result;
use crate::handler::ConnectionHandler;
use crate::handoff::HandoffQueue;
use crate::harness::{Harness, Stoppable};
use crate::stats::DispatchStats;
use crate::stop::StopSignal;
use crate::worker::{InFlight, Worker};
use core::time::Duration;
use std::net::TcpStream;
use std::sync::Arc;

pub(crate) struct WorkerPool {
    harness: Harness<()>,
    stop: StopSignal,
    in_flight: Vec<Arc<InFlight>>,
}

impl WorkerPool {
    /// Starts `size` workers against `queue`.
    ///
    /// # Errors
    ///
    /// If any worker fails to spawn, the ones already started are stopped and
    /// the spawn error is returned.
    pub(crate) fn start<H: ConnectionHandler>(
        size: usize,
        queue: &HandoffQueue<TcpStream>,
        handler: Arc<H>,
        stats: &Arc<DispatchStats>,
    ) -> Result<Self> {
        let pool = Self {
            harness: Harness::new("relay-worker"),
            stop: StopSignal::new(),
            in_flight: (0..size).map(|_| Arc::new(InFlight::default())).collect(),
        };

        for (id, in_flight) in pool.in_flight.iter().enumerate() {
            let worker = Worker {
                id,
                queue: queue.clone(),
                handler: Arc::clone(&handler),
                stop: pool.stop.clone(),
                in_flight: Arc::clone(in_flight),
                stats: Arc::clone(stats),
            };
            if let Err(e) = pool.harness.spawn(id, move || worker.run()) {
                pool.stop.trigger();
                pool.harness.await_termination(Duration::from_secs(1));
                return Err(e);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Started {size} workers");

        Ok(pool)
    }

    pub(crate) fn size(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of workers currently inside the handler.
    pub(crate) fn busy(&self) -> usize {
        self.in_flight.iter().filter(|slot| slot.is_busy()).count()
    }
}

impl Stoppable for WorkerPool {
    fn name(&self) -> &'static str {
        "worker pool"
    }

    fn request_stop(&self) {
        self.stop.trigger();
    }

    fn force_stop(&self) {
        self.stop.trigger();
        let _interrupted = self.in_flight.iter().filter(|slot| slot.interrupt()).count();
        #[cfg(feature = "tracing")]
        tracing::debug!("Interrupted {_interrupted} in-flight connections");
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        if !self.harness.await_termination(timeout) {
            return false;
        }
        for result in self.harness.join() {
            if let Err(_payload) = result {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    "Worker exited by panic: {}",
                    crate::harness::panic_message(_payload.as_ref())
                );
            }
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop.trigger();
        let _detached = self.harness.detach();
    }
}
