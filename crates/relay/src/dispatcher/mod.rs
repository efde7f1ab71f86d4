//! The dispatcher: one acceptor thread feeding a fixed pool of workers.
//!
//! Construction binds the listening socket and starts the workers, but no
//! connection is accepted until [`Dispatcher::listen`] arms the acceptor.
//! [`Dispatcher::close`] tears everything down in a fixed order and can be
//! called from any thread, any number of times.

use crate::acceptor::{AcceptorHandle, Reclaim};
use crate::config::DispatchConfig;
use crate::error::{Error, Result};
use crate::handler::ConnectionHandler;
use crate::handoff::HandoffQueue;
use crate::pool::WorkerPool;
use crate::shutdown::{
    ComponentReport, Outcome, Phase, Sequencer, ShutdownReport, Turn, stop_component,
};
use crate::stats::{DispatchStats, StatsSnapshot};
use core::time::Duration;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Instant;

#[cfg(test)]
mod tests;

/// Accepts TCP connections and hands each one to exactly one worker, or
/// answers it with an overload response when no worker is free in time.
pub struct Dispatcher {
    config: DispatchConfig,
    local_addr: SocketAddr,
    queue: HandoffQueue<TcpStream>,
    stats: Arc<DispatchStats>,
    pool: WorkerPool,
    /// The listening socket while nobody has called `listen` yet.
    listener: Mutex<Option<TcpListener>>,
    acceptor: Mutex<Option<AcceptorHandle>>,
    sequencer: Sequencer,
}

impl Dispatcher {
    /// Binds `0.0.0.0:port` and starts a default-sized worker pool.
    ///
    /// # Errors
    ///
    /// Fails if the port cannot be bound or the workers cannot be spawned.
    pub fn bind<H: ConnectionHandler>(handler: H, port: u16) -> Result<Self> {
        Self::with_config(
            handler,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            DispatchConfig::default(),
        )
    }

    /// Binds `addr` and starts `config.pool_size` workers running `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address is unavailable and
    /// [`Error::Spawn`] if a worker thread cannot be created.
    pub fn with_config<H: ConnectionHandler>(
        handler: H,
        addr: SocketAddr,
        config: DispatchConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;

        let queue = HandoffQueue::new();
        let stats = Arc::new(DispatchStats::default());
        let pool = WorkerPool::start(config.pool_size.max(1), &queue, Arc::new(handler), &stats)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Dispatcher bound to {local_addr} with {} workers",
            pool.size()
        );

        Ok(Self {
            config,
            local_addr,
            queue,
            stats,
            pool,
            listener: Mutex::new(Some(listener)),
            acceptor: Mutex::new(None),
            sequencer: Sequencer::new(),
        })
    }

    /// Starts accepting connections on a dedicated thread and returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyListening`] on a second call,
    /// [`Error::Closed`] once [`close`](Self::close) has begun, and
    /// [`Error::Spawn`] if the acceptor thread cannot be created.
    pub fn listen(&self) -> Result<()> {
        // Held until the acceptor is recorded so `close` cannot slip in
        // between and miss it.
        let Some(_running) = self.sequencer.lock_running() else {
            return Err(Error::Closed);
        };
        let listener = self.listener.lock().take().ok_or(Error::AlreadyListening)?;
        let acceptor = AcceptorHandle::spawn(
            listener,
            self.local_addr,
            &self.queue,
            &self.config,
            &self.stats,
        )?;
        *self.acceptor.lock() = Some(acceptor);
        Ok(())
    }

    /// Stops the acceptor, then the workers, then releases the listening
    /// socket.
    ///
    /// Each component gets the configured grace period to stop by itself and
    /// a second one after being forced, so this returns within four grace
    /// periods plus the time to write at most one overload response. A
    /// component that does not stop is reported in the returned
    /// [`ShutdownReport`] and does not abort the sequence.
    ///
    /// Calling `close` again returns the first report. A call made while
    /// another thread is closing blocks until that close completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Release`] if the listening socket could not be
    /// reclaimed from the acceptor thread.
    pub fn close(&self) -> Result<ShutdownReport> {
        match self.sequencer.begin() {
            Turn::Done(report) => return Ok(report),
            Turn::Drive => {}
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Closing dispatcher on {}", self.local_addr);

        let start = Instant::now();
        let grace = self.config.grace_period;

        let acceptor = self.acceptor.lock().take();
        let acceptor_report = match &acceptor {
            Some(handle) => stop_component(handle, grace),
            None => ComponentReport {
                name: "acceptor",
                outcome: Outcome::Graceful,
                elapsed: Duration::ZERO,
            },
        };

        self.sequencer.advance(Phase::StoppingWorkers);
        let workers_report = stop_component(&self.pool, grace);

        self.sequencer.advance(Phase::ReleasingSocket);
        let released = self.release(acceptor);

        let report = ShutdownReport {
            acceptor: acceptor_report,
            workers: workers_report,
            elapsed: start.elapsed(),
        };
        self.sequencer.finish(report);

        #[cfg(feature = "tracing")]
        {
            match &released {
                Ok(()) => tracing::info!("Dispatcher closed in {:?}", report.elapsed),
                Err(e) => tracing::error!("Dispatcher closed with error: {e}"),
            }
        }

        released.map(|()| report)
    }

    fn release(&self, acceptor: Option<AcceptorHandle>) -> Result<()> {
        let listener = match acceptor.as_ref().map(AcceptorHandle::reclaim) {
            None => self.listener.lock().take(),
            Some(Reclaim::Returned(listener)) => Some(listener),
            Some(Reclaim::Dropped) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Listening socket was dropped by a panicking acceptor");
                None
            }
            Some(Reclaim::Held) => {
                return Err(Error::Release {
                    reason: "acceptor thread did not stop and still owns the socket".to_string(),
                });
            }
        };
        drop(listener);
        Ok(())
    }

    /// The address the listening socket is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Number of workers currently running the handler.
    pub fn busy_workers(&self) -> usize {
        self.pool.busy()
    }

    /// Whether `listen` has armed the acceptor and `close` has not yet taken
    /// it down. Stays `true` if the acceptor gave up on its own; see
    /// [`is_accepting`](Self::is_accepting).
    pub fn is_listening(&self) -> bool {
        self.acceptor.lock().is_some()
    }

    /// Whether the acceptor thread is alive and accepting connections.
    ///
    /// Becomes `false` once the acceptor exhausts its accept retry budget or
    /// panics, even though the dispatcher has not been closed. Such a
    /// dispatcher no longer serves anything and should be closed.
    pub fn is_accepting(&self) -> bool {
        self.acceptor
            .lock()
            .as_ref()
            .is_some_and(AcceptorHandle::is_running)
    }

    pub fn phase(&self) -> Phase {
        self.sequencer.phase()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.sequencer.phase() == Phase::Closed {
            return;
        }
        if let Err(_e) = self.close() {
            #[cfg(feature = "tracing")]
            tracing::error!("Error closing dispatcher on drop: {_e}");
        }
    }
}
