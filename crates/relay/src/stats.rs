use portable_atomic::{AtomicU64, Ordering};

/// Live counters maintained by the acceptor and workers.
///
/// Every accepted connection ends up in exactly one of `dispatched`,
/// `overloaded`, or `refused`, so once the dispatcher is idle
/// `accepted == dispatched + overloaded + refused`.
#[derive(Debug, Default)]
pub struct DispatchStats {
    accepted: AtomicU64,
    dispatched: AtomicU64,
    overloaded: AtomicU64,
    refused: AtomicU64,
    accept_failures: AtomicU64,
    handler_failures: AtomicU64,
}

/// A point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections returned by `accept`.
    pub accepted: u64,
    /// Connections taken by a worker.
    pub dispatched: u64,
    /// Connections answered with the overload status after the handoff timed
    /// out.
    pub overloaded: u64,
    /// Connections answered with the shutdown status because they arrived
    /// while the dispatcher was stopping.
    pub refused: u64,
    /// Failed `accept` calls.
    pub accept_failures: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            accept_failures: self.accept_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overloaded(&self) {
        self.overloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_failure(&self) {
        self.accept_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl StatsSnapshot {
    /// Accepted connections that have been routed somewhere.
    pub const fn settled(&self) -> u64 {
        self.dispatched + self.overloaded + self.refused
    }
}
