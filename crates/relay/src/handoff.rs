//! Zero-capacity handoff between the acceptor and the workers.
//!
//! The queue never stores anything. An [`offer`](HandoffQueue::offer) only
//! completes when a worker is blocked in [`take`](HandoffQueue::take) at the
//! same moment, so a successful offer means a specific worker now owns the
//! item. When no worker shows up in time the item is handed back to the
//! caller untouched.

use crate::stop::StopSignal;
use core::fmt;
use core::time::Duration;
use crossbeam_channel::{Receiver, Select, Sender, bounded};

/// Why an offer did not complete. Both variants hand the item back.
pub enum Rejected<T> {
    /// No taker arrived within the timeout.
    Timeout(T),
    /// Shutdown began while the offer was pending.
    Stopped(T),
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(_) => f.write_str("Timeout(..)"),
            Self::Stopped(_) => f.write_str("Stopped(..)"),
        }
    }
}

/// A rendezvous point shared by one producer and any number of takers.
///
/// Cloning yields another handle to the same rendezvous point. The queue keeps
/// both channel ends alive for its whole lifetime, so takers are released
/// through a [`StopSignal`] rather than by disconnection.
pub struct HandoffQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for HandoffQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self { tx, rx }
    }

    /// Offers `item` to a concurrently waiting taker for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected::Timeout`] carrying the item if no taker received
    /// it in time. The item is then not queued anywhere.
    pub fn offer(&self, item: T, timeout: Duration) -> Result<(), Rejected<T>> {
        self.tx
            .send_timeout(item, timeout)
            .map_err(|err| Rejected::Timeout(err.into_inner()))
    }

    /// Blocks until an item is offered.
    pub fn take(&self) -> T {
        match self.rx.recv() {
            Ok(item) => item,
            // `self.tx` is alive for as long as `self` is.
            Err(_) => unreachable!("handoff queue sender dropped while borrowed"),
        }
    }

    /// Like [`offer`](Self::offer), but gives up early with
    /// [`Rejected::Stopped`] once `stop` fires.
    pub(crate) fn offer_unless(
        &self,
        item: T,
        timeout: Duration,
        stop: &StopSignal,
    ) -> Result<(), Rejected<T>> {
        if stop.is_triggered() {
            return Err(Rejected::Stopped(item));
        }

        let mut sel = Select::new();
        let send = sel.send(&self.tx);
        let halt = sel.recv(stop.receiver());

        match sel.select_timeout(timeout) {
            Ok(op) if op.index() == send => op
                .send(&self.tx, item)
                .map_err(|err| Rejected::Stopped(err.into_inner())),
            Ok(op) => {
                debug_assert_eq!(op.index(), halt);
                let _ = op.recv(stop.receiver());
                Err(Rejected::Stopped(item))
            }
            Err(_) => Err(Rejected::Timeout(item)),
        }
    }

    /// Blocks until an item is offered or `stop` fires, whichever is first.
    pub(crate) fn take_unless(&self, stop: &StopSignal) -> Option<T> {
        if stop.is_triggered() {
            return None;
        }

        let mut sel = Select::new();
        let take = sel.recv(&self.rx);
        let _halt = sel.recv(stop.receiver());

        let op = sel.select();
        if op.index() == take {
            op.recv(&self.rx).ok()
        } else {
            let _ = op.recv(stop.receiver());
            None
        }
    }
}
