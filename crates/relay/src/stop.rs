use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;

/// Uninhabited message type: the stop channel only ever disconnects.
pub(crate) enum Never {}

/// One-shot broadcast used to ask long-lived threads to leave their loops.
///
/// Triggering drops the only sender, which disconnects the channel and wakes
/// every thread parked on [`StopSignal::receiver`] at once, whether it is
/// blocked in a `select`, a backoff sleep, or about to start a new iteration.
#[derive(Clone)]
pub(crate) struct StopSignal {
    trigger: Arc<Mutex<Option<Sender<Never>>>>,
    rx: Receiver<Never>,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Fires the signal. Idempotent.
    pub(crate) fn trigger(&self) {
        self.trigger.lock().take();
    }

    pub(crate) fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleeps for up to `timeout`, returning early with `true` if the signal
    /// fires.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(never) => match never {},
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<Never> {
        &self.rx
    }
}
