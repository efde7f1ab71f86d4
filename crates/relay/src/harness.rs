//! Thread ownership for the long-lived acceptor and worker loops.
//!
//! `std` can join a thread but cannot join it with a deadline. A [`Harness`]
//! fills that gap: every thread it spawns holds a clone of a liveness sender,
//! and the harness observes the channel disconnect once the last of them has
//! exited (normally or by panic). Only then are the join handles reaped, so a
//! join after a successful [`Harness::await_termination`] never blocks.

use crate::error::{Error, Result};
use crate::stop::Never;
use core::time::Duration;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A component that can be stopped in two steps: politely, then forcibly.
pub(crate) trait Stoppable {
    fn name(&self) -> &'static str;

    /// Ask the component to finish its current iteration and start no new
    /// ones.
    fn request_stop(&self);

    /// Interrupt whatever the component is blocked on.
    fn force_stop(&self);

    /// Wait up to `timeout` for every thread of the component to exit.
    fn await_termination(&self, timeout: Duration) -> bool;
}

pub(crate) struct Harness<T> {
    name: &'static str,
    handles: Mutex<Vec<JoinHandle<T>>>,
    alive_tx: Mutex<Option<Sender<Never>>>,
    alive_rx: Receiver<Never>,
}

impl<T: Send + 'static> Harness<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        let (tx, rx) = bounded(0);
        Self {
            name,
            handles: Mutex::new(Vec::new()),
            alive_tx: Mutex::new(Some(tx)),
            alive_rx: rx,
        }
    }

    /// Spawns a named thread tracked by this harness.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the OS refuses the thread, and
    /// [`Error::Closed`] once the harness has started awaiting termination.
    pub(crate) fn spawn<F>(&self, index: usize, f: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let alive = self.alive_tx.lock().clone().ok_or(Error::Closed)?;
        let handle = thread::Builder::new()
            .name(format!("{}-{index}", self.name))
            .spawn(move || {
                let out = f();
                drop(alive);
                out
            })
            .map_err(|source| Error::Spawn { source })?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Waits up to `timeout` for every spawned thread to exit.
    ///
    /// Sealing happens on the first call: no thread can be spawned afterwards.
    pub(crate) fn await_termination(&self, timeout: Duration) -> bool {
        self.alive_tx.lock().take();
        let deadline = Instant::now() + timeout;
        match self.alive_rx.recv_deadline(deadline) {
            Ok(never) => match never {},
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Joins every thread, returning each thread's output or panic payload.
    ///
    /// Must only be called after [`await_termination`](Self::await_termination)
    /// returned `true`.
    pub(crate) fn join(&self) -> Vec<thread::Result<T>> {
        let handles = core::mem::take(&mut *self.handles.lock());
        handles.into_iter().map(JoinHandle::join).collect()
    }

    /// Gives up on the remaining threads. They keep running unobserved.
    pub(crate) fn detach(&self) -> usize {
        let handles = core::mem::take(&mut *self.handles.lock());
        handles.len()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
