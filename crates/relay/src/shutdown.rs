//! Ordered teardown of a dispatcher.
//!
//! The sequence is fixed: stop the acceptor, then the worker pool, then
//! release the listening socket. Each component gets one grace period to stop
//! on its own and, failing that, is forced and given a second grace period.
//! A component that still refuses to stop is reported and the sequence moves
//! on regardless.

use crate::harness::Stoppable;
use core::fmt;
use core::time::Duration;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Where a dispatcher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    StoppingAcceptor,
    StoppingWorkers,
    ReleasingSocket,
    Closed,
}

/// How a component reacted to being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Finished within the first grace period.
    Graceful,
    /// Finished only after being forced.
    Forced,
    /// Still running after both grace periods; its threads were abandoned.
    Unstopped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => f.write_str("stopped gracefully"),
            Self::Forced => f.write_str("stopped after forcing"),
            Self::Unstopped => f.write_str("failed to stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentReport {
    pub name: &'static str,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// Summary of a completed shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub acceptor: ComponentReport,
    pub workers: ComponentReport,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Whether every component stopped, gracefully or not.
    pub fn all_stopped(&self) -> bool {
        self.acceptor.outcome != Outcome::Unstopped && self.workers.outcome != Outcome::Unstopped
    }
}

/// Stops one component: graceful request, wait, force, wait.
pub(crate) fn stop_component(component: &dyn Stoppable, grace: Duration) -> ComponentReport {
    let start = Instant::now();
    let name = component.name();

    component.request_stop();
    let outcome = if component.await_termination(grace) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Stopping {name} succeeded");
        Outcome::Graceful
    } else {
        #[cfg(feature = "tracing")]
        tracing::warn!("Stopping {name} timed out after {grace:?}, forcing");
        component.force_stop();
        if component.await_termination(grace) {
            #[cfg(feature = "tracing")]
            tracing::info!("Forced stop of {name} succeeded");
            Outcome::Forced
        } else {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to stop {name} threads");
            Outcome::Unstopped
        }
    };

    ComponentReport {
        name,
        outcome,
        elapsed: start.elapsed(),
    }
}

pub(crate) struct State {
    phase: Phase,
    report: Option<ShutdownReport>,
}

/// Authoritative lifecycle state of a dispatcher.
///
/// Exactly one caller of [`Sequencer::begin`] gets to run the shutdown
/// sequence. Concurrent callers block until it finishes and every later
/// caller receives the same report.
pub(crate) struct Sequencer {
    state: Mutex<State>,
    changed: Condvar,
}

/// Who should act after calling [`Sequencer::begin`].
pub(crate) enum Turn {
    /// The caller owns the sequence and must drive it to [`Sequencer::finish`].
    Drive,
    /// Someone else already closed the dispatcher.
    Done(ShutdownReport),
}

impl Sequencer {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Running,
                report: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Locks the state if the dispatcher is still running, so the caller can
    /// make changes that must not race with the start of a shutdown.
    pub(crate) fn lock_running(&self) -> Option<MutexGuard<'_, State>> {
        let state = self.state.lock();
        (state.phase == Phase::Running).then_some(state)
    }

    pub(crate) fn begin(&self) -> Turn {
        let mut state = self.state.lock();
        if state.phase == Phase::Running {
            state.phase = Phase::StoppingAcceptor;
            return Turn::Drive;
        }
        while state.phase != Phase::Closed {
            self.changed.wait(&mut state);
        }
        match state.report {
            Some(report) => Turn::Done(report),
            None => unreachable!("closed dispatcher without a shutdown report"),
        }
    }

    pub(crate) fn advance(&self, phase: Phase) {
        self.state.lock().phase = phase;
        #[cfg(feature = "tracing")]
        tracing::trace!("Shutdown phase: {phase:?}");
    }

    pub(crate) fn finish(&self, report: ShutdownReport) {
        let mut state = self.state.lock();
        state.phase = Phase::Closed;
        state.report = Some(report);
        drop(state);
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// A component that stops after a scripted number of `await_termination`
    /// calls.
    struct Scripted {
        stops_on_call: usize,
        calls: AtomicUsize,
        forced: AtomicUsize,
    }

    impl Scripted {
        fn new(stops_on_call: usize) -> Self {
            Self {
                stops_on_call,
                calls: AtomicUsize::new(0),
                forced: AtomicUsize::new(0),
            }
        }
    }

    impl Stoppable for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn request_stop(&self) {}

        fn force_stop(&self) {
            self.forced.fetch_add(1, Ordering::SeqCst);
        }

        fn await_termination(&self, _timeout: Duration) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            call >= self.stops_on_call
        }
    }

    #[test]
    fn graceful_stop_never_forces() {
        let component = Scripted::new(1);
        let report = stop_component(&component, Duration::ZERO);
        assert_eq!(report.outcome, Outcome::Graceful);
        assert_eq!(component.forced.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slow_stop_escalates_to_force() {
        let component = Scripted::new(2);
        let report = stop_component(&component, Duration::ZERO);
        assert_eq!(report.outcome, Outcome::Forced);
        assert_eq!(component.forced.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stuck_component_is_reported_not_fatal() {
        let component = Scripted::new(usize::MAX);
        let report = stop_component(&component, Duration::ZERO);
        assert_eq!(report.outcome, Outcome::Unstopped);
        assert_eq!(component.calls.load(Ordering::SeqCst), 2);
    }

    fn report(outcome: Outcome) -> ShutdownReport {
        let component = ComponentReport {
            name: "x",
            outcome,
            elapsed: Duration::ZERO,
        };
        ShutdownReport {
            acceptor: component,
            workers: component,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn only_first_begin_drives() {
        let sequencer = Sequencer::new();
        assert!(matches!(sequencer.begin(), Turn::Drive));
        assert!(sequencer.lock_running().is_none());
        sequencer.finish(report(Outcome::Graceful));
        assert_eq!(sequencer.phase(), Phase::Closed);
        assert!(matches!(sequencer.begin(), Turn::Done(r) if r.all_stopped()));
    }

    #[test]
    fn concurrent_begin_waits_for_finish() {
        let sequencer = Arc::new(Sequencer::new());
        assert!(matches!(sequencer.begin(), Turn::Drive));

        let waiter = {
            let sequencer = Arc::clone(&sequencer);
            thread::spawn(move || match sequencer.begin() {
                Turn::Done(report) => report,
                Turn::Drive => panic!("second caller must not drive"),
            })
        };

        thread::sleep(Duration::from_millis(20));
        sequencer.advance(Phase::StoppingWorkers);
        sequencer.finish(report(Outcome::Forced));

        let seen = waiter.join().unwrap();
        assert_eq!(seen.workers.outcome, Outcome::Forced);
    }
}
