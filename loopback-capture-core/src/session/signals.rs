use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SignalState {
    /// Manual reset: stays raised until `clear_shutdown`.
    shutdown: bool,
    /// Auto reset: consumed by the wait that observes it.
    data_ready: bool,
    /// Auto reset: consumed by `wait_started`.
    started: bool,
    exited: bool,
}

/// Result of the capture thread's bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Shutdown,
    DataReady,
    TimedOut,
}

/// Result of waiting for the capture thread's start confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    Started,
    /// The thread exited before confirming.
    Exited,
    TimedOut,
}

/// Cross-thread handoff between the control thread and the capture thread.
///
/// One mutex and one condition variable carry all four signals. Shutdown
/// takes precedence over data-ready when both are raised.
#[derive(Debug, Default)]
pub struct CaptureSignals {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl CaptureSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clear everything but shutdown ahead of spawning a capture thread.
    pub fn prepare_start(&self) {
        let mut s = self.state.lock();
        s.data_ready = false;
        s.started = false;
        s.exited = false;
    }

    pub fn notify_data_ready(&self) {
        self.state.lock().data_ready = true;
        self.cond.notify_all();
    }

    pub fn request_shutdown(&self) {
        self.state.lock().shutdown = true;
        self.cond.notify_all();
    }

    /// Only called once the capture thread has been joined.
    pub fn clear_shutdown(&self) {
        self.state.lock().shutdown = false;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn confirm_started(&self) {
        self.state.lock().started = true;
        self.cond.notify_all();
    }

    pub fn mark_exited(&self) {
        self.state.lock().exited = true;
        self.cond.notify_all();
    }

    /// Block until shutdown or data-ready is raised, or `timeout` elapses.
    pub fn wait_for_capture_event(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();
        loop {
            if s.shutdown {
                return WaitOutcome::Shutdown;
            }
            if s.data_ready {
                s.data_ready = false;
                return WaitOutcome::DataReady;
            }
            if self.cond.wait_until(&mut s, deadline).timed_out() {
                if s.shutdown {
                    return WaitOutcome::Shutdown;
                }
                if s.data_ready {
                    s.data_ready = false;
                    return WaitOutcome::DataReady;
                }
                return WaitOutcome::TimedOut;
            }
        }
    }

    pub fn wait_started(&self, timeout: Duration) -> StartupOutcome {
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();
        loop {
            if s.started {
                s.started = false;
                return StartupOutcome::Started;
            }
            if s.exited {
                return StartupOutcome::Exited;
            }
            if self.cond.wait_until(&mut s, deadline).timed_out() {
                if s.started {
                    s.started = false;
                    return StartupOutcome::Started;
                }
                return if s.exited {
                    StartupOutcome::Exited
                } else {
                    StartupOutcome::TimedOut
                };
            }
        }
    }

    /// Returns whether the thread exited within `timeout`.
    pub fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut s = self.state.lock();
        while !s.exited {
            if self.cond.wait_until(&mut s, deadline).timed_out() {
                return s.exited;
            }
        }
        true
    }
}

/// The one capability a [`CaptureClient`](crate::traits::backend::CaptureClient)
/// gets over the signals: raising data-ready.
#[derive(Debug, Clone)]
pub struct DataReadyNotifier(Arc<CaptureSignals>);

impl DataReadyNotifier {
    pub fn new(signals: Arc<CaptureSignals>) -> Self {
        Self(signals)
    }

    pub fn notify(&self) {
        self.0.notify_data_ready();
    }
}
