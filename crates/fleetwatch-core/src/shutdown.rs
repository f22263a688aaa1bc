//! Cooperative stop signal shared between long-running loops and whoever
//! asks them to stop (signal handlers, tests, the supervisor).

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cloneable stop flag with an interruptible wait.
///
/// Loops check [`StopSignal::is_stopped`] before starting work and park in
/// [`StopSignal::wait_timeout`] between iterations so a stop request wakes
/// them immediately instead of after a full sleep.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    /// Creates a signal in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop and wakes every waiter.
    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    /// Returns `true` once [`StopSignal::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self
            .inner
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits up to `timeout` for a stop request.
    ///
    /// Returns `true` if the signal was (or became) stopped, `false` if the
    /// full timeout elapsed. A timeout too large to represent as a deadline
    /// waits for the stop request alone.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !*stopped {
                stopped = cvar.wait(stopped).unwrap_or_else(PoisonError::into_inner);
            }
            return true;
        };
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            stopped = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_wait_elapses_without_stop() {
        let signal = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(!signal.is_stopped());
    }

    #[test]
    fn test_stop_wakes_waiter_early() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });
        assert!(signal.wait_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().expect("join");
    }

    #[test]
    fn test_unbounded_timeout_waits_for_stop() {
        let signal = StopSignal::new();
        let remote = signal.clone();
        let waiter = thread::spawn(move || remote.wait_timeout(Duration::from_secs(u64::MAX)));
        thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(waiter.join().expect("join"));
    }

    #[test]
    fn test_already_stopped_returns_immediately() {
        let signal = StopSignal::new();
        signal.stop();
        assert!(signal.is_stopped());
        assert!(signal.wait_timeout(Duration::from_secs(10)));
    }
}
