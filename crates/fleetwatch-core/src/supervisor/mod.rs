//! Crash-restart supervision for long-running workers.
//!
//! [`CrashRestartSupervisor::run`] calls a worker entry point until it
//! completes, is interrupted, fails fatally or exhausts its restart budget.
//!
//! | Outcome of one run | Decision |
//! |--------------------|----------|
//! | `Ok(())` | stop, [`SupervisorExit::Completed`] |
//! | [`WorkerFault::Interrupted`] | stop, [`SupervisorExit::Interrupted`] |
//! | fatal fault (`EBADF`) | stop, [`SupervisorExit::Fatal`], attempts untouched |
//! | anything else, panics included | attempt += 1, back off, rerun |
//!
//! Every crash is offered to each configured [`CrashSink`]; sink failures are
//! logged and otherwise ignored.

pub mod fault;
pub mod history;
pub mod policy;

use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::Utc;
use tracing::{info, warn};

pub use fault::WorkerFault;
pub use history::{
    CRASH_HISTORY_FILE_NAME, CrashAction, CrashHistoryFile, CrashRecord, CrashSink,
    TracingCrashSink,
};
pub use policy::RestartPolicy;

use crate::patrol::runner::panic_message;
use crate::shutdown::StopSignal;

/// Why supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The worker returned successfully.
    Completed,
    /// The worker reported an interrupt.
    Interrupted,
    /// The worker hit a fault restarting cannot fix.
    Fatal,
    /// The restart budget ran out.
    GaveUp,
    /// The stop signal fired before or between runs.
    Stopped,
}

impl SupervisorExit {
    /// Whether the exit should be reported as a success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted | Self::Stopped)
    }

    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Fatal => "fatal",
            Self::GaveUp => "gave_up",
            Self::Stopped => "stopped",
        }
    }
}

/// Final state of a supervision session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Why supervision ended.
    pub exit: SupervisorExit,
    /// Restart attempts consumed.
    pub attempts: u32,
    /// Rendered last fault, if any.
    pub last_fault: Option<String>,
}

/// Restarts a worker with bounded exponential backoff.
pub struct CrashRestartSupervisor {
    name: String,
    policy: RestartPolicy,
    sinks: Vec<Box<dyn CrashSink>>,
}

impl std::fmt::Debug for CrashRestartSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashRestartSupervisor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl CrashRestartSupervisor {
    /// Supervisor for the worker called `name`, without crash sinks.
    pub fn new(name: impl Into<String>, policy: RestartPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            sinks: Vec::new(),
        }
    }

    /// Adds a crash sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl CrashSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Runs `entry` under supervision until a terminal outcome.
    pub fn run<F>(&self, mut entry: F, stop: &StopSignal) -> SupervisorReport
    where
        F: FnMut() -> Result<(), WorkerFault>,
    {
        let mut attempts = 0_u32;
        let mut last_fault = None;
        loop {
            if stop.is_stopped() {
                return self.finish(SupervisorExit::Stopped, attempts, last_fault);
            }

            let outcome = catch_unwind(AssertUnwindSafe(&mut entry)).unwrap_or_else(|panic| {
                Err(WorkerFault::Panicked(panic_message(panic.as_ref())))
            });
            let fault = match outcome {
                Ok(()) => return self.finish(SupervisorExit::Completed, attempts, last_fault),
                Err(WorkerFault::Interrupted) => {
                    return self.finish(SupervisorExit::Interrupted, attempts, last_fault);
                },
                Err(fault) => fault,
            };
            last_fault = Some(fault.to_string());

            if fault.is_fatal() {
                self.record(&fault, attempts, CrashAction::Fatal, None);
                return self.finish(SupervisorExit::Fatal, attempts, last_fault);
            }

            attempts = attempts.saturating_add(1);
            if self.policy.exhausted(attempts) {
                self.record(&fault, attempts, CrashAction::GiveUp, None);
                return self.finish(SupervisorExit::GaveUp, attempts, last_fault);
            }

            let delay = self.policy.delay_for_attempt(attempts);
            self.record(&fault, attempts, CrashAction::Restart, Some(delay));
            if stop.wait_timeout(delay) {
                return self.finish(SupervisorExit::Stopped, attempts, last_fault);
            }
            info!(worker = %self.name, attempt = attempts, "restarting worker");
        }
    }

    fn record(
        &self,
        fault: &WorkerFault,
        attempt: u32,
        action: CrashAction,
        delay: Option<std::time::Duration>,
    ) {
        let crash = CrashRecord {
            timestamp: Utc::now(),
            worker: self.name.clone(),
            attempt,
            fault_kind: fault.kind().to_string(),
            message: fault.to_string(),
            action,
            delay_ms: delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        };
        for sink in &self.sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.record(&crash))) {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    warn!(worker = %self.name, error = %err, "failed to record crash");
                },
                Err(panic) => {
                    warn!(
                        worker = %self.name,
                        panic = %panic_message(panic.as_ref()),
                        "crash sink panicked"
                    );
                },
            }
        }
    }

    fn finish(
        &self,
        exit: SupervisorExit,
        attempts: u32,
        last_fault: Option<String>,
    ) -> SupervisorReport {
        info!(worker = %self.name, ?exit, attempts, "supervision finished");
        SupervisorReport {
            exit,
            attempts,
            last_fault,
        }
    }
}
