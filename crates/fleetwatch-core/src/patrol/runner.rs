//! Repeated patrol cycles with an interruptible wait between them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use super::engine::PatrolEngine;
use super::fingerprint::FingerprintMemory;
use super::report::{CycleReport, SourceFlags};
use crate::shutdown::StopSignal;

/// Default pause between cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a finished loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Cycles executed, including failed ones.
    pub cycles: u64,
    /// Cycles whose report had `ok == false`.
    pub failed_cycles: u64,
    /// True when the stop signal ended the loop.
    pub stopped: bool,
    /// True when too many consecutive cycles failed.
    pub failure_budget_spent: bool,
}

/// Runs [`PatrolEngine`] cycles back to back.
#[derive(Debug)]
pub struct PatrolLoop {
    engine: PatrolEngine,
    interval: Duration,
    max_cycles: Option<u64>,
    max_consecutive_failures: Option<u64>,
}

impl PatrolLoop {
    /// Loop with the default interval and no cycle bound.
    #[must_use]
    pub const fn new(engine: PatrolEngine) -> Self {
        Self {
            engine,
            interval: DEFAULT_INTERVAL,
            max_cycles: None,
            max_consecutive_failures: None,
        }
    }

    /// Sets the pause between cycles.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stops after `max_cycles` cycles.
    #[must_use]
    pub const fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Ends the loop after `limit` failed cycles in a row.
    #[must_use]
    pub const fn with_max_consecutive_failures(mut self, limit: Option<u64>) -> Self {
        self.max_consecutive_failures = limit;
        self
    }

    /// Underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &PatrolEngine {
        &self.engine
    }

    /// Runs until stopped or the cycle bound is reached.
    pub fn run(&self, memory: &mut FingerprintMemory, stop: &StopSignal) -> LoopSummary {
        self.run_with(memory, stop, |_| {})
    }

    /// Like [`run`](Self::run), handing every report to `on_report`.
    pub fn run_with<F>(
        &self,
        memory: &mut FingerprintMemory,
        stop: &StopSignal,
        mut on_report: F,
    ) -> LoopSummary
    where
        F: FnMut(&CycleReport),
    {
        let mut summary = LoopSummary::default();
        let mut consecutive_failures = 0_u64;
        loop {
            if stop.is_stopped() {
                summary.stopped = true;
                break;
            }
            if self.max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }

            let report = self.guarded_cycle(memory);
            summary.cycles += 1;
            if report.ok {
                consecutive_failures = 0;
            } else {
                summary.failed_cycles += 1;
                consecutive_failures += 1;
            }
            on_report(&report);

            if self
                .max_consecutive_failures
                .is_some_and(|limit| consecutive_failures >= limit.max(1))
            {
                warn!(consecutive_failures, "patrol failure budget spent");
                summary.failure_budget_spent = true;
                break;
            }

            if self.max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            if stop.wait_timeout(self.interval) {
                summary.stopped = true;
                break;
            }
        }
        info!(
            cycles = summary.cycles,
            failed = summary.failed_cycles,
            stopped = summary.stopped,
            "patrol loop exited"
        );
        summary
    }

    fn guarded_cycle(&self, memory: &mut FingerprintMemory) -> CycleReport {
        let started = Utc::now();
        match catch_unwind(AssertUnwindSafe(|| self.engine.run_cycle(memory, started))) {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "patrol cycle panicked");
                let report = CycleReport::aborted(
                    started,
                    SourceFlags::default(),
                    format!("patrol cycle panicked: {message}"),
                );
                self.engine.publish(&report);
                report
            },
        }
    }
}

/// Renders a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
