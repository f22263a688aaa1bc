//! `fleetwatch supervise` and `fleetwatch crashes`.
//!
//! `supervise` runs a child process under the crash-restart supervisor:
//!
//! - exit status 0: completed
//! - killed by SIGINT or SIGTERM: interrupted, not restarted
//! - any other exit: restarted with backoff
//! - spawn failing with a bad file descriptor: fatal, not restarted
//!
//! SIGTERM/SIGINT received by fleetwatch are forwarded to the child as
//! SIGTERM; a child that outlives the grace period is killed.
//!
//! ```bash
//! fleetwatch supervise --name planner -- python3 -u planner.py
//! ```

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use fleetwatch_core::StopSignal;
use fleetwatch_core::config::FleetConfig;
use fleetwatch_core::supervisor::{
    CrashHistoryFile, CrashRestartSupervisor, TracingCrashSink, WorkerFault,
};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};
use wait_timeout::ChildExt;

use super::{exit_codes, outcome, print_json, run_until_signalled};

/// How often the child is polled while checking for a stop request.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Time a child gets to exit after SIGTERM before it is killed.
const TERM_GRACE: Duration = Duration::from_secs(10);

/// `fleetwatch supervise` arguments.
#[derive(Debug, Args)]
pub struct SuperviseArgs {
    /// Worker name used in logs and crash history
    #[arg(long, default_value = "worker")]
    pub name: String,

    /// Command to run, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SuperviseOutcome<'a> {
    ok: bool,
    name: &'a str,
    exit: &'static str,
    restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_fault: Option<String>,
}

/// Runs the command until it completes, is interrupted, or the restart
/// budget runs out.
pub fn run(args: &SuperviseArgs, config: &FleetConfig, home: &Path) -> Result<u8> {
    let Some((program, program_args)) = args.command.split_first() else {
        eprintln!("Error: Invalid arguments - no command given");
        return Ok(exit_codes::INVALID_ARGS);
    };
    let program = program.clone();
    let program_args = program_args.to_vec();
    let supervisor = CrashRestartSupervisor::new(args.name.clone(), config.supervisor)
        .with_sink(TracingCrashSink)
        .with_sink(CrashHistoryFile::open(home));

    let report = run_until_signalled(move |stop| {
        supervisor.run(|| run_child(&program, &program_args, &stop), &stop)
    })?;

    let ok = report.exit.is_success();
    print_json(&SuperviseOutcome {
        ok,
        name: &args.name,
        exit: report.exit.as_str(),
        restarts: report.attempts,
        last_fault: report.last_fault,
    });
    Ok(outcome(ok))
}

fn run_child(program: &str, args: &[String], stop: &StopSignal) -> Result<(), WorkerFault> {
    let mut child = Command::new(program).args(args).spawn()?;
    info!(pid = child.id(), program, "child started");

    loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            info!(%status, program, "child exited");
            return exit_outcome(status);
        }
        if stop.is_stopped() {
            terminate(&mut child)?;
            return Err(WorkerFault::Interrupted);
        }
    }
}

fn terminate(child: &mut Child) -> Result<(), WorkerFault> {
    match i32::try_from(child.id()) {
        Ok(pid) => {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(pid, error = %err, "failed to send SIGTERM to child");
            }
        },
        Err(_) => warn!(pid = child.id(), "child pid out of range"),
    }
    if child.wait_timeout(TERM_GRACE)?.is_none() {
        warn!(pid = child.id(), "child ignored SIGTERM, killing");
        child.kill()?;
        child.wait()?;
    }
    Ok(())
}

fn exit_outcome(status: ExitStatus) -> Result<(), WorkerFault> {
    if status.success() {
        return Ok(());
    }
    match status.signal() {
        Some(signal) if signal == Signal::SIGINT as i32 || signal == Signal::SIGTERM as i32 => {
            Err(WorkerFault::Interrupted)
        },
        Some(signal) => Err(WorkerFault::failed(format!("child killed by signal {signal}"))),
        None => Err(WorkerFault::failed(format!("child {status}"))),
    }
}

/// Prints the most recent crash records.
pub fn crashes(home: &Path, limit: usize) -> u8 {
    match CrashHistoryFile::open(home).recent(limit) {
        Ok(records) => {
            print_json(&serde_json::json!({ "ok": true, "crashes": records }));
            exit_codes::SUCCESS
        },
        Err(err) => {
            print_json(&serde_json::json!({ "ok": false, "error": err.to_string() }));
            exit_codes::FAILED
        },
    }
}
