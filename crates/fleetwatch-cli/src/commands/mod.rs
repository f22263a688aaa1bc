//! Subcommand implementations.

use std::path::Path;

use anyhow::{Context, Result};
use fleetwatch_core::StopSignal;
use fleetwatch_core::config::FleetConfig;
use fleetwatch_core::coordination::{CoordinationApi, CoordinationStore};
use serde::Serialize;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

pub mod coordination;
pub mod patrol;
pub mod supervise;

/// Exit codes shared by every subcommand.
pub mod exit_codes {
    /// The operation succeeded.
    pub const SUCCESS: u8 = 0;
    /// The operation ran but reported failure.
    pub const FAILED: u8 = 1;
    /// Invalid arguments or configuration.
    pub const INVALID_ARGS: u8 = 2;
}

/// Maps an `ok` flag to an exit code.
pub const fn outcome(ok: bool) -> u8 {
    if ok {
        exit_codes::SUCCESS
    } else {
        exit_codes::FAILED
    }
}

/// Coordination API over the configured state directory.
pub fn open_api(config: &FleetConfig, home: &Path) -> CoordinationApi {
    CoordinationApi::new(CoordinationStore::open(home).with_event_capacity(config.store.event_capacity))
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    let output = serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        format!("{{\"ok\": false, \"error\": \"output serialization failed: {e}\"}}")
    });
    println!("{output}");
}

/// Prints `value` as a single JSON line on stdout.
pub fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "output serialization failed"),
    }
}

/// Runs `work` on a blocking thread while SIGTERM/SIGINT trip the stop signal
/// handed to it.
pub fn run_until_signalled<T, F>(work: F) -> Result<T>
where
    F: FnOnce(StopSignal) -> T + Send + 'static,
    T: Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let stop = StopSignal::new();
    runtime.block_on(async move {
        let signal_task = tokio::spawn(forward_signals(stop.clone()));
        let result = tokio::task::spawn_blocking(move || work(stop))
            .await
            .context("worker thread failed")?;
        signal_task.abort();
        Ok::<T, anyhow::Error>(result)
    })
}

async fn forward_signals(stop: StopSignal) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "failed to register signal handlers");
                return;
            },
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    stop.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_codes::SUCCESS, 0);
        assert_eq!(exit_codes::FAILED, 1);
        assert_eq!(exit_codes::INVALID_ARGS, 2);
        assert_eq!(outcome(true), exit_codes::SUCCESS);
        assert_eq!(outcome(false), exit_codes::FAILED);
    }

    #[test]
    fn test_run_until_signalled_returns_work_result() {
        let value = run_until_signalled(|stop| {
            assert!(!stop.is_stopped());
            41 + 1
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_open_api_uses_configured_capacity() {
        let home = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.store.event_capacity = 3;
        let api = open_api(&config, home.path());
        assert_eq!(api.store().event_capacity(), 3);
        assert_eq!(api.store().state_path().parent(), Some(home.path()));
    }
}
