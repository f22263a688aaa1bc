//! `fleetwatch patrol` and `fleetwatch agents`.
//!
//! The patrol loop always runs inside the crash-restart supervisor. Session
//! discovery and output capture are external commands configured under
//! `[patrol]`; see `fleetwatch_core::patrol::command` for their JSON contract.
//!
//! # Exit Codes
//!
//! - 0: The loop finished (cycle bound reached or interrupted) and the last
//!   cycle succeeded
//! - 1: The supervisor gave up, hit a fatal fault, or the last cycle failed
//! - 2: Collaborator commands are not configured

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use fleetwatch_core::config::FleetConfig;
use fleetwatch_core::patrol::{
    CommandOutputReader, CommandSessionDirectory, CommandSpec, CycleReport, FingerprintMemory,
    PatrolEngine, PatrolLoop, StatusBoard,
};
use fleetwatch_core::supervisor::{
    CrashHistoryFile, CrashRestartSupervisor, SupervisorReport, TracingCrashSink, WorkerFault,
};
use serde::Serialize;
use tracing::info;

use super::{exit_codes, open_api, outcome, print_json, print_json_line, run_until_signalled};

/// `fleetwatch patrol` arguments.
#[derive(Debug, Args)]
pub struct PatrolArgs {
    /// Run a single cycle and exit
    #[arg(long, conflicts_with = "max_cycles")]
    pub once: bool,

    /// Stop after this many cycles (overrides the config file)
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// Seconds between cycles (overrides the config file)
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Print every cycle report as one JSON line
    #[arg(long)]
    pub json: bool,
}

impl PatrolArgs {
    fn max_cycles(&self, config: &FleetConfig) -> Option<u64> {
        if self.once {
            Some(1)
        } else {
            self.max_cycles.or(config.patrol.max_cycles)
        }
    }

    fn interval(&self, config: &FleetConfig) -> Duration {
        self.interval_secs
            .map_or(config.patrol.interval, Duration::from_secs)
    }
}

/// Final output when `--json` is not given.
#[derive(Debug, Serialize)]
struct PatrolOutcome {
    ok: bool,
    exit: &'static str,
    restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_cycle: Option<CycleReport>,
}

/// Runs the supervised patrol loop.
pub fn run(args: &PatrolArgs, config: &FleetConfig, home: &Path) -> Result<u8> {
    let engine = match build_engine(config, home) {
        Ok(engine) => engine,
        Err(msg) => {
            eprintln!("Error: Invalid arguments - {msg}");
            return Ok(exit_codes::INVALID_ARGS);
        },
    };
    let patrol = PatrolLoop::new(engine)
        .with_interval(args.interval(config))
        .with_max_cycles(args.max_cycles(config))
        .with_max_consecutive_failures(config.patrol.max_consecutive_failures);
    let supervisor = CrashRestartSupervisor::new("patrol", config.supervisor)
        .with_sink(TracingCrashSink)
        .with_sink(CrashHistoryFile::open(home));
    let json = args.json;
    let failure_limit = config.patrol.max_consecutive_failures.unwrap_or_default().max(1);

    info!(interval = ?args.interval(config), "starting patrol");
    let (report, last_cycle) = run_until_signalled(move |stop| {
        let mut memory = FingerprintMemory::new();
        let mut last_cycle: Option<CycleReport> = None;
        let report = supervisor.run(
            || {
                let summary = patrol.run_with(&mut memory, &stop, |report| {
                    if json {
                        print_json_line(report);
                    }
                    last_cycle = Some(report.clone());
                });
                if summary.stopped {
                    Err(WorkerFault::Interrupted)
                } else if summary.failure_budget_spent {
                    Err(WorkerFault::failed(format!(
                        "patrol failed {failure_limit} cycles in a row"
                    )))
                } else {
                    Ok(())
                }
            },
            &stop,
        );
        (report, last_cycle)
    })?;

    let ok = patrol_succeeded(&report, last_cycle.as_ref());
    if !json {
        print_json(&PatrolOutcome {
            ok,
            exit: report.exit.as_str(),
            restarts: report.attempts,
            last_fault: report.last_fault,
            last_cycle,
        });
    }
    Ok(outcome(ok))
}

fn patrol_succeeded(report: &SupervisorReport, last_cycle: Option<&CycleReport>) -> bool {
    report.exit.is_success() && last_cycle.is_none_or(|cycle| cycle.ok)
}

fn build_engine(config: &FleetConfig, home: &Path) -> Result<PatrolEngine, String> {
    let patrol = &config.patrol;
    let directory = CommandSpec::from_argv(&patrol.directory_command, patrol.command_timeout)
        .ok_or("patrol.directory_command is not configured")?;
    let reader = CommandSpec::from_argv(&patrol.reader_command, patrol.command_timeout)
        .ok_or("patrol.reader_command is not configured")?;

    let mut engine = PatrolEngine::new(
        CommandSessionDirectory::new(directory),
        CommandOutputReader::new(reader),
    )
    .with_settings(patrol.settings());
    if patrol.status_board {
        engine = engine.with_status_sink(StatusBoard::open(home));
    }
    if patrol.publish_events {
        engine = engine.with_publisher(open_api(config, home));
    }
    Ok(engine)
}

/// Prints the status board.
pub fn agents(home: &Path) -> u8 {
    match StatusBoard::open(home).load() {
        Ok(document) => {
            print_json(&document);
            exit_codes::SUCCESS
        },
        Err(err) => {
            print_json(&serde_json::json!({ "ok": false, "error": err.to_string() }));
            exit_codes::FAILED
        },
    }
}

#[cfg(test)]
mod tests {
    use fleetwatch_core::supervisor::SupervisorExit;

    use super::*;

    fn args() -> PatrolArgs {
        PatrolArgs {
            once: false,
            max_cycles: None,
            interval_secs: None,
            json: true,
        }
    }

    #[test]
    fn test_unconfigured_commands_are_invalid_args() {
        let home = tempfile::tempdir().unwrap();
        let code = run(&args(), &FleetConfig::default(), home.path()).unwrap();
        assert_eq!(code, exit_codes::INVALID_ARGS);
    }

    #[test]
    fn test_once_overrides_config_bound() {
        let mut config = FleetConfig::default();
        config.patrol.max_cycles = Some(50);
        let once = PatrolArgs {
            once: true,
            ..args()
        };
        assert_eq!(once.max_cycles(&config), Some(1));
        assert_eq!(args().max_cycles(&config), Some(50));

        let explicit = PatrolArgs {
            max_cycles: Some(3),
            ..args()
        };
        assert_eq!(explicit.max_cycles(&config), Some(3));
    }

    #[test]
    fn test_interval_override() {
        let config = FleetConfig::default();
        assert_eq!(args().interval(&config), config.patrol.interval);
        let fast = PatrolArgs {
            interval_secs: Some(2),
            ..args()
        };
        assert_eq!(fast.interval(&config), Duration::from_secs(2));
    }

    #[test]
    fn test_success_needs_clean_exit_and_clean_last_cycle() {
        let completed = SupervisorReport {
            exit: SupervisorExit::Completed,
            attempts: 0,
            last_fault: None,
        };
        let gave_up = SupervisorReport {
            exit: SupervisorExit::GaveUp,
            attempts: 6,
            last_fault: Some("patrol failed 10 cycles in a row".to_string()),
        };
        let failed_cycle = CycleReport::aborted(
            chrono::Utc::now(),
            fleetwatch_core::patrol::SourceFlags::default(),
            "no sessions".to_string(),
        );

        assert!(patrol_succeeded(&completed, None));
        assert!(!patrol_succeeded(&completed, Some(&failed_cycle)));
        assert!(!patrol_succeeded(&gave_up, None));
    }

    #[cfg(unix)]
    #[test]
    fn test_default_patrol_survives_long_outage() {
        let home = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.patrol.directory_command =
            vec!["sh".to_string(), "-c".to_string(), "exit 1".to_string()];
        config.patrol.reader_command = vec!["cat".to_string()];
        // Any fault handed to the supervisor would end the run immediately.
        config.supervisor.max_attempts = 0;
        let outage = PatrolArgs {
            max_cycles: Some(15),
            interval_secs: Some(0),
            ..args()
        };

        assert_eq!(run(&outage, &config, home.path()).unwrap(), exit_codes::FAILED);

        assert!(CrashHistoryFile::open(home.path()).recent(10).unwrap().is_empty());
        assert_eq!(open_api(&config, home.path()).snapshot().last_seq, 15);
    }

    #[test]
    fn test_agents_on_empty_home() {
        let home = tempfile::tempdir().unwrap();
        assert_eq!(agents(home.path()), exit_codes::SUCCESS);
    }

    #[cfg(unix)]
    #[test]
    fn test_single_cycle_against_shell_collaborators() {
        let home = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.patrol.directory_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"ok":true,"sessions":[{"agent_id":"a1","agent_name":"one","session_id":"%1"}]}'"#
                .to_string(),
        ];
        config.patrol.reader_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"cat >/dev/null; echo '{"ok":true,"results":[{"agent_id":"a1","output":["$"]}]}'"#
                .to_string(),
        ];
        let once = PatrolArgs {
            once: true,
            ..args()
        };

        assert_eq!(run(&once, &config, home.path()).unwrap(), exit_codes::SUCCESS);

        let board = StatusBoard::open(home.path()).load().unwrap();
        assert_eq!(board.agents.len(), 1);
        let api = open_api(&config, home.path());
        assert_eq!(api.snapshot().last_seq, 1);
    }
}
