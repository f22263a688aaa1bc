//! fleetwatch - coordination and health patrol for fleets of AI agent sessions
//!
//! Every coordination command prints one JSON document on stdout. Logs go to
//! stderr (or `--log-file`) so the output stays machine-readable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetwatch_core::config::{DEFAULT_CONFIG_FILE, FleetConfig, resolve_home};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::exit_codes;

/// fleetwatch - agent fleet coordination and health patrol
#[derive(Parser, Debug)]
#[command(name = "fleetwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// State directory (overrides `FLEETWATCH_HOME` and the config file)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Coordination ===
    /// Begin, update or end a run
    #[command(subcommand)]
    Run(commands::coordination::RunCommand),

    /// Set or clear the binding warning
    #[command(subcommand)]
    Warning(commands::coordination::WarningCommand),

    /// Show active runs
    Status,

    /// List coordination events
    Events(commands::coordination::EventsArgs),

    /// Clear all runs and restart the event log
    Reset {
        /// Caller label recorded on the reset event
        #[arg(long)]
        source: Option<String>,
    },

    /// Check the coordination log against the active-run table
    Doctor,

    // === Patrol ===
    /// Run the health patrol loop under crash-restart supervision
    Patrol(commands::patrol::PatrolArgs),

    /// Show the per-agent status board
    Agents,

    // === Supervision ===
    /// Run a command, restarting it when it fails
    Supervise(commands::supervise::SuperviseArgs),

    /// Show recent crash history
    Crashes {
        /// Number of records to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Some(log_file) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let config = match FleetConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: Invalid configuration {} - {err}", cli.config.display());
            std::process::exit(i32::from(exit_codes::INVALID_ARGS));
        },
    };
    let home = match resolve_home(cli.home.as_deref(), &config) {
        Ok(home) => home,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(i32::from(exit_codes::INVALID_ARGS));
        },
    };
    tracing::debug!(home = %home.display(), "resolved state directory");

    let exit_code = match cli.command {
        Commands::Run(run_cmd) => {
            commands::coordination::run(&commands::open_api(&config, &home), &run_cmd)
        },
        Commands::Warning(warning_cmd) => {
            commands::coordination::warning(&commands::open_api(&config, &home), &warning_cmd)
        },
        Commands::Status => commands::coordination::status(&commands::open_api(&config, &home)),
        Commands::Events(events_args) => {
            commands::coordination::events(&commands::open_api(&config, &home), &events_args)
        },
        Commands::Reset { source } => {
            commands::coordination::reset(&commands::open_api(&config, &home), source.as_deref())
        },
        Commands::Doctor => commands::coordination::doctor(&commands::open_api(&config, &home)),
        Commands::Patrol(patrol_args) => commands::patrol::run(&patrol_args, &config, &home)?,
        Commands::Agents => commands::patrol::agents(&home),
        Commands::Supervise(supervise_args) => {
            commands::supervise::run(&supervise_args, &config, &home)?
        },
        Commands::Crashes { limit } => commands::supervise::crashes(&home, limit),
    };

    // Bypass anyhow so the exit code reaches the caller unchanged.
    std::process::exit(i32::from(exit_code));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["fleetwatch", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(cli.log_level, "warn");
        assert!(cli.home.is_none());
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_run_begin_flags() {
        let cli = Cli::try_parse_from([
            "fleetwatch",
            "--home",
            "/tmp/fw",
            "run",
            "begin",
            "build-1",
            "--header",
            "compiling",
            "--source",
            "ci",
        ])
        .unwrap();
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/fw")));
        let Commands::Run(commands::coordination::RunCommand::Begin(args)) = cli.command else {
            panic!("expected run begin");
        };
        assert_eq!(args.run_id.as_deref(), Some("build-1"));
        assert_eq!(args.header.as_deref(), Some("compiling"));
        assert_eq!(args.details, None);
        assert_eq!(args.source.as_deref(), Some("ci"));
    }

    #[test]
    fn test_events_accepts_raw_text() {
        // Non-numeric values are normalized later, never rejected by clap.
        let cli =
            Cli::try_parse_from(["fleetwatch", "events", "--limit", "lots", "--since-seq", "-5"])
                .unwrap();
        let Commands::Events(args) = cli.command else {
            panic!("expected events");
        };
        assert_eq!(args.limit.as_deref(), Some("lots"));
        assert_eq!(args.since_seq.as_deref(), Some("-5"));
    }

    #[test]
    fn test_supervise_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "fleetwatch",
            "supervise",
            "--name",
            "agent",
            "--",
            "python3",
            "-u",
            "agent.py",
        ])
        .unwrap();
        let Commands::Supervise(args) = cli.command else {
            panic!("expected supervise");
        };
        assert_eq!(args.name, "agent");
        assert_eq!(args.command, vec!["python3", "-u", "agent.py"]);
    }

    #[test]
    fn test_supervise_requires_command() {
        assert!(Cli::try_parse_from(["fleetwatch", "supervise"]).is_err());
    }

    #[test]
    fn test_patrol_once_conflicts_with_max_cycles() {
        assert!(
            Cli::try_parse_from(["fleetwatch", "patrol", "--once", "--max-cycles", "3"]).is_err()
        );
    }
}
