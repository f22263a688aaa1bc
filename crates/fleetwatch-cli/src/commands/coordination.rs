//! Coordination commands: `run`, `warning`, `status`, `events`, `reset` and
//! `doctor`.
//!
//! Each command prints the API response as JSON and exits 0 when the response
//! says `ok`, 1 otherwise. `doctor` additionally requires the log to be
//! consistent with the active-run table.
//!
//! ```bash
//! fleetwatch run begin build-42 --header "compiling" --source ci
//! fleetwatch events --since-seq 10 --limit 50
//! ```

use clap::{Args, Subcommand};
use fleetwatch_core::coordination::{CoordinationApi, EventQuery, RunRequest};

use super::{outcome, print_json};

/// `fleetwatch run` subcommands.
#[derive(Subcommand, Debug)]
pub enum RunCommand {
    /// Start (or refresh) a run
    Begin(RunArgs),

    /// Update a run; omitted fields keep their previous value
    Update(RunArgs),

    /// Remove a run from the active table
    End {
        /// Run identifier (defaults to "default")
        run_id: Option<String>,

        /// Caller label
        #[arg(long)]
        source: Option<String>,
    },
}

/// Arguments shared by `run begin` and `run update`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run identifier (defaults to "default")
    pub run_id: Option<String>,

    /// One-line status header
    #[arg(long)]
    pub header: Option<String>,

    /// Free-form status details
    #[arg(long)]
    pub details: Option<String>,

    /// Caller label
    #[arg(long)]
    pub source: Option<String>,
}

impl RunArgs {
    fn request(&self) -> RunRequest {
        RunRequest {
            run_id: self.run_id.clone(),
            status_header: self.header.clone(),
            status_details: self.details.clone(),
            source: self.source.clone(),
        }
    }
}

/// `fleetwatch warning` subcommands.
#[derive(Subcommand, Debug)]
pub enum WarningCommand {
    /// Set the binding warning (blank text clears it)
    Set {
        /// Warning text
        text: String,

        /// Caller label
        #[arg(long)]
        source: Option<String>,
    },

    /// Clear the binding warning
    Clear {
        /// Caller label
        #[arg(long)]
        source: Option<String>,
    },
}

/// `fleetwatch events` arguments.
///
/// Values are taken as raw text so that anything unparsable falls back to the
/// defaults instead of failing.
#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Maximum events to return (1-1000, default 100)
    #[arg(short = 'n', long, allow_hyphen_values = true)]
    pub limit: Option<String>,

    /// Only events with a greater sequence number
    #[arg(long, allow_hyphen_values = true)]
    pub since_seq: Option<String>,
}

/// Runs a `run` subcommand.
pub fn run(api: &CoordinationApi, command: &RunCommand) -> u8 {
    let response = match command {
        RunCommand::Begin(args) => api.begin(&args.request()),
        RunCommand::Update(args) => api.update(&args.request()),
        RunCommand::End { run_id, source } => api.end(run_id.as_deref(), source.as_deref()),
    };
    print_json(&response);
    outcome(response.ok)
}

/// Runs a `warning` subcommand.
pub fn warning(api: &CoordinationApi, command: &WarningCommand) -> u8 {
    let response = match command {
        WarningCommand::Set { text, source } => {
            api.set_binding_warning(Some(text), source.as_deref())
        },
        WarningCommand::Clear { source } => api.clear_binding_warning(source.as_deref()),
    };
    print_json(&response);
    outcome(response.ok)
}

/// Prints the active-run snapshot.
pub fn status(api: &CoordinationApi) -> u8 {
    let snapshot = api.snapshot();
    print_json(&snapshot);
    outcome(snapshot.ok)
}

/// Prints a page of events.
pub fn events(api: &CoordinationApi, args: &EventsArgs) -> u8 {
    let query = EventQuery::parse(args.limit.as_deref(), args.since_seq.as_deref());
    let page = api.list_events(query);
    print_json(&page);
    outcome(page.ok)
}

/// Resets the store.
pub fn reset(api: &CoordinationApi, source: Option<&str>) -> u8 {
    let response = api.reset(source);
    print_json(&response);
    outcome(response.ok)
}

/// Verifies the log against the active-run table.
pub fn doctor(api: &CoordinationApi) -> u8 {
    let report = api.verify();
    print_json(&report);
    outcome(report.ok && report.consistent)
}
