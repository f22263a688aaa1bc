//! # fleetwatch-core
//!
//! Shared state and health monitoring for fleets of interactive agents.
//!
//! The crate has three cooperating parts:
//!
//! - [`coordination`]: a lock-guarded JSON document through which independent
//!   processes agree on which orchestration runs are active, with a bounded,
//!   strictly sequenced event log.
//! - [`patrol`]: periodic sampling of agent terminal output, classified into
//!   [`AgentHealth`](patrol::AgentHealth) states and published as cycle
//!   reports.
//! - [`supervisor`]: crash-restart supervision with bounded exponential
//!   backoff and a structured crash history.
//!
//! ## Core Concepts
//!
//! - **Run**: a unit of orchestration work identified by `run_id`
//! - **Event log**: ordered record of every state change, sequence numbers
//!   strictly increasing and never reused
//! - **Fingerprint**: digest of an agent's trailing output lines; unchanged
//!   fingerprints accumulate stagnation
//! - **Binding warning**: one optional advisory string shown alongside the
//!   run table
//!
//! Everything that touches shared files goes through [`persist`], which
//! pairs an in-process mutex with an advisory file lock and replaces
//! documents atomically.

pub mod config;
pub mod coordination;
pub mod patrol;
pub mod persist;
pub mod shutdown;
pub mod supervisor;

pub use config::{ConfigError, FleetConfig, resolve_home};
pub use coordination::{CoordinationApi, CoordinationStore};
pub use patrol::{PatrolEngine, PatrolLoop};
pub use shutdown::StopSignal;
pub use supervisor::{CrashRestartSupervisor, RestartPolicy, WorkerFault};
