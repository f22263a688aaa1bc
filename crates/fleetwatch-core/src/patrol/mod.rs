//! Agent health patrol.
//!
//! A patrol cycle samples every known agent through a [`SessionDirectory`]
//! and one bulk [`OutputReader`] call, classifies each agent (see
//! [`classify`](classify::classify) for the precedence table), aggregates the
//! results, and hands them to an optional [`StatusSink`] and
//! [`EventPublisher`]. [`PatrolLoop`] repeats cycles until a
//! [`StopSignal`](crate::shutdown::StopSignal) fires.
//!
//! Stagnation timing lives in a caller-owned [`FingerprintMemory`] passed by
//! `&mut` to each cycle, so cycles never overlap and the memory has exactly
//! one owner.
//!
//! ```rust
//! use fleetwatch_core::patrol::{
//!     AgentHealth, AgentOutput, CollaboratorError, FingerprintMemory, OutputReader,
//!     PatrolEngine, SessionDirectory, SessionRef,
//! };
//!
//! struct OneAgent;
//!
//! impl SessionDirectory for OneAgent {
//!     fn list_sessions(&self) -> Result<Vec<SessionRef>, CollaboratorError> {
//!         Ok(vec![SessionRef::new("a1", "builder", "%1")])
//!     }
//! }
//!
//! impl OutputReader for OneAgent {
//!     fn read_outputs(
//!         &self,
//!         _sessions: &[SessionRef],
//!     ) -> Result<Vec<AgentOutput>, CollaboratorError> {
//!         Ok(vec![AgentOutput::lines("a1", ["$"])])
//!     }
//! }
//!
//! let engine = PatrolEngine::new(OneAgent, OneAgent);
//! let report = engine.run_cycle_now(&mut FingerprintMemory::new());
//! assert!(report.ok);
//! assert_eq!(report.agents[0].status, AgentHealth::Idle);
//! assert_eq!(report.summary.healthy, 1);
//! ```

pub mod classify;
pub mod collaborators;
pub mod command;
pub mod engine;
pub mod fingerprint;
pub mod report;
pub mod runner;
pub mod status_board;


pub use classify::{Classifier, DEFAULT_STUCK_THRESHOLD, Verdict, classify};
pub use collaborators::{
    AgentOutput, CollaboratorError, EventPublisher, OutputReader, SessionDirectory, SessionRef,
    SinkError, StatusSink,
};
pub use command::{CommandOutputReader, CommandSessionDirectory, CommandSpec};
pub use engine::{CYCLE_EVENT_NAME, DEFAULT_TAIL_LINES, PatrolEngine, PatrolSettings};
pub use fingerprint::{DEFAULT_FINGERPRINT_LINES, FingerprintMemory, fingerprint};
pub use report::{AgentHealth, AgentStatus, CycleReport, CycleSummary, SourceFlags};
pub use runner::{DEFAULT_INTERVAL, LoopSummary, PatrolLoop};
pub use status_board::{StatusBoard, StatusDocument, StatusRow};
