//! Cross-process coordination state.
//!
//! Independent processes (orchestrator, terminal driver, monitors) agree on
//! which orchestration runs are active through one shared JSON document. The
//! document holds the active-run table, an optional binding warning and a
//! bounded, strictly sequenced event log.
//!
//! # Layers
//!
//! - [`CoordinationStore`]: one exclusive transaction per call; the document
//!   is loaded, mutated and atomically replaced under a lock shared by every
//!   thread and process.
//! - [`CoordinationApi`]: normalizes requests (blank ids, blank status
//!   fields, blank sources) and turns every outcome into a response with an
//!   `ok` flag.
//!
//! # Event kinds
//!
//! | Kind | Effect on the active-run table |
//! |------|--------------------------------|
//! | `run.begin` / `run.update` | upsert; only supplied fields overwrite |
//! | `run.end` | remove |
//! | `binding_warning.set` / `binding_warning.cleared` | none (warning slot only) |
//! | `store.reset` | clear everything |
//!
//! Any other kind (for example `patrol.cycle`) is history only.
//!
//! # Example
//!
//! ```rust
//! use fleetwatch_core::coordination::{CoordinationApi, CoordinationStore, RunRequest};
//!
//! let home = tempfile::tempdir().unwrap();
//! let api = CoordinationApi::new(CoordinationStore::open(home.path()));
//!
//! api.begin(&RunRequest::new("r1").header("planning").details("step 1"));
//! api.update(&RunRequest::new("r1").details("step 2"));
//!
//! let snapshot = api.snapshot();
//! assert!(snapshot.running);
//! assert_eq!(snapshot.active_runs[0].status_header.as_deref(), Some("planning"));
//! assert_eq!(snapshot.active_runs[0].status_details.as_deref(), Some("step 2"));
//! ```

pub mod api;
pub mod query;
pub mod replay;
pub mod state;
pub mod store;


pub use api::{
    CoordinationApi, EventPage, LifecycleResponse, RunRequest, Snapshot, normalize_run_id,
    normalize_source,
};
pub use query::{DEFAULT_EVENT_LIMIT, EventQuery, MAX_EVENT_LIMIT};
pub use replay::{VerifyReport, replay, verify_document};
pub use state::{CoordinationDocument, EventRecord, Projection, RunChange, RunRecord};
pub use store::{CoordinationStore, StoreError, TxMode};

/// Schema identifier written into the coordination document.
pub const COORDINATION_SCHEMA: &str = "fleetwatch.coordination.v1";

/// Run id used when callers omit one.
pub const DEFAULT_RUN_ID: &str = "default";

/// Source label used when callers omit one.
pub const DEFAULT_SOURCE: &str = "unknown";

/// Default bound on the event log.
pub const DEFAULT_EVENT_CAPACITY: usize = 2000;

/// A run started.
pub const KIND_RUN_BEGIN: &str = "run.begin";
/// A run's status changed.
pub const KIND_RUN_UPDATE: &str = "run.update";
/// A run finished.
pub const KIND_RUN_END: &str = "run.end";
/// The binding warning was set.
pub const KIND_BINDING_WARNING_SET: &str = "binding_warning.set";
/// The binding warning was cleared.
pub const KIND_BINDING_WARNING_CLEARED: &str = "binding_warning.cleared";
/// The store was reset.
pub const KIND_RESET: &str = "store.reset";

/// Whether `kind` is one of the kinds the store itself emits.
#[must_use]
pub fn is_reserved_kind(kind: &str) -> bool {
    matches!(
        kind,
        KIND_RUN_BEGIN
            | KIND_RUN_UPDATE
            | KIND_RUN_END
            | KIND_BINDING_WARNING_SET
            | KIND_BINDING_WARNING_CLEARED
            | KIND_RESET
    )
}
