//! Request normalization and structured responses over the coordination
//! store.
//!
//! Every operation returns a serializable response carrying `ok` and an
//! optional `error`; store failures never escape as `Err`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::query::EventQuery;
use super::replay::{VerifyReport, verify_document};
use super::state::{CoordinationDocument, EventRecord, RunChange, RunRecord};
use super::store::{CoordinationStore, StoreError};
use super::{DEFAULT_RUN_ID, DEFAULT_SOURCE, KIND_RUN_BEGIN, KIND_RUN_UPDATE, is_reserved_kind};
use crate::patrol::{EventPublisher, SinkError};

/// Begin/update request as received from callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Run identifier; blank selects [`DEFAULT_RUN_ID`].
    #[serde(default)]
    pub run_id: Option<String>,
    /// Header; blank leaves the stored value untouched.
    #[serde(default)]
    pub status_header: Option<String>,
    /// Details; blank leaves the stored value untouched.
    #[serde(default)]
    pub status_details: Option<String>,
    /// Caller label; blank selects [`DEFAULT_SOURCE`].
    #[serde(default)]
    pub source: Option<String>,
}

impl RunRequest {
    /// Request for `run_id` with no status fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    /// Sets the header.
    #[must_use]
    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.status_header = Some(header.into());
        self
    }

    /// Sets the details.
    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.status_details = Some(details.into());
        self
    }

    /// Sets the caller label.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn normalize(&self) -> (RunChange, String) {
        let change = RunChange {
            run_id: normalize_run_id(self.run_id.as_deref()),
            status_header: non_blank(self.status_header.as_deref()),
            status_details: non_blank(self.status_details.as_deref()),
        };
        (change, normalize_source(self.source.as_deref()))
    }
}

/// Returns `run_id` trimmed, or the sentinel when blank or absent.
#[must_use]
pub fn normalize_run_id(run_id: Option<&str>) -> String {
    non_blank(run_id).unwrap_or_else(|| DEFAULT_RUN_ID.to_string())
}

/// Returns `source` trimmed, or the default label when blank or absent.
#[must_use]
pub fn normalize_source(source: Option<&str>) -> String {
    non_blank(source).unwrap_or_else(|| DEFAULT_SOURCE.to_string())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Response of every lifecycle mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleResponse {
    /// Whether the operation was applied.
    pub ok: bool,
    /// Sequence number of the event the operation appended.
    pub seq: u64,
    /// Active runs after the operation.
    pub active_count: usize,
    /// Whether any run is active after the operation.
    pub running: bool,
    /// Binding warning after the operation.
    pub binding_warning: Option<String>,
    /// For `end`: whether the run was active beforehand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existed: Option<bool>,
    /// Failure detail when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LifecycleResponse {
    fn from_document(document: &CoordinationDocument, seq: u64) -> Self {
        Self {
            ok: true,
            seq,
            active_count: document.active_count(),
            running: document.running(),
            binding_warning: document.projection.binding_warning.clone(),
            existed: None,
            error: None,
        }
    }

    fn failed(error: &StoreError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Point-in-time view of the active runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Whether the snapshot could be read.
    pub ok: bool,
    /// Whether any run is active.
    pub running: bool,
    /// Number of active runs.
    pub active_count: usize,
    /// Binding warning, if set.
    pub binding_warning: Option<String>,
    /// Active runs, most recently updated first.
    pub active_runs: Vec<RunRecord>,
    /// Sequence number of the newest event.
    pub last_seq: u64,
    /// Failure detail when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Page of events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// Whether the log could be read.
    pub ok: bool,
    /// Matching events, oldest first.
    pub events: Vec<EventRecord>,
    /// Effective limit after normalization.
    pub limit: usize,
    /// Effective lower bound after normalization.
    pub since_seq: u64,
    /// Sequence number of the newest event.
    pub last_seq: u64,
    /// Failure detail when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Coordination operations over a [`CoordinationStore`].
#[derive(Debug, Clone)]
pub struct CoordinationApi {
    store: CoordinationStore,
}

impl CoordinationApi {
    /// Wraps `store`.
    #[must_use]
    pub const fn new(store: CoordinationStore) -> Self {
        Self { store }
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &CoordinationStore {
        &self.store
    }

    /// Starts (or refreshes) a run.
    pub fn begin(&self, request: &RunRequest) -> LifecycleResponse {
        self.upsert(KIND_RUN_BEGIN, request)
    }

    /// Updates a run; only supplied fields change. Unknown runs are created.
    pub fn update(&self, request: &RunRequest) -> LifecycleResponse {
        self.upsert(KIND_RUN_UPDATE, request)
    }

    fn upsert(&self, kind: &str, request: &RunRequest) -> LifecycleResponse {
        let (change, source) = request.normalize();
        let capacity = self.store.event_capacity();
        let result = self.store.write(|document| {
            let seq = document.upsert_run(kind, &change, &source, Utc::now(), capacity);
            LifecycleResponse::from_document(document, seq)
        });
        match result {
            Ok(response) => {
                info!(
                    kind,
                    run_id = %change.run_id,
                    seq = response.seq,
                    active = response.active_count,
                    "run upserted"
                );
                response
            },
            Err(err) => {
                warn!(kind, run_id = %change.run_id, error = %err, "run upsert failed");
                LifecycleResponse::failed(&err)
            },
        }
    }

    /// Removes a run from the active table. Its events are retained.
    pub fn end(&self, run_id: Option<&str>, source: Option<&str>) -> LifecycleResponse {
        let run_id = normalize_run_id(run_id);
        let source = normalize_source(source);
        let capacity = self.store.event_capacity();
        let result = self.store.write(|document| {
            let (seq, existed) = document.end_run(&run_id, &source, Utc::now(), capacity);
            LifecycleResponse {
                existed: Some(existed),
                ..LifecycleResponse::from_document(document, seq)
            }
        });
        match result {
            Ok(response) => {
                info!(%run_id, seq = response.seq, active = response.active_count, "run ended");
                response
            },
            Err(err) => {
                warn!(%run_id, error = %err, "run end failed");
                LifecycleResponse::failed(&err)
            },
        }
    }

    /// Overwrites the binding warning; `None` or blank text clears it.
    pub fn set_binding_warning(
        &self,
        warning: Option<&str>,
        source: Option<&str>,
    ) -> LifecycleResponse {
        let warning = non_blank(warning);
        let source = normalize_source(source);
        let capacity = self.store.event_capacity();
        self.store
            .write(|document| {
                let seq =
                    document.set_binding_warning(warning.as_deref(), &source, Utc::now(), capacity);
                LifecycleResponse::from_document(document, seq)
            })
            .unwrap_or_else(|err| {
                warn!(error = %err, "binding warning update failed");
                LifecycleResponse::failed(&err)
            })
    }

    /// Clears the binding warning.
    pub fn clear_binding_warning(&self, source: Option<&str>) -> LifecycleResponse {
        self.set_binding_warning(None, source)
    }

    /// Current active runs, most recently updated first.
    pub fn snapshot(&self) -> Snapshot {
        self.store
            .read(|document| Snapshot {
                ok: true,
                running: document.running(),
                active_count: document.active_count(),
                binding_warning: document.projection.binding_warning.clone(),
                active_runs: document.projection.runs_by_recency(),
                last_seq: document.last_seq,
                error: None,
            })
            .unwrap_or_else(|err| Snapshot {
                error: Some(err.to_string()),
                ..Snapshot::default()
            })
    }

    /// Events with `seq > since_seq`, at most `limit` of the most recent,
    /// oldest first.
    pub fn list_events(&self, query: EventQuery) -> EventPage {
        self.store
            .read(|document| {
                let matching = document
                    .events
                    .iter()
                    .filter(|event| event.seq > query.since_seq())
                    .collect::<Vec<_>>();
                let skip = matching.len().saturating_sub(query.limit());
                EventPage {
                    ok: true,
                    events: matching.into_iter().skip(skip).cloned().collect(),
                    limit: query.limit(),
                    since_seq: query.since_seq(),
                    last_seq: document.last_seq,
                    error: None,
                }
            })
            .unwrap_or_else(|err| EventPage {
                limit: query.limit(),
                since_seq: query.since_seq(),
                error: Some(err.to_string()),
                ..EventPage::default()
            })
    }

    /// Truncates the log to a single reset event (seq 1) and clears all
    /// runs and the binding warning.
    pub fn reset(&self, source: Option<&str>) -> LifecycleResponse {
        let source = normalize_source(source);
        let capacity = self.store.event_capacity();
        match self.store.write(|document| {
            let seq = document.reset(&source, Utc::now(), capacity);
            LifecycleResponse::from_document(document, seq)
        }) {
            Ok(response) => {
                info!(%source, "coordination store reset");
                response
            },
            Err(err) => {
                warn!(error = %err, "coordination reset failed");
                LifecycleResponse::failed(&err)
            },
        }
    }

    /// Replays the retained log and compares it with the materialized view.
    pub fn verify(&self) -> VerifyReport {
        self.store
            .read(verify_document)
            .unwrap_or_else(|err| VerifyReport::failed(err.to_string()))
    }
}

impl EventPublisher for CoordinationApi {
    fn publish(&self, event_name: &str, payload: &Value) -> Result<(), SinkError> {
        let kind = event_name.trim();
        if kind.is_empty() || is_reserved_kind(kind) {
            return Err(SinkError::Rejected(format!(
                "event name '{event_name}' is reserved or empty"
            )));
        }
        let capacity = self.store.event_capacity();
        self.store
            .write(|document| {
                document.record(kind, "patrol", payload.clone(), Utc::now(), capacity)
            })
            .map(|_| ())
            .map_err(|err| SinkError::Failed(err.to_string()))
    }
}
