//! Coordination document types.
//!
//! - [`RunRecord`]: one active orchestration run
//! - [`EventRecord`]: one immutable entry of the bounded event log
//! - [`Projection`]: the materialized view (active runs + binding warning)
//!   derived from events
//! - [`CoordinationDocument`]: the persisted document holding all of the above
//!
//! Live mutations and replay share [`Projection::apply`], so the materialized
//! table is by construction what a replay of the log yields.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    COORDINATION_SCHEMA, KIND_BINDING_WARNING_CLEARED, KIND_BINDING_WARNING_SET, KIND_RESET,
    KIND_RUN_BEGIN, KIND_RUN_END, KIND_RUN_UPDATE,
};

/// An active orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Caller-chosen run identifier.
    pub run_id: String,
    /// Short status line, if one was ever supplied.
    #[serde(default)]
    pub status_header: Option<String>,
    /// Longer status text, if one was ever supplied.
    #[serde(default)]
    pub status_details: Option<String>,
    /// Sequence number of the latest event that touched this run.
    pub last_seq: u64,
    /// Timestamp of the latest event that touched this run.
    pub updated_at: DateTime<Utc>,
}

/// One entry in the coordination event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Global, strictly increasing sequence number.
    pub seq: u64,
    /// Time the event was appended.
    pub timestamp: DateTime<Utc>,
    /// Event kind (`run.begin`, `store.reset`, `patrol.cycle`, ...).
    pub kind: String,
    /// Free-text label of whoever caused the event.
    pub source: String,
    /// Kind-specific fields.
    #[serde(default)]
    pub payload: Value,
}

impl EventRecord {
    fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// A normalized begin/update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunChange {
    /// Run identifier (never blank).
    pub run_id: String,
    /// New header, `None` leaves the stored value.
    pub status_header: Option<String>,
    /// New details, `None` leaves the stored value.
    pub status_details: Option<String>,
}

impl RunChange {
    fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("run_id".to_string(), Value::from(self.run_id.as_str()));
        if let Some(header) = &self.status_header {
            payload.insert("status_header".to_string(), Value::from(header.as_str()));
        }
        if let Some(details) = &self.status_details {
            payload.insert("status_details".to_string(), Value::from(details.as_str()));
        }
        Value::Object(payload)
    }
}

/// Materialized view over the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// Active runs keyed by run id.
    #[serde(default)]
    pub active_runs: BTreeMap<String, RunRecord>,
    /// Advisory binding warning.
    #[serde(default)]
    pub binding_warning: Option<String>,
}

impl Projection {
    /// Folds one event into the view. Kinds the view does not track are
    /// ignored.
    pub fn apply(&mut self, event: &EventRecord) {
        match event.kind.as_str() {
            KIND_RUN_BEGIN | KIND_RUN_UPDATE => {
                let Some(run_id) = event.payload_str("run_id") else {
                    return;
                };
                let header = event.payload_str("status_header").map(str::to_string);
                let details = event.payload_str("status_details").map(str::to_string);
                let run = self
                    .active_runs
                    .entry(run_id.to_string())
                    .or_insert_with(|| RunRecord {
                        run_id: run_id.to_string(),
                        status_header: None,
                        status_details: None,
                        last_seq: event.seq,
                        updated_at: event.timestamp,
                    });
                if header.is_some() {
                    run.status_header = header;
                }
                if details.is_some() {
                    run.status_details = details;
                }
                run.last_seq = event.seq;
                run.updated_at = event.timestamp;
            },
            KIND_RUN_END => {
                if let Some(run_id) = event.payload_str("run_id") {
                    self.active_runs.remove(run_id);
                }
            },
            KIND_BINDING_WARNING_SET => {
                self.binding_warning = event.payload_str("binding_warning").map(str::to_string);
            },
            KIND_BINDING_WARNING_CLEARED => self.binding_warning = None,
            KIND_RESET => {
                self.active_runs.clear();
                self.binding_warning = None;
            },
            _ => {},
        }
    }

    /// Active runs ordered by most recent update first.
    #[must_use]
    pub fn runs_by_recency(&self) -> Vec<RunRecord> {
        let mut runs = self.active_runs.values().cloned().collect::<Vec<_>>();
        runs.sort_by(|a, b| b.last_seq.cmp(&a.last_seq));
        runs
    }
}

/// The persisted coordination document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationDocument {
    /// Schema identifier of the on-disk format.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Sequence number of the newest event ever appended since the last reset.
    #[serde(default)]
    pub last_seq: u64,
    /// Materialized view.
    #[serde(flatten)]
    pub projection: Projection,
    /// Bounded event log, oldest first.
    #[serde(default)]
    pub events: VecDeque<EventRecord>,
}

fn default_schema() -> String {
    COORDINATION_SCHEMA.to_string()
}

impl Default for CoordinationDocument {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            last_seq: 0,
            projection: Projection::default(),
            events: VecDeque::new(),
        }
    }
}

impl CoordinationDocument {
    /// Number of active runs.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.projection.active_runs.len()
    }

    /// Whether any run is active.
    #[must_use]
    pub fn running(&self) -> bool {
        !self.projection.active_runs.is_empty()
    }

    /// Appends an event, folds it into the projection and trims the log to
    /// `capacity`. Returns the new event's sequence number.
    pub fn record(
        &mut self,
        kind: &str,
        source: &str,
        payload: Value,
        now: DateTime<Utc>,
        capacity: usize,
    ) -> u64 {
        self.last_seq = self.last_seq.saturating_add(1);
        let event = EventRecord {
            seq: self.last_seq,
            timestamp: now,
            kind: kind.to_string(),
            source: source.to_string(),
            payload,
        };
        self.projection.apply(&event);
        self.events.push_back(event);
        while self.events.len() > capacity.max(1) {
            self.events.pop_front();
        }
        self.last_seq
    }

    /// Records a begin or update for `change`.
    pub fn upsert_run(
        &mut self,
        kind: &str,
        change: &RunChange,
        source: &str,
        now: DateTime<Utc>,
        capacity: usize,
    ) -> u64 {
        self.record(kind, source, change.to_payload(), now, capacity)
    }

    /// Records the end of `run_id`. Returns the event seq and whether the run
    /// was active.
    pub fn end_run(
        &mut self,
        run_id: &str,
        source: &str,
        now: DateTime<Utc>,
        capacity: usize,
    ) -> (u64, bool) {
        let existed = self.projection.active_runs.contains_key(run_id);
        let payload = serde_json::json!({ "run_id": run_id, "existed": existed });
        (self.record(KIND_RUN_END, source, payload, now, capacity), existed)
    }

    /// Overwrites or clears the binding warning.
    pub fn set_binding_warning(
        &mut self,
        warning: Option<&str>,
        source: &str,
        now: DateTime<Utc>,
        capacity: usize,
    ) -> u64 {
        match warning {
            Some(text) => self.record(
                KIND_BINDING_WARNING_SET,
                source,
                serde_json::json!({ "binding_warning": text }),
                now,
                capacity,
            ),
            None => self.record(
                KIND_BINDING_WARNING_CLEARED,
                source,
                Value::Object(Map::new()),
                now,
                capacity,
            ),
        }
    }

    /// Truncates the log to one reset event with seq 1 and clears the view.
    pub fn reset(&mut self, source: &str, now: DateTime<Utc>, capacity: usize) -> u64 {
        self.events.clear();
        self.last_seq = 0;
        self.record(KIND_RESET, source, Value::Object(Map::new()), now, capacity)
    }
}
