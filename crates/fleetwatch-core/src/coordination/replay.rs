//! Log replay and consistency checking.

use serde::{Deserialize, Serialize};

use super::state::{CoordinationDocument, EventRecord, Projection};

/// Folds `events` (oldest first) into a fresh projection.
#[must_use]
pub fn replay<'a>(events: impl IntoIterator<Item = &'a EventRecord>) -> Projection {
    let mut projection = Projection::default();
    for event in events {
        projection.apply(event);
    }
    projection
}

/// Outcome of [`verify_document`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Whether the document could be read.
    pub ok: bool,
    /// No mismatches were found.
    pub consistent: bool,
    /// The oldest retained event has seq 1, so a full replay was possible.
    pub log_complete: bool,
    /// Number of events in the log.
    pub retained_events: usize,
    /// Newest sequence number recorded in the document.
    pub last_seq: u64,
    /// Active runs produced by the replay (only when the log is complete).
    pub replayed_runs: usize,
    /// Human-readable descriptions of every mismatch.
    pub mismatches: Vec<String>,
    /// Failure detail when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyReport {
    pub(super) fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Checks sequencing invariants and, when the log still starts at seq 1,
/// that replaying it reproduces the materialized view.
#[must_use]
pub fn verify_document(document: &CoordinationDocument) -> VerifyReport {
    let mut mismatches = Vec::new();

    let mut previous: Option<u64> = None;
    for event in &document.events {
        if let Some(prev) = previous {
            if event.seq <= prev {
                mismatches.push(format!(
                    "event seq {} does not follow previous seq {prev}",
                    event.seq
                ));
            }
        }
        previous = Some(event.seq);
    }
    if let Some(newest) = document.events.back() {
        if newest.seq != document.last_seq {
            mismatches.push(format!(
                "newest event seq {} differs from last_seq {}",
                newest.seq, document.last_seq
            ));
        }
    }

    let log_complete = document.events.front().is_some_and(|event| event.seq == 1);
    let mut replayed_runs = 0;
    if log_complete {
        let replayed = replay(&document.events);
        replayed_runs = replayed.active_runs.len();
        for (run_id, run) in &document.projection.active_runs {
            match replayed.active_runs.get(run_id) {
                Some(found) if found == run => {},
                Some(found) => mismatches.push(format!(
                    "run {run_id} differs from replay (stored seq {}, replayed seq {})",
                    run.last_seq, found.last_seq
                )),
                None => mismatches.push(format!("run {run_id} is active but absent from replay")),
            }
        }
        for run_id in replayed.active_runs.keys() {
            if !document.projection.active_runs.contains_key(run_id) {
                mismatches.push(format!("run {run_id} is active in replay but not stored"));
            }
        }
        if replayed.binding_warning != document.projection.binding_warning {
            mismatches.push("binding warning differs from replay".to_string());
        }
    }

    VerifyReport {
        ok: true,
        consistent: mismatches.is_empty(),
        log_complete,
        retained_events: document.events.len(),
        last_seq: document.last_seq,
        replayed_runs,
        mismatches,
        error: None,
    }
}
