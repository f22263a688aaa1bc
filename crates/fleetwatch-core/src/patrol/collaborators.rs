//! Interfaces the patrol engine depends on.
//!
//! The engine never talks to terminals itself. A session directory lists the
//! live sessions, a bulk output reader returns their visible text, and two
//! optional sinks receive the results. Production adapters and test doubles
//! implement the same traits.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::report::AgentStatus;
use crate::persist::PersistError;

/// One agent known to the session directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    /// Stable agent identifier.
    pub agent_id: String,
    /// Display name.
    #[serde(default)]
    pub agent_name: String,
    /// Backing terminal session; empty when the agent has none.
    #[serde(default)]
    pub session_id: String,
}

impl SessionRef {
    /// Convenience constructor.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            session_id: session_id.into(),
        }
    }

    /// Whether a terminal session backs this agent.
    #[must_use]
    pub fn has_session(&self) -> bool {
        !self.session_id.trim().is_empty()
    }
}

/// Recent visible output of one agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Agent the output belongs to.
    pub agent_id: String,
    /// Visible lines, oldest first.
    #[serde(default, deserialize_with = "deserialize_lines")]
    pub output: Vec<String>,
    /// Per-agent read failure reported by the reader.
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentOutput {
    /// Output with the given lines and no error.
    #[must_use]
    pub fn lines<I, S>(agent_id: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent_id: agent_id.into(),
            output: lines.into_iter().map(Into::into).collect(),
            error: None,
        }
    }

    /// Output carrying only a per-agent error.
    #[must_use]
    pub fn failed(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            output: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Accepts either a list of lines or one block of text.
fn deserialize_lines<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lines {
        List(Vec<String>),
        Text(String),
        Nothing(()),
    }

    Ok(match Lines::deserialize(deserializer)? {
        Lines::List(lines) => lines,
        Lines::Text(text) => text.lines().map(str::to_string).collect(),
        Lines::Nothing(()) => Vec::new(),
    })
}

/// Failure of a session directory or output reader.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The collaborator answered but reported `ok: false`.
    #[error("{0}")]
    Reported(String),

    /// The backing command could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Exchanging data with the backing command failed.
    #[error("i/o with {program} failed: {source}")]
    Io {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing command did not finish in time and was killed.
    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout {
        /// Program name.
        program: String,
        /// Configured timeout.
        timeout_ms: u128,
    },

    /// The backing command exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        /// Program name.
        program: String,
        /// Rendered exit status.
        status: String,
        /// Trimmed standard error.
        stderr: String,
    },

    /// The answer did not follow the JSON contract.
    #[error("{program} returned malformed output: {source}")]
    Parse {
        /// Program name.
        program: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a status sink or event publisher.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused the input.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Persisting the input failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Any other sink failure.
    #[error("{0}")]
    Failed(String),
}

/// Lists the agents and their backing sessions.
pub trait SessionDirectory: Send + Sync {
    /// Returns every known agent. A failure aborts the patrol cycle.
    fn list_sessions(&self) -> Result<Vec<SessionRef>, CollaboratorError>;
}

/// Reads recent visible output for many sessions in one call.
pub trait OutputReader: Send + Sync {
    /// Returns output for (a subset of) `sessions`, keyed by `agent_id`.
    fn read_outputs(&self, sessions: &[SessionRef]) -> Result<Vec<AgentOutput>, CollaboratorError>;
}

/// Persists per-agent status rows.
pub trait StatusSink: Send + Sync {
    /// Inserts or replaces the row for `status.agent_id`.
    fn upsert(&self, status: &AgentStatus) -> Result<(), SinkError>;
}

/// Receives one event per patrol cycle.
pub trait EventPublisher: Send + Sync {
    /// Publishes `payload` under `event_name`.
    fn publish(&self, event_name: &str, payload: &Value) -> Result<(), SinkError>;
}

impl<T: SessionDirectory + ?Sized> SessionDirectory for Arc<T> {
    fn list_sessions(&self) -> Result<Vec<SessionRef>, CollaboratorError> {
        (**self).list_sessions()
    }
}

impl<T: OutputReader + ?Sized> OutputReader for Arc<T> {
    fn read_outputs(&self, sessions: &[SessionRef]) -> Result<Vec<AgentOutput>, CollaboratorError> {
        (**self).read_outputs(sessions)
    }
}

impl<T: StatusSink + ?Sized> StatusSink for Arc<T> {
    fn upsert(&self, status: &AgentStatus) -> Result<(), SinkError> {
        (**self).upsert(status)
    }
}

impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    fn publish(&self, event_name: &str, payload: &Value) -> Result<(), SinkError> {
        (**self).publish(event_name, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_accepts_text_block() {
        let parsed: AgentOutput =
            serde_json::from_str(r#"{"agent_id":"a1","output":"one\ntwo"}"#).expect("parse");
        assert_eq!(parsed.output, vec!["one", "two"]);
        assert_eq!(parsed.error, None);
    }

    #[test]
    fn test_output_accepts_list_and_null() {
        let parsed: AgentOutput =
            serde_json::from_str(r#"{"agent_id":"a1","output":["$"],"error":"gone"}"#)
                .expect("parse");
        assert_eq!(parsed.output, vec!["$"]);
        assert_eq!(parsed.error.as_deref(), Some("gone"));

        let parsed: AgentOutput =
            serde_json::from_str(r#"{"agent_id":"a1","output":null}"#).expect("parse");
        assert!(parsed.output.is_empty());
    }

    #[test]
    fn test_session_presence() {
        assert!(SessionRef::new("a", "A", "%3").has_session());
        assert!(!SessionRef::new("a", "A", "  ").has_session());
    }
}
