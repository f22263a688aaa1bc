//! JSON file status sink.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::collaborators::{SinkError, StatusSink};
use super::report::AgentStatus;
use crate::persist::{self, PersistError};

/// File name of the status board.
pub const STATUS_FILE_NAME: &str = "agent_status.json";

/// File name of the status board lock.
pub const STATUS_LOCK_FILE_NAME: &str = "agent_status.lock";

/// Schema identifier written into the board.
pub const STATUS_SCHEMA: &str = "fleetwatch.agent_status.v1";

/// One persisted agent row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    /// Latest classification.
    #[serde(flatten)]
    pub status: AgentStatus,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

/// Contents of the status board file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDocument {
    /// Schema identifier.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Rows keyed by `agent_id`.
    #[serde(default)]
    pub agents: BTreeMap<String, StatusRow>,
}

fn default_schema() -> String {
    STATUS_SCHEMA.to_string()
}

impl Default for StatusDocument {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            agents: BTreeMap::new(),
        }
    }
}

/// Status sink that keeps one row per agent in a JSON file.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    path: PathBuf,
    lock_path: PathBuf,
}

impl StatusBoard {
    /// Board stored under `home`.
    #[must_use]
    pub fn open(home: &Path) -> Self {
        Self {
            path: home.join(STATUS_FILE_NAME),
            lock_path: home.join(STATUS_LOCK_FILE_NAME),
        }
    }

    /// Path of the board file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current board; missing or unreadable files yield an empty
    /// board.
    pub fn load(&self) -> Result<StatusDocument, PersistError> {
        let _lock = persist::lock_exclusive(&self.lock_path)?;
        Ok(persist::load_json(&self.path).or_default(&self.path))
    }
}

impl StatusSink for StatusBoard {
    fn upsert(&self, status: &AgentStatus) -> Result<(), SinkError> {
        if status.agent_id.trim().is_empty() {
            return Err(SinkError::Rejected("agent_id is empty".to_string()));
        }
        let _lock = persist::lock_exclusive(&self.lock_path)?;
        let mut document: StatusDocument = persist::load_json(&self.path).or_default(&self.path);
        document.agents.insert(
            status.agent_id.clone(),
            StatusRow {
                status: status.clone(),
                updated_at: Utc::now(),
            },
        );
        persist::write_json_atomic(&self.path, &document)?;
        debug!(agent_id = %status.agent_id, status = %status.status, "status row written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patrol::AgentHealth;

    fn row(agent_id: &str, status: AgentHealth) -> AgentStatus {
        AgentStatus {
            agent_id: agent_id.to_string(),
            agent_name: format!("{agent_id}-name"),
            session_id: "%1".to_string(),
            status,
            stagnant_sec: 0,
            error: None,
            output_tail: vec!["$".to_string()],
        }
    }

    #[test]
    fn test_upsert_replaces_row_per_agent() {
        let home = tempfile::tempdir().expect("tempdir");
        let board = StatusBoard::open(home.path());

        board.upsert(&row("a1", AgentHealth::Running)).expect("upsert");
        board.upsert(&row("a2", AgentHealth::Idle)).expect("upsert");
        board.upsert(&row("a1", AgentHealth::Stuck)).expect("upsert");

        let document = board.load().expect("load");
        assert_eq!(document.schema, STATUS_SCHEMA);
        assert_eq!(document.agents.len(), 2);
        assert_eq!(document.agents["a1"].status.status, AgentHealth::Stuck);
        assert_eq!(document.agents["a2"].status.status, AgentHealth::Idle);
    }

    #[test]
    fn test_rows_are_flat_on_disk() {
        let home = tempfile::tempdir().expect("tempdir");
        let board = StatusBoard::open(home.path());
        board.upsert(&row("a1", AgentHealth::Error)).expect("upsert");

        let raw = std::fs::read_to_string(board.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["agents"]["a1"]["status"], "error");
        assert!(value["agents"]["a1"]["updated_at"].is_string());
    }

    #[test]
    fn test_corrupt_board_is_replaced() {
        let home = tempfile::tempdir().expect("tempdir");
        let board = StatusBoard::open(home.path());
        std::fs::write(board.path(), "{ nope").expect("write");

        board.upsert(&row("a1", AgentHealth::Running)).expect("upsert");
        assert_eq!(board.load().expect("load").agents.len(), 1);
    }

    #[test]
    fn test_empty_agent_id_rejected() {
        let home = tempfile::tempdir().expect("tempdir");
        let board = StatusBoard::open(home.path());
        let err = board
            .upsert(&row(" ", AgentHealth::Running))
            .expect_err("rejected");
        assert!(matches!(err, SinkError::Rejected(_)));
        assert!(!board.path().exists());
    }

    #[test]
    fn test_board_without_schema_keeps_rows() {
        let home = tempfile::tempdir().expect("tempdir");
        let board = StatusBoard::open(home.path());
        let mut document = StatusDocument::default();
        document.agents.insert(
            "a1".to_string(),
            StatusRow {
                status: row("a1", AgentHealth::Running),
                updated_at: Utc::now(),
            },
        );
        let mut value = serde_json::to_value(&document).expect("json");
        value.as_object_mut().expect("object").remove("schema");
        std::fs::write(board.path(), value.to_string()).expect("write");

        board.upsert(&row("a2", AgentHealth::Idle)).expect("upsert");

        let loaded = board.load().expect("load");
        assert_eq!(loaded.schema, STATUS_SCHEMA);
        assert_eq!(loaded.agents.len(), 2);
        assert_eq!(loaded.agents["a1"].status.status, AgentHealth::Running);
    }
}
