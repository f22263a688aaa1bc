//! Patrol output types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health classification of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Producing output.
    Running,
    /// Sitting at an interactive prompt.
    Idle,
    /// Output unchanged for longer than the stuck threshold.
    Stuck,
    /// Output shows a crash or traceback.
    Error,
    /// Output shows a severed connection, or the reader could not reach it.
    Disconnected,
    /// No backing session, or no readable output.
    Unknown,
}

impl AgentHealth {
    /// Every variant, in report order.
    pub const ALL: [Self; 6] = [
        Self::Running,
        Self::Idle,
        Self::Stuck,
        Self::Error,
        Self::Disconnected,
        Self::Unknown,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Stuck => "stuck",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
            Self::Unknown => "unknown",
        }
    }

    /// Running and idle agents count as healthy.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Running | Self::Idle)
    }
}

impl fmt::Display for AgentHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-agent patrol result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent identifier.
    pub agent_id: String,
    /// Display name.
    pub agent_name: String,
    /// Backing session, empty when none.
    pub session_id: String,
    /// Classification.
    pub status: AgentHealth,
    /// Seconds since the output fingerprint last changed.
    pub stagnant_sec: u64,
    /// Reader error or the line that triggered an error/disconnect verdict.
    pub error: Option<String>,
    /// Most recent visible lines.
    pub output_tail: Vec<String>,
}

/// Aggregate counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Agents reported.
    pub total: usize,
    /// Agents classified `running`.
    pub running: usize,
    /// Agents classified `idle`.
    pub idle: usize,
    /// Agents classified `stuck`.
    pub stuck: usize,
    /// Agents classified `error`.
    pub error: usize,
    /// Agents classified `disconnected`.
    pub disconnected: usize,
    /// Agents classified `unknown`.
    pub unknown: usize,
    /// `running + idle`.
    pub healthy: usize,
    /// `total - healthy`.
    pub unhealthy: usize,
}

impl CycleSummary {
    /// Tallies `agents`.
    #[must_use]
    pub fn tally(agents: &[AgentStatus]) -> Self {
        let mut summary = Self {
            total: agents.len(),
            ..Self::default()
        };
        for agent in agents {
            match agent.status {
                AgentHealth::Running => summary.running += 1,
                AgentHealth::Idle => summary.idle += 1,
                AgentHealth::Stuck => summary.stuck += 1,
                AgentHealth::Error => summary.error += 1,
                AgentHealth::Disconnected => summary.disconnected += 1,
                AgentHealth::Unknown => summary.unknown += 1,
            }
        }
        summary.healthy = summary.running + summary.idle;
        summary.unhealthy = summary.total - summary.healthy;
        summary
    }

    /// Count for one status.
    #[must_use]
    pub const fn count(&self, status: AgentHealth) -> usize {
        match status {
            AgentHealth::Running => self.running,
            AgentHealth::Idle => self.idle,
            AgentHealth::Stuck => self.stuck,
            AgentHealth::Error => self.error,
            AgentHealth::Disconnected => self.disconnected,
            AgentHealth::Unknown => self.unknown,
        }
    }
}

/// Which collaborators answered successfully during a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFlags {
    /// The session directory answered.
    pub directory: bool,
    /// The output reader answered.
    pub reader: bool,
    /// Every sink upsert succeeded; `None` without a sink.
    pub sink: Option<bool>,
}

/// Result of one patrol cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// False when any collaborator failed.
    pub ok: bool,
    /// Cycle start time.
    pub timestamp: DateTime<Utc>,
    /// Aggregate counts.
    pub summary: CycleSummary,
    /// One row per known agent.
    pub agents: Vec<AgentStatus>,
    /// Collaborator outcomes.
    pub sources: SourceFlags,
    /// Combined failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleReport {
    /// Report for a cycle that could not run at all.
    #[must_use]
    pub fn aborted(timestamp: DateTime<Utc>, sources: SourceFlags, error: String) -> Self {
        Self {
            ok: false,
            timestamp,
            summary: CycleSummary::default(),
            agents: Vec::new(),
            sources,
            error: Some(error),
        }
    }
}
