//! One patrol cycle: sample, classify, aggregate, report.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::classify::{Classifier, DEFAULT_STUCK_THRESHOLD};
use super::collaborators::{
    AgentOutput, EventPublisher, OutputReader, SessionDirectory, SessionRef, StatusSink,
};
use super::fingerprint::{DEFAULT_FINGERPRINT_LINES, FingerprintMemory, fingerprint, visible_lines};
use super::report::{AgentHealth, AgentStatus, CycleReport, CycleSummary, SourceFlags};

/// Event name used when publishing cycle reports.
pub const CYCLE_EVENT_NAME: &str = "patrol.cycle";

/// Default number of output lines kept in each agent row.
pub const DEFAULT_TAIL_LINES: usize = 20;

/// Tunables for classification and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatrolSettings {
    /// Stagnation needed before an agent counts as stuck.
    pub stuck_threshold: Duration,
    /// Trailing lines hashed into each fingerprint.
    pub fingerprint_lines: usize,
    /// Trailing lines kept in each agent row.
    pub tail_lines: usize,
}

impl Default for PatrolSettings {
    fn default() -> Self {
        Self {
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            fingerprint_lines: DEFAULT_FINGERPRINT_LINES,
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

/// Patrol engine over injected collaborators.
pub struct PatrolEngine {
    directory: Box<dyn SessionDirectory>,
    reader: Box<dyn OutputReader>,
    sink: Option<Box<dyn StatusSink>>,
    publisher: Option<Box<dyn EventPublisher>>,
    settings: PatrolSettings,
    classifier: Classifier,
}

impl std::fmt::Debug for PatrolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatrolEngine")
            .field("has_sink", &self.sink.is_some())
            .field("has_publisher", &self.publisher.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PatrolEngine {
    /// Engine with the mandatory collaborators and default settings.
    pub fn new(
        directory: impl SessionDirectory + 'static,
        reader: impl OutputReader + 'static,
    ) -> Self {
        let settings = PatrolSettings::default();
        Self {
            directory: Box::new(directory),
            reader: Box::new(reader),
            sink: None,
            publisher: None,
            classifier: Classifier::new(settings.stuck_threshold),
            settings,
        }
    }

    /// Persists every agent row through `sink`.
    #[must_use]
    pub fn with_status_sink(mut self, sink: impl StatusSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Publishes every cycle report through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: impl EventPublisher + 'static) -> Self {
        self.publisher = Some(Box::new(publisher));
        self
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: PatrolSettings) -> Self {
        self.classifier = Classifier::new(settings.stuck_threshold);
        self.settings = settings;
        self
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &PatrolSettings {
        &self.settings
    }

    /// Runs one cycle at the current time.
    pub fn run_cycle_now(&self, memory: &mut FingerprintMemory) -> CycleReport {
        self.run_cycle(memory, Utc::now())
    }

    /// Runs one cycle as of `now`.
    ///
    /// Collaborator failures never escape: a directory failure aborts the
    /// cycle with an empty report, a reader failure reports every known agent
    /// as `unknown`, and sink failures are collected per agent. In every case
    /// the report is published (when a publisher is configured) and
    /// returned with `ok == false`.
    pub fn run_cycle(&self, memory: &mut FingerprintMemory, now: DateTime<Utc>) -> CycleReport {
        let mut sources = SourceFlags::default();

        let sessions = match self.directory.list_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "session directory failed, skipping cycle");
                let report = CycleReport::aborted(now, sources, err.to_string());
                self.publish(&report);
                return report;
            },
        };
        sources.directory = true;

        let mut errors = Vec::new();
        let agents = match self.reader.read_outputs(&sessions) {
            Ok(outputs) => {
                sources.reader = true;
                self.classify_sessions(&sessions, outputs, memory, now)
            },
            Err(err) => {
                warn!(error = %err, sessions = sessions.len(), "output reader failed");
                let message = err.to_string();
                errors.push(format!("output reader: {message}"));
                sessions
                    .iter()
                    .map(|session| unreadable(session, &message))
                    .collect()
            },
        };

        if let Some(sink) = &self.sink {
            let mut sink_ok = true;
            for agent in &agents {
                if let Err(err) = sink.upsert(agent) {
                    warn!(agent_id = %agent.agent_id, error = %err, "status sink upsert failed");
                    errors.push(format!("status sink ({}): {err}", agent.agent_id));
                    sink_ok = false;
                }
            }
            sources.sink = Some(sink_ok);
        }

        let summary = CycleSummary::tally(&agents);
        let report = CycleReport {
            ok: errors.is_empty(),
            timestamp: now,
            summary,
            agents,
            sources,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        };
        info!(
            ok = report.ok,
            total = summary.total,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            stuck = summary.stuck,
            "patrol cycle finished"
        );
        self.publish(&report);
        report
    }

    fn classify_sessions(
        &self,
        sessions: &[SessionRef],
        outputs: Vec<AgentOutput>,
        memory: &mut FingerprintMemory,
        now: DateTime<Utc>,
    ) -> Vec<AgentStatus> {
        let mut by_agent = outputs
            .into_iter()
            .map(|output| (output.agent_id.clone(), output))
            .collect::<HashMap<_, _>>();

        sessions
            .iter()
            .map(|session| {
                let output = by_agent.remove(&session.agent_id).unwrap_or_default();
                let lines = visible_lines(&output.output);
                let has_session = session.has_session();
                let stagnant_sec = if has_session {
                    let print = fingerprint(lines, self.settings.fingerprint_lines);
                    memory.observe(&session.agent_id, print, now)
                } else {
                    0
                };
                let verdict =
                    self.classifier
                        .classify(lines, has_session, stagnant_sec, output.error.as_deref());
                debug!(
                    agent_id = %session.agent_id,
                    status = %verdict.status,
                    stagnant_sec,
                    "agent classified"
                );
                let tail_start = lines.len().saturating_sub(self.settings.tail_lines);
                AgentStatus {
                    agent_id: session.agent_id.clone(),
                    agent_name: session.agent_name.clone(),
                    session_id: session.session_id.clone(),
                    status: verdict.status,
                    stagnant_sec,
                    error: verdict.detail,
                    output_tail: lines[tail_start..].to_vec(),
                }
            })
            .collect()
    }

    /// Sends `report` to the publisher, if any. Failures are logged only.
    pub fn publish(&self, report: &CycleReport) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let payload = match serde_json::to_value(report) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode cycle report");
                return;
            },
        };
        if let Err(err) = publisher.publish(CYCLE_EVENT_NAME, &payload) {
            warn!(error = %err, "failed to publish cycle report");
        }
    }
}

fn unreadable(session: &SessionRef, error: &str) -> AgentStatus {
    AgentStatus {
        agent_id: session.agent_id.clone(),
        agent_name: session.agent_name.clone(),
        session_id: session.session_id.clone(),
        status: AgentHealth::Unknown,
        stagnant_sec: 0,
        error: Some(error.to_string()),
        output_tail: Vec::new(),
    }
}
