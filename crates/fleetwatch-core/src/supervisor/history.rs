//! Crash recording sinks.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::persist::{self, PersistError};

/// File name of the crash history.
pub const CRASH_HISTORY_FILE_NAME: &str = "crash_history.ndjson";

/// File name of the crash history lock.
pub const CRASH_HISTORY_LOCK_FILE_NAME: &str = "crash_history.lock";

/// Size past which the history rotates to `.1`.
pub const DEFAULT_ROTATE_BYTES: u64 = 1024 * 1024;

/// What the supervisor decided after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashAction {
    /// The worker will be restarted after `delay_ms`.
    Restart,
    /// The attempt budget is spent.
    GiveUp,
    /// The fault cannot be fixed by restarting.
    Fatal,
}

/// One crash as written to the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    /// When the crash was observed.
    pub timestamp: DateTime<Utc>,
    /// Supervised worker name.
    pub worker: String,
    /// Attempt counter after this crash.
    pub attempt: u32,
    /// Fault category.
    pub fault_kind: String,
    /// Rendered fault.
    pub message: String,
    /// Supervisor decision.
    pub action: CrashAction,
    /// Backoff before the restart, when one follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl CrashRecord {
    /// Backoff as a [`Duration`].
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }
}

/// Best-effort destination for crash records.
pub trait CrashSink: Send + Sync {
    /// Records one crash.
    fn record(&self, crash: &CrashRecord) -> Result<(), PersistError>;
}

impl<T: CrashSink + ?Sized> CrashSink for Arc<T> {
    fn record(&self, crash: &CrashRecord) -> Result<(), PersistError> {
        (**self).record(crash)
    }
}

/// Logs crashes at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCrashSink;

impl CrashSink for TracingCrashSink {
    fn record(&self, crash: &CrashRecord) -> Result<(), PersistError> {
        error!(
            worker = %crash.worker,
            attempt = crash.attempt,
            fault = crash.fault_kind,
            action = ?crash.action,
            delay_ms = crash.delay_ms,
            "worker crashed: {}",
            crash.message
        );
        Ok(())
    }
}

/// Append-only NDJSON crash history with single-generation rotation.
#[derive(Debug, Clone)]
pub struct CrashHistoryFile {
    path: PathBuf,
    lock_path: PathBuf,
    rotate_bytes: u64,
}

impl CrashHistoryFile {
    /// History stored under `home`.
    #[must_use]
    pub fn open(home: &Path) -> Self {
        Self {
            path: home.join(CRASH_HISTORY_FILE_NAME),
            lock_path: home.join(CRASH_HISTORY_LOCK_FILE_NAME),
            rotate_bytes: DEFAULT_ROTATE_BYTES,
        }
    }

    /// Overrides the rotation threshold.
    #[must_use]
    pub const fn with_rotate_bytes(mut self, rotate_bytes: u64) -> Self {
        self.rotate_bytes = rotate_bytes;
        self
    }

    /// Path of the live history file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the most recent `limit` records from the live file, oldest
    /// first. Unparsable lines are skipped.
    pub fn recent(&self, limit: usize) -> Result<Vec<CrashRecord>, PersistError> {
        let _lock = persist::lock_exclusive(&self.lock_path)?;
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PersistError::io("open", &self.path, err)),
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| PersistError::io("read", &self.path, err))?;
            if let Ok(record) = serde_json::from_str::<CrashRecord>(&line) {
                records.push(record);
            }
        }
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

impl CrashSink for CrashHistoryFile {
    fn record(&self, crash: &CrashRecord) -> Result<(), PersistError> {
        let _lock = persist::lock_exclusive(&self.lock_path)?;
        persist::append_json_line(&self.path, crash, self.rotate_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crash(attempt: u32) -> CrashRecord {
        CrashRecord {
            timestamp: Utc::now(),
            worker: "patrol".to_string(),
            attempt,
            fault_kind: "failed".to_string(),
            message: format!("boom {attempt}"),
            action: CrashAction::Restart,
            delay_ms: Some(1000),
        }
    }

    #[test]
    fn test_history_appends_and_reads_back() {
        let home = tempfile::tempdir().expect("tempdir");
        let history = CrashHistoryFile::open(home.path());

        for attempt in 1..=3 {
            history.record(&crash(attempt)).expect("record");
        }

        let recent = history.recent(2).expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].attempt, 2);
        assert_eq!(recent[1].attempt, 3);
        assert_eq!(recent[1].delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_history_rotates() {
        let home = tempfile::tempdir().expect("tempdir");
        let history = CrashHistoryFile::open(home.path()).with_rotate_bytes(64);

        history.record(&crash(1)).expect("record");
        history.record(&crash(2)).expect("record");

        assert!(persist::rotated_path(history.path()).exists());
        let live = history.recent(10).expect("recent");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].attempt, 2);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let home = tempfile::tempdir().expect("tempdir");
        assert!(
            CrashHistoryFile::open(home.path())
                .recent(5)
                .expect("recent")
                .is_empty()
        );
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        assert!(TracingCrashSink.record(&crash(1)).is_ok());
    }
}
