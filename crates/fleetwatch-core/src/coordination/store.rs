//! Lock-guarded persistence for the coordination document.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::DEFAULT_EVENT_CAPACITY;
use super::state::CoordinationDocument;
use crate::persist::{self, PersistError};

/// File name of the canonical coordination document.
pub const STATE_FILE_NAME: &str = "coordination_state.json";

/// File name of the zero-content lock indicator.
pub const LOCK_FILE_NAME: &str = "coordination_state.lock";

/// Errors raised by the coordination store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Locking or persisting the document failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Whether a transaction writes the document back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Load under the lock, never persist.
    ReadOnly,
    /// Load under the lock, persist after the operation.
    ReadWrite,
}

/// Handle to the shared coordination document.
///
/// The handle holds only paths; every access goes through
/// [`CoordinationStore::transact`], which serializes all callers (threads and
/// processes) on one exclusive lock for the full
/// read → deserialize → mutate → serialize → persist window.
#[derive(Debug, Clone)]
pub struct CoordinationStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    event_capacity: usize,
}

impl CoordinationStore {
    /// Opens the store rooted at `home` with the default event capacity.
    #[must_use]
    pub fn open(home: &Path) -> Self {
        Self {
            state_path: home.join(STATE_FILE_NAME),
            lock_path: home.join(LOCK_FILE_NAME),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Overrides the event log capacity (minimum 1).
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Path of the canonical document.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Path of the lock indicator.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Maximum number of retained events.
    #[must_use]
    pub const fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Runs `operation` against the document inside one exclusive
    /// transaction.
    ///
    /// A missing or unparsable document is replaced by the default state.
    /// In [`TxMode::ReadWrite`] the (possibly mutated) document is atomically
    /// persisted before the lock is released.
    pub fn transact<T>(
        &self,
        mode: TxMode,
        operation: impl FnOnce(&mut CoordinationDocument) -> T,
    ) -> Result<T, StoreError> {
        let lock = persist::lock_exclusive(&self.lock_path)?;
        let mut document: CoordinationDocument =
            persist::load_json(&self.state_path).or_default(&self.state_path);
        let result = operation(&mut document);
        if mode == TxMode::ReadWrite {
            persist::write_json_atomic(&self.state_path, &document)?;
            debug!(
                path = %self.state_path.display(),
                last_seq = document.last_seq,
                events = document.events.len(),
                "coordination document persisted"
            );
        }
        drop(lock);
        Ok(result)
    }

    /// Read-only transaction.
    pub fn read<T>(
        &self,
        operation: impl FnOnce(&CoordinationDocument) -> T,
    ) -> Result<T, StoreError> {
        self.transact(TxMode::ReadOnly, |document| operation(document))
    }

    /// Read-write transaction.
    pub fn write<T>(
        &self,
        operation: impl FnOnce(&mut CoordinationDocument) -> T,
    ) -> Result<T, StoreError> {
        self.transact(TxMode::ReadWrite, operation)
    }
}
