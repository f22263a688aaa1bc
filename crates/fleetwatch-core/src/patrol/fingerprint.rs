//! Output fingerprints and the stagnation memory built on them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Default number of trailing lines hashed into a fingerprint.
pub const DEFAULT_FINGERPRINT_LINES: usize = 5;

/// Drops trailing blank lines; terminal captures pad the bottom of a pane.
#[must_use]
pub fn visible_lines<S: AsRef<str>>(lines: &[S]) -> &[S] {
    let end = lines
        .iter()
        .rposition(|line| !line.as_ref().trim().is_empty())
        .map_or(0, |index| index + 1);
    &lines[..end]
}

/// `blake3` digest of the last `window` visible lines.
#[must_use]
pub fn fingerprint<S: AsRef<str>>(lines: &[S], window: usize) -> String {
    let visible = visible_lines(lines);
    let start = visible.len().saturating_sub(window.max(1));
    let mut hasher = blake3::Hasher::new();
    for line in &visible[start..] {
        hasher.update(line.as_ref().trim_end().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Last fingerprint seen for an agent and when it last changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    /// Most recent fingerprint.
    pub fingerprint: String,
    /// When the fingerprint last differed from its predecessor.
    pub changed_at: DateTime<Utc>,
}

/// Per-agent fingerprint memory carried across patrol cycles.
///
/// The caller owns the memory and hands the same instance to every cycle;
/// it is the only source of stagnation timing. Entries are inserted or
/// replaced, never removed.
#[derive(Debug, Clone, Default)]
pub struct FingerprintMemory {
    entries: HashMap<String, FingerprintEntry>,
}

impl FingerprintMemory {
    /// Empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fingerprint` for `agent_id` at `now` and returns the
    /// stagnation in whole seconds (0 on first sight or on change).
    pub fn observe(&mut self, agent_id: &str, fingerprint: String, now: DateTime<Utc>) -> u64 {
        if let Some(entry) = self.entries.get(agent_id) {
            if entry.fingerprint == fingerprint {
                let elapsed = now.signed_duration_since(entry.changed_at).num_seconds();
                return u64::try_from(elapsed).unwrap_or(0);
            }
        }
        self.entries.insert(
            agent_id.to_string(),
            FingerprintEntry {
                fingerprint,
                changed_at: now,
            },
        );
        0
    }

    /// Entry for `agent_id`, if one was recorded.
    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<&FingerprintEntry> {
        self.entries.get(agent_id)
    }

    /// Number of agents remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
