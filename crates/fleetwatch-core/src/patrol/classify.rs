//! Keyword/heuristic health classification.
//!
//! Precedence, first match wins:
//!
//! | # | Status | Condition |
//! |---|--------|-----------|
//! | 1 | `unknown` | no backing session |
//! | 2 | `idle` | every non-empty line is a bare prompt marker |
//! | 3 | `error` | crash keyword present |
//! | 4 | `disconnected` | connection keyword present, or a per-agent reader error |
//! | 5 | `stuck` | fingerprint unchanged for at least the stuck threshold |
//! | 6 | `running` | otherwise |

use std::time::Duration;

use super::report::AgentHealth;

/// Default stagnation needed before an agent counts as stuck.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(60);

/// Lines that, on their own, mean the terminal is waiting at a prompt.
pub const PROMPT_MARKERS: &[&str] = &["$", "#", ">", "%", "❯", "›", "»", ">>>", "λ"];

/// Lower-case fragments that indicate a crash.
pub const ERROR_KEYWORDS: &[&str] = &[
    "traceback",
    "panicked at",
    "exception",
    "error:",
    "fatal:",
    "segmentation fault",
    "core dumped",
];

/// Lower-case fragments that indicate a severed connection.
pub const DISCONNECT_KEYWORDS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "broken pipe",
    "disconnected",
    "network is unreachable",
    "timed out",
    "econnreset",
];

const MAX_DETAIL_CHARS: usize = 240;

/// Classification plus the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Resulting status.
    pub status: AgentHealth,
    /// Reader error, or the line that matched a keyword.
    pub detail: Option<String>,
}

/// Classifier with a configurable stuck threshold.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    stuck_threshold_secs: u64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_STUCK_THRESHOLD)
    }
}

impl Classifier {
    /// Classifier that reports `stuck` after `stuck_threshold` of stagnation.
    #[must_use]
    pub const fn new(stuck_threshold: Duration) -> Self {
        Self {
            stuck_threshold_secs: stuck_threshold.as_secs(),
        }
    }

    /// Configured threshold in whole seconds.
    #[must_use]
    pub const fn stuck_threshold_secs(&self) -> u64 {
        self.stuck_threshold_secs
    }

    /// Applies the precedence table to one agent.
    #[must_use]
    pub fn classify<S: AsRef<str>>(
        &self,
        lines: &[S],
        has_session: bool,
        stagnant_sec: u64,
        reader_error: Option<&str>,
    ) -> Verdict {
        if !has_session {
            return Verdict {
                status: AgentHealth::Unknown,
                detail: reader_error.map(str::to_string),
            };
        }
        if is_idle_prompt(lines) {
            return Verdict {
                status: AgentHealth::Idle,
                detail: None,
            };
        }
        if let Some(line) = first_match(lines, ERROR_KEYWORDS) {
            return Verdict {
                status: AgentHealth::Error,
                detail: Some(line),
            };
        }
        if let Some(line) = first_match(lines, DISCONNECT_KEYWORDS) {
            return Verdict {
                status: AgentHealth::Disconnected,
                detail: Some(line),
            };
        }
        if let Some(error) = reader_error {
            return Verdict {
                status: AgentHealth::Disconnected,
                detail: Some(error.to_string()),
            };
        }
        if stagnant_sec >= self.stuck_threshold_secs {
            return Verdict {
                status: AgentHealth::Stuck,
                detail: None,
            };
        }
        Verdict {
            status: AgentHealth::Running,
            detail: None,
        }
    }
}

/// Classifies with the default threshold and no reader error.
#[must_use]
pub fn classify<S: AsRef<str>>(lines: &[S], has_session: bool, stagnant_sec: u64) -> AgentHealth {
    Classifier::default()
        .classify(lines, has_session, stagnant_sec, None)
        .status
}

/// True when there is at least one non-empty line and all of them are bare
/// prompt markers.
fn is_idle_prompt<S: AsRef<str>>(lines: &[S]) -> bool {
    let mut saw_prompt = false;
    for line in lines {
        let trimmed = line.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if !PROMPT_MARKERS.contains(&trimmed) {
            return false;
        }
        saw_prompt = true;
    }
    saw_prompt
}

fn first_match<S: AsRef<str>>(lines: &[S], keywords: &[&str]) -> Option<String> {
    lines.iter().map(AsRef::as_ref).find_map(|line| {
        let lowered = line.to_lowercase();
        keywords
            .iter()
            .any(|keyword| lowered.contains(keyword))
            .then(|| line.trim().chars().take(MAX_DETAIL_CHARS).collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_reference_cases() {
        assert_eq!(classify(&["$"], true, 0), AgentHealth::Idle);
        assert_eq!(
            classify(&["Traceback (most recent call last):"], true, 0),
            AgentHealth::Error
        );
        assert_eq!(classify(&["still working"], true, 65), AgentHealth::Stuck);
        assert_eq!(classify(&NONE, false, 0), AgentHealth::Unknown);
    }

    #[test]
    fn test_missing_session_wins_over_everything() {
        assert_eq!(classify(&["Traceback"], false, 500), AgentHealth::Unknown);
    }

    #[test]
    fn test_idle_ignores_blank_lines_and_needs_a_prompt() {
        assert_eq!(classify(&["", "  ❯  ", ""], true, 900), AgentHealth::Idle);
        assert_eq!(classify(&["", "   "], true, 0), AgentHealth::Running);
        assert_eq!(classify(&NONE, true, 0), AgentHealth::Running);
        assert_eq!(classify(&["$ cargo build"], true, 0), AgentHealth::Running);
    }

    #[test]
    fn test_idle_precedes_error_keywords_elsewhere() {
        // A bare prompt screen has nothing else to match.
        assert_eq!(classify(&[">>>", "$"], true, 0), AgentHealth::Idle);
    }

    #[test]
    fn test_error_is_case_insensitive_and_precedes_disconnect() {
        assert_eq!(
            classify(&["thread 'main' PANICKED AT src/main.rs"], true, 0),
            AgentHealth::Error
        );
        assert_eq!(
            classify(&["Error: broken pipe"], true, 0),
            AgentHealth::Error
        );
    }

    #[test]
    fn test_disconnect_keywords() {
        assert_eq!(
            classify(&["ssh: connect to host: Connection refused"], true, 0),
            AgentHealth::Disconnected
        );
        assert_eq!(
            classify(&["client_loop: send disconnect: Broken pipe"], true, 0),
            AgentHealth::Disconnected
        );
    }

    #[test]
    fn test_reader_error_means_disconnected_unless_error_matched() {
        let classifier = Classifier::default();
        let verdict = classifier.classify(&["working"], true, 0, Some("pane vanished"));
        assert_eq!(verdict.status, AgentHealth::Disconnected);
        assert_eq!(verdict.detail.as_deref(), Some("pane vanished"));

        let verdict = classifier.classify(&["Traceback"], true, 0, Some("pane vanished"));
        assert_eq!(verdict.status, AgentHealth::Error);
        assert_eq!(verdict.detail.as_deref(), Some("Traceback"));
    }

    #[test]
    fn test_stuck_threshold_boundary() {
        let classifier = Classifier::new(Duration::from_secs(30));
        assert_eq!(
            classifier.classify(&["busy"], true, 29, None).status,
            AgentHealth::Running
        );
        assert_eq!(
            classifier.classify(&["busy"], true, 30, None).status,
            AgentHealth::Stuck
        );
    }
}
