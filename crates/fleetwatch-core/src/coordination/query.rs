//! Event listing parameters.
//!
//! Callers frequently forward raw query-string values, so normalization never
//! fails: anything non-numeric or negative falls back to the default.

/// Default number of events returned.
pub const DEFAULT_EVENT_LIMIT: usize = 100;

/// Upper bound on the number of events returned.
pub const MAX_EVENT_LIMIT: usize = 1000;

/// Normalized `list_events` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    limit: usize,
    since_seq: u64,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_EVENT_LIMIT,
            since_seq: 0,
        }
    }
}

impl EventQuery {
    /// Builds a query from signed inputs. Negative values select the
    /// defaults; `limit` is clamped into `[1, MAX_EVENT_LIMIT]`.
    #[must_use]
    pub fn new(limit: i64, since_seq: i64) -> Self {
        Self {
            limit: normalize_limit(i128::from(limit)),
            since_seq: normalize_since(i128::from(since_seq)),
        }
    }

    /// Builds a query from raw text inputs. Absent, non-numeric or negative
    /// inputs select the defaults.
    #[must_use]
    pub fn parse(limit: Option<&str>, since_seq: Option<&str>) -> Self {
        let limit = limit
            .and_then(parse_integer)
            .map_or(DEFAULT_EVENT_LIMIT, normalize_limit);
        let since_seq = since_seq.and_then(parse_integer).map_or(0, normalize_since);
        Self { limit, since_seq }
    }

    /// Maximum number of events to return.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Exclusive lower bound on returned sequence numbers.
    #[must_use]
    pub const fn since_seq(&self) -> u64 {
        self.since_seq
    }
}

fn parse_integer(raw: &str) -> Option<i128> {
    let trimmed = raw.trim();
    trimmed.parse::<i128>().ok().or_else(|| {
        // Digit strings too long for i128 still mean "very large".
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
        (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(i128::MAX)
    })
}

fn normalize_limit(value: i128) -> usize {
    if value < 0 {
        return DEFAULT_EVENT_LIMIT;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to 1..=1000
    let limit = value.clamp(1, MAX_EVENT_LIMIT as i128) as usize;
    limit
}

fn normalize_since(value: i128) -> u64 {
    u64::try_from(value.max(0)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_absent() {
        let query = EventQuery::parse(None, None);
        assert_eq!(query.limit(), DEFAULT_EVENT_LIMIT);
        assert_eq!(query.since_seq(), 0);
    }

    #[test]
    fn test_non_numeric_falls_back() {
        let query = EventQuery::parse(Some("lots"), Some("yesterday"));
        assert_eq!(query, EventQuery::default());
    }

    #[test]
    fn test_negative_falls_back() {
        let query = EventQuery::new(-3, -5);
        assert_eq!(query.limit(), DEFAULT_EVENT_LIMIT);
        assert_eq!(query.since_seq(), 0);
        assert_eq!(EventQuery::parse(Some("-1"), Some("-9")), EventQuery::default());
    }

    #[test]
    fn test_limit_clamps() {
        assert_eq!(EventQuery::new(0, 0).limit(), 1);
        assert_eq!(EventQuery::new(1_000_000_000, 0).limit(), MAX_EVENT_LIMIT);
        assert_eq!(
            EventQuery::parse(Some("123456789012345678901234567890123456789012"), None).limit(),
            MAX_EVENT_LIMIT
        );
        assert_eq!(EventQuery::parse(Some(" 25 "), Some("7")).limit(), 25);
    }

    #[test]
    fn test_since_passes_through() {
        assert_eq!(EventQuery::new(10, 42).since_seq(), 42);
        assert_eq!(EventQuery::parse(None, Some("42")).since_seq(), 42);
    }
}
