//! Log domain types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::SessionId;

/// Structured `type` value of the entries jobs write for progress reporting
pub const STATUS_ENTRY_TYPE: &str = "STATUS";

/// Messages that mark the end of a job's progress stream
pub const TERMINAL_MARKERS: [&str; 3] = ["SUCCESS", "ERROR", "FAILED"];

pub fn is_terminal_marker(message: &str) -> bool {
    TERMINAL_MARKERS.contains(&message)
}

/// A structured entry returned by the log backend
///
/// Only the fields the worker consumes are kept; everything is optional
/// because jobs may write arbitrary payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub entry_type: Option<String>,
    pub message: Option<String>,
}

impl LogEntry {
    /// Returns the message if this is a status entry for `session`
    pub fn status_message(&self, session: &SessionId) -> Option<&str> {
        if self.entry_type.as_deref() != Some(STATUS_ENTRY_TYPE) {
            return None;
        }
        if self.session_id.as_deref() != Some(session.as_str()) {
            return None;
        }
        self.message.as_deref()
    }
}

/// Bookmark of the last log entry delivered for a session's job
///
/// `last_seen_timestamp` only moves forward. It always sits strictly past the
/// timestamp of the most recently delivered entry, so an entry is never
/// delivered twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCursor {
    pub session_id: SessionId,
    pub job_name: String,
    last_seen_timestamp: DateTime<Utc>,
}

impl LogCursor {
    pub fn new(session_id: SessionId, job_name: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            session_id,
            job_name: job_name.into(),
            last_seen_timestamp: start,
        }
    }

    pub fn last_seen_timestamp(&self) -> DateTime<Utc> {
        self.last_seen_timestamp
    }

    /// Returns true if an entry at `timestamp` has not been delivered yet
    pub fn admits(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp > self.last_seen_timestamp
    }

    /// Moves the cursor one nanosecond past `timestamp`
    ///
    /// Has no effect if the cursor is already further ahead.
    pub fn advance_past(&mut self, timestamp: DateTime<Utc>) {
        let next = timestamp + Duration::nanoseconds(1);
        if next > self.last_seen_timestamp {
            self.last_seen_timestamp = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session() -> SessionId {
        SessionId::parse("s1").unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_cursor_advances_strictly_past() {
        let mut cursor = LogCursor::new(session(), "builder", ts(0));
        assert!(cursor.admits(ts(1)));
        assert!(!cursor.admits(ts(0)));

        cursor.advance_past(ts(5));
        assert!(cursor.last_seen_timestamp() > ts(5));
        assert!(!cursor.admits(ts(5)));
        assert!(cursor.admits(ts(6)));
    }

    #[test]
    fn test_cursor_never_moves_backward() {
        let mut cursor = LogCursor::new(session(), "builder", ts(10));
        cursor.advance_past(ts(3));
        assert_eq!(cursor.last_seen_timestamp(), ts(10));

        cursor.advance_past(ts(20));
        let after = cursor.last_seen_timestamp();
        cursor.advance_past(ts(15));
        assert_eq!(cursor.last_seen_timestamp(), after);
    }

    #[test]
    fn test_status_message_filters() {
        let entry = LogEntry {
            timestamp: ts(0),
            session_id: Some("s1".into()),
            entry_type: Some(STATUS_ENTRY_TYPE.into()),
            message: Some("Generating pages".into()),
        };
        assert_eq!(entry.status_message(&session()), Some("Generating pages"));

        let other_session = LogEntry {
            session_id: Some("s2".into()),
            ..entry.clone()
        };
        assert_eq!(other_session.status_message(&session()), None);

        let not_status = LogEntry {
            entry_type: Some("DEBUG".into()),
            ..entry.clone()
        };
        assert_eq!(not_status.status_message(&session()), None);

        let no_message = LogEntry {
            message: None,
            ..entry
        };
        assert_eq!(no_message.status_message(&session()), None);
    }

    #[test]
    fn test_terminal_markers() {
        assert!(is_terminal_marker("SUCCESS"));
        assert!(is_terminal_marker("FAILED"));
        assert!(is_terminal_marker("ERROR"));
        assert!(!is_terminal_marker("success"));
        assert!(!is_terminal_marker("Deploying"));
    }
}
