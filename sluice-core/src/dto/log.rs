//! Log query DTOs

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::log::{LogCursor, STATUS_ENTRY_TYPE};

/// Default number of entries fetched per tick
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Query for a session's status entries newer than a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub job_name: String,
    pub session_id: String,
    /// Exclusive lower bound on entry timestamps
    pub after: DateTime<Utc>,
    pub page_size: u32,
}

impl LogQuery {
    pub fn from_cursor(cursor: &LogCursor, page_size: u32) -> Self {
        Self {
            job_name: cursor.job_name.clone(),
            session_id: cursor.session_id.to_string(),
            after: cursor.last_seen_timestamp(),
            page_size,
        }
    }

    /// Renders the query in the log backend's filter language
    pub fn filter(&self) -> String {
        format!(
            "resource.type=\"cloud_run_job\"\n\
             resource.labels.job_name=\"{}\"\n\
             jsonPayload.type=\"{}\"\n\
             jsonPayload.sessionId=\"{}\"\n\
             timestamp > \"{}\"",
            escape(&self.job_name),
            STATUS_ENTRY_TYPE,
            escape(&self.session_id),
            self.after.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
