//! Log backend
//!
//! Queries structured job logs through the Cloud Logging API (v2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sluice_core::domain::log::LogEntry;
use sluice_core::dto::log::LogQuery;

use crate::GcpClient;
use crate::error::Result;

/// Read access to the log backend
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Returns entries matching the query in ascending timestamp order
    async fn list_entries(&self, query: &LogQuery) -> Result<Vec<LogEntry>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListEntriesBody {
    resource_names: Vec<String>,
    filter: String,
    order_by: &'static str,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    json_payload: Option<Map<String, JsonValue>>,
}

impl RawEntry {
    /// Converts to a domain entry; entries without a timestamp are dropped
    fn into_entry(self) -> Option<LogEntry> {
        let timestamp = self.timestamp?;
        let payload = self.json_payload.unwrap_or_default();
        let field = |key: &str| payload.get(key).and_then(JsonValue::as_str).map(str::to_string);

        Some(LogEntry {
            timestamp,
            session_id: field("sessionId"),
            entry_type: field("type"),
            message: field("message"),
        })
    }
}

#[async_trait]
impl LogBackend for GcpClient {
    async fn list_entries(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        let body = ListEntriesBody {
            resource_names: vec![format!("projects/{}", self.project_id)],
            filter: query.filter(),
            order_by: "timestamp asc",
            page_size: query.page_size,
        };

        let url = format!("{}/v2/entries:list", self.endpoints.logging);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .json(&body)
            .send()
            .await?;

        let list: ListEntriesResponse = self.handle_response(response).await?;
        let entries = list
            .entries
            .into_iter()
            .filter_map(RawEntry::into_entry)
            .collect::<Vec<_>>();

        tracing::debug!(
            "Fetched {} log entries for job {} session {}",
            entries.len(),
            query.job_name,
            query.session_id
        );

        Ok(entries)
    }
}
