//! In-memory backends for tests
//!
//! Scriptable fakes of every backend trait, so pipelines can be driven end to
//! end with millisecond intervals and no network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_client::{
    ClientError, JobsBackend, LogBackend, MessageQueue, ObjectStore, QueueMessage, Result,
};
use sluice_core::domain::job::{
    CONDITION_SUCCEEDED, Condition, Execution, STAGE_LABEL, SUCCEEDED_CONDITION,
};
use sluice_core::domain::log::{LogEntry, STATUS_ENTRY_TYPE};
use sluice_core::dto::log::LogQuery;
use sluice_core::dto::trigger::TriggerRequest;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::context::PipelineContext;
use crate::service::Backends;

/// Context with millisecond intervals
pub fn test_context() -> Arc<PipelineContext> {
    let mut config = Config::new("proj".into(), "region".into(), "site-builder".into());
    config.deployer_job = "site-deployer".into();
    config.discovery_interval = Duration::from_millis(5);
    config.discovery_deadline = Duration::from_millis(200);
    config.completion_poll_interval = Duration::from_millis(5);
    config.log_poll_interval = Duration::from_millis(5);
    PipelineContext::from_config(&config)
}

pub fn status_conditions(state: &str) -> Vec<Condition> {
    if state.is_empty() {
        Vec::new()
    } else {
        vec![
            Condition::new("Ready", "CONDITION_PENDING"),
            Condition::new(SUCCEEDED_CONDITION, state),
        ]
    }
}

// =============================================================================
// Jobs
// =============================================================================

#[derive(Default)]
struct JobsState {
    triggers: Vec<TriggerRequest>,
    /// Executions per job resource, most recent first
    executions: HashMap<String, Vec<Execution>>,
    /// Condition sequences served by `get_execution`, per stage label
    scripts: HashMap<String, VecDeque<Vec<Condition>>>,
    fail_triggers: bool,
    list_failures: usize,
    get_failures: usize,
    get_calls: usize,
}

/// Job backend whose executions follow scripted condition sequences
#[derive(Default)]
pub struct FakeJobs {
    state: Mutex<JobsState>,
}

impl FakeJobs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every execution of both stages succeeds after one running poll
    pub fn succeeding() -> Arc<Self> {
        let jobs = Self::new();
        jobs.script("builder", &["", CONDITION_SUCCEEDED]);
        jobs.script("deployer", &["CONDITION_RECONCILING", CONDITION_SUCCEEDED]);
        jobs
    }

    /// Sets the `Succeeded` condition states successive polls return
    ///
    /// An empty state means no `Succeeded` condition at all. The last state
    /// keeps being served once the sequence is exhausted.
    pub fn script(&self, stage_label: &str, states: &[&str]) {
        self.state.lock().unwrap().scripts.insert(
            stage_label.to_string(),
            states.iter().map(|s| status_conditions(s)).collect(),
        );
    }

    /// Adds an execution that was not created by a trigger call
    pub fn add_execution(&self, job_resource: &str, execution: Execution) {
        self.state
            .lock()
            .unwrap()
            .executions
            .entry(job_resource.to_string())
            .or_default()
            .insert(0, execution);
    }

    pub fn fail_triggers(&self) {
        self.state.lock().unwrap().fail_triggers = true;
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().unwrap().list_failures = count;
    }

    pub fn fail_next_gets(&self, count: usize) {
        self.state.lock().unwrap().get_failures = count;
    }

    pub fn triggers(&self) -> Vec<TriggerRequest> {
        self.state.lock().unwrap().triggers.clone()
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().unwrap().get_calls
    }
}

#[async_trait]
impl JobsBackend for FakeJobs {
    async fn run_job(&self, request: &TriggerRequest) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_triggers {
            return Err(ClientError::api_error(403, "permission denied"));
        }
        state.triggers.push(request.clone());

        let executions = state
            .executions
            .entry(request.job_resource.clone())
            .or_default();
        let name = format!(
            "{}/executions/run-{}",
            request.job_resource,
            executions.len() + 1
        );
        executions.insert(
            0,
            Execution {
                name: name.clone(),
                labels: request.labels.clone().into_iter().collect(),
                conditions: Vec::new(),
                create_time: Some(Utc::now()),
            },
        );
        Ok(Some(name))
    }

    async fn list_executions(&self, job_resource: &str, page_size: u32) -> Result<Vec<Execution>> {
        let mut state = self.state.lock().unwrap();
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(ClientError::api_error(503, "unavailable"));
        }
        Ok(state
            .executions
            .get(job_resource)
            .map(|list| list.iter().take(page_size as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_execution(&self, execution_name: &str) -> Result<Execution> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        if state.get_failures > 0 {
            state.get_failures -= 1;
            return Err(ClientError::api_error(500, "internal"));
        }

        let JobsState {
            executions, scripts, ..
        } = &mut *state;
        let execution = executions
            .values_mut()
            .flatten()
            .find(|e| e.name == execution_name)
            .ok_or_else(|| ClientError::api_error(404, "execution not found"))?;

        let label = execution.label(STAGE_LABEL).unwrap_or_default().to_string();
        if let Some(script) = scripts.get_mut(&label) {
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(conditions) = next {
                execution.conditions = conditions;
            }
        }
        Ok(execution.clone())
    }
}

// =============================================================================
// Logs
// =============================================================================

/// Log backend holding entries per job name
///
/// Queries filter by job and timestamp only, the way a coarse backend would;
/// session and type filtering is left to the caller.
#[derive(Default)]
pub struct FakeLogs {
    entries: Mutex<Vec<(String, LogEntry)>>,
    failures: Mutex<usize>,
    queries: Mutex<Vec<LogQuery>>,
}

impl FakeLogs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, job_name: &str, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap()
            .push((job_name.to_string(), entry));
    }

    /// Appends a STATUS entry for a session
    pub fn status(&self, job_name: &str, session: &str, timestamp: DateTime<Utc>, message: &str) {
        self.push(
            job_name,
            LogEntry {
                timestamp,
                session_id: Some(session.to_string()),
                entry_type: Some(STATUS_ENTRY_TYPE.to_string()),
                message: Some(message.to_string()),
            },
        );
    }

    pub fn fail_next(&self, count: usize) {
        *self.failures.lock().unwrap() = count;
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogBackend for FakeLogs {
    async fn list_entries(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        self.queries.lock().unwrap().push(query.clone());
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ClientError::api_error(429, "quota exceeded"));
            }
        }

        let mut entries: Vec<LogEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, entry)| *job == query.job_name && entry.timestamp > query.after)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        entries.truncate(query.page_size as usize);
        Ok(entries)
    }
}

// =============================================================================
// Object store
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<Vec<String>>,
    fail_puts: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
    }

    /// Keys written, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_puts(&self) {
        *self.fail_puts.lock().unwrap() = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        if *self.fail_puts.lock().unwrap() {
            return Err(ClientError::api_error(503, "bucket unavailable"));
        }
        self.writes.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Default)]
pub struct FakeQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    pull_failures: Mutex<usize>,
    acks: Mutex<Vec<String>>,
    nacks: Mutex<Vec<String>>,
    extensions: Mutex<Vec<(String, u32)>>,
}

impl FakeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, ack_id: &str, body: &[u8]) {
        self.pending.lock().unwrap().push_back(message(ack_id, body));
    }

    pub fn fail_next_pulls(&self, count: usize) {
        *self.pull_failures.lock().unwrap() = count;
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().unwrap().clone()
    }

    pub fn nacks(&self) -> Vec<String> {
        self.nacks.lock().unwrap().clone()
    }

    pub fn extensions(&self) -> Vec<(String, u32)> {
        self.extensions.lock().unwrap().clone()
    }
}

pub fn message(ack_id: &str, body: &[u8]) -> QueueMessage {
    QueueMessage {
        ack_id: ack_id.to_string(),
        message_id: format!("msg-{}", ack_id),
        data: body.to_vec(),
        publish_time: Some(Utc::now()),
    }
}

#[async_trait]
impl MessageQueue for FakeQueue {
    async fn pull(&self, max_messages: u32) -> Result<Vec<QueueMessage>> {
        {
            let mut failures = self.pull_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ClientError::api_error(503, "subscription unavailable"));
            }
        }
        let mut pending = self.pending.lock().unwrap();
        let count = pending.len().min(max_messages as usize);
        Ok(pending.drain(..count).collect())
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        self.acks.lock().unwrap().push(ack_id.to_string());
        Ok(())
    }

    async fn nack(&self, ack_id: &str) -> Result<()> {
        self.nacks.lock().unwrap().push(ack_id.to_string());
        Ok(())
    }

    async fn extend_deadline(&self, ack_id: &str, seconds: u32) -> Result<()> {
        self.extensions
            .lock()
            .unwrap()
            .push((ack_id.to_string(), seconds));
        Ok(())
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// All fakes plus the [`Backends`] bundle pointing at them
pub struct Fakes {
    pub jobs: Arc<FakeJobs>,
    pub logs: Arc<FakeLogs>,
    pub store: Arc<MemoryStore>,
}

impl Fakes {
    pub fn new(jobs: Arc<FakeJobs>) -> Self {
        Self {
            jobs,
            logs: FakeLogs::new(),
            store: MemoryStore::new(),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            jobs: self.jobs.clone(),
            logs: self.logs.clone(),
            store: self.store.clone(),
        }
    }
}
