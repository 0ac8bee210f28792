//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::pipeline::Stage;

/// Name of the execution condition that carries the terminal outcome
pub const SUCCEEDED_CONDITION: &str = "Succeeded";

/// Condition state reported once an execution finished successfully
pub const CONDITION_SUCCEEDED: &str = "CONDITION_SUCCEEDED";

/// Condition state reported once an execution failed
pub const CONDITION_FAILED: &str = "CONDITION_FAILED";

/// Label carrying the session identifier on every triggered execution
pub const SESSION_LABEL: &str = "sessionId";

/// Label carrying the stage tag
pub const STAGE_LABEL: &str = "pipeline";

/// Label carrying the per-trigger run identifier
pub const RUN_LABEL: &str = "run";

/// Handle for one triggered stage of a session's pipeline
///
/// Owned by the flow driving the session. The execution name is filled in
/// once discovery has matched the execution by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub stage: Stage,
    pub job_resource: String,
    pub run_id: String,
    pub execution_name: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// One running instance of a job, as listed by the job backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus::from_conditions(&self.conditions)
    }
}

/// A named condition reported on an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub state: String,
}

impl Condition {
    pub fn new(condition_type: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            state: state.into(),
        }
    }
}

/// Tri-state outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    /// Maps backend conditions onto the tri-state outcome
    ///
    /// Only the `Succeeded` condition is consulted. Its absence, or any state
    /// other than the two terminal ones, means the execution is still running.
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        let Some(succeeded) = conditions
            .iter()
            .find(|c| c.condition_type == SUCCEEDED_CONDITION)
        else {
            return ExecutionStatus::Running;
        };

        match succeeded.state.as_str() {
            CONDITION_SUCCEEDED => ExecutionStatus::Succeeded,
            CONDITION_FAILED => ExecutionStatus::Failed,
            _ => ExecutionStatus::Running,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Succeeded => write!(f, "SUCCEEDED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
        }
    }
}
