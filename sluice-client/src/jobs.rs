//! Job execution backend
//!
//! Triggers job executions and inspects their status through the Cloud Run
//! Admin API (v2).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sluice_core::domain::job::Execution;
use sluice_core::dto::trigger::{EnvVar, TriggerRequest};
use std::collections::BTreeMap;

use crate::GcpClient;
use crate::error::Result;

/// Operations the orchestrator needs from the job execution backend
#[async_trait]
pub trait JobsBackend: Send + Sync {
    /// Starts an execution of a job
    ///
    /// Returns once the backend accepted the request. The returned execution
    /// name is a hint only; callers locate the execution by label.
    async fn run_job(&self, request: &TriggerRequest) -> Result<Option<String>>;

    /// Lists the most recent executions of a job
    ///
    /// # Arguments
    /// * `job_resource` - Fully qualified job resource
    /// * `page_size` - Maximum number of executions to return
    async fn list_executions(&self, job_resource: &str, page_size: u32) -> Result<Vec<Execution>>;

    /// Fetches a single execution by its fully qualified name
    async fn get_execution(&self, execution_name: &str) -> Result<Execution>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunJobBody<'a> {
    overrides: Overrides<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Overrides<'a> {
    labels: &'a BTreeMap<String, String>,
    container_overrides: Vec<ContainerOverride<'a>>,
}

#[derive(Debug, Serialize)]
struct ContainerOverride<'a> {
    env: &'a [EnvVar],
}

/// Long-running operation returned by `jobs.run`
#[derive(Debug, Deserialize)]
struct Operation {
    #[allow(dead_code)]
    name: Option<String>,
    #[serde(default)]
    metadata: Option<OperationMetadata>,
}

#[derive(Debug, Deserialize)]
struct OperationMetadata {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListExecutionsResponse {
    #[serde(default)]
    executions: Vec<Execution>,
}

impl GcpClient {
    fn run_job_url(&self, job_resource: &str) -> String {
        format!("{}/v2/{}:run", self.endpoints.run, job_resource)
    }

    fn executions_url(&self, job_resource: &str) -> String {
        format!("{}/v2/{}/executions", self.endpoints.run, job_resource)
    }

    fn execution_url(&self, execution_name: &str) -> String {
        format!("{}/v2/{}", self.endpoints.run, execution_name)
    }
}

#[async_trait]
impl JobsBackend for GcpClient {
    async fn run_job(&self, request: &TriggerRequest) -> Result<Option<String>> {
        let body = RunJobBody {
            overrides: Overrides {
                labels: &request.labels,
                container_overrides: vec![ContainerOverride { env: &request.env }],
            },
        };

        let response = self
            .client
            .post(self.run_job_url(&request.job_resource))
            .bearer_auth(self.bearer().await?)
            .json(&body)
            .send()
            .await?;

        let operation: Operation = self.handle_response(response).await?;
        Ok(operation.metadata.and_then(|m| m.name))
    }

    async fn list_executions(&self, job_resource: &str, page_size: u32) -> Result<Vec<Execution>> {
        let response = self
            .client
            .get(self.executions_url(job_resource))
            .bearer_auth(self.bearer().await?)
            .query(&[("pageSize", page_size)])
            .send()
            .await?;

        let list: ListExecutionsResponse = self.handle_response(response).await?;
        Ok(list.executions)
    }

    async fn get_execution(&self, execution_name: &str) -> Result<Execution> {
        let response = self
            .client
            .get(self.execution_url(execution_name))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
