//! Execution trigger
//!
//! Starts one execution of a stage's job, labelled so discovery can find it
//! again among the job's other executions.

use chrono::Utc;
use serde_json::Value as JsonValue;
use sluice_client::JobsBackend;
use sluice_core::domain::job::{JobHandle, RUN_LABEL, SESSION_LABEL, STAGE_LABEL};
use sluice_core::domain::pipeline::Stage;
use sluice_core::domain::request::PipelineRequest;
use sluice_core::domain::session::SessionId;
use sluice_core::dto::trigger::{EnvVar, TriggerRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::{JobSpec, PipelineContext};
use crate::error::StageError;

pub struct ExecutionTrigger {
    jobs: Arc<dyn JobsBackend>,
}

impl ExecutionTrigger {
    pub fn new(jobs: Arc<dyn JobsBackend>) -> Self {
        Self { jobs }
    }

    /// Triggers the job and returns as soon as the backend accepted it
    ///
    /// # Arguments
    /// * `job` - Job to run
    /// * `session` - Session the execution belongs to
    /// * `parameters` - Values passed to the job's environment; nulls are omitted
    ///
    /// # Errors
    /// Returns [`StageError::Trigger`] if the backend call fails. The call is
    /// not retried.
    pub async fn trigger(
        &self,
        job: &JobSpec,
        session: &SessionId,
        parameters: Vec<(String, JsonValue)>,
    ) -> Result<JobHandle, StageError> {
        let run_id = Uuid::new_v4().to_string();

        let mut labels = BTreeMap::new();
        labels.insert(SESSION_LABEL.to_string(), session.to_string());
        labels.insert(STAGE_LABEL.to_string(), job.stage.label().to_string());
        labels.insert(RUN_LABEL.to_string(), run_id.clone());

        let request = TriggerRequest {
            job_resource: job.job_resource.clone(),
            labels,
            env: EnvVar::flatten(parameters),
        };

        let started_at = Utc::now();
        let hint = self
            .jobs
            .run_job(&request)
            .await
            .map_err(|source| StageError::Trigger {
                stage: job.stage,
                job_resource: job.job_resource.clone(),
                source,
            })?;

        info!(
            "Triggered {} job {} for session {} (run {})",
            job.stage, job.job_name, session, run_id
        );
        if let Some(name) = &hint {
            debug!("Backend reported execution {} for run {}", name, run_id);
        }

        Ok(JobHandle {
            stage: job.stage,
            job_resource: job.job_resource.clone(),
            run_id,
            execution_name: None,
            started_at,
        })
    }
}

/// Environment passed to a stage's job
///
/// The builder receives the session, the request type and the model API key
/// when one is configured; the deployer only needs the session.
pub fn stage_parameters(
    context: &PipelineContext,
    stage: Stage,
    request: &PipelineRequest,
) -> Vec<(String, JsonValue)> {
    let session = JsonValue::from(request.session_id().as_str());
    match stage {
        Stage::Build => vec![
            ("SESSION_ID".to_string(), session),
            (
                "REQUEST_TYPE".to_string(),
                JsonValue::from(request.request_type()),
            ),
            (
                "GOOGLE_GENAI_API_KEY".to_string(),
                context
                    .genai_api_key
                    .as_deref()
                    .map_or(JsonValue::Null, JsonValue::from),
            ),
        ],
        Stage::Deploy => vec![("SESSION_ID".to_string(), session)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeJobs, test_context};

    fn request(body: &str) -> PipelineRequest {
        PipelineRequest::from_slice(body.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_trigger_labels_and_env() {
        let jobs = FakeJobs::new();
        let context = test_context();
        let trigger = ExecutionTrigger::new(jobs.clone());
        let request = request(r#"{"chatId":"s1","template":"blog"}"#);

        let handle = trigger
            .trigger(
                context.job(Stage::Build),
                request.session_id(),
                stage_parameters(&context, Stage::Build, &request),
            )
            .await
            .unwrap();

        assert_eq!(handle.stage, Stage::Build);
        assert_eq!(handle.job_resource, context.builder.job_resource);
        assert!(handle.execution_name.is_none());

        let sent = jobs.triggers();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].labels.get(SESSION_LABEL).unwrap(), "s1");
        assert_eq!(sent[0].labels.get(STAGE_LABEL).unwrap(), "builder");
        assert_eq!(sent[0].labels.get(RUN_LABEL).unwrap(), &handle.run_id);

        // no API key configured, so it is omitted
        assert_eq!(
            sent[0].env,
            vec![
                EnvVar::new("SESSION_ID", "s1"),
                EnvVar::new("REQUEST_TYPE", "new"),
            ]
        );
    }

    #[tokio::test]
    async fn test_each_trigger_gets_a_fresh_run_id() {
        let jobs = FakeJobs::new();
        let context = test_context();
        let trigger = ExecutionTrigger::new(jobs.clone());
        let session = SessionId::parse("s1").unwrap();

        let a = trigger
            .trigger(context.job(Stage::Deploy), &session, Vec::new())
            .await
            .unwrap();
        let b = trigger
            .trigger(context.job(Stage::Deploy), &session, Vec::new())
            .await
            .unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(jobs.triggers()[0].labels.get(STAGE_LABEL).unwrap(), "deployer");
    }

    #[tokio::test]
    async fn test_trigger_failure() {
        let jobs = FakeJobs::new();
        jobs.fail_triggers();
        let context = test_context();
        let trigger = ExecutionTrigger::new(jobs.clone());

        let err = trigger
            .trigger(
                context.job(Stage::Build),
                &SessionId::parse("s1").unwrap(),
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Trigger { stage: Stage::Build, .. }));
        assert!(jobs.triggers().is_empty());
    }

    #[test]
    fn test_stage_parameters() {
        let mut context = (*test_context()).clone();
        context.genai_api_key = Some("key".to_string());
        let request = request(r#"{"chatId":"s1","requestType":"edit"}"#);

        let build = EnvVar::flatten(stage_parameters(&context, Stage::Build, &request));
        assert_eq!(
            build,
            vec![
                EnvVar::new("SESSION_ID", "s1"),
                EnvVar::new("REQUEST_TYPE", "edit"),
                EnvVar::new("GOOGLE_GENAI_API_KEY", "key"),
            ]
        );

        let deploy = EnvVar::flatten(stage_parameters(&context, Stage::Deploy, &request));
        assert_eq!(deploy, vec![EnvVar::new("SESSION_ID", "s1")]);
    }
}
