//! Pipeline context
//!
//! Static settings every pipeline needs, resolved once at startup from the
//! [`Config`] and shared read-only by all sessions.

use sluice_core::domain::pipeline::Stage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// A remote job one pipeline stage runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub stage: Stage,
    /// Short job name, as it appears in log resource labels
    pub job_name: String,
    /// Fully qualified resource (`projects/{p}/locations/{r}/jobs/{j}`)
    pub job_resource: String,
}

impl JobSpec {
    fn new(stage: Stage, project_id: &str, region: &str, job_name: &str) -> Self {
        Self {
            stage,
            job_name: job_name.to_string(),
            job_resource: format!(
                "projects/{}/locations/{}/jobs/{}",
                project_id, region, job_name
            ),
        }
    }
}

/// Polling cadence of the per-stage loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub discovery_interval: Duration,
    pub discovery_deadline: Duration,
    pub discovery_page_size: u32,
    pub completion_poll_interval: Duration,
    pub log_poll_interval: Duration,
    pub log_page_size: u32,
}

/// Settings for running the builder as a local process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBuilder {
    pub dir: PathBuf,
    pub entry: String,
}

/// Shared, immutable configuration of every pipeline
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub subscription: String,
    pub bucket: String,
    pub builder: JobSpec,
    pub deployer: JobSpec,
    pub timings: Timings,
    /// Forwarded to the build job when set
    pub genai_api_key: Option<String>,
    /// Present when builds run locally instead of on the job backend
    pub local_builder: Option<LocalBuilder>,
}

impl PipelineContext {
    /// Resolves the context from configuration
    pub fn from_config(config: &Config) -> Arc<Self> {
        let local_builder = config.local_mode.then(|| LocalBuilder {
            dir: config.local_builder_dir.clone(),
            entry: config.local_builder_entry.clone(),
        });

        Arc::new(Self {
            subscription: config.subscription.clone(),
            bucket: config.bucket.clone(),
            builder: JobSpec::new(
                Stage::Build,
                &config.project_id,
                &config.region,
                &config.builder_job,
            ),
            deployer: JobSpec::new(
                Stage::Deploy,
                &config.project_id,
                &config.region,
                &config.deployer_job,
            ),
            timings: Timings {
                discovery_interval: config.discovery_interval,
                discovery_deadline: config.discovery_deadline,
                discovery_page_size: config.discovery_page_size,
                completion_poll_interval: config.completion_poll_interval,
                log_poll_interval: config.log_poll_interval,
                log_page_size: config.log_page_size,
            },
            genai_api_key: config.genai_api_key.clone(),
            local_builder,
        })
    }

    /// Job run by the given stage
    pub fn job(&self, stage: Stage) -> &JobSpec {
        match stage {
            Stage::Build => &self.builder,
            Stage::Deploy => &self.deployer,
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_builder.is_some()
    }
}
