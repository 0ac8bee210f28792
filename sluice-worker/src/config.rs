//! Worker configuration
//!
//! Defines all configurable parameters for the worker: the cloud resources it
//! drives, polling intervals for discovery, completion and log tailing, and
//! queue consumption limits.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration
///
/// All intervals are configurable to allow tuning for different deployment
/// scenarios (local emulators vs production backends).
#[derive(Debug, Clone)]
pub struct Config {
    /// Google Cloud project owning the jobs, logs, bucket and subscription
    pub project_id: String,

    /// Region the jobs run in (e.g., "asia-south1")
    pub region: String,

    /// Name of the build job
    pub builder_job: String,

    /// Name of the deploy job
    pub deployer_job: String,

    /// Bucket receiving request payloads and checkpoints
    pub bucket: String,

    /// Queue subscription delivering build requests
    pub subscription: String,

    /// Run the builder as a local process instead of the remote pipeline
    pub local_mode: bool,

    /// Address the HTTP/WebSocket server binds to
    pub bind_addr: String,

    /// API key forwarded to the build job, if any
    pub genai_api_key: Option<String>,

    /// Delay between execution listing attempts
    pub discovery_interval: Duration,

    /// Give up on finding a triggered execution after this long
    pub discovery_deadline: Duration,

    /// How many recent executions to scan per listing
    pub discovery_page_size: u32,

    /// Delay between execution status checks
    pub completion_poll_interval: Duration,

    /// Delay between log tail ticks
    pub log_poll_interval: Duration,

    /// Maximum log entries fetched per tick
    pub log_page_size: u32,

    /// Delay between queue pulls
    pub queue_poll_interval: Duration,

    /// Max pipelines running at the same time
    pub max_parallel_pipelines: usize,

    /// Lease requested each time an in-flight message is extended
    pub ack_extension: Duration,

    /// Working directory of the local builder
    pub local_builder_dir: PathBuf,

    /// Entry script of the local builder, relative to its directory
    pub local_builder_entry: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(project_id: String, region: String, builder_job: String) -> Self {
        Self {
            project_id,
            region,
            builder_job,
            deployer_job: "qwintly-deployer".to_string(),
            bucket: "qwintly-builder-requests".to_string(),
            subscription: "website-generation-sub".to_string(),
            local_mode: false,
            bind_addr: "0.0.0.0:8080".to_string(),
            genai_api_key: None,
            discovery_interval: Duration::from_secs(8),
            discovery_deadline: Duration::from_secs(4 * 60),
            discovery_page_size: 10,
            completion_poll_interval: Duration::from_secs(5),
            log_poll_interval: Duration::from_millis(1000),
            log_page_size: 50,
            queue_poll_interval: Duration::from_millis(1000),
            max_parallel_pipelines: 8,
            ack_extension: Duration::from_secs(60),
            local_builder_dir: PathBuf::from("../qwintly-builder"),
            local_builder_entry: "dist/index.js".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - GOOGLE_CLOUD_PROJECT (required)
    /// - CLOUD_RUN_REGION (required)
    /// - CLOUD_RUN_JOB_NAME (required, build job)
    /// - DEPLOYER_JOB_NAME (optional, default: qwintly-deployer)
    /// - BUCKET_NAME (optional, default: qwintly-builder-requests)
    /// - PUBSUB_SUBSCRIPTION (optional, default: website-generation-sub)
    /// - LOCAL_MODE (optional, "true" enables local builds)
    /// - PORT (optional, default: 8080)
    /// - GOOGLE_GENAI_API_KEY (optional)
    /// - DISCOVERY_INTERVAL_SECS (optional, default: 8)
    /// - DISCOVERY_DEADLINE_SECS (optional, default: 240)
    /// - COMPLETION_POLL_INTERVAL_SECS (optional, default: 5)
    /// - LOG_POLL_INTERVAL_MS (optional, default: 1000)
    /// - QUEUE_POLL_INTERVAL_MS (optional, default: 1000)
    /// - MAX_PARALLEL_PIPELINES (optional, default: 8)
    /// - LOCAL_BUILDER_DIR (optional, default: ../qwintly-builder)
    /// - LOCAL_BUILDER_ENTRY (optional, default: dist/index.js)
    pub fn from_env() -> anyhow::Result<Self> {
        let project_id = std::env::var("GOOGLE_CLOUD_PROJECT")
            .map_err(|_| anyhow::anyhow!("GOOGLE_CLOUD_PROJECT environment variable not set"))?;

        let region = std::env::var("CLOUD_RUN_REGION")
            .map_err(|_| anyhow::anyhow!("CLOUD_RUN_REGION environment variable not set"))?;

        let builder_job = std::env::var("CLOUD_RUN_JOB_NAME")
            .map_err(|_| anyhow::anyhow!("CLOUD_RUN_JOB_NAME environment variable not set"))?;

        let mut config = Self::new(project_id, region, builder_job);

        if let Ok(job) = std::env::var("DEPLOYER_JOB_NAME") {
            config.deployer_job = job;
        }
        if let Ok(bucket) = std::env::var("BUCKET_NAME") {
            config.bucket = bucket;
        }
        if let Ok(subscription) = std::env::var("PUBSUB_SUBSCRIPTION") {
            config.subscription = subscription;
        }
        config.local_mode = std::env::var("LOCAL_MODE").is_ok_and(|v| v == "true");
        if let Some(port) = env_parse::<u16>("PORT") {
            config.bind_addr = format!("0.0.0.0:{}", port);
        }
        config.genai_api_key = std::env::var("GOOGLE_GENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());

        if let Some(secs) = env_parse::<u64>("DISCOVERY_INTERVAL_SECS") {
            config.discovery_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("DISCOVERY_DEADLINE_SECS") {
            config.discovery_deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("COMPLETION_POLL_INTERVAL_SECS") {
            config.completion_poll_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("LOG_POLL_INTERVAL_MS") {
            config.log_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("QUEUE_POLL_INTERVAL_MS") {
            config.queue_poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = env_parse::<usize>("MAX_PARALLEL_PIPELINES") {
            config.max_parallel_pipelines = max;
        }
        if let Ok(dir) = std::env::var("LOCAL_BUILDER_DIR") {
            config.local_builder_dir = PathBuf::from(dir);
        }
        if let Ok(entry) = std::env::var("LOCAL_BUILDER_ENTRY") {
            config.local_builder_entry = entry;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.project_id.is_empty() {
            anyhow::bail!("project_id cannot be empty");
        }

        if self.region.is_empty() {
            anyhow::bail!("region cannot be empty");
        }

        if self.builder_job.is_empty() || self.deployer_job.is_empty() {
            anyhow::bail!("job names cannot be empty");
        }

        if self.bucket.is_empty() {
            anyhow::bail!("bucket cannot be empty");
        }

        if self.subscription.is_empty() {
            anyhow::bail!("subscription cannot be empty");
        }

        if self.discovery_interval.is_zero()
            || self.completion_poll_interval.is_zero()
            || self.log_poll_interval.is_zero()
            || self.queue_poll_interval.is_zero()
        {
            anyhow::bail!("polling intervals must be greater than 0");
        }

        if self.discovery_deadline < self.discovery_interval {
            anyhow::bail!("discovery_deadline must be at least one discovery_interval");
        }

        if self.max_parallel_pipelines == 0 {
            anyhow::bail!("max_parallel_pipelines must be greater than 0");
        }

        // Pub/Sub accepts ack deadlines between 10 and 600 seconds
        if !(10..=600).contains(&self.ack_extension.as_secs()) {
            anyhow::bail!("ack_extension must be between 10 and 600 seconds");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            "local-project".to_string(),
            "asia-south1".to_string(),
            "qwintly-builder".to_string(),
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}
