//! Sluice Backend Client
//!
//! Typed access to the external collaborators the orchestrator depends on:
//! - Job execution backend (trigger, list and inspect executions)
//! - Log backend (query structured status entries)
//! - Object store (persist request payloads and checkpoints)
//! - Message queue (pull, acknowledge, extend leases)
//!
//! Each collaborator is a trait so the worker can be driven by in-memory
//! fakes in tests. [`GcpClient`] implements all of them against the Google
//! Cloud REST APIs (Cloud Run, Cloud Logging, Cloud Storage, Pub/Sub).
//!
//! # Example
//!
//! ```no_run
//! use sluice_client::{GcpClient, JobsBackend};
//!
//! # async fn example() -> sluice_client::Result<()> {
//! let client = GcpClient::new("my-project").await?;
//! let executions = client
//!     .list_executions("projects/my-project/locations/asia-south1/jobs/builder", 10)
//!     .await?;
//! println!("{} recent executions", executions.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
mod jobs;
mod logging;
mod pubsub;
mod storage;

pub use error::{ClientError, Result};
pub use jobs::JobsBackend;
pub use logging::LogBackend;
pub use pubsub::{MessageQueue, PubSubSubscription, QueueMessage};
pub use storage::{GcsBucket, ObjectStore};

use gcp_auth::TokenProvider;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// OAuth scope covering every API the client calls
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Base URLs of the Google Cloud APIs
///
/// Overridable so the client can point at emulators or proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub run: String,
    pub logging: String,
    pub storage: String,
    pub pubsub: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            run: "https://run.googleapis.com".to_string(),
            logging: "https://logging.googleapis.com".to_string(),
            storage: "https://storage.googleapis.com".to_string(),
            pubsub: "https://pubsub.googleapis.com".to_string(),
        }
    }
}

impl Endpoints {
    fn normalized(self) -> Self {
        let trim = |s: String| s.trim_end_matches('/').to_string();
        Self {
            run: trim(self.run),
            logging: trim(self.logging),
            storage: trim(self.storage),
            pubsub: trim(self.pubsub),
        }
    }
}

/// REST client for the Google Cloud backends
#[derive(Clone)]
pub struct GcpClient {
    project_id: String,
    endpoints: Endpoints,
    client: Client,
    token_provider: Arc<dyn TokenProvider>,
}

// TokenProvider doesn't implement Debug
impl std::fmt::Debug for GcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpClient")
            .field("project_id", &self.project_id)
            .field("endpoints", &self.endpoints)
            .field("token_provider", &"<TokenProvider>")
            .finish()
    }
}

impl GcpClient {
    /// Create a client using credentials discovered from the environment
    ///
    /// # Arguments
    /// * `project_id` - The Google Cloud project owning the jobs and logs
    pub async fn new(project_id: impl Into<String>) -> Result<Self> {
        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| ClientError::AuthError(format!("Failed to initialize GCP auth: {}", e)))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self::with_parts(
            project_id,
            Endpoints::default(),
            client,
            token_provider,
        ))
    }

    /// Create a client from explicit parts
    ///
    /// This allows custom endpoints, timeouts, proxies or credentials.
    pub fn with_parts(
        project_id: impl Into<String>,
        endpoints: Endpoints,
        client: Client,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            endpoints: endpoints.normalized(),
            client,
            token_provider,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Fetches a bearer token for the Cloud Platform scope
    async fn bearer(&self) -> Result<String> {
        let token = self
            .token_provider
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|e| ClientError::AuthError(format!("Failed to get access token: {}", e)))?;

        Ok(token.as_str().to_string())
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is irrelevant
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
