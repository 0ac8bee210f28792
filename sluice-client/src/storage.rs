//! Object store
//!
//! Persists request payloads and pipeline checkpoints in a Cloud Storage
//! bucket (JSON API v1). Each write is a single-request media upload, so
//! readers never observe a partially written object.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};

use crate::GcpClient;
use crate::error::{ClientError, Result};

/// Key-value access to a single bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes an object, replacing any previous version
    ///
    /// # Arguments
    /// * `key` - Object name inside the bucket
    /// * `body` - Object contents
    /// * `content_type` - MIME type stored with the object
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Reads an object, returning `None` if it does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deletes an object; deleting a missing object succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// A Cloud Storage bucket bound to a client
#[derive(Debug, Clone)]
pub struct GcsBucket {
    client: GcpClient,
    bucket: String,
}

impl GcpClient {
    /// Binds the client to a bucket
    pub fn bucket(&self, bucket: impl Into<String>) -> GcsBucket {
        GcsBucket {
            client: self.clone(),
            bucket: bucket.into(),
        }
    }
}

impl GcsBucket {
    pub fn name(&self) -> &str {
        &self.bucket
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o",
            self.client.endpoints.storage, self.bucket
        )
    }

    /// URL of an object; the key is encoded as a single path segment
    fn object_url(&self, key: &str) -> Result<Url> {
        object_url(&self.client.endpoints.storage, &self.bucket, key)
    }
}

fn object_url(base: &str, bucket: &str, key: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ClientError::InvalidRequest(format!("Invalid storage endpoint: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidRequest("Storage endpoint cannot be a base".to_string()))?
        .extend(["storage", "v1", "b", bucket, "o", key]);
    Ok(url)
}

#[async_trait]
impl ObjectStore for GcsBucket {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let response = self
            .client
            .client
            .post(self.upload_url())
            .bearer_auth(self.client.bearer().await?)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        self.client.handle_empty_response(response).await?;
        tracing::debug!("Stored gs://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .client
            .get(self.object_url(key)?)
            .bearer_auth(self.client.bearer().await?)
            .query(&[("alt", "media")])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::api_error(status, message));
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .client
            .client
            .delete(self.object_url(key)?)
            .bearer_auth(self.client.bearer().await?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.client.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_encodes_key() {
        let url = object_url("https://storage.googleapis.com", "bucket", "requests/s1.json").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/bucket/o/requests%2Fs1.json"
        );
    }

    #[test]
    fn test_object_url_with_base_path() {
        let url = object_url("http://localhost:4443/gcs", "b", "checkpoints/a b.json").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/gcs/storage/v1/b/b/o/checkpoints%2Fa%20b.json"
        );
    }
}
