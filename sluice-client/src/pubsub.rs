//! Message queue
//!
//! Pulls build requests from a Pub/Sub subscription (REST v1) and settles
//! them. A negative acknowledgment resets the ack deadline to zero so the
//! backend redelivers according to its own retry policy.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GcpClient;
use crate::error::Result;

/// A message delivered by the queue, pending acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Token used to settle this delivery
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    pub publish_time: Option<DateTime<Utc>>,
}

/// Delivery and settlement operations on a queue subscription
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Pulls up to `max_messages` pending messages
    async fn pull(&self, max_messages: u32) -> Result<Vec<QueueMessage>>;

    /// Acknowledges a delivery; the message will not be redelivered
    async fn ack(&self, ack_id: &str) -> Result<()>;

    /// Rejects a delivery so the backend redelivers it
    async fn nack(&self, ack_id: &str) -> Result<()>;

    /// Extends the lease on a delivery that is still being processed
    async fn extend_deadline(&self, ack_id: &str, seconds: u32) -> Result<()>;
}

/// A Pub/Sub subscription bound to a client
#[derive(Debug, Clone)]
pub struct PubSubSubscription {
    client: GcpClient,
    subscription: String,
}

impl GcpClient {
    /// Binds the client to a subscription of this project
    pub fn subscription(&self, name: &str) -> PubSubSubscription {
        PubSubSubscription {
            subscription: subscription_path(&self.project_id, name),
            client: self.clone(),
        }
    }
}

fn subscription_path(project_id: &str, name: &str) -> String {
    if name.starts_with("projects/") {
        name.to_string()
    } else {
        format!("projects/{}/subscriptions/{}", project_id, name)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    max_messages: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody<'a> {
    ack_ids: [&'a str; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineBody<'a> {
    ack_ids: [&'a str; 1],
    ack_deadline_seconds: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
    publish_time: Option<DateTime<Utc>>,
}

impl ReceivedMessage {
    fn into_message(self) -> QueueMessage {
        // undecodable data is delivered empty and rejected downstream
        let data = BASE64.decode(self.message.data.as_bytes()).unwrap_or_else(|e| {
            tracing::warn!(
                "Message {} has undecodable data: {}",
                self.message.message_id,
                e
            );
            Vec::new()
        });

        QueueMessage {
            ack_id: self.ack_id,
            message_id: self.message.message_id,
            data,
            publish_time: self.message.publish_time,
        }
    }
}

impl PubSubSubscription {
    pub fn path(&self) -> &str {
        &self.subscription
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/v1/{}:{}",
            self.client.endpoints.pubsub, self.subscription, method
        )
    }

    async fn modify_deadline(&self, ack_id: &str, seconds: u32) -> Result<()> {
        let response = self
            .client
            .client
            .post(self.method_url("modifyAckDeadline"))
            .bearer_auth(self.client.bearer().await?)
            .json(&ModifyAckDeadlineBody {
                ack_ids: [ack_id],
                ack_deadline_seconds: seconds,
            })
            .send()
            .await?;

        self.client.handle_empty_response(response).await
    }
}

#[async_trait]
impl MessageQueue for PubSubSubscription {
    async fn pull(&self, max_messages: u32) -> Result<Vec<QueueMessage>> {
        let response = self
            .client
            .client
            .post(self.method_url("pull"))
            .bearer_auth(self.client.bearer().await?)
            .json(&PullBody { max_messages })
            .send()
            .await?;

        let pulled: PullResponse = self.client.handle_response(response).await?;
        Ok(pulled
            .received_messages
            .into_iter()
            .map(ReceivedMessage::into_message)
            .collect())
    }

    async fn ack(&self, ack_id: &str) -> Result<()> {
        let response = self
            .client
            .client
            .post(self.method_url("acknowledge"))
            .bearer_auth(self.client.bearer().await?)
            .json(&AcknowledgeBody { ack_ids: [ack_id] })
            .send()
            .await?;

        self.client.handle_empty_response(response).await
    }

    async fn nack(&self, ack_id: &str) -> Result<()> {
        self.modify_deadline(ack_id, 0).await
    }

    async fn extend_deadline(&self, ack_id: &str, seconds: u32) -> Result<()> {
        self.modify_deadline(ack_id, seconds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_path() {
        assert_eq!(
            subscription_path("p", "website-generation-sub"),
            "projects/p/subscriptions/website-generation-sub"
        );
        assert_eq!(
            subscription_path("p", "projects/other/subscriptions/x"),
            "projects/other/subscriptions/x"
        );
    }

    #[test]
    fn test_pull_response_decodes_data() {
        let pulled: PullResponse = serde_json::from_value(json!({
            "receivedMessages": [
                {
                    "ackId": "ack-1",
                    "message": {
                        "data": BASE64.encode(br#"{"chatId":"s1"}"#),
                        "messageId": "m1",
                        "publishTime": "2025-03-01T12:00:00Z"
                    }
                },
                {
                    "ackId": "ack-2",
                    "message": {"data": "%%%not-base64", "messageId": "m2"}
                }
            ]
        }))
        .unwrap();

        let messages: Vec<QueueMessage> = pulled
            .received_messages
            .into_iter()
            .map(ReceivedMessage::into_message)
            .collect();

        assert_eq!(messages[0].ack_id, "ack-1");
        assert_eq!(messages[0].data, br#"{"chatId":"s1"}"#.to_vec());
        assert!(messages[0].publish_time.is_some());
        assert!(messages[1].data.is_empty());
    }

    #[test]
    fn test_empty_pull_response() {
        let pulled: PullResponse = serde_json::from_value(json!({})).unwrap();
        assert!(pulled.received_messages.is_empty());
    }

    #[test]
    fn test_modify_deadline_body() {
        let body = ModifyAckDeadlineBody {
            ack_ids: ["a"],
            ack_deadline_seconds: 0,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"ackIds": ["a"], "ackDeadlineSeconds": 0})
        );
    }
}
