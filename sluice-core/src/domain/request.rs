//! Pipeline request domain types

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::domain::session::SessionId;

/// Field carrying the session identifier in inbound queue messages
pub const SESSION_FIELD: &str = "chatId";

/// Optional field selecting the builder's request type
pub const REQUEST_TYPE_FIELD: &str = "requestType";

/// Request type used when the message does not carry one
pub const DEFAULT_REQUEST_TYPE: &str = "new";

/// Reasons an inbound queue message cannot become a pipeline request
#[derive(Debug, Error)]
pub enum MalformedRequest {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing chatId in payload")]
    MissingSessionId,
}

/// A build request extracted from a queue message
///
/// Immutable once received. The raw bytes are kept so the payload store
/// receives exactly what the queue delivered.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    session_id: SessionId,
    payload: Map<String, JsonValue>,
    raw: Vec<u8>,
}

impl PipelineRequest {
    /// Parses a queue message body
    ///
    /// # Errors
    /// Fails when the body is not a JSON object or has no usable `chatId`.
    pub fn from_slice(data: &[u8]) -> Result<Self, MalformedRequest> {
        let value: JsonValue = serde_json::from_slice(data)?;
        let JsonValue::Object(payload) = value else {
            return Err(MalformedRequest::NotAnObject);
        };

        let session_id = payload
            .get(SESSION_FIELD)
            .and_then(JsonValue::as_str)
            .and_then(|s| SessionId::parse(s).ok())
            .ok_or(MalformedRequest::MissingSessionId)?;

        Ok(Self {
            session_id,
            payload,
            raw: data.to_vec(),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The full request object, including `chatId`
    pub fn payload(&self) -> &Map<String, JsonValue> {
        &self.payload
    }

    /// The message body exactly as received
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Request type forwarded to the builder job
    pub fn request_type(&self) -> &str {
        self.payload
            .get(REQUEST_TYPE_FIELD)
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_REQUEST_TYPE)
    }

    /// Returns true if `stored` holds the same request object
    ///
    /// Used to tell a redelivery of this message apart from a new request
    /// that reuses the session identifier.
    pub fn matches_stored(&self, stored: &[u8]) -> bool {
        match serde_json::from_slice::<JsonValue>(stored) {
            Ok(JsonValue::Object(other)) => other == self.payload,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_request() {
        let req = PipelineRequest::from_slice(br#"{"chatId":"s1","template":"blog"}"#).unwrap();
        assert_eq!(req.session_id().as_str(), "s1");
        assert_eq!(req.payload().get("template"), Some(&JsonValue::from("blog")));
        assert_eq!(req.request_type(), "new");
        assert_eq!(req.raw(), br#"{"chatId":"s1","template":"blog"}"#);
    }

    #[test]
    fn test_parse_rejects_missing_session() {
        let err = PipelineRequest::from_slice(br#"{"template":"blog"}"#).unwrap_err();
        assert!(matches!(err, MalformedRequest::MissingSessionId));

        let err = PipelineRequest::from_slice(br#"{"chatId":""}"#).unwrap_err();
        assert!(matches!(err, MalformedRequest::MissingSessionId));

        let err = PipelineRequest::from_slice(br#"{"chatId":42}"#).unwrap_err();
        assert!(matches!(err, MalformedRequest::MissingSessionId));
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(matches!(
            PipelineRequest::from_slice(b"not json"),
            Err(MalformedRequest::InvalidJson(_))
        ));
        assert!(matches!(
            PipelineRequest::from_slice(b"[1,2]"),
            Err(MalformedRequest::NotAnObject)
        ));
    }

    #[test]
    fn test_request_type_override() {
        let req = PipelineRequest::from_slice(br#"{"chatId":"s1","requestType":"edit"}"#).unwrap();
        assert_eq!(req.request_type(), "edit");
    }

    #[test]
    fn test_matches_stored_ignores_formatting() {
        let req = PipelineRequest::from_slice(br#"{"chatId":"s1","template":"blog"}"#).unwrap();
        assert!(req.matches_stored(br#"{ "template": "blog", "chatId": "s1" }"#));
        assert!(!req.matches_stored(br#"{"chatId":"s1","template":"shop"}"#));
        assert!(!req.matches_stored(b"garbage"));
    }
}
