//! Job trigger DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Request to start one execution of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    /// Fully qualified job resource (`projects/{p}/locations/{r}/jobs/{j}`)
    pub job_resource: String,
    /// Labels attached to the execution so it can be found again
    pub labels: BTreeMap<String, String>,
    /// Environment passed to the job's container
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Flattens a parameter map into environment variables
    ///
    /// Strings are passed through, other values are rendered as JSON and
    /// nulls are dropped.
    pub fn flatten<K, I>(params: I) -> Vec<EnvVar>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, JsonValue)>,
    {
        params
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    JsonValue::Null => return None,
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                Some(EnvVar::new(name, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_coerces_values() {
        let env = EnvVar::flatten([
            ("SESSION_ID", json!("s1")),
            ("RETRIES", json!(3)),
            ("DRY_RUN", json!(false)),
            ("API_KEY", JsonValue::Null),
        ]);

        assert_eq!(
            env,
            vec![
                EnvVar::new("SESSION_ID", "s1"),
                EnvVar::new("RETRIES", "3"),
                EnvVar::new("DRY_RUN", "false"),
            ]
        );
    }
}
