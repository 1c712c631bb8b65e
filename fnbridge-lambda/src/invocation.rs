//! Invocation payloads and types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::{STATUS_ACCEPTED, STATUS_OK};

/// How the platform should run an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    /// Wait for the function to finish and return its output
    RequestResponse,
    /// Queue for asynchronous execution and return once accepted
    Event,
}

impl InvocationKind {
    /// Status the platform answers with when it accepts this kind of call
    pub fn success_status(&self) -> u16 {
        match self {
            Self::RequestResponse => STATUS_OK,
            Self::Event => STATUS_ACCEPTED,
        }
    }
}

/// Payload handed to the entry point of a deployed runtime.
///
/// `executor_id` and `call_id` correlate adapter logs with the host
/// framework's bookkeeping; every other key passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    pub executor_id: String,
    pub call_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InvocationPayload {
    pub fn new(executor_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            executor_id: executor_id.into(),
            call_id: call_id.into(),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_status() {
        assert_eq!(InvocationKind::Event.success_status(), 202);
        assert_eq!(InvocationKind::RequestResponse.success_status(), 200);
    }

    #[test]
    fn test_payload_flattens_extra_keys() {
        let payload = InvocationPayload::new("e1", "c1")
            .with("data_key", "s3://bucket/e1/c1")
            .with("attempt", 2);

        let value: Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "executor_id": "e1",
                "call_id": "c1",
                "data_key": "s3://bucket/e1/c1",
                "attempt": 2
            })
        );
    }

    #[test]
    fn test_payload_requires_ids() {
        let result: Result<InvocationPayload, _> =
            serde_json::from_value(json!({ "call_id": "c1" }));
        assert!(result.is_err());
    }
}
