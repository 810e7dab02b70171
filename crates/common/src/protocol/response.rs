use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Reply to a `request-received`, correlated by `request_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestProcessed {
    /// Must match the request_id of the corresponding RequestReceived
    pub request_id: String,

    /// Handler return value, wrapped unmodified
    /// Normally `{ "statusCode": number, "body": any }`
    pub payload: Value,
}

impl RequestProcessed {
    pub fn new(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: request_id.into(),
            payload,
        }
    }

    /// Build a reply carrying an error status and a plain text body
    pub fn error(request_id: impl Into<String>, status_code: u16, body: &str) -> Self {
        Self::new(request_id, json!({ "statusCode": status_code, "body": body }))
    }

    /// HTTP status code carried by the payload, if it has a numeric one
    pub fn status_code(&self) -> Option<u16> {
        self.payload
            .get("statusCode")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }
}
