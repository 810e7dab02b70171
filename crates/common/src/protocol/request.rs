use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::InvocationContext;

/// A remote invocation delivered to the relay over the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestReceived {
    /// Correlation id assigned by the relay ingress
    pub request_id: String,

    pub payload: InvocationPayload,
}

/// The original trigger event plus the context it ran under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    /// Full trigger event, passed to user code verbatim
    pub event: Value,

    #[serde(default)]
    pub context: InvocationContext,
}

/// Request line fields of an HTTP trigger event, used for access logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpSummary {
    pub protocol: String,
    pub method: String,
    pub path: String,
    pub source_ip: String,
}

impl RequestReceived {
    pub fn new(request_id: impl Into<String>, event: Value, context: InvocationContext) -> Self {
        Self {
            request_id: request_id.into(),
            payload: InvocationPayload { event, context },
        }
    }
}

impl InvocationPayload {
    /// Extract protocol, method, path and source IP from the event
    ///
    /// Understands API Gateway HTTP API (v2) events and falls back to REST API
    /// (v1) field names. Missing fields are returned as empty strings.
    pub fn http(&self) -> HttpSummary {
        let event = &self.event;
        let http = event.pointer("/requestContext/http");

        let field = |v2: &str, v1: &[&str]| -> String {
            http.and_then(|h| h.get(v2))
                .or_else(|| v1.iter().find_map(|p| event.pointer(p)))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        HttpSummary {
            protocol: field("protocol", &["/requestContext/protocol"]),
            method: field("method", &["/httpMethod"]),
            path: field("path", &["/path", "/rawPath"]),
            source_ip: field("sourceIp", &["/requestContext/identity/sourceIp"]),
        }
    }
}
