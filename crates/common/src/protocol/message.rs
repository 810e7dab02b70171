use serde::{Deserialize, Serialize};

use super::{RequestProcessed, RequestReceived};
use crate::{Result, TunnelError};

/// All channel messages are wrapped in this typed envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Published by the relay ingress, consumed by the local relay
    RequestReceived(RequestReceived),

    /// Published by the local relay, consumed by the relay ingress
    RequestProcessed(RequestProcessed),
}

impl Message {
    /// Correlation id of the invocation this message belongs to
    pub fn request_id(&self) -> &str {
        match self {
            Message::RequestReceived(req) => &req.request_id,
            Message::RequestProcessed(res) => &res.request_id,
        }
    }

    /// Parse a raw broker payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| TunnelError::InvalidMessage(format!("Failed to parse message: {}", e)))
    }

    /// Serialize for publishing
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<RequestReceived> for Message {
    fn from(req: RequestReceived) -> Self {
        Message::RequestReceived(req)
    }
}

impl From<RequestProcessed> for Message {
    fn from(res: RequestProcessed) -> Self {
        Message::RequestProcessed(res)
    }
}
