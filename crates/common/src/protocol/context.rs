use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Execution metadata handed to locally-run user code.
///
/// Field names follow the shape the shim captures from the Lambda runtime, so
/// the context survives the trip shim -> ingress -> broker -> relay unchanged.
/// Every field has a default: a partially filled context still parses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationContext {
    /// AWS request id of the real invocation
    pub invoke_id: String,

    /// Opaque client context supplied by the caller (mobile SDKs)
    pub client_context: Option<Value>,

    /// Cognito identity of the caller, if any
    pub cognito_identity: Option<CognitoIdentity>,

    /// Execution deadline (Unix epoch in milliseconds)
    pub epoch_deadline_time_in_ms: u64,

    /// ARN of the invoked function, possibly with a qualifier
    pub invoked_function_arn: String,

    /// Tenant identifier for tenant-isolated functions
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CognitoIdentity {
    pub cognito_identity_id: String,
    pub cognito_identity_pool_id: String,
}

impl InvocationContext {
    /// Time left before the deadline, `None` when no deadline was supplied
    pub fn remaining_time(&self, now_millis: u64) -> Option<Duration> {
        if self.epoch_deadline_time_in_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(
            self.epoch_deadline_time_in_ms.saturating_sub(now_millis),
        ))
    }

    /// Function name embedded in the invoked ARN
    ///
    /// `arn:aws:lambda:us-east-1:123456789012:function:api:live` -> `api`.
    /// A bare name is returned as is.
    pub fn function_name(&self) -> Option<&str> {
        let arn = self.invoked_function_arn.as_str();
        if arn.is_empty() {
            return None;
        }
        match arn.split_once(":function:") {
            Some((_, rest)) => rest.split(':').next().filter(|name| !name.is_empty()),
            None => Some(arn),
        }
    }
}
