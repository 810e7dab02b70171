//! Common types and utilities for the dev-tunnel system
//!
//! This crate provides the wire protocol spoken over the pub/sub channel, the
//! reconstructed invocation context, and helpers shared by both the local relay
//! (`dtr`) and the cloud-side Lambda shim.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, TunnelError};
pub use protocol::{
    CognitoIdentity, HttpSummary, InvocationContext, InvocationPayload, Message,
    RequestProcessed, RequestReceived,
};
pub use utils::{
    current_timestamp_millis, generate_channel, generate_client_id, topic_for_channel,
};
