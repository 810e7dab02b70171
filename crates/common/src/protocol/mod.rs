mod context;
mod message;
mod request;
mod response;

pub use context::{CognitoIdentity, InvocationContext};
pub use message::Message;
pub use request::{HttpSummary, InvocationPayload, RequestReceived};
pub use response::RequestProcessed;
