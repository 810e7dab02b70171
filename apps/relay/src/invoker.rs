//! Turns `request-received` messages into `request-processed` replies

use anyhow::Context;
use async_trait::async_trait;
use dev_tunnel_common::{
    InvocationContext, Message, RequestProcessed, RequestReceived, TunnelError,
    constants::{INVOCATION_ERROR_STATUS, INVOCATION_TIMEOUT_STATUS, NON_HTTP_STATUS},
    current_timestamp_millis,
    validation::{ValidationError, validate_function_name},
};
use serde_json::Value;
use std::{fmt, str::FromStr, sync::Arc, time::Instant};
use tracing::{debug, error, warn};

use crate::{
    access_log::{AccessLog, AccessRecord},
    dispatcher::MessageHandler,
    registry::{FunctionRef, FunctionRegistry},
    transport::Transport,
};

/// What to do when user code fails or overruns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvokePolicy {
    /// Publish a 500 (or 504) reply instead of leaving the request unanswered
    pub reply_on_error: bool,
    /// Abort invocations that outlive the context deadline
    pub enforce_deadline: bool,
}

/// A tunneled function: `[name=]module.handler`
///
/// With a name, only invocations of that deployed function are answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: Option<String>,
    pub reference: FunctionRef,
}

impl FunctionSpec {
    /// Whether an invocation of `context` belongs to this function
    pub fn accepts(&self, context: &InvocationContext) -> bool {
        match &self.name {
            None => true,
            Some(name) => context.function_name() == Some(name.as_str()),
        }
    }
}

impl FromStr for FunctionSpec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('=') {
            Some((name, reference)) => {
                let name = name.trim();
                validate_function_name(name)?;
                Ok(Self {
                    name: Some(name.to_string()),
                    reference: reference.trim().parse()?,
                })
            }
            None => Ok(Self {
                name: None,
                reference: s.parse()?,
            }),
        }
    }
}

impl fmt::Display for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}={}", name, self.reference),
            None => write!(f, "{}", self.reference),
        }
    }
}

pub struct RequestInvoker {
    label: String,
    spec: FunctionSpec,
    functions: Arc<FunctionRegistry>,
    transport: Arc<Transport>,
    access_log: Arc<dyn AccessLog>,
    policy: InvokePolicy,
}

impl RequestInvoker {
    pub fn new(
        spec: FunctionSpec,
        functions: Arc<FunctionRegistry>,
        transport: Arc<Transport>,
        access_log: Arc<dyn AccessLog>,
        policy: InvokePolicy,
    ) -> Self {
        Self {
            label: spec.to_string(),
            spec,
            functions,
            transport,
            access_log,
            policy,
        }
    }

    async fn invoke(&self, request: &RequestReceived) -> anyhow::Result<()> {
        let started = Instant::now();

        let result = match self.run(request).await {
            Ok(value) => RequestProcessed::new(&request.request_id, value),
            Err(e) if self.policy.reply_on_error => {
                let status = match e.downcast_ref::<TunnelError>() {
                    Some(TunnelError::Timeout(_)) => INVOCATION_TIMEOUT_STATUS,
                    _ => INVOCATION_ERROR_STATUS,
                };
                let reply =
                    RequestProcessed::error(&request.request_id, status, status_text(status));
                self.reply(request, reply, started).await;
                return Err(e);
            }
            // Left unanswered: the caller times out upstream
            Err(e) => return Err(e),
        };

        self.reply(request, result, started).await;
        Ok(())
    }

    async fn run(&self, request: &RequestReceived) -> anyhow::Result<Value> {
        let function = self
            .functions
            .resolve(&self.spec.reference)
            .await
            .with_context(|| format!("Failed to load {}", self.spec.reference))?;

        let payload = &request.payload;
        let remaining = payload.context.remaining_time(current_timestamp_millis());
        let invocation = function.invoke(payload.event.clone(), payload.context.clone());

        let result = match remaining {
            Some(remaining) if self.policy.enforce_deadline => {
                tokio::time::timeout(remaining, invocation)
                    .await
                    .map_err(|_| {
                        TunnelError::Timeout(format!(
                            "{} exceeded its deadline of {}ms",
                            self.spec.reference,
                            remaining.as_millis()
                        ))
                    })?
            }
            _ => invocation.await,
        };
        result.with_context(|| format!("{} failed", self.spec.reference))
    }

    /// Publish the reply and write the access line; publish errors are not retried
    async fn reply(&self, request: &RequestReceived, reply: RequestProcessed, started: Instant) {
        let duration = started.elapsed();
        let status = reply.status_code().unwrap_or(NON_HTTP_STATUS);

        let message: Message = reply.into();
        if let Err(e) = self.transport.publish(&message).await {
            error!(
                "Failed to publish reply for request {}: {}",
                request.request_id, e
            );
        }

        self.access_log.log(&AccessRecord::new(
            request.payload.http(),
            status,
            duration,
        ));
    }
}

#[async_trait]
impl MessageHandler for RequestInvoker {
    fn name(&self) -> &str {
        &self.label
    }

    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
        let request = match message.as_ref() {
            Message::RequestReceived(request) => request,
            // Our own replies come back on the same topic
            Message::RequestProcessed(reply) => {
                debug!("Ignoring processed reply for request {}", reply.request_id);
                return Ok(());
            }
        };

        if !self.spec.accepts(&request.payload.context) {
            debug!(
                "{} skips request {} for {}",
                self.label, request.request_id, request.payload.context.invoked_function_arn
            );
            return Ok(());
        }

        if request.payload.context.invoke_id.is_empty() {
            warn!("Request {} carries no invocation id", request.request_id);
        }

        self.invoke(request).await
    }
}

fn status_text(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Error")
}
