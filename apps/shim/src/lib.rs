//! Lambda shim for the development tunnel
//!
//! Deployed in place of the real handler. Every invocation is wrapped into an
//! [`IngressRequest`] and posted to the relay ingress, which publishes it on
//! the developer's channel and blocks until the local relay replies. The
//! `response` field of the ingress reply becomes this function's result.

use anyhow::Context as _;
use dev_tunnel_common::{
    CognitoIdentity, InvocationContext, constants::INGRESS_TIMEOUT_SECS,
    validation::validate_channel,
};
use lambda_runtime::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const INGRESS_URL_ENV: &str = "DEV_TUNNEL_INGRESS_URL";
pub const CHANNEL_ENV: &str = "DEV_TUNNEL_CHANNEL";
pub const ENDPOINT_ENV: &str = "DEV_TUNNEL_ENDPOINT";
pub const TIMEOUT_ENV: &str = "DEV_TUNNEL_TIMEOUT_SECS";

/// Set by the Lambda runtime
const FUNCTION_NAME_ENV: &str = "AWS_LAMBDA_FUNCTION_NAME";

#[derive(Debug, Error)]
pub enum ShimError {
    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("Relay ingress returned {status}: {body}")]
    IngressStatus { status: u16, body: String },

    #[error("Relay ingress reply has no response field")]
    MissingResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShimConfig {
    pub ingress_url: Url,
    pub channel: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl ShimConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let ingress = lookup(INGRESS_URL_ENV).ok_or(ShimError::MissingEnv(INGRESS_URL_ENV))?;
        let ingress_url = Url::parse(&ingress)
            .with_context(|| format!("Invalid {}: {}", INGRESS_URL_ENV, ingress))?;

        let channel = lookup(CHANNEL_ENV).ok_or(ShimError::MissingEnv(CHANNEL_ENV))?;
        validate_channel(&channel)?;

        let endpoint = lookup(ENDPOINT_ENV)
            .or_else(|| lookup(FUNCTION_NAME_ENV))
            .ok_or(ShimError::MissingEnv(ENDPOINT_ENV))?;

        let timeout = match lookup(TIMEOUT_ENV) {
            Some(secs) => secs
                .parse()
                .with_context(|| format!("Invalid {}: {}", TIMEOUT_ENV, secs))?,
            None => INGRESS_TIMEOUT_SECS,
        };

        Ok(Self {
            ingress_url,
            channel,
            endpoint,
            timeout: Duration::from_secs(timeout),
        })
    }

    /// `<ingress>/<channel>`
    pub fn target_url(&self) -> anyhow::Result<Url> {
        let mut url = self.ingress_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Ingress URL cannot be a base: {}", self.ingress_url))?
            .pop_if_empty()
            .push(&self.channel);
        Ok(url)
    }
}

/// Body posted to the relay ingress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressRequest {
    pub method: String,
    pub channel: String,
    pub endpoint: String,
    pub event: Value,
    pub context: InvocationContext,
}

/// Capture the parts of the Lambda context local code may look at
pub fn context_from_lambda(ctx: &Context) -> InvocationContext {
    InvocationContext {
        invoke_id: ctx.request_id.clone(),
        client_context: ctx
            .client_context
            .as_ref()
            .and_then(|c| serde_json::to_value(c).ok()),
        cognito_identity: ctx.identity.as_ref().map(|identity| CognitoIdentity {
            cognito_identity_id: identity.identity_id.clone(),
            cognito_identity_pool_id: identity.identity_pool_id.clone(),
        }),
        epoch_deadline_time_in_ms: ctx.deadline,
        invoked_function_arn: ctx.invoked_function_arn.clone(),
        // The Lambda runtime context carries no tenant id
        tenant_id: None,
    }
}

pub fn build_ingress_request(
    config: &ShimConfig,
    event: Value,
    context: InvocationContext,
) -> IngressRequest {
    let method = event
        .pointer("/requestContext/http/method")
        .or_else(|| event.get("httpMethod"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    IngressRequest {
        method,
        channel: config.channel.clone(),
        endpoint: config.endpoint.clone(),
        event,
        context,
    }
}

pub fn build_client(config: &ShimConfig) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Post one invocation to the ingress and unwrap its `response`
pub async fn forward(
    client: &Client,
    config: &ShimConfig,
    request: &IngressRequest,
) -> anyhow::Result<Value> {
    let url = config.target_url()?;
    info!(
        "Forwarding {} invocation {} to {}",
        request.method, request.context.invoke_id, url
    );

    let response = client
        .post(url)
        .json(request)
        .send()
        .await
        .context("Failed to reach relay ingress")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ShimError::IngressStatus {
            status: status.as_u16(),
            body,
        }
        .into());
    }

    let mut reply: Map<String, Value> = response
        .json()
        .await
        .context("Relay ingress returned invalid JSON")?;
    debug!("Ingress replied for {}", request.context.invoke_id);

    // `null` is a valid handler result; only an absent field is an error
    reply
        .remove("response")
        .ok_or_else(|| ShimError::MissingResponse.into())
}
