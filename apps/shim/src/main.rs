//! Dev tunnel Lambda shim
//!
//! Forwards every invocation to the relay ingress and returns the reply the
//! developer's machine produced.

use dev_tunnel_shim::{
    ShimConfig, build_client, build_ingress_request, context_from_lambda, forward,
};
use lambda_runtime::{Error, LambdaEvent, run, service_fn};
use reqwest::Client;
use serde_json::Value;
use tracing::info;

async fn function_handler(
    event: LambdaEvent<Value>,
    client: &Client,
    config: &ShimConfig,
) -> Result<Value, Error> {
    let context = context_from_lambda(&event.context);
    let request = build_ingress_request(config, event.payload, context);
    Ok(forward(client, config, &request).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing subscriber for CloudWatch Logs
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = ShimConfig::from_env()?;
    let client = build_client(&config)?;
    info!(
        "Dev tunnel shim forwarding {} to channel {}",
        config.endpoint, config.channel
    );

    run(service_fn(|event: LambdaEvent<Value>| {
        function_handler(event, &client, &config)
    }))
    .await
}
