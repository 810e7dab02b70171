use anyhow::Context;
use async_trait::async_trait;
use dev_tunnel_common::{InvocationContext, TunnelError};
use reqwest::Client;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use url::Url;

use super::{Function, FunctionRef, Loader};

/// Loads functions served by a local HTTP process
///
/// `module.handler` maps to `POST <base>/<module>/<handler>` with body
/// `{"event": ..., "context": ...}`; the JSON response body is the return value.
pub struct HttpLoader {
    base_url: Url,
    client: Client,
}

impl HttpLoader {
    pub fn new(mut base_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TunnelError::HttpError(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    pub fn url_for(&self, reference: &FunctionRef) -> anyhow::Result<Url> {
        let path = format!(
            "{}/{}",
            reference.module.trim_start_matches("./").trim_start_matches('/'),
            reference.function
        );
        self.base_url
            .join(&path)
            .with_context(|| format!("Invalid function reference {}", reference))
    }
}

#[async_trait]
impl Loader for HttpLoader {
    async fn load(&self, reference: &FunctionRef) -> anyhow::Result<Arc<dyn Function>> {
        Ok(Arc::new(HttpFunction {
            url: self.url_for(reference)?,
            client: self.client.clone(),
        }))
    }
}

struct HttpFunction {
    url: Url,
    client: Client,
}

#[async_trait]
impl Function for HttpFunction {
    async fn invoke(&self, event: Value, context: InvocationContext) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "event": event, "context": context }))
            .send()
            .await
            .map_err(|e| TunnelError::HttpError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TunnelError::InvocationFailed(format!(
                "{} returned {}: {}",
                self.url, status, body
            ))
            .into());
        }

        response
            .json()
            .await
            .map_err(|e| TunnelError::InvalidMessage(format!("Invalid handler result: {}", e)).into())
    }
}
