//! Local side of the development tunnel
//!
//! Connects to the broker, subscribes to one channel, and runs every
//! `request-received` it sees against code on this machine, publishing the
//! result back as `request-processed`.

pub mod access_log;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod invoker;
pub mod registry;
pub mod transport;

use anyhow::Context;
use dev_tunnel_common::generate_client_id;
use std::{future::Future, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    access_log::AccessLog,
    broker::{Broker, WebSocketBroker},
    config::{Config, LoaderConfig},
    dispatcher::{Dispatcher, HandlerRegistry},
    invoker::{FunctionSpec, InvokePolicy, RequestInvoker},
    registry::{FunctionRegistry, HttpLoader, Loader, ProcessLoader},
    transport::Transport,
};

/// Everything the relay needs besides the broker and the loader
pub struct RelayOptions {
    pub channel: String,
    pub functions: Vec<FunctionSpec>,
    pub policy: InvokePolicy,
    pub queue_capacity: usize,
    pub access_log: Arc<dyn AccessLog>,
}

/// Serve the channel until `shutdown` resolves or the broker session ends
pub async fn run_relay(
    broker: Arc<dyn Broker>,
    loader: Arc<dyn Loader>,
    options: RelayOptions,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let client_id = generate_client_id();
    let (tx, rx) = mpsc::channel(options.queue_capacity);

    let transport = Transport::connect(broker, &options.channel, &client_id, tx)
        .await
        .context("Failed to connect to broker")?;
    let transport = Arc::new(transport);
    info!("Tunnel ready on channel {}", transport.channel());

    let functions = Arc::new(FunctionRegistry::new(loader));
    let mut handlers = HandlerRegistry::new();
    for spec in options.functions {
        handlers.register(Arc::new(RequestInvoker::new(
            spec,
            functions.clone(),
            transport.clone(),
            options.access_log.clone(),
            options.policy,
        )));
    }

    let dispatcher = Dispatcher::new(handlers);
    tokio::select! {
        _ = dispatcher.run(rx) => {
            warn!("Broker session ended");
        }
        _ = shutdown => {
            info!("Shutting down");
        }
    }

    transport.shutdown().await?;
    Ok(())
}

/// Run the relay against the configured WebSocket broker
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let broker = Arc::new(WebSocketBroker::new(config.broker.clone()));

    let loader: Arc<dyn Loader> = match &config.loader {
        LoaderConfig::Process { root } => {
            info!("Loading modules from {}", root.display());
            Arc::new(ProcessLoader::new(root.clone()))
        }
        LoaderConfig::Http { base_url, timeout } => {
            info!("Loading modules from {}", base_url);
            Arc::new(HttpLoader::new(base_url.clone(), *timeout)?)
        }
    };

    run_relay(broker, loader, config.relay_options(), shutdown).await
}
