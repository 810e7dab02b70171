use anyhow::Result;
use clap::Parser;
use dev_tunnel_relay::config::{Args, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Dev Tunnel Relay v{}", env!("CARGO_PKG_VERSION"));
    let config = Config::from_args(args)?;
    info!("Broker endpoint: {}", config.broker.endpoint);
    info!("Channel: {}", config.channel);
    for function in &config.functions {
        info!("Serving {}", function);
    }

    dev_tunnel_relay::run(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl-C, shutting down gracefully...");
    })
    .await
}
