use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use dev_tunnel_common::{
    constants::{
        BROKER_CONNECT_TIMEOUT_SECS, INBOUND_QUEUE_CAPACITY, LOCAL_HANDLER_TIMEOUT_SECS,
    },
    generate_channel,
    validation::validate_channel,
};
use std::{io::IsTerminal, path::PathBuf, sync::Arc, time::Duration};
use url::Url;

use crate::{
    RelayOptions,
    access_log::{AccessLog, ConsoleAccessLog, TracingAccessLog},
    broker::WebSocketBrokerConfig,
    invoker::{FunctionSpec, InvokePolicy},
};

/// CLI arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "dtr")]
#[command(about = "Run tunneled Lambda invocations on this machine", long_about = None)]
#[command(version)]
pub struct Args {
    /// Broker WebSocket endpoint
    #[arg(short, long, env = "DTR_BROKER_ENDPOINT")]
    pub endpoint: String,

    /// Bearer token presented to the broker
    #[arg(short, long, env = "DTR_TOKEN")]
    pub token: Option<String>,

    /// Channel to serve (random when omitted)
    #[arg(short, long, env = "DTR_CHANNEL")]
    pub channel: Option<String>,

    /// Function to serve, as `[name=]module.handler`
    #[arg(
        short,
        long = "function",
        env = "DTR_FUNCTIONS",
        value_delimiter = ',',
        required = true
    )]
    pub functions: Vec<String>,

    /// How modules are loaded
    #[arg(long, value_enum, default_value_t = LoaderKind::Process)]
    pub loader: LoaderKind,

    /// Base directory for the process loader
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Base URL for the http loader
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub local_url: String,

    /// Where access lines go
    #[arg(long, value_enum, default_value_t = AccessLogKind::Console)]
    pub access_log: AccessLogKind,

    /// Answer failed invocations with a 500 instead of leaving them unanswered
    #[arg(long)]
    pub reply_on_error: bool,

    /// Abort invocations that run past the Lambda deadline
    #[arg(long)]
    pub enforce_deadline: bool,

    /// Broker connection timeout in seconds
    #[arg(long, default_value_t = BROKER_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Inbound messages buffered before new ones are dropped
    #[arg(long, default_value_t = INBOUND_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoaderKind {
    /// Run `<root>/<module>` as an executable
    Process,
    /// POST to `<local-url>/<module>/<handler>`
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AccessLogKind {
    Console,
    Tracing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoaderConfig {
    Process { root: PathBuf },
    Http { base_url: Url, timeout: Duration },
}

/// Configuration for the relay
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: WebSocketBrokerConfig,
    pub channel: String,
    pub functions: Vec<FunctionSpec>,
    pub loader: LoaderConfig,
    pub access_log: AccessLogKind,
    pub policy: InvokePolicy,
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&args.endpoint)
            .with_context(|| format!("Invalid broker endpoint {}", args.endpoint))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            bail!("Broker endpoint must be ws:// or wss://, got {}", endpoint);
        }

        let channel = match args.channel {
            Some(channel) => {
                validate_channel(&channel)?;
                channel
            }
            None => generate_channel(),
        };

        let functions = args
            .functions
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<FunctionSpec>()
                    .with_context(|| format!("Invalid --function {}", s))
            })
            .collect::<anyhow::Result<Vec<FunctionSpec>>>()?;
        if functions.is_empty() {
            bail!("At least one --function is required");
        }

        if args.queue_capacity == 0 {
            bail!("--queue-capacity must be at least 1");
        }

        let loader = match args.loader {
            LoaderKind::Process => LoaderConfig::Process { root: args.root },
            LoaderKind::Http => LoaderConfig::Http {
                base_url: Url::parse(&args.local_url)
                    .with_context(|| format!("Invalid --local-url {}", args.local_url))?,
                timeout: Duration::from_secs(LOCAL_HANDLER_TIMEOUT_SECS),
            },
        };

        let mut broker = WebSocketBrokerConfig::new(endpoint);
        broker.token = args.token;
        broker.connect_timeout = Duration::from_secs(args.connect_timeout);

        Ok(Self {
            broker,
            channel,
            functions,
            loader,
            access_log: args.access_log,
            policy: InvokePolicy {
                reply_on_error: args.reply_on_error,
                enforce_deadline: args.enforce_deadline,
            },
            queue_capacity: args.queue_capacity,
        })
    }

    pub fn relay_options(&self) -> RelayOptions {
        let access_log: Arc<dyn AccessLog> = match self.access_log {
            AccessLogKind::Console => {
                Arc::new(ConsoleAccessLog::new(std::io::stdout().is_terminal()))
            }
            AccessLogKind::Tracing => Arc::new(TracingAccessLog),
        };

        RelayOptions {
            channel: self.channel.clone(),
            functions: self.functions.clone(),
            policy: self.policy,
            queue_capacity: self.queue_capacity,
            access_log,
        }
    }
}
