use anyhow::{Context, bail};
use clap::Args;
use tokio::signal;
use tracing::{error, info, warn};

use super::CliContext;
use service_adaptor::adaptor::ServiceAdaptor;
use service_adaptor::broker::{Broker, PluginManager};
use service_adaptor::config::BrokerConfig;
use service_adaptor::logger::init_tracing;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry endpoint (e.g. http://localhost:4317)
    #[arg(long)]
    pub otel_logs_endpoint: Option<String>,

    /// OpenTelemetry endpoint (e.g. http://localhost:4317)
    #[arg(long)]
    pub otel_events_endpoint: Option<String>,
}

impl RunArgs {
    pub fn default_runtime() -> Self {
        Self {
            log_level: "info".to_string(),
            otel_logs_endpoint: None,
            otel_events_endpoint: None,
        }
    }
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let root = context.root.clone();
    let telemetry = init_tracing(
        root.clone(),
        "logs/service_adaptor.log".to_string(),
        "logs/service_adaptor_events.log".to_string(),
        args.log_level,
        args.otel_logs_endpoint,
        args.otel_events_endpoint,
    )
    .context("could not set up logging")?;

    info!("Service adaptor starting up…");

    if !root.exists() {
        let err = format!(
            "Root directory `{}` does not exist. Set SERVICE_ADAPTOR_ROOT to an existing directory.",
            root.display()
        );
        error!("{}", err);
        bail!(err);
    }

    let broker_config = BrokerConfig::load(&context.config_manager)
        .await
        .context("invalid broker configuration")?;
    info!(
        push_service = %broker_config.push_service_name,
        builtin_cluster = %broker_config.builtin_cluster,
        workers = broker_config.max_workers,
        "broker configured"
    );

    // Backends are linked in by the embedding transport, which registers
    // them on `adaptor.broker().plugins()` before serving requests.
    let plugins = PluginManager::new();
    let adaptor = ServiceAdaptor::new(Broker::new(broker_config, plugins), telemetry.request_telemetry());
    let registered = adaptor.broker().plugins().len();
    if registered == 0 {
        warn!("no plugins registered; every dispatch will answer NOT_DISPATCHED");
    } else {
        info!(plugins = registered, "plugins registered");
    }

    info!("Service adaptor running; press Ctrl‐C to exit");
    println!("Service adaptor running; press Ctrl‐C to exit");

    signal::ctrl_c().await?;

    println!("\nShutting down…");
    info!("Service adaptor shutting down");
    adaptor.broker().shutdown_all().await;
    telemetry.shutdown();

    Ok(())
}
