use clap::Parser;
use rizmo_common::LocalBus;
use rizmo_head::attention::run_explorer;
use rizmo_head::bridge::{run_bridge, InputMode};
use rizmo_head::error::{HeadError, Result};
use rizmo_head::servo::{connector_for, HeadActuator};
use rizmo_head::tracking::run_tracker;
use rizmo_head::HeadConfig;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/head.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Where to read external messages from
    #[arg(short, long, value_enum, default_value_t = InputMode::None)]
    input: InputMode,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    let config = HeadConfig::load(&args.config)?;
    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    info!("Starting rizmo head node {}", config.node_id);

    let bus = LocalBus::new();
    let cancel = CancellationToken::new();

    let actuator = HeadActuator::new(config.servo.clone(), connector_for(config.servo.driver));
    let mut actuator_task = tokio::spawn(actuator.run(bus.clone(), cancel.clone()));

    let nodes = vec![
        spawn_node("tracker", run_tracker(bus.clone(), config.tracking.clone(), cancel.clone())),
        spawn_node("explorer", run_explorer(bus.clone(), config.attention.clone(), cancel.clone())),
        spawn_node("input bridge", run_bridge(args.input, bus.clone(), cancel.clone())),
    ];

    let result = tokio::select! {
        _ = wait_for_shutdown() => None,
        joined = &mut actuator_task => Some(joined),
    };

    info!("Shutting down rizmo head node");
    cancel.cancel();

    for node in nodes {
        let _ = node.await;
    }
    bus.close();

    // The actuator re-centers the head before it returns.
    let joined = match result {
        Some(joined) => joined,
        None => actuator_task.await,
    };
    joined.map_err(|e| HeadError::ServoError(format!("Actuator task failed: {}", e)))?
}

fn spawn_node<F>(name: &'static str, node: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = node.await {
            error!("{} failed: {}", name, e);
        }
    })
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| HeadError::ConfigError(e.to_string()))?;

    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
