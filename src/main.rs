//! Meshelect - Coordinator Election for Ad Hoc Sensor Meshes
//!
//! Daemon entry point: wires the election state machine to the multicast
//! channels, the request/response endpoint, and the timer manager, then
//! drains the event mailbox until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshelect::addr::NodeAddr;
use meshelect::config::MeshConfig;
use meshelect::election::{
    post, post_nowait, Command, ElectionMachine, Envelope, Event, Mailbox, TimerManager,
};
use meshelect::error::Result;
use meshelect::net::{self, Broadcaster, EndpointClient, EndpointServer};
use meshelect::sensor::SimulatedSensor;

/// Mailbox depth; producers block on acks, so this stays shallow
const MAILBOX_CAPACITY: usize = 64;

/// Meshelect - Coordinator Election for Ad Hoc Sensor Meshes
#[derive(Parser)]
#[command(name = "meshelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "meshelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the meshelect node
    Start,

    /// Watch the aggregate publish channel and print values
    Watch,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "meshelect.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Watch => run_watch(cli.config).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config).await,
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the configuration, logging a useful error on failure
fn load_config(config_path: &PathBuf) -> Result<MeshConfig> {
    if !config_path.exists() {
        tracing::info!(
            "No config file at {:?}, running with defaults",
            config_path
        );
        return MeshConfig::from_str("");
    }
    match MeshConfig::from_file(config_path) {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            tracing::error!("Please check that the config file is valid TOML");
            Err(e)
        }
    }
}

/// Start the meshelect node
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("Starting meshelect node...");

    let config = load_config(&config_path)?;

    // Determine our identity before anything else
    let own_addr = match net::local_address(&config).await {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Failed to determine local address: {}", e);
            return Err(e);
        }
    };
    tracing::info!("Node address: {}", own_addr);

    // The local sensor is shared with the endpoint server
    let sensor = SimulatedSensor::default().shared();

    // Event mailbox: every producer feeds the single worker loop
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Envelope>(MAILBOX_CAPACITY);

    let mut timers = TimerManager::new(
        tx.clone(),
        config.interval(),
        config.leader_timeout(),
        config.leader_threshold(),
    );

    let broadcaster = match Broadcaster::new(&config.broadcast, own_addr).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("Failed to set up broadcast channels: {}", e);
            return Err(e);
        }
    };

    let listener_handle =
        match net::spawn_announce_listener(&config.broadcast, own_addr, tx.clone()).await {
            Ok(h) => h,
            Err(e) => {
                tracing::error!("Failed to start announce listener: {}", e);
                return Err(e);
            }
        };

    let endpoint_server =
        match EndpointServer::bind(config.endpoint.port, Arc::clone(&sensor), tx.clone()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start endpoint server: {}", e);
                return Err(e);
            }
        };
    let endpoint_handle = tokio::spawn(async move {
        if let Err(e) = endpoint_server.run().await {
            tracing::error!("Endpoint server error: {}", e);
        }
    });

    let endpoint_client = Arc::new(EndpointClient::new(
        config.endpoint.port,
        config.request_timeout(),
    ));

    let mut machine = ElectionMachine::new(
        own_addr,
        config.election.max_nodes,
        config.aggregate.weight,
        Arc::clone(&sensor),
    );

    // Bootstrap: arm the settling window, then kick the announce cadence
    // with an immediate first tick
    for command in machine.startup_commands() {
        execute(
            command,
            &mut timers,
            &broadcaster,
            &endpoint_client,
            own_addr,
            &tx,
        )
        .await;
    }
    post_nowait(&tx, Event::IntervalTick).await?;

    // Worker loop: one event at a time, commands executed before the
    // producer's ack releases the next datagram from that source
    loop {
        tokio::select! {
            maybe_envelope = rx.recv() => {
                let Some(envelope) = maybe_envelope else {
                    tracing::warn!("Event mailbox closed, stopping");
                    break;
                };

                tracing::trace!("Handling {} in {}", envelope.event.type_name(), machine.state());
                let commands = machine.handle(envelope.event);
                for command in commands {
                    execute(
                        command,
                        &mut timers,
                        &broadcaster,
                        &endpoint_client,
                        own_addr,
                        &tx,
                    )
                    .await;
                }

                if let Some(ack) = envelope.ack {
                    // Producer may have given up waiting; that is fine
                    let _ = ack.send(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    listener_handle.abort();
    endpoint_handle.abort();

    tracing::info!("Meshelect shutdown complete");
    Ok(())
}

/// Execute one command from the state machine
///
/// Timer operations and broadcasts run inline. Requests to other nodes
/// are spawned so a slow or dead peer never stalls the worker loop; a
/// sensor reply comes back later as its own event.
async fn execute(
    command: Command,
    timers: &mut TimerManager,
    broadcaster: &Broadcaster,
    endpoint_client: &Arc<EndpointClient>,
    own_addr: NodeAddr,
    tx: &Mailbox,
) {
    match command {
        Command::Timer(op, kind) => {
            timers.apply(op, kind);
        }
        Command::Announce => {
            if let Err(e) = broadcaster.announce().await {
                tracing::warn!("Announce failed: {}", e);
            }
        }
        Command::Publish(value) => {
            if let Err(e) = broadcaster.publish(value).await {
                tracing::warn!("Aggregate publish failed: {}", e);
            }
        }
        Command::Register(coordinator) => {
            let client = Arc::clone(endpoint_client);
            tokio::spawn(async move {
                if let Err(e) = client.register(coordinator, own_addr).await {
                    // Dropped; the next election cycle retries naturally
                    tracing::warn!("Registration with {} failed: {}", coordinator, e);
                }
            });
        }
        Command::QuerySensor(addr) => {
            let client = Arc::clone(endpoint_client);
            let tx = tx.clone();
            tokio::spawn(async move {
                match client.query_sensor(addr).await {
                    Ok(value) => {
                        if post(&tx, Event::SensorReport(value)).await.is_err() {
                            tracing::debug!("Worker gone, dropping report from {}", addr);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Sensor query to {} failed: {}", addr, e);
                    }
                }
            });
        }
    }
}

/// Watch the aggregate publish channel
async fn run_watch(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    tokio::select! {
        result = net::watch_aggregates(&config.broadcast) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopped watching.");
            Ok(())
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# Meshelect Configuration
# Generated configuration file

[node]
# Node address override; auto-detected when unset
# address = "fe80::1"

[broadcast]
group = "ff15::2409"
announce_port = 2409
aggregate_port = 2410

[election]
interval_ms = 2000
leader_threshold_intervals = 5
leader_timeout_intervals = 7
max_nodes = 8

[aggregate]
# EWMA weight divisor; must be a power of two
weight = 16

[endpoint]
port = 5683
request_timeout_ms = 2000

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to adjust timing and channel settings.");
    println!("Then start with: meshelect start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match MeshConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Multicast Group:  {}", config.broadcast.group);
            println!(
                "  Channels:         announce :{}, aggregate :{}",
                config.broadcast.announce_port, config.broadcast.aggregate_port
            );
            println!("  Endpoint Port:    {}", config.endpoint.port);
            println!("  Interval:         {:?}", config.interval());
            println!("  Leader Threshold: {:?}", config.leader_threshold());
            println!("  Leader Timeout:   {:?}", config.leader_timeout());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
async fn run_info(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    println!("Meshelect Node Information");
    println!("==========================");
    println!();
    match net::local_address(&config).await {
        Ok(addr) => println!("Node Address:     {}", addr),
        Err(e) => println!("Node Address:     (undetermined: {})", e),
    }
    println!();
    println!("Broadcast Configuration:");
    println!("  Group:          {}", config.broadcast.group);
    println!("  Announce Port:  {}", config.broadcast.announce_port);
    println!("  Aggregate Port: {}", config.broadcast.aggregate_port);
    println!();
    println!("Election Configuration:");
    println!("  Interval:       {} ms", config.election.interval_ms);
    println!(
        "  Threshold:      {} intervals ({:?})",
        config.election.leader_threshold_intervals,
        config.leader_threshold()
    );
    println!(
        "  Timeout:        {} intervals ({:?})",
        config.election.leader_timeout_intervals,
        config.leader_timeout()
    );
    println!("  Max Clients:    {}", config.election.max_nodes);
    println!();
    println!("Aggregate Configuration:");
    println!("  EWMA Weight:    {}", config.aggregate.weight);
    println!();
    println!("Endpoint Configuration:");
    println!("  Port:           {}", config.endpoint.port);
    println!(
        "  Request Timeout: {} ms",
        config.endpoint.request_timeout_ms
    );

    Ok(())
}
