//! Shake Relay CLI
//!
//! Detects shakes in a motion stream and relays them to Event Hubs.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shake_relay::{
    activity::{create_shared_log, create_shared_log_with_persistence, ActivityLog},
    collector::{Collector, CollectorConfig, SampleSource},
    config::{Config, DefaultDestination, DestinationStore},
    core::{EventCounter, ShakeDetector},
    destination::{Destination, DestinationSelector},
    dispatch::{Dispatcher, IngestionEndpoint},
    endpoint::{EventHubsEndpoint, RelayEndpoint},
    monitor::Monitor,
    VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shake-relay")]
#[command(version = VERSION)]
#[command(about = "Shake detection with telemetry relay to Event Hubs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a motion stream and send every detected shake
    Monitor {
        /// Name attached to telemetry (defaults to the configured user name)
        #[arg(long)]
        user: Option<String>,

        /// JSON-lines motion stream, or `-` for stdin
        #[arg(long, default_value = "-")]
        input: String,

        /// Send through a relay instead of directly to Event Hubs
        #[arg(long)]
        relay: Option<String>,

        /// Replay readings at the pace of their timestamps
        #[arg(long)]
        realtime: bool,
    },

    /// Send simulated shakes without a sensor
    Simulate {
        /// Name attached to telemetry (defaults to the configured user name)
        #[arg(long)]
        user: Option<String>,

        /// Number of shakes to send
        #[arg(long, default_value = "1")]
        count: u32,

        /// Send through a relay instead of directly to Event Hubs
        #[arg(long)]
        relay: Option<String>,
    },

    /// Manage the custom destination
    Destination {
        #[command(subcommand)]
        action: DestinationAction,
    },

    /// Show destination status and cumulative activity
    Status,

    /// Show configuration
    Config,

    /// Run the relay server
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on (0 for random)
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

#[derive(Subcommand)]
enum DestinationAction {
    /// Validate a connection string and save it as the custom destination
    Set {
        /// Event Hubs connection string including EntityPath
        connection_string: String,

        /// Validate through a relay instead of directly against Event Hubs
        #[arg(long)]
        relay: Option<String>,
    },

    /// Forget the custom destination and use the default again
    Clear,

    /// Show which destination is active
    Show,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Monitor {
            user,
            input,
            relay,
            realtime,
        } => cmd_monitor(user, &input, relay, realtime),
        Commands::Simulate { user, count, relay } => cmd_simulate(user, count, relay),
        Commands::Destination { action } => match action {
            DestinationAction::Set {
                connection_string,
                relay,
            } => cmd_destination_set(&connection_string, relay),
            DestinationAction::Clear => cmd_destination_clear(),
            DestinationAction::Show => cmd_destination_show(),
        },
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        #[cfg(feature = "server")]
        Commands::Serve { port } => cmd_serve(port),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn load_config() -> Config {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {e}");
        Config::default()
    });
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    config
}

fn resolve_user(user: Option<String>, config: &Config) -> anyhow::Result<String> {
    match user.or_else(|| config.user_name.clone()) {
        Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
        _ => bail!("A user name is required: pass --user or set user_name in the config"),
    }
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")
}

/// Pick the endpoint and the default destination it delivers to.
fn build_endpoint(
    relay: Option<&str>,
) -> anyhow::Result<(Arc<dyn IngestionEndpoint>, Option<Destination>)> {
    match relay {
        Some(url) => {
            let endpoint: Arc<dyn IngestionEndpoint> = Arc::new(RelayEndpoint::new(url)?);
            Ok((endpoint, Some(Destination::relay_default())))
        }
        None => {
            let endpoint: Arc<dyn IngestionEndpoint> = Arc::new(EventHubsEndpoint::new()?);
            Ok((endpoint, DefaultDestination::from_env().destination()))
        }
    }
}

fn load_custom_destination(store: &DestinationStore) -> Option<Destination> {
    match store.load() {
        Ok(record) => record.map(|r| r.destination()),
        Err(e) => {
            eprintln!("Warning: Could not load custom destination: {e}");
            None
        }
    }
}

/// Build an idle monitor over `collector` with the configured destinations.
fn build_monitor(
    config: &Config,
    user_name: String,
    relay: Option<String>,
    collector: Collector,
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<Monitor> {
    let relay = relay.or_else(|| config.relay_url.clone());
    let (endpoint, default) = build_endpoint(relay.as_deref())?;

    let store = DestinationStore::new(config.custom_destination_path());
    let destinations = Arc::new(DestinationSelector::new(
        default,
        load_custom_destination(&store),
    ));

    match destinations.active() {
        Some(destination) => println!("  Destination: {}", destination.kind().as_str()),
        None => {
            eprintln!("Warning: No destination configured; shakes will be logged but not sent.");
            eprintln!("Set EVENTHUB__CONNECTIONSTRING or run `shake-relay destination set`.");
        }
    }
    if let Some(url) = relay {
        println!("  Relay: {url}");
    }

    let activity = create_shared_log_with_persistence(config.activity_path());
    let detector = ShakeDetector::new(user_name, config.detector);

    Ok(Monitor::new(
        collector,
        detector,
        endpoint,
        destinations,
        activity,
        runtime.handle().clone(),
    ))
}

fn cmd_monitor(
    user: Option<String>,
    input: &str,
    relay: Option<String>,
    realtime: bool,
) -> anyhow::Result<()> {
    println!("Shake Relay v{VERSION}");
    println!();

    let config = load_config();
    let user_name = resolve_user(user, &config)?;
    let runtime = build_runtime()?;

    println!("Starting monitor...");
    println!("  User: {user_name}");
    println!("  Input: {}", if input == "-" { "stdin" } else { input });
    println!(
        "  Threshold: {} m/s², cooldown {}ms",
        config.detector.threshold,
        config.detector.cooldown.as_millis()
    );

    let collector = Collector::new(SampleSource::from_arg(input), CollectorConfig { realtime });
    let mut monitor = build_monitor(&config, user_name, relay, collector, &runtime)?;

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    monitor.start().context("Could not start monitoring")?;
    monitor.run(&running);
    monitor.stop();

    println!();
    println!("Waiting for in-flight sends...");
    let summary = monitor.finish();
    let status = monitor.status();

    println!();
    println!("Session Summary:");
    println!("  Shakes detected: {}", status.shake_count);
    println!("  Events sent: {}", status.event_count);
    println!("  Sends delivered/failed: {}/{}", summary.delivered, summary.failed);
    println!();
    println!("{}", monitor.dispatcher().activity().summary());

    Ok(())
}

fn cmd_simulate(user: Option<String>, count: u32, relay: Option<String>) -> anyhow::Result<()> {
    let config = load_config();
    let user_name = resolve_user(user, &config)?;
    let runtime = build_runtime()?;

    println!("Simulating {count} shake(s) as {user_name}");

    let collector = Collector::from_reader(std::io::empty());
    let mut monitor = build_monitor(&config, user_name, relay, collector, &runtime)?;

    monitor.start().context("Could not start monitoring")?;
    for _ in 0..count {
        let event = monitor.simulate_shake();
        println!(
            "  Shake: Δ{:.2} m/s² ({})",
            event.delta_acceleration.magnitude,
            event.shake_intensity
        );
    }
    monitor.stop();

    let summary = monitor.finish();
    println!();
    println!("Sent {} of {} simulated shake(s)", summary.delivered, count);

    if summary.failed > 0 {
        bail!("{} send(s) failed", summary.failed);
    }
    Ok(())
}

fn cmd_destination_set(connection_string: &str, relay: Option<String>) -> anyhow::Result<()> {
    let config = load_config();
    let runtime = build_runtime()?;

    let relay = relay.or_else(|| config.relay_url.clone());
    let (endpoint, _) = build_endpoint(relay.as_deref())?;
    let dispatcher = Dispatcher::new(endpoint, EventCounter::new(), create_shared_log());

    let destination = Destination::custom(connection_string.trim());
    println!("Validating connection string...");
    let validated = runtime
        .block_on(dispatcher.validate(&destination))
        .context("Custom destination was not saved")?;

    let store = DestinationStore::new(config.custom_destination_path());
    let record = store.save(connection_string.trim())?;

    println!(
        "Custom destination saved: {} (at {})",
        validated.endpoint_name,
        record.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

fn cmd_destination_clear() -> anyhow::Result<()> {
    let config = load_config();
    DestinationStore::new(config.custom_destination_path()).clear()?;
    println!("Custom destination cleared. Using the default destination.");
    Ok(())
}

fn cmd_destination_show() -> anyhow::Result<()> {
    let config = load_config();
    let default = DefaultDestination::from_env();
    let store = DestinationStore::new(config.custom_destination_path());

    match store.load()? {
        Some(record) => {
            let hub = record
                .destination()
                .target()
                .map(|t| t.entity_path)
                .unwrap_or_else(|e| format!("unusable: {e}"));
            println!("Active destination: custom");
            println!("  Hub: {hub}");
            println!("  Saved at: {}", record.saved_at);
        }
        None => {
            println!("Active destination: default");
            println!(
                "  Hub: {}",
                default.hub_name_used().unwrap_or_else(|| "(none)".to_string())
            );
            println!("  Ready: {}", default.is_ready());
        }
    }
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config();

    println!("Shake Relay Status");
    println!("==================");
    println!();

    let status = DefaultDestination::from_env().status();
    println!("Default destination:");
    println!(
        "  Connection string: {}",
        match status.connection_string_source {
            shake_relay::config::CredentialSource::Environment => "environment",
            shake_relay::config::CredentialSource::Unset => "not set",
        }
    );
    println!("  EntityPath embedded: {}", status.entity_path_embedded);
    println!(
        "  Hub: {}",
        status.hub_name_used.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Ready: {}",
        if status.producer_ready { "yes ✓" } else { "no ✗" }
    );
    println!();

    let store = DestinationStore::new(config.custom_destination_path());
    match store.load() {
        Ok(Some(record)) => println!("Custom destination: saved {}", record.saved_at),
        Ok(None) => println!("Custom destination: none"),
        Err(e) => println!("Custom destination: unreadable ({e})"),
    }
    println!();

    if config.activity_path().exists() {
        let activity = ActivityLog::with_persistence(config.activity_path());
        let stats = activity.stats();
        println!("Cumulative Statistics:");
        println!("  Sessions started: {}", stats.sessions_started);
        println!("  Shakes detected: {}", stats.shakes_detected);
        println!("  Events sent: {}", stats.events_sent);
        println!("  Send failures: {}", stats.send_failures);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16) -> anyhow::Result<()> {
    use shake_relay::server::{run, ServerConfig};

    let runtime = build_runtime()?;
    runtime.block_on(async {
        let downstream = Arc::new(EventHubsEndpoint::new()?);
        let config = ServerConfig::new(port, DefaultDestination::from_env(), downstream);
        let (addr, shutdown_tx) = run(config).await?;

        println!("Shake relay listening on http://{addr}");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());
        Ok::<(), anyhow::Error>(())
    })
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
