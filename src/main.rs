//! Resilient dispatch daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!     InferenceRequest
//!     ─────────────────▶ ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//!                        │ dispatcher │──▶│   circuit    │──▶│ retry queue │──▶│ backend  │
//!                        │ (select)   │   │   breaker    │   │ (priority)  │   │ adapter  │
//!     DispatchReply      └─────┬──────┘   └──────────────┘   └─────────────┘   └──────────┘
//!     ◀────────────────────────┘
//!
//!     Cross-cutting: config (+ hot reload), health monitor, admin API,
//!     tracing, Prometheus metrics, graceful shutdown
//! ```
//!
//! `run` drives simulated backends with synthetic load; `check` validates a
//! configuration file and exits.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::broadcast;

use resilient_dispatch::admin::{self, AdminState};
use resilient_dispatch::config::validation::validate_config;
use resilient_dispatch::config::watcher::ConfigWatcher;
use resilient_dispatch::config::{load_config, ConfigError, DispatchConfig};
use resilient_dispatch::dispatch::simulated::SimulatedBackend;
use resilient_dispatch::dispatch::{Backend, Dispatcher, InferenceRequest};
use resilient_dispatch::health::HealthMonitor;
use resilient_dispatch::lifecycle::{signals, Shutdown};
use resilient_dispatch::observability::{logging, metrics};
use resilient_dispatch::resilience::ResilienceRegistry;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "resilient-dispatch", version, about = "Circuit-breaking, retrying inference dispatcher")]
struct Cli {
    /// Path to a TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatcher against simulated backends
    Run {
        /// Synthetic requests per second
        #[arg(long, default_value_t = 5)]
        rate: u32,

        /// Stop after this many requests instead of waiting for a signal
        #[arg(long)]
        requests: Option<u64>,

        /// Failure probability of the simulated cloud backend
        #[arg(long, default_value_t = 0.2)]
        cloud_failure_rate: f64,
    },
    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run {
        rate: 5,
        requests: None,
        cloud_failure_rate: 0.2,
    }) {
        Command::Check => check(cli.config.as_deref()),
        Command::Run {
            rate,
            requests,
            cloud_failure_rate,
        } => run(cli.config.as_deref(), rate, requests, cloud_failure_rate).await,
    }
}

fn read_config(path: Option<&Path>) -> Result<DispatchConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let config = DispatchConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

fn check(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = read_config(path)?;
    println!("# Configuration OK. Effective settings:\n");
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn run(
    path: Option<&Path>,
    rate: u32,
    requests: Option<u64>,
    cloud_failure_rate: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = read_config(path)?;
    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-dispatch starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = ResilienceRegistry::new(&config);
    let dispatcher = Arc::new(
        Dispatcher::new(Arc::clone(&registry), config.clone())
            .with_adapter(
                Backend::Local,
                Arc::new(
                    SimulatedBackend::new("local-sim")
                        .latency(Duration::from_millis(40), Duration::from_millis(40))
                        .failing(0.05, "read ECONNRESET"),
                ),
            )
            .with_adapter(
                Backend::Cloud,
                Arc::new(
                    SimulatedBackend::new("cloud-sim")
                        .latency(Duration::from_millis(150), Duration::from_millis(150))
                        .failing(cloud_failure_rate, "503 Service Unavailable"),
                ),
            )
            .with_adapter(
                Backend::Vision,
                Arc::new(
                    SimulatedBackend::new("vision-sim")
                        .latency(Duration::from_millis(300), Duration::from_millis(100))
                        .failing(0.1, "Invalid image payload"),
                ),
            ),
    );

    let shutdown = Shutdown::new();

    let monitor = HealthMonitor::new(Arc::clone(&dispatcher), config.health.clone());
    tokio::spawn(monitor.run(shutdown.subscribe()));

    if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let state = AdminState::new(Arc::clone(&dispatcher), &config.admin.api_key);
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(addr, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    // Kept alive for the life of the process.
    let _watcher = match path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let dispatcher = Arc::clone(&dispatcher);
            let mut reload_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(new_config) = updates.recv() => dispatcher.apply_config(new_config),
                        _ = reload_shutdown.recv() => break,
                        else => break,
                    }
                }
            });
            Some(watcher)
        }
        None => None,
    };

    let load = tokio::spawn(generate_load(
        Arc::clone(&dispatcher),
        rate,
        requests,
        shutdown.subscribe(),
    ));

    tokio::select! {
        _ = signals::wait_for_shutdown() => {}
        _ = load => tracing::info!("Synthetic load finished"),
    }

    tracing::info!("Shutting down");
    shutdown.trigger();
    shutdown.drain_queue(registry.queue(), SHUTDOWN_GRACE).await;
    dispatcher.log_health();

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Submit requests at `rate` per second until `limit` is reached or shutdown.
async fn generate_load(
    dispatcher: Arc<Dispatcher>,
    rate: u32,
    limit: Option<u64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = Duration::from_secs(1) / rate.max(1);
    let mut ticker = tokio::time::interval(period);
    let mut in_flight = tokio::task::JoinSet::new();
    let mut sent = 0u64;

    while limit.map_or(true, |limit| sent < limit) {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => return,
        }

        let mut request = InferenceRequest::new(json!({ "prompt": format!("synthetic request {}", sent) }))
            .with_priority(fastrand::i32(0..3));
        if sent % 10 == 9 {
            request = request.on(Backend::Vision);
        }
        sent += 1;

        let dispatcher = Arc::clone(&dispatcher);
        in_flight.spawn(async move {
            let _ = dispatcher.dispatch(request).await;
        });
    }

    while in_flight.join_next().await.is_some() {}
}
