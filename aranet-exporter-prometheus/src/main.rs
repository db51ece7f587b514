//! Prometheus exporter for an Aranet4 sensor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use aranet_bridge::{Device, Gateway, SimulatedDevice};
use aranet_common::init_tracing;
use aranet_exporter_prometheus::{Bridge, BridgeMode, ExporterConfig, HttpServer, Registry};

/// Prometheus exporter for an Aranet4 sensor.
#[derive(Parser, Debug)]
#[command(name = "aranet-exporter-prometheus")]
#[command(about = "Export Aranet4 readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(short, long)]
    listen: Option<String>,

    /// Device MAC address (overrides config).
    #[arg(short = 'm', long)]
    address: Option<String>,

    /// Bridge mode (overrides config).
    #[arg(long, value_enum)]
    mode: Option<BridgeMode>,

    /// Log level (overrides config): trace, debug, info, warn, error.
    #[arg(long)]
    log_level: Option<String>,

    /// Read the device once, print the result and exit.
    #[arg(long)]
    read_once: bool,
}

fn load_config(args: &Args) -> anyhow::Result<ExporterConfig> {
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ExporterConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.prometheus.listen = listen.clone();
    }
    if let Some(address) = &args.address {
        config.device.address = Some(address.clone());
    }
    if let Some(mode) = args.mode {
        config.bridge.mode = mode;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config.logging)?;

    let address = config.device_address().context("Invalid configuration")?;

    // Only the simulated backend ships; hardware drivers implement `Device`
    let device: Arc<dyn Device> = Arc::new(SimulatedDevice::new(config.device.simulation.clone()));
    info!(device = %address, backend = "simulated", "Using device backend");

    if args.read_once {
        return read_once(device, address, &config).await;
    }

    info!("Starting Aranet4 Prometheus Exporter");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(Registry::with_default_labels(
        config.prometheus.default_labels.clone(),
    ));
    let (bridge, poller) = Bridge::new(device, address, &config, &registry);
    let bridge = Arc::new(bridge);

    let listen_addr: SocketAddr = config
        .prometheus
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.prometheus.listen))?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_addr))?;

    let http_server = HttpServer::new(
        registry.clone(),
        bridge.clone(),
        config.prometheus.path.clone(),
    );

    let poller_task = poller.map(|poller| tokio::spawn(poller.run(shutdown_rx.clone())));

    let http_shutdown = shutdown_rx.clone();
    let mut http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve(listener, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut http_finished = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = &mut http_task => {
            warn!("HTTP server exited, shutting down...");
            http_finished = true;
        }
    }

    let _ = shutdown_tx.send(true);

    // The poller may be mid-transaction; that is bounded by the read timeout
    let grace =
        config.bridge.read_timeout() + config.bridge.close_timeout() + Duration::from_secs(1);
    let _ = tokio::time::timeout(grace, async {
        if let Some(task) = poller_task {
            let _ = task.await;
        }
        if !http_finished {
            let _ = http_task.await;
        }
    })
    .await;

    if let Some(state) = bridge.snapshot() {
        info!(
            attempts = state.attempts,
            consecutive_failures = state.consecutive_failures,
            has_reading = state.has_reading(),
            "Final statistics"
        );
    }

    info!("Exporter stopped");
    Ok(())
}

/// One transaction, printed the way an operator would check a sensor by hand.
async fn read_once(
    device: Arc<dyn Device>,
    address: aranet_common::DeviceAddress,
    config: &ExporterConfig,
) -> anyhow::Result<()> {
    let gateway = Gateway::new(device, address, config.bridge.gateway_options());
    let started = tokio::time::Instant::now();

    let reading = gateway
        .read()
        .await
        .with_context(|| format!("Failed to read {}", address))?;

    println!("Name:    {}", reading.identity.name);
    println!("Version: {}", reading.identity.firmware);
    println!("Reading: {}", reading);
    println!("Elapsed: {:.2}s", started.elapsed().as_secs_f64());
    Ok(())
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
