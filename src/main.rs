use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use netpulse::api::{self, SharedRegistry};
use netpulse::registry::start_monitors;
use netpulse::{utils, EventName, IcmpProbe, MonitorConfig, MonitorRegistry, StatusPayload};

#[derive(Parser, Debug)]
#[command(version, about = "Host, group and gateway liveness monitor")]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// ICMP echo requests per probe before a target counts as unreachable.
    #[arg(long, default_value_t = 1)]
    ping_count: u16,

    /// Per-request ICMP timeout in milliseconds.
    #[arg(long, default_value_t = 3500)]
    ping_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::setup_console();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_ansi(true)
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::load(&cli.config)?;
    let probe = Arc::new(IcmpProbe::new(cli.ping_count, Duration::from_millis(cli.ping_timeout_ms))?);

    let mut registry = MonitorRegistry::new(probe);
    log_events(&registry);
    registry.load_config(&config)?;
    registry.start_monitoring().await;

    let registry: SharedRegistry = Arc::new(Mutex::new(registry));

    if let Some(port) = config.api_port {
        let state = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = api::start_server(port, state).await {
                error!("{:#}", e);
            }
        });
    }

    wait_for_shutdown(&cli.config, &registry).await?;

    info!("Shutdown signal received. Stopping monitors...");
    let mut registry = registry.lock().await;
    registry.stop_monitoring();
    registry.dispose_monitors();
    Ok(())
}

fn log_events(registry: &MonitorRegistry) {
    let events = registry.events();
    for name in [
        EventName::HostConnected,
        EventName::HostDisconnected,
        EventName::NetworkConnected,
        EventName::NetworkDisconnected,
    ] {
        let event = name.clone();
        events.on(name, move |payload, _| {
            match payload {
                StatusPayload::Host(host) => {
                    info!(event = %event, host = %host.name, address = %host.address, "[CHANGE] {}", event)
                }
                other => info!(event = %event, online = is_online(other), "[CHANGE] {}", event),
            }
            Ok(())
        });
    }
    events.on_error(|failure| warn!(event = %failure.event, "Listener failed: {:#}", failure.cause));
}

fn is_online(payload: &StatusPayload) -> bool {
    match payload {
        StatusPayload::Host(host) => host.is_online,
        StatusPayload::Group(group) => group.alive_count > 0,
        StatusPayload::Network(network) => network.is_online,
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(config_path: &Path, registry: &SharedRegistry) -> Result<()> {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    let mut hangup = unix_signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = signal::ctrl_c() => return Ok(res?),
            _ = hangup.recv() => reload(config_path, registry).await,
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_config_path: &Path, _registry: &SharedRegistry) -> Result<()> {
    signal::ctrl_c().await?;
    Ok(())
}

#[cfg_attr(not(unix), allow(dead_code))]
async fn reload(config_path: &Path, registry: &SharedRegistry) {
    info!(path = %config_path.display(), "Reloading configuration");
    let config = match MonitorConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Keeping current monitors: {:#}", e);
            return;
        }
    };

    let monitors = {
        let mut registry = registry.lock().await;
        if let Err(e) = registry.load_config(&config) {
            error!("Keeping current monitors: {}", e);
            return;
        }
        registry.monitors()
    };
    start_monitors(&monitors).await;
}
