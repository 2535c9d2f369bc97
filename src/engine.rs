//! Probe monitor: per-target connectivity state machine with debounced
//! disconnects.
//!
//! A monitor probes its address on a fixed interval. A single successful probe
//! brings an offline target online, while an online target is only declared
//! offline after `retries + 1` consecutive failed probes. The first probe after
//! [`ProbeMonitor::start`] only records a baseline and stays silent.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{
    ConnectionMonitorDefinition, Defaults, HostDefinition, ProbeSettings, TaskDefinition,
};
use crate::error::{ConfigError, Result};
use crate::events::{EventName, EventSink};
use crate::models::{ConnectionState, ExtraFields, HostStatus};
use crate::probe::Probe;
use crate::task::{fire_tasks, Task};
use crate::utils;

pub const GATEWAY_MONITOR_NAME: &str = "Connection Monitor";

#[derive(Debug, Default)]
struct ProbeState {
    status: ConnectionState,
    retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Connected,
    Disconnected,
}

pub struct ProbeMonitor {
    name: String,
    address: String,
    extra: ExtraFields,
    settings: ProbeSettings,
    probe: Arc<dyn Probe>,
    on_connected: Vec<Task>,
    on_disconnected: Vec<Task>,
    events: Arc<EventSink<HostStatus>>,
    state: Mutex<ProbeState>,
    runner: Mutex<Option<CancellationToken>>,
    pending: CancellationToken,
    disposed: AtomicBool,
}

impl ProbeMonitor {
    pub fn for_host(definition: &HostDefinition, defaults: &Defaults, probe: Arc<dyn Probe>) -> Result<Self> {
        let settings = definition.settings(defaults);
        check_ping_rate(&definition.name, &settings, defaults.min_ping_rate())?;
        Self::new(
            definition.name.clone(),
            definition.address.clone(),
            definition.extra.clone(),
            settings,
            definition.on_connected.as_deref(),
            definition.on_disconnected.as_deref(),
            probe,
        )
    }

    pub fn for_gateway(
        definition: &ConnectionMonitorDefinition,
        defaults: &Defaults,
        probe: Arc<dyn Probe>,
    ) -> Result<Self> {
        let settings = definition.settings(defaults);
        check_ping_rate(GATEWAY_MONITOR_NAME, &settings, defaults.min_ping_rate())?;
        Self::new(
            GATEWAY_MONITOR_NAME.to_string(),
            definition.gateway_address.clone(),
            definition.extra.clone(),
            settings,
            definition.on_connected.as_deref(),
            definition.on_disconnected.as_deref(),
            probe,
        )
    }

    fn new(
        name: String,
        address: String,
        extra: ExtraFields,
        settings: ProbeSettings,
        on_connected: Option<&[TaskDefinition]>,
        on_disconnected: Option<&[TaskDefinition]>,
        probe: Arc<dyn Probe>,
    ) -> Result<Self> {
        let on_connected = Task::from_definitions(on_connected, settings.log_tasks)?;
        let on_disconnected = Task::from_definitions(on_disconnected, settings.log_tasks)?;

        Ok(Self {
            name,
            address,
            extra,
            settings,
            probe,
            on_connected,
            on_disconnected,
            events: Arc::new(EventSink::new()),
            state: Mutex::new(ProbeState::default()),
            runner: Mutex::new(None),
            pending: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventSink<HostStatus>> {
        &self.events
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().status
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    pub fn is_monitoring(&self) -> bool {
        self.runner.lock().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Distinct names of every task this monitor can publish.
    pub fn task_names(&self) -> BTreeSet<String> {
        self.on_connected
            .iter()
            .chain(&self.on_disconnected)
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn details(&self) -> HostStatus {
        HostStatus {
            name: self.name.clone(),
            address: self.address.clone(),
            is_online: self.is_online(),
            extra: self.extra.clone(),
        }
    }

    async fn probe_once(&self) -> bool {
        match self.probe.probe(&self.address).await {
            Ok(alive) => alive,
            Err(e) => {
                debug!(monitor = %self.name, address = %self.address, "Probe failed: {:#}", e);
                false
            }
        }
    }

    /// Records the baseline status without emitting events or firing tasks.
    pub async fn initial_check(&self) -> ConnectionState {
        let alive = self.probe_once().await;
        let status = if alive { ConnectionState::Online } else { ConnectionState::Offline };
        {
            let mut state = self.state.lock();
            state.status = status;
            state.retry_count = 0;
        }
        self.log_status(status);
        status
    }

    /// Runs one periodic probe and applies its result. A disposed monitor
    /// does not probe and reports `false`.
    pub async fn check(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let alive = self.probe_once().await;
        self.apply(alive);
        alive
    }

    pub(crate) fn apply(&self, alive: bool) -> Option<Transition> {
        let transition = {
            let mut state = self.state.lock();
            match (state.status, alive) {
                (ConnectionState::Online, true) | (ConnectionState::Offline, false) => {
                    state.retry_count = 0;
                    None
                }
                (ConnectionState::Unknown, false) => {
                    state.status = ConnectionState::Offline;
                    state.retry_count = 0;
                    None
                }
                (_, true) => {
                    state.status = ConnectionState::Online;
                    state.retry_count = 0;
                    Some(Transition::Connected)
                }
                (ConnectionState::Online, false) => {
                    if state.retry_count >= self.settings.retries {
                        state.status = ConnectionState::Offline;
                        state.retry_count = 0;
                        Some(Transition::Disconnected)
                    } else {
                        state.retry_count += 1;
                        if self.settings.log_changes {
                            info!(
                                monitor = %self.name,
                                "Failed to reach {} - retrying {} / {}",
                                self.address, state.retry_count, self.settings.retries
                            );
                        }
                        None
                    }
                }
            }
        };

        match transition {
            Some(Transition::Connected) => self.connected(),
            Some(Transition::Disconnected) => self.disconnected(),
            None => {}
        }
        transition
    }

    fn connected(&self) {
        self.log_status(ConnectionState::Online);
        let details = self.details();
        self.events.emit(&EventName::Connected, &details, None);
        fire_tasks(&self.on_connected, &self.events, &details, &self.pending);
    }

    fn disconnected(&self) {
        self.log_status(ConnectionState::Offline);
        if self.settings.bell_on_disconnect {
            utils::ring_bell();
        }
        let details = self.details();
        self.events.emit(&EventName::Disconnected, &details, None);
        fire_tasks(&self.on_disconnected, &self.events, &details, &self.pending);
    }

    fn log_status(&self, status: ConnectionState) {
        if self.settings.log_changes {
            info!(monitor = %self.name, address = %self.address, "{} ({}) is {}", self.name, self.address, status);
        }
    }

    /// Takes the baseline reading, then probes every interval until stopped.
    pub async fn start(self: &Arc<Self>) {
        if self.is_disposed() {
            warn!(monitor = %self.name, "Ignoring start of a disposed monitor");
            return;
        }
        if self.is_monitoring() {
            return;
        }
        let token = CancellationToken::new();
        *self.runner.lock() = Some(token.clone());

        self.initial_check().await;
        if token.is_cancelled() {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.settings.interval;
        tokio::spawn(run_periodic(weak, token, period));
    }

    pub fn stop(&self) {
        if let Some(token) = self.runner.lock().take() {
            token.cancel();
        }
    }

    /// Stops probing, drops pending delayed tasks and every listener.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stop();
        self.pending.cancel();
        self.events.remove_all_listeners();
    }
}

async fn run_periodic(monitor: Weak<ProbeMonitor>, token: CancellationToken, period: std::time::Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        let alive = monitor.probe_once().await;
        // Stopped while the probe was in flight: discard the result.
        if token.is_cancelled() {
            break;
        }
        monitor.apply(alive);
    }
}

fn check_ping_rate(name: &str, settings: &ProbeSettings, min: u64) -> Result<()> {
    let rate = u64::try_from(settings.interval.as_millis()).unwrap_or(u64::MAX);
    if rate < min {
        return Err(ConfigError::PingRateTooLow {
            name: name.to_string(),
            rate,
            min,
        });
    }
    Ok(())
}
