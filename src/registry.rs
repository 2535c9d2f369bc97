//! Top-level orchestrator: builds monitors from configuration, re-publishes
//! their events on one sink and owns the start/stop/reload lifecycle.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::engine::ProbeMonitor;
use crate::error::{ConfigError, Result};
use crate::events::{EventName, EventSink};
use crate::group::GroupAggregator;
use crate::models::{Snapshot, StatusPayload};
use crate::probe::Probe;

pub struct MonitorRegistry {
    probe: Arc<dyn Probe>,
    events: Arc<EventSink<StatusPayload>>,
    hosts: Vec<Arc<ProbeMonitor>>,
    groups: Vec<Arc<GroupAggregator>>,
    connection: Option<Arc<ProbeMonitor>>,
}

struct Built {
    hosts: Vec<Arc<ProbeMonitor>>,
    groups: Vec<Arc<GroupAggregator>>,
    connection: Option<Arc<ProbeMonitor>>,
}

impl MonitorRegistry {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            events: Arc::new(EventSink::new()),
            hosts: Vec::new(),
            groups: Vec::new(),
            connection: None,
        }
    }

    pub fn with_config(config: &MonitorConfig, probe: Arc<dyn Probe>) -> Result<Self> {
        let mut registry = Self::new(probe);
        registry.load_config(config)?;
        Ok(registry)
    }

    /// External event surface. Subscriptions survive reloads.
    pub fn events(&self) -> &Arc<EventSink<StatusPayload>> {
        &self.events
    }

    pub fn hosts(&self) -> &[Arc<ProbeMonitor>] {
        &self.hosts
    }

    pub fn groups(&self) -> &[Arc<GroupAggregator>] {
        &self.groups
    }

    pub fn connection_monitor(&self) -> Option<&Arc<ProbeMonitor>> {
        self.connection.as_ref()
    }

    pub fn host(&self, name: &str) -> Option<&Arc<ProbeMonitor>> {
        self.hosts.iter().find(|h| h.name() == name)
    }

    /// Replaces every monitor with ones built from `config`.
    ///
    /// The new set is built before anything is torn down, so an invalid
    /// configuration leaves the running monitors untouched; the old set is
    /// disposed only once the new one exists. New monitors are not started.
    pub fn load_config(&mut self, config: &MonitorConfig) -> Result<()> {
        let built = self.build(config)?;

        self.dispose_monitors();
        self.hosts = built.hosts;
        self.groups = built.groups;
        self.connection = built.connection;
        self.wire();

        info!(
            hosts = self.hosts.len(),
            groups = self.groups.len(),
            gateway = self.connection.is_some(),
            "Monitor configuration loaded"
        );
        Ok(())
    }

    fn build(&self, config: &MonitorConfig) -> Result<Built> {
        let defaults = &config.defaults;

        let mut hosts = Vec::new();
        let mut by_name: HashMap<&str, Arc<ProbeMonitor>> = HashMap::new();
        for definition in config.hosts.iter().filter(|h| h.is_enabled()) {
            if by_name.contains_key(definition.name.as_str()) {
                return Err(ConfigError::DuplicateHost(definition.name.clone()));
            }
            let monitor = Arc::new(ProbeMonitor::for_host(definition, defaults, Arc::clone(&self.probe))?);
            by_name.insert(definition.name.as_str(), Arc::clone(&monitor));
            hosts.push(monitor);
        }

        let mut groups = Vec::new();
        for definition in config.groups.iter().filter(|g| g.is_enabled()) {
            let members = definition
                .hosts
                .iter()
                .map(|host| {
                    by_name
                        .get(host.as_str())
                        .cloned()
                        .ok_or_else(|| ConfigError::UnknownGroupMember {
                            host: host.clone(),
                            group: definition.name.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            groups.push(GroupAggregator::new(definition, members, defaults)?);
        }

        let connection = match &config.connection_monitor {
            Some(definition) if definition.is_enabled() => Some(Arc::new(ProbeMonitor::for_gateway(
                definition,
                defaults,
                Arc::clone(&self.probe),
            )?)),
            _ => None,
        };

        Ok(Built { hosts, groups, connection })
    }

    fn wire(&self) {
        for host in &self.hosts {
            let source = host.events();
            forward(source, EventName::Connected, EventName::HostConnected, &self.events, |s| {
                StatusPayload::Host(s.clone())
            });
            forward(source, EventName::Disconnected, EventName::HostDisconnected, &self.events, |s| {
                StatusPayload::Host(s.clone())
            });
            for task in host.task_names() {
                forward(source, EventName::task(task.as_str()), EventName::Task(task), &self.events, |s| {
                    StatusPayload::Host(s.clone())
                });
            }
        }

        for group in &self.groups {
            for task in group.task_names() {
                forward(group.events(), EventName::task(task.as_str()), EventName::Task(task), &self.events, |s| {
                    StatusPayload::Group(s.clone())
                });
            }
        }

        if let Some(gateway) = &self.connection {
            let source = gateway.events();
            forward(source, EventName::Connected, EventName::NetworkConnected, &self.events, |s| {
                StatusPayload::Network(s.connectivity())
            });
            forward(source, EventName::Disconnected, EventName::NetworkDisconnected, &self.events, |s| {
                StatusPayload::Network(s.connectivity())
            });
            for task in gateway.task_names() {
                forward(source, EventName::task(task.as_str()), EventName::Task(task), &self.events, |s| {
                    StatusPayload::Network(s.connectivity())
                });
            }
        }
    }

    /// Every probe monitor, hosts first, then the gateway.
    pub fn monitors(&self) -> Vec<Arc<ProbeMonitor>> {
        self.hosts.iter().chain(self.connection.iter()).cloned().collect()
    }

    /// Starts every monitor; returns once all baseline checks have completed.
    pub async fn start_monitoring(&self) {
        start_monitors(&self.monitors()).await;
    }

    pub fn stop_monitoring(&self) {
        for monitor in self.hosts.iter().chain(self.connection.iter()) {
            monitor.stop();
        }
        info!("Monitoring stopped");
    }

    /// Disposes and forgets every monitor and aggregator.
    pub fn dispose_monitors(&mut self) {
        for group in self.groups.drain(..) {
            group.dispose();
        }
        for host in self.hosts.drain(..) {
            host.dispose();
        }
        if let Some(gateway) = self.connection.take() {
            gateway.dispose();
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            network: self.connection.as_ref().map(|c| c.details().connectivity()),
            hosts: self.hosts.iter().map(|h| h.details()).collect(),
            groups: self.groups.iter().map(|g| g.details()).collect(),
        }
    }
}

impl Drop for MonitorRegistry {
    fn drop(&mut self) {
        if !self.hosts.is_empty() || self.connection.is_some() {
            debug!("Monitor registry dropped, disposing its monitors");
        }
        self.dispose_monitors();
    }
}

/// Starts `monitors` concurrently. Lets a caller release a lock on the
/// registry before awaiting the baseline probes.
pub async fn start_monitors(monitors: &[Arc<ProbeMonitor>]) {
    join_all(monitors.iter().map(|monitor| monitor.start())).await;
    info!(monitors = monitors.len(), "Monitoring started");
}

fn forward<P, F>(
    source: &EventSink<P>,
    from: EventName,
    to: EventName,
    sink: &Arc<EventSink<StatusPayload>>,
    wrap: F,
) where
    P: 'static,
    F: Fn(&P) -> StatusPayload + Send + Sync + 'static,
{
    let sink = Arc::clone(sink);
    source.on(from, move |payload, param| {
        sink.emit(&to, &wrap(payload), param);
        Ok(())
    });
}
