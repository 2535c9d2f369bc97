use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::{ExtraFields, Param};

pub const MIN_PING_RATE_MS: u64 = 1_000;

fn default_host_ping_rate() -> u64 { 10_000 }
fn default_host_ping_retries() -> u32 { 2 }
fn default_network_ping_rate() -> u64 { 5_000 }
fn default_network_ping_retries() -> u32 { 2 }

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default)]
    pub hosts: Vec<HostDefinition>,
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
    #[serde(default)]
    pub connection_monitor: Option<ConnectionMonitorDefinition>,
    #[serde(default)]
    pub defaults: Defaults,
    /// Port for the status API; the API stays off when absent.
    #[serde(default)]
    pub api_port: Option<u16>,
}

impl MonitorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Fallbacks per category. Entity values win over category values, which win
/// over the general `logTasks` flag and the built-in constants.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    /// Floor for every host and gateway ping rate, in milliseconds.
    pub min_ping_rate: Option<u64>,
    pub host_ping_rate: Option<u64>,
    pub host_ping_retries: Option<u32>,
    pub network_ping_rate: Option<u64>,
    pub network_ping_retries: Option<u32>,
    pub log_host_connectivity_changes: Option<bool>,
    pub log_network_connectivity_changes: Option<bool>,
    pub log_tasks: Option<bool>,
    pub log_host_tasks: Option<bool>,
    pub log_group_tasks: Option<bool>,
    pub log_network_tasks: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HostDefinition {
    pub name: String,
    pub address: String,
    pub ping_rate: Option<u64>,
    pub ping_retries: Option<u32>,
    pub on_connected: Option<Vec<TaskDefinition>>,
    pub on_disconnected: Option<Vec<TaskDefinition>>,
    pub log_connectivity_changes: Option<bool>,
    pub log_tasks: Option<bool>,
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefinition {
    pub name: String,
    pub hosts: Vec<String>,
    pub on_all_connected: Option<Vec<TaskDefinition>>,
    pub on_all_disconnected: Option<Vec<TaskDefinition>>,
    pub on_any_connected: Option<Vec<TaskDefinition>>,
    pub on_any_disconnected: Option<Vec<TaskDefinition>>,
    pub log_tasks: Option<bool>,
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMonitorDefinition {
    pub gateway_address: String,
    pub ping_rate: Option<u64>,
    pub ping_retries: Option<u32>,
    pub on_connected: Option<Vec<TaskDefinition>>,
    pub on_disconnected: Option<Vec<TaskDefinition>>,
    pub log_connectivity_changes: Option<bool>,
    pub log_tasks: Option<bool>,
    pub play_sound_on_disconnect: Option<bool>,
    pub enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    /// Milliseconds to wait before publishing.
    pub delay: Option<u64>,
    pub date_ranges: Option<Vec<DateRange>>,
    pub enabled: Option<bool>,
    pub param: Option<Param>,
}

/// Days are 0 (Sunday) through 6 (Saturday). `days` excludes `dayStart`/`dayEnd`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub days: Option<Vec<u32>>,
    pub day_start: Option<u32>,
    pub day_end: Option<u32>,
    pub time_ranges: Option<Vec<TimeRange>>,
}

/// Minutes since local midnight, both bounds inclusive.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub time_start: Option<u32>,
    pub time_end: Option<u32>,
}

/// Probe timing and logging after defaults have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub retries: u32,
    pub log_changes: bool,
    pub log_tasks: bool,
    pub bell_on_disconnect: bool,
}

impl Defaults {
    pub fn min_ping_rate(&self) -> u64 {
        self.min_ping_rate.unwrap_or(MIN_PING_RATE_MS)
    }
}

impl HostDefinition {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn settings(&self, defaults: &Defaults) -> ProbeSettings {
        let rate = self
            .ping_rate
            .or(defaults.host_ping_rate)
            .unwrap_or_else(default_host_ping_rate);
        ProbeSettings {
            interval: Duration::from_millis(rate),
            retries: self
                .ping_retries
                .or(defaults.host_ping_retries)
                .unwrap_or_else(default_host_ping_retries),
            log_changes: self
                .log_connectivity_changes
                .or(defaults.log_host_connectivity_changes)
                .unwrap_or(false),
            log_tasks: self
                .log_tasks
                .or(defaults.log_host_tasks)
                .or(defaults.log_tasks)
                .unwrap_or(false),
            bell_on_disconnect: false,
        }
    }
}

impl GroupDefinition {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn log_tasks(&self, defaults: &Defaults) -> bool {
        self.log_tasks
            .or(defaults.log_group_tasks)
            .or(defaults.log_tasks)
            .unwrap_or(false)
    }
}

impl ConnectionMonitorDefinition {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn settings(&self, defaults: &Defaults) -> ProbeSettings {
        let rate = self
            .ping_rate
            .or(defaults.network_ping_rate)
            .unwrap_or_else(default_network_ping_rate);
        ProbeSettings {
            interval: Duration::from_millis(rate),
            retries: self
                .ping_retries
                .or(defaults.network_ping_retries)
                .unwrap_or_else(default_network_ping_retries),
            log_changes: self
                .log_connectivity_changes
                .or(defaults.log_network_connectivity_changes)
                .unwrap_or(false),
            log_tasks: self
                .log_tasks
                .or(defaults.log_network_tasks)
                .or(defaults.log_tasks)
                .unwrap_or(false),
            bell_on_disconnect: self.play_sound_on_disconnect.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host(value: serde_json::Value) -> HostDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_host_falls_back_to_category_defaults() {
        let defaults = Defaults {
            host_ping_rate: Some(2_000),
            host_ping_retries: Some(4),
            log_host_connectivity_changes: Some(true),
            log_tasks: Some(true),
            ..Defaults::default()
        };

        let settings = host(json!({ "name": "a", "address": "10.0.0.1" })).settings(&defaults);

        assert_eq!(settings.interval, Duration::from_millis(2_000));
        assert_eq!(settings.retries, 4);
        assert!(settings.log_changes);
        assert!(settings.log_tasks);
    }

    #[test]
    fn test_category_task_logging_beats_general_flag() {
        let defaults = Defaults {
            log_tasks: Some(true),
            log_host_tasks: Some(false),
            ..Defaults::default()
        };

        let settings = host(json!({ "name": "a", "address": "" })).settings(&defaults);
        assert!(!settings.log_tasks);
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let defaults = Defaults {
            host_ping_rate: Some(2_000),
            host_ping_retries: Some(4),
            log_tasks: Some(true),
            ..Defaults::default()
        };

        let settings = host(json!({
            "name": "a",
            "address": "",
            "pingRate": 3000,
            "pingRetries": 0,
            "logTasks": false
        }))
        .settings(&defaults);

        assert_eq!(settings.interval, Duration::from_millis(3_000));
        assert_eq!(settings.retries, 0);
        assert!(!settings.log_tasks);
    }

    #[test]
    fn test_built_in_defaults_apply_last() {
        let settings = host(json!({ "name": "a", "address": "" })).settings(&Defaults::default());
        assert_eq!(settings.interval, Duration::from_millis(default_host_ping_rate()));
        assert_eq!(settings.retries, default_host_ping_retries());
        assert!(!settings.log_changes);
    }

    #[test]
    fn test_unknown_keys_are_captured_as_extra_fields() {
        let definition = host(json!({
            "name": "nas",
            "address": "10.0.0.5",
            "mac": "aa:bb:cc:dd:ee:ff",
            "room": 3
        }));

        assert_eq!(definition.extra.len(), 2);
        assert_eq!(definition.extra["mac"], json!("aa:bb:cc:dd:ee:ff"));
        assert_eq!(definition.extra["room"], json!(3));
    }

    #[test]
    fn test_parse_full_config() {
        let config: MonitorConfig = serde_json::from_value(json!({
            "hosts": [
                {
                    "name": "nas",
                    "address": "10.0.0.5",
                    "onDisconnected": [
                        { "name": "wake", "delay": 500, "param": { "mac": "x" },
                          "dateRanges": [{ "dayStart": 1, "dayEnd": 5, "timeRanges": [{ "timeStart": 480 }] }] }
                    ]
                }
            ],
            "groups": [{ "name": "servers", "hosts": ["nas"], "onAllDisconnected": [{ "name": "alarm" }] }],
            "connectionMonitor": { "gatewayAddress": "10.0.0.1", "playSoundOnDisconnect": true },
            "defaults": { "networkPingRate": 1500 },
            "apiPort": 3000
        }))
        .unwrap();

        assert_eq!(config.hosts.len(), 1);
        let task = &config.hosts[0].on_disconnected.as_ref().unwrap()[0];
        assert_eq!(task.delay, Some(500));
        let range = &task.date_ranges.as_ref().unwrap()[0];
        assert_eq!(range.day_start, Some(1));
        assert_eq!(range.time_ranges.as_ref().unwrap()[0].time_end, None);
        assert_eq!(config.groups[0].hosts, vec!["nas".to_string()]);

        let gateway = config.connection_monitor.as_ref().unwrap();
        let settings = gateway.settings(&config.defaults);
        assert_eq!(settings.interval, Duration::from_millis(1_500));
        assert!(settings.bell_on_disconnect);
        assert_eq!(config.api_port, Some(3000));
    }
}
