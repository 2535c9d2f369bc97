use serde::{Deserialize, Serialize};
use std::fmt;

/// Unrecognized configuration keys, echoed verbatim in every status payload.
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

/// Opaque task parameter map handed to listeners alongside the payload.
pub type Param = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl ConnectionState {
    pub fn is_online(self) -> bool {
        self == ConnectionState::Online
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unknown => write!(f, "unknown"),
            ConnectionState::Online => write!(f, "online"),
            ConnectionState::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityStatus {
    pub is_online: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub name: String,
    pub address: String,
    pub is_online: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl HostStatus {
    /// Drops the host identity, keeping only the connectivity facts.
    pub fn connectivity(&self) -> ConnectivityStatus {
        ConnectivityStatus {
            is_online: self.is_online,
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    pub name: String,
    pub hosts: Vec<HostStatus>,
    pub host_count: usize,
    pub alive_count: usize,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Payload carried on the registry's top-level event sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusPayload {
    Host(HostStatus),
    Group(GroupStatus),
    Network(ConnectivityStatus),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub network: Option<ConnectivityStatus>,
    pub hosts: Vec<HostStatus>,
    pub groups: Vec<GroupStatus>,
}
