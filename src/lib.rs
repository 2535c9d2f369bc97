//! Host, group and gateway liveness monitoring.
//!
//! Probe monitors track the online/offline state of a single address with
//! debounced disconnects, group aggregators derive facts over sets of hosts,
//! and configured tasks are published on an [`events::EventSink`] when
//! transitions happen inside their day/time windows. Delivering those tasks
//! anywhere is left to the subscriber.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod group;
pub mod models;
pub mod probe;
pub mod registry;
pub mod task;
pub mod utils;

pub use config::MonitorConfig;
pub use engine::ProbeMonitor;
pub use error::ConfigError;
pub use events::{EventName, EventSink, ListenerError};
pub use group::GroupAggregator;
pub use models::{ConnectionState, ConnectivityStatus, GroupStatus, HostStatus, Snapshot, StatusPayload};
pub use probe::{IcmpProbe, Probe};
pub use registry::MonitorRegistry;
pub use task::Task;
