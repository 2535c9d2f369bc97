//! Group aggregator: cross-host facts over a fixed set of probe monitors.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Defaults, GroupDefinition};
use crate::engine::ProbeMonitor;
use crate::error::Result;
use crate::events::{EventName, EventSink};
use crate::models::{ExtraFields, GroupStatus};
use crate::task::{fire_tasks, Task};

pub struct GroupAggregator {
    name: String,
    extra: ExtraFields,
    members: Vec<Arc<ProbeMonitor>>,
    any_connected: Vec<Task>,
    all_connected: Vec<Task>,
    any_disconnected: Vec<Task>,
    all_disconnected: Vec<Task>,
    events: Arc<EventSink<GroupStatus>>,
    pending: CancellationToken,
}

impl GroupAggregator {
    /// Builds the aggregator and subscribes to every member's transitions.
    ///
    /// Member sinks only hold a weak handle back to the aggregator.
    pub fn new(
        definition: &GroupDefinition,
        members: Vec<Arc<ProbeMonitor>>,
        defaults: &Defaults,
    ) -> Result<Arc<Self>> {
        let log = definition.log_tasks(defaults);
        let aggregator = Arc::new(Self {
            name: definition.name.clone(),
            extra: definition.extra.clone(),
            members,
            any_connected: Task::from_definitions(definition.on_any_connected.as_deref(), log)?,
            all_connected: Task::from_definitions(definition.on_all_connected.as_deref(), log)?,
            any_disconnected: Task::from_definitions(definition.on_any_disconnected.as_deref(), log)?,
            all_disconnected: Task::from_definitions(definition.on_all_disconnected.as_deref(), log)?,
            events: Arc::new(EventSink::new()),
            pending: CancellationToken::new(),
        });

        for member in &aggregator.members {
            let weak = Arc::downgrade(&aggregator);
            member.events().on(EventName::Connected, move |_, _| {
                with_group(&weak, GroupAggregator::member_connected);
                Ok(())
            });
            let weak = Arc::downgrade(&aggregator);
            member.events().on(EventName::Disconnected, move |_, _| {
                with_group(&weak, GroupAggregator::member_disconnected);
                Ok(())
            });
        }

        Ok(aggregator)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Arc<ProbeMonitor>] {
        &self.members
    }

    pub fn events(&self) -> &Arc<EventSink<GroupStatus>> {
        &self.events
    }

    pub fn task_names(&self) -> BTreeSet<String> {
        self.any_connected
            .iter()
            .chain(&self.all_connected)
            .chain(&self.any_disconnected)
            .chain(&self.all_disconnected)
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Fresh snapshot of every member; never cached.
    pub fn details(&self) -> GroupStatus {
        let hosts: Vec<_> = self.members.iter().map(|m| m.details()).collect();
        let alive_count = hosts.iter().filter(|h| h.is_online).count();
        GroupStatus {
            name: self.name.clone(),
            host_count: hosts.len(),
            alive_count,
            hosts,
            extra: self.extra.clone(),
        }
    }

    fn member_connected(&self) {
        let details = self.details();
        debug!(group = %self.name, alive = details.alive_count, total = details.host_count, "Member connected");
        fire_tasks(&self.any_connected, &self.events, &details, &self.pending);

        let details = self.details();
        if details.alive_count == details.host_count {
            fire_tasks(&self.all_connected, &self.events, &details, &self.pending);
        }
    }

    fn member_disconnected(&self) {
        let details = self.details();
        debug!(group = %self.name, alive = details.alive_count, total = details.host_count, "Member disconnected");
        fire_tasks(&self.any_disconnected, &self.events, &details, &self.pending);

        let details = self.details();
        if details.alive_count == 0 {
            fire_tasks(&self.all_disconnected, &self.events, &details, &self.pending);
        }
    }

    /// Drops pending delayed tasks and the aggregator's own listeners.
    /// Member monitors are disposed by their owner.
    pub fn dispose(&self) {
        self.pending.cancel();
        self.events.remove_all_listeners();
    }
}

fn with_group(weak: &Weak<GroupAggregator>, f: fn(&GroupAggregator)) {
    if let Some(group) = weak.upgrade() {
        f(&group);
    }
}
