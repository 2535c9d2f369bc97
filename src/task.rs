//! Time-windowed, optionally delayed actions bound to connectivity transitions.

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{DateRange, TaskDefinition, TimeRange};
use crate::error::{ConfigError, Result};
use crate::events::{EventName, EventSink};
use crate::models::Param;

#[derive(Debug, Clone, PartialEq, Eq)]
enum DayRule {
    Every,
    Days(Vec<u32>),
    Span { start: Option<u32>, end: Option<u32> },
}

impl DayRule {
    fn matches(&self, day: u32) -> bool {
        match self {
            DayRule::Every => true,
            DayRule::Days(days) => days.contains(&day),
            DayRule::Span { start, end } => within(day, *start, *end),
        }
    }
}

#[derive(Debug, Clone)]
struct Window {
    days: DayRule,
    times: Option<Vec<TimeRange>>,
}

impl Window {
    fn from_range(task: &str, range: &DateRange) -> Result<Self> {
        let days = match (&range.days, range.day_start, range.day_end) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::ConflictingDayRange { task: task.into() });
            }
            (Some(days), None, None) => DayRule::Days(days.clone()),
            (None, None, None) => DayRule::Every,
            (None, start, end) => DayRule::Span { start, end },
        };

        let listed = range.days.iter().flatten().copied();
        if let Some(day) = listed
            .chain(range.day_start)
            .chain(range.day_end)
            .find(|day| *day > 6)
        {
            return Err(ConfigError::InvalidDay { task: task.into(), day });
        }

        Ok(Self {
            days,
            times: range.time_ranges.clone(),
        })
    }

    fn matches(&self, day: u32, minutes: u32) -> bool {
        if !self.days.matches(day) {
            return false;
        }
        match &self.times {
            None => true,
            Some(times) => times
                .iter()
                .any(|t| within(minutes, t.time_start, t.time_end)),
        }
    }
}

/// Inclusive bound test; a missing bound leaves that side open.
fn within(value: u32, start: Option<u32>, end: Option<u32>) -> bool {
    start.map_or(true, |s| value >= s) && end.map_or(true, |e| value <= e)
}

#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    delay: Option<Duration>,
    windows: Option<Vec<Window>>,
    param: Option<Param>,
    log: bool,
}

impl Task {
    pub fn new(definition: &TaskDefinition, log: bool) -> Result<Self> {
        let windows = definition
            .date_ranges
            .as_ref()
            .map(|ranges| {
                ranges
                    .iter()
                    .map(|range| Window::from_range(&definition.name, range))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        Ok(Self {
            name: definition.name.clone(),
            delay: definition.delay.map(Duration::from_millis),
            windows,
            param: definition.param.clone(),
            log,
        })
    }

    /// Builds the enabled tasks; disabled definitions never become tasks.
    pub fn from_definitions(definitions: Option<&[TaskDefinition]>, log: bool) -> Result<Vec<Self>> {
        definitions
            .unwrap_or_default()
            .iter()
            .filter(|d| d.enabled != Some(false))
            .map(|d| Self::new(d, log))
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_trigger(&self, now: &NaiveDateTime) -> bool {
        let Some(windows) = &self.windows else {
            return true;
        };

        let day = now.weekday().num_days_from_sunday();
        let minutes = now.hour() * 60 + now.minute();
        windows.iter().any(|w| w.matches(day, minutes))
    }

    /// Publishes the task on `sink`. A positive delay defers publishing on a
    /// spawned task that is dropped once `pending` is cancelled.
    pub fn trigger<P>(&self, sink: &Arc<EventSink<P>>, payload: &P, pending: &CancellationToken)
    where
        P: Clone + Send + Sync + 'static,
    {
        let event = EventName::task(self.name.as_str());
        match self.delay.filter(|d| !d.is_zero()) {
            Some(delay) => {
                if self.log {
                    info!(task = %self.name, delay_ms = delay.as_millis() as u64, "Triggering task with delay");
                }
                let sink = Arc::clone(sink);
                let payload = payload.clone();
                let param = self.param.clone();
                let pending = pending.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = pending.cancelled() => {
                            debug!(task = %event, "Delayed task cancelled");
                        }
                        _ = tokio::time::sleep(delay) => {
                            sink.emit(&event, &payload, param.as_ref());
                        }
                    }
                });
            }
            None => {
                if self.log {
                    info!(task = %self.name, "Triggering task without delay");
                }
                sink.emit(&event, payload, self.param.as_ref());
            }
        }
    }
}

/// Triggers every task whose window contains the current local time.
pub fn fire_tasks<P>(tasks: &[Task], sink: &Arc<EventSink<P>>, payload: &P, pending: &CancellationToken)
where
    P: Clone + Send + Sync + 'static,
{
    let now = Local::now().naive_local();
    for task in tasks.iter().filter(|t| t.can_trigger(&now)) {
        task.trigger(sink, payload, pending);
    }
}
