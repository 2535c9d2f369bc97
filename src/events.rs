//! Typed publish/subscribe registry shared by monitors, groups and the registry.
//!
//! Listeners are registered per [`EventName`] and receive `(payload, param)`.
//! A listener that fails (returns `Err` or panics) never reaches the publisher
//! or its sibling listeners: the failure is wrapped in a [`ListenerError`] and
//! delivered to the error channel instead.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::models::Param;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    Connected,
    Disconnected,
    HostConnected,
    HostDisconnected,
    NetworkConnected,
    NetworkDisconnected,
    /// A configured task, published under its own name.
    Task(String),
}

impl EventName {
    pub fn task(name: impl Into<String>) -> Self {
        EventName::Task(name.into())
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventName::Connected => write!(f, "connected"),
            EventName::Disconnected => write!(f, "disconnected"),
            EventName::HostConnected => write!(f, "hostConnected"),
            EventName::HostDisconnected => write!(f, "hostDisconnected"),
            EventName::NetworkConnected => write!(f, "networkConnected"),
            EventName::NetworkDisconnected => write!(f, "networkDisconnected"),
            EventName::Task(name) => write!(f, "{}", name),
        }
    }
}

pub type Listener<P> = Arc<dyn Fn(&P, Option<&Param>) -> anyhow::Result<()> + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(&ListenerError) + Send + Sync>;

/// A listener failure, re-published on the error channel.
#[derive(Error, Debug)]
#[error("listener for `{event}` failed: {cause:#}")]
pub struct ListenerError {
    pub event: EventName,
    pub cause: anyhow::Error,
}

struct Registrations<P> {
    listeners: HashMap<EventName, Vec<Listener<P>>>,
    error_listeners: Vec<ErrorListener>,
}

pub struct EventSink<P> {
    inner: Mutex<Registrations<P>>,
}

impl<P> Default for EventSink<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventSink<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registrations {
                listeners: HashMap::new(),
                error_listeners: Vec::new(),
            }),
        }
    }

    pub fn add_listener(&self, name: EventName, listener: Listener<P>) {
        self.inner.lock().listeners.entry(name).or_default().push(listener);
    }

    /// Registers a closure and returns the handle needed to remove it again.
    pub fn on<F>(&self, name: EventName, f: F) -> Listener<P>
    where
        F: Fn(&P, Option<&Param>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener: Listener<P> = Arc::new(f);
        self.add_listener(name, Arc::clone(&listener));
        listener
    }

    /// Removes one registration of `listener` under `name`, matched by identity.
    pub fn remove_listener(&self, name: &EventName, listener: &Listener<P>) -> bool {
        let mut inner = self.inner.lock();
        let Some(listeners) = inner.listeners.get_mut(name) else {
            return false;
        };
        let Some(index) = listeners
            .iter()
            .position(|l| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)))
        else {
            return false;
        };
        listeners.remove(index);
        if listeners.is_empty() {
            inner.listeners.remove(name);
        }
        true
    }

    pub fn on_error<F>(&self, f: F) -> ErrorListener
    where
        F: Fn(&ListenerError) + Send + Sync + 'static,
    {
        let listener: ErrorListener = Arc::new(f);
        self.inner.lock().error_listeners.push(Arc::clone(&listener));
        listener
    }

    pub fn remove_all_listeners(&self) {
        let mut inner = self.inner.lock();
        inner.listeners.clear();
        inner.error_listeners.clear();
    }

    pub fn listener_count(&self, name: &EventName) -> usize {
        self.inner.lock().listeners.get(name).map_or(0, Vec::len)
    }

    pub fn error_listener_count(&self) -> usize {
        self.inner.lock().error_listeners.len()
    }

    pub fn emit(&self, name: &EventName, payload: &P, param: Option<&Param>) {
        // Snapshot so listeners may subscribe, unsubscribe or emit re-entrantly.
        let listeners = match self.inner.lock().listeners.get(name) {
            Some(listeners) => listeners.clone(),
            None => return,
        };

        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(payload, param)));
            let cause = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(panic) => anyhow::anyhow!("listener panicked: {}", panic_message(&*panic)),
            };
            self.report(ListenerError {
                event: name.clone(),
                cause,
            });
        }
    }

    fn report(&self, failure: ListenerError) {
        let error_listeners = self.inner.lock().error_listeners.clone();
        if error_listeners.is_empty() {
            error!(event = %failure.event, "Unhandled listener failure: {:#}", failure.cause);
            return;
        }
        for listener in error_listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&failure))).is_err() {
                error!(event = %failure.event, "Error listener panicked");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(sink: &EventSink<u32>, name: EventName) -> (Arc<AtomicUsize>, Listener<u32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let listener = sink.on(name, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, listener)
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let sink = EventSink::<u32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let order = Arc::clone(&order);
            sink.on(EventName::Connected, move |payload, _| {
                order.lock().push((id, *payload));
                Ok(())
            });
        }

        sink.emit(&EventName::Connected, &7, None);
        assert_eq!(*order.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn test_listeners_may_modify_and_emit_on_the_same_sink() {
        let sink = Arc::new(EventSink::<u32>::new());
        let late = Arc::new(AtomicUsize::new(0));
        let removable: Arc<Mutex<Option<Listener<u32>>>> = Arc::new(Mutex::new(None));
        let (nested, _) = counter(&sink, EventName::Disconnected);

        let weak = Arc::downgrade(&sink);
        let (l, r) = (Arc::clone(&late), Arc::clone(&removable));
        sink.on(EventName::Connected, move |payload, _| {
            let Some(sink) = weak.upgrade() else {
                return Ok(());
            };
            if *payload == 1 {
                let l = Arc::clone(&l);
                sink.on(EventName::Connected, move |_, _| {
                    l.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                if let Some(listener) = r.lock().take() {
                    assert!(sink.remove_listener(&EventName::Connected, &listener));
                }
                sink.emit(&EventName::Disconnected, payload, None);
            }
            Ok(())
        });
        let (removed, listener) = counter(&sink, EventName::Connected);
        *removable.lock() = Some(listener);

        sink.emit(&EventName::Connected, &1, None);
        assert_eq!(late.load(Ordering::SeqCst), 0);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(nested.load(Ordering::SeqCst), 1);

        sink.emit(&EventName::Connected, &2, None);
        assert_eq!(late.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.listener_count(&EventName::Connected), 2);
    }

    #[test]
    fn test_param_is_passed_through() {
        let sink = EventSink::<u32>::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        sink.on(EventName::task("wake"), move |_, param| {
            *s.lock() = param.cloned();
            Ok(())
        });

        let mut param = Param::new();
        param.insert("mac".into(), serde_json::json!("00:11:22:33:44:55"));
        sink.emit(&EventName::task("wake"), &1, Some(&param));

        assert_eq!(*seen.lock(), Some(param));
    }

    #[test]
    fn test_remove_listener_only_affects_given_name() {
        let sink = EventSink::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let listener: Listener<u32> = Arc::new(move |_: &u32, _: Option<&Param>| -> anyhow::Result<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        sink.add_listener(EventName::Connected, Arc::clone(&listener));
        sink.add_listener(EventName::Disconnected, Arc::clone(&listener));

        assert!(sink.remove_listener(&EventName::Connected, &listener));
        assert!(!sink.remove_listener(&EventName::Connected, &listener));

        sink.emit(&EventName::Connected, &0, None);
        sink.emit(&EventName::Disconnected, &0, None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sink.listener_count(&EventName::Connected), 0);
        assert_eq!(sink.listener_count(&EventName::Disconnected), 1);
    }

    #[test]
    fn test_remove_listener_matches_identity_not_behaviour() {
        let sink = EventSink::<u32>::new();
        let (_, first) = counter(&sink, EventName::Connected);
        let lookalike: Listener<u32> = Arc::new(|_: &u32, _: Option<&Param>| -> anyhow::Result<()> { Ok(()) });

        assert!(!sink.remove_listener(&EventName::Connected, &lookalike));
        assert!(sink.remove_listener(&EventName::Connected, &first));
    }

    #[test]
    fn test_failing_listener_is_isolated_and_reported() {
        let sink = EventSink::<u32>::new();
        let (before, _) = counter(&sink, EventName::Connected);
        sink.on(EventName::Connected, |_, _| Err(anyhow::anyhow!("boom")));
        let (after, _) = counter(&sink, EventName::Connected);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&errors);
        sink.on_error(move |failure| {
            e.lock().push((failure.event.clone(), failure.cause.to_string()));
        });

        sink.emit(&EventName::Connected, &1, None);

        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(*errors.lock(), vec![(EventName::Connected, "boom".to_string())]);
    }

    #[test]
    fn test_panicking_listener_does_not_reach_publisher() {
        let sink = EventSink::<u32>::new();
        sink.on(EventName::Disconnected, |_, _| panic!("listener exploded"));
        let (after, _) = counter(&sink, EventName::Disconnected);

        let errors = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        sink.on_error(move |failure| {
            assert!(failure.cause.to_string().contains("listener exploded"));
            e.fetch_add(1, Ordering::SeqCst);
        });

        sink.emit(&EventName::Disconnected, &1, None);

        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_all_listeners() {
        let sink = EventSink::<u32>::new();
        counter(&sink, EventName::Connected);
        counter(&sink, EventName::task("a"));
        sink.on_error(|_| {});

        sink.remove_all_listeners();

        assert_eq!(sink.listener_count(&EventName::Connected), 0);
        assert_eq!(sink.listener_count(&EventName::task("a")), 0);
        assert_eq!(sink.error_listener_count(), 0);
    }

    #[test]
    fn test_stable_event_names() {
        assert_eq!(EventName::HostConnected.to_string(), "hostConnected");
        assert_eq!(EventName::NetworkDisconnected.to_string(), "networkDisconnected");
        assert_eq!(EventName::task("wakeNas").to_string(), "wakeNas");
    }
}
