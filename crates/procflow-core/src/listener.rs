//! Lifecycle listener bus.
//!
//! Listeners are typed by payload (`TaskEvent`, `InstanceEvent`,
//! `ReminderEvent`). `ListenerBus::notify` takes a supplier closure so the
//! payload is only built when at least one listener of that type exists.
//! Dispatch is synchronous and in registration order; the first failing
//! listener stops the chain and its error propagates to the caller.

use std::sync::Arc;

use procflow_types::event::{InstanceEvent, ReminderEvent, TaskEvent};

use crate::error::ListenerError;

/// Observer of one payload type.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E) -> Result<(), ListenerError>;
}

/// Listener of task lifecycle events.
pub type TaskListener = dyn Listener<TaskEvent>;
/// Listener of instance lifecycle events.
pub type InstanceListener = dyn Listener<InstanceEvent>;
/// Listener of reminder events.
pub type ReminderListener = dyn Listener<ReminderEvent>;

/// Payload types the bus can dispatch.
pub trait LifecycleEvent: Sized + 'static {
    fn listeners(bus: &ListenerBus) -> &[Arc<dyn Listener<Self>>];
    fn listeners_mut(bus: &mut ListenerBus) -> &mut Vec<Arc<dyn Listener<Self>>>;
}

/// Registered listeners, grouped by payload type.
#[derive(Clone, Default)]
pub struct ListenerBus {
    task: Vec<Arc<TaskListener>>,
    instance: Vec<Arc<InstanceListener>>,
    reminder: Vec<Arc<ReminderListener>>,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for payload type `E`.
    pub fn register<E: LifecycleEvent>(&mut self, listener: Arc<dyn Listener<E>>) {
        E::listeners_mut(self).push(listener);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<E: LifecycleEvent>(mut self, listener: Arc<dyn Listener<E>>) -> Self {
        self.register(listener);
        self
    }

    pub fn has_listeners<E: LifecycleEvent>(&self) -> bool {
        !E::listeners(self).is_empty()
    }

    /// Dispatch the payload produced by `supplier` to every listener of `E`.
    ///
    /// `supplier` is not called when no listener of `E` is registered.
    pub fn notify<E, F>(&self, supplier: F) -> Result<(), ListenerError>
    where
        E: LifecycleEvent,
        F: FnOnce() -> E,
    {
        let listeners = E::listeners(self);
        if listeners.is_empty() {
            return Ok(());
        }
        let event = supplier();
        for listener in listeners {
            listener.on_event(&event)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBus")
            .field("task", &self.task.len())
            .field("instance", &self.instance.len())
            .field("reminder", &self.reminder.len())
            .finish()
    }
}

impl LifecycleEvent for TaskEvent {
    fn listeners(bus: &ListenerBus) -> &[Arc<dyn Listener<Self>>] {
        &bus.task
    }

    fn listeners_mut(bus: &mut ListenerBus) -> &mut Vec<Arc<dyn Listener<Self>>> {
        &mut bus.task
    }
}

impl LifecycleEvent for InstanceEvent {
    fn listeners(bus: &ListenerBus) -> &[Arc<dyn Listener<Self>>] {
        &bus.instance
    }

    fn listeners_mut(bus: &mut ListenerBus) -> &mut Vec<Arc<dyn Listener<Self>>> {
        &mut bus.instance
    }
}

impl LifecycleEvent for ReminderEvent {
    fn listeners(bus: &ListenerBus) -> &[Arc<dyn Listener<Self>>] {
        &bus.reminder
    }

    fn listeners_mut(bus: &mut ListenerBus) -> &mut Vec<Arc<dyn Listener<Self>>> {
        &mut bus.reminder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records the order in which listeners ran.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl Listener<InstanceEvent> for Recorder {
        fn on_event(&self, _event: &InstanceEvent) -> Result<(), ListenerError> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                Err(ListenerError::new(format!("{} failed", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn started() -> InstanceEvent {
        InstanceEvent::Started {
            instance_id: Uuid::nil(),
            definition_id: "p".to_string(),
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    ) -> Arc<dyn Listener<InstanceEvent>> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            fail,
        })
    }

    #[test]
    fn supplier_not_called_without_listeners() {
        let bus = ListenerBus::new();
        let mut called = false;
        bus.notify(|| {
            called = true;
            started()
        })
        .unwrap();
        assert!(!called);
        assert!(!bus.has_listeners::<InstanceEvent>());
    }

    #[test]
    fn supplier_not_called_for_other_payload_types() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = ListenerBus::new().with(recorder("a", &log, false));
        let mut called = false;
        bus.notify(|| {
            called = true;
            ReminderEvent {
                instance_id: Uuid::nil(),
                definition_id: "p".to_string(),
                node_id: None,
                task_ids: vec![],
                occurrence: chrono::Utc::now(),
                fired_at: chrono::Utc::now(),
            }
        })
        .unwrap();
        assert!(!called);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = ListenerBus::new()
            .with(recorder("first", &log, false))
            .with(recorder("second", &log, false));
        bus.notify(started).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn failing_listener_aborts_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = ListenerBus::new()
            .with(recorder("first", &log, true))
            .with(recorder("second", &log, false));
        let err = bus.notify(started).unwrap_err();
        assert_eq!(err.to_string(), "first failed");
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }
}
