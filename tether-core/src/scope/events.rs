//! Scope Events
//!
//! Named events travel along the scope tree: `emit` walks up the parent
//! chain and can be stopped, `broadcast` visits the scope and all of its
//! descendants and cannot.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::Scope;
use crate::error::Result;
use crate::value::Value;

/// Signature of an event listener: `(event, args)`.
pub type EventListenerFn = dyn Fn(&ScopeEvent, &[Value]) -> Result<()> + Send + Sync;

pub(crate) struct EventListener {
    func: Box<EventListenerFn>,
    active: AtomicBool,
}

/// An event in flight, and its outcome once dispatch returns.
pub struct ScopeEvent {
    name: String,
    target_scope: Scope,
    current_scope: RefCell<Option<Scope>>,
    stoppable: bool,
    stopped: Cell<bool>,
    default_prevented: Cell<bool>,
}

impl ScopeEvent {
    fn new(name: &str, target_scope: &Scope, stoppable: bool) -> Self {
        Self {
            name: name.to_string(),
            target_scope: target_scope.clone(),
            current_scope: RefCell::new(None),
            stoppable,
            stopped: Cell::new(false),
            default_prevented: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the event was emitted or broadcast on.
    pub fn target_scope(&self) -> &Scope {
        &self.target_scope
    }

    /// The scope whose listeners are running. `None` after dispatch.
    pub fn current_scope(&self) -> Option<Scope> {
        self.current_scope.borrow().clone()
    }

    /// Keep an emitted event from reaching further ancestors. Listeners on
    /// the current scope still run. Has no effect on broadcasts.
    pub fn stop_propagation(&self) {
        if self.stoppable {
            self.stopped.set(true);
        }
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    fn enter(&self, scope: &Scope) {
        *self.current_scope.borrow_mut() = Some(scope.clone());
    }

    fn finish(&self) {
        *self.current_scope.borrow_mut() = None;
    }
}

impl fmt::Debug for ScopeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeEvent")
            .field("name", &self.name)
            .field("target_scope", &self.target_scope.id())
            .field("default_prevented", &self.default_prevented())
            .finish_non_exhaustive()
    }
}

/// Deregisters an event listener. Removal is idempotent.
#[derive(Clone)]
pub struct ListenerHandle {
    remove: Arc<dyn Fn() + Send + Sync>,
}

impl ListenerHandle {
    pub fn remove(&self) {
        (self.remove)();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ListenerHandle")
    }
}

impl Scope {
    /// Listen for `name` on this scope.
    pub fn on<F>(&self, name: &str, listener: F) -> ListenerHandle
    where
        F: Fn(&ScopeEvent, &[Value]) -> Result<()> + Send + Sync + 'static,
    {
        let listener = Arc::new(EventListener {
            func: Box::new(listener),
            active: AtomicBool::new(true),
        });
        if !self.is_destroyed() {
            self.inner
                .listeners
                .lock()
                .entry(name.to_string())
                .or_default()
                .push(Arc::clone(&listener));
        }

        let scope = Arc::downgrade(&self.inner);
        let name = name.to_string();
        ListenerHandle {
            remove: Arc::new(move || {
                listener.active.store(false, Ordering::Release);
                if let Some(inner) = scope.upgrade() {
                    let mut listeners = inner.listeners.lock();
                    if let Some(registered) = listeners.get_mut(&name) {
                        registered.retain(|l| !Arc::ptr_eq(l, &listener));
                    }
                }
            }),
        }
    }

    /// Dispatch `name` on this scope and then on each ancestor, until a
    /// listener stops propagation.
    pub fn emit(&self, name: &str, args: &[Value]) -> ScopeEvent {
        let event = ScopeEvent::new(name, self, true);
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            event.enter(&scope);
            scope.dispatch(&event, args);
            if event.is_stopped() {
                break;
            }
            current = scope.parent();
        }
        event.finish();
        event
    }

    /// Dispatch `name` on this scope and every descendant, parents first.
    pub fn broadcast(&self, name: &str, args: &[Value]) -> ScopeEvent {
        let event = ScopeEvent::new(name, self, false);
        self.every_scope(&mut |scope: &Scope| {
            event.enter(scope);
            scope.dispatch(&event, args);
            true
        });
        event.finish();
        event
    }

    fn dispatch(&self, event: &ScopeEvent, args: &[Value]) {
        let snapshot = self.inner.listeners.lock().get(event.name()).cloned();
        let Some(listeners) = snapshot else {
            return;
        };
        trace!(
            scope = self.id(),
            event = event.name(),
            listeners = listeners.len(),
            "dispatching event"
        );
        for listener in listeners {
            if !listener.active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(err) = (listener.func)(event, args) {
                self.handle_error(err);
            }
        }
    }

    pub(crate) fn clear_listeners(&self) {
        self.inner.listeners.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI32;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::Error;

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn(&ScopeEvent, &[Value]) -> Result<()> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_: &ScopeEvent, _: &[Value]| {
            log.lock().push(tag.to_string());
            Ok(())
        }
    }

    #[test]
    fn listeners_receive_event_and_args() {
        let scope = Scope::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scope.on("someEvent", move |event, args| {
            sink.lock().push((event.name().to_string(), args.to_vec()));
            Ok(())
        });
        scope.emit("someEvent", &[Value::from("and"), Value::from(1)]);
        assert_eq!(
            *seen.lock(),
            vec![("someEvent".to_string(), vec![Value::from("and"), Value::from(1)])]
        );
    }

    #[test]
    fn emit_walks_up_and_stops() {
        let root = Scope::new();
        let parent = root.new_child(false);
        let child = parent.new_child(false);
        let log = Arc::new(Mutex::new(Vec::new()));
        root.on("evt", recorder(&log, "root"));
        parent.on("evt", recorder(&log, "parent"));
        child.on("evt", recorder(&log, "child"));

        child.emit("evt", &[]);
        assert_eq!(*log.lock(), ["child", "parent", "root"]);

        log.lock().clear();
        parent.on("evt", |event, _| {
            event.stop_propagation();
            Ok(())
        });
        child.emit("evt", &[]);
        assert_eq!(*log.lock(), ["child", "parent"]);
    }

    #[test]
    fn broadcast_reaches_descendants_and_ignores_stop() {
        let root = Scope::new();
        let child = root.new_child(false);
        let isolated = child.new_child(true);
        let sibling = root.new_child(false);
        let log = Arc::new(Mutex::new(Vec::new()));
        root.on("evt", |event, _| {
            event.stop_propagation();
            Ok(())
        });
        child.on("evt", recorder(&log, "child"));
        isolated.on("evt", recorder(&log, "isolated"));
        sibling.on("evt", recorder(&log, "sibling"));

        root.broadcast("evt", &[]);
        assert_eq!(*log.lock(), ["child", "isolated", "sibling"]);

        log.lock().clear();
        child.broadcast("evt", &[]);
        assert_eq!(*log.lock(), ["child", "isolated"]);
    }

    #[test]
    fn event_tracks_target_and_current_scope() {
        let root = Scope::new();
        let child = root.new_child(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        root.on("evt", move |event, _| {
            let current = event.current_scope().map(|s| s.id());
            sink.lock().push((event.target_scope().id(), current));
            Ok(())
        });
        let event = child.emit("evt", &[]);
        assert_eq!(*seen.lock(), vec![(child.id(), Some(root.id()))]);
        assert!(event.current_scope().is_none());
    }

    #[test]
    fn prevent_default_is_reported() {
        let scope = Scope::new();
        scope.on("evt", |event, _| {
            event.prevent_default();
            Ok(())
        });
        assert!(scope.emit("evt", &[]).default_prevented());
        assert!(scope.broadcast("evt", &[]).default_prevented());
        assert!(!scope.emit("other", &[]).default_prevented());
    }

    #[test]
    fn removing_a_listener_during_dispatch_skips_nobody() {
        let scope = Scope::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let own = Arc::clone(&slot);
        let first_log = Arc::clone(&log);
        let handle = scope.on("evt", move |_, _| {
            first_log.lock().push("first".to_string());
            if let Some(handle) = own.lock().take() {
                handle.remove();
            }
            Ok(())
        });
        *slot.lock() = Some(handle);
        scope.on("evt", recorder(&log, "second"));

        scope.emit("evt", &[]);
        scope.emit("evt", &[]);
        assert_eq!(*log.lock(), ["first", "second", "second"]);
    }

    #[test]
    fn listener_errors_are_contained() {
        let errors = Arc::new(AtomicI32::new(0));
        let counter = Arc::clone(&errors);
        let scope = Scope::builder()
            .exception_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        scope.on("evt", |_, _| Err(Error::callback("listener failed")));
        scope.on("evt", recorder(&log, "after"));

        scope.emit("evt", &[]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(*log.lock(), ["after"]);
    }

    #[test]
    fn destroy_broadcasts_and_clears_listeners() {
        let root = Scope::new();
        let child = root.new_child(false);
        let grandchild = child.new_child(false);
        let log = Arc::new(Mutex::new(Vec::new()));
        child.on("$destroy", recorder(&log, "child"));
        grandchild.on("$destroy", recorder(&log, "grandchild"));
        child.on("evt", recorder(&log, "evt"));

        child.destroy();
        assert_eq!(*log.lock(), ["child", "grandchild"]);

        child.emit("evt", &[]);
        child.destroy();
        assert_eq!(log.lock().len(), 2);
    }
}
