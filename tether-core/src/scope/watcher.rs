//! Watchers
//!
//! A watcher pairs a watch function with a listener. The digest loop calls
//! the watch function, compares the result with the value it recorded last
//! time, and calls the listener when they differ.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Scope;
use crate::error::Result;
use crate::value::Value;

/// Signature of a watch function.
pub type WatchFn = dyn Fn(&Scope) -> Result<Value> + Send + Sync;

/// Signature of a listener: `(new_value, old_value, scope)`.
pub type ListenerFn = dyn Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync;

/// Unique identifier for a watcher.
///
/// Ids come from a process-wide counter, so they are never reused and the
/// digest loop can remember the last dirty watcher without holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The recorded value of a watcher.
#[derive(Debug, Clone)]
pub(crate) enum Last {
    /// Not yet evaluated. Never equal to any value, `undefined` included.
    Initial,
    Value(Value),
}

pub(crate) struct Watcher {
    id: WatcherId,
    watch_fn: Box<WatchFn>,
    listener: Box<ListenerFn>,
    value_eq: bool,
    last: Mutex<Last>,
    active: AtomicBool,
}

/// A detected change: the new value and the value to report as old.
pub(crate) struct Change {
    pub new: Value,
    pub old: Value,
}

impl Watcher {
    pub(crate) fn new(watch_fn: Box<WatchFn>, listener: Box<ListenerFn>, value_eq: bool) -> Self {
        Self {
            id: WatcherId::next(),
            watch_fn,
            listener,
            value_eq,
            last: Mutex::new(Last::Initial),
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> WatcherId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Evaluate the watch function and record the result if it changed.
    ///
    /// On the first run the reported old value is the new value.
    pub(crate) fn check(&self, scope: &Scope) -> Result<Option<Change>> {
        let new = (self.watch_fn)(scope)?;
        let mut last = self.last.lock();
        let changed = match &*last {
            Last::Initial => true,
            Last::Value(old) if self.value_eq => !new.deep_eq(old),
            Last::Value(old) => !new.same(old),
        };
        if !changed {
            return Ok(None);
        }

        let stored = if self.value_eq {
            new.deep_clone()
        } else {
            new.clone()
        };
        let old = match std::mem::replace(&mut *last, Last::Value(stored)) {
            Last::Initial => new.clone(),
            Last::Value(old) => old,
        };
        Ok(Some(Change { new, old }))
    }

    pub(crate) fn notify(&self, change: &Change, scope: &Scope) -> Result<()> {
        (self.listener)(&change.new, &change.old, scope)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("value_eq", &self.value_eq)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Deregisters a watcher. Removal is idempotent, and dropping the handle
/// leaves the watcher registered.
#[derive(Clone)]
pub struct WatchHandle {
    remove: Arc<dyn Fn() + Send + Sync>,
}

impl WatchHandle {
    pub(crate) fn new<F>(remove: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            remove: Arc::new(remove),
        }
    }

    pub fn remove(&self) {
        (self.remove)();
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WatchHandle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn watcher_on(key: &'static str, value_eq: bool) -> Watcher {
        Watcher::new(
            Box::new(move |scope: &Scope| Ok(scope.get(key))),
            Box::new(|_: &Value, _: &Value, _: &Scope| Ok(())),
            value_eq,
        )
    }

    #[test]
    fn watcher_ids_are_unique() {
        let a = WatcherId::next();
        let b = WatcherId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn first_check_reports_new_as_old() {
        let scope = Scope::new();
        let watcher = watcher_on("missing", false);
        let change = watcher.check(&scope).unwrap().expect("first run is a change");
        assert!(change.new.is_undefined());
        assert!(change.old.is_undefined());
        assert!(watcher.check(&scope).unwrap().is_none());
    }

    #[test]
    fn reference_watchers_ignore_in_place_mutation() {
        let scope = Scope::new();
        scope.set("items", Value::array(vec![Value::from(1)]));
        let watcher = watcher_on("items", false);
        watcher.check(&scope).unwrap();

        scope.get("items").as_array().unwrap().push(Value::from(2));
        assert!(watcher.check(&scope).unwrap().is_none());
    }

    #[test]
    fn value_watchers_see_in_place_mutation() {
        let scope = Scope::new();
        scope.set("items", Value::array(vec![Value::from(1)]));
        let watcher = watcher_on("items", true);
        watcher.check(&scope).unwrap();

        scope.get("items").as_array().unwrap().push(Value::from(2));
        let change = watcher.check(&scope).unwrap().expect("mutation is a change");
        assert_eq!(change.old, Value::array(vec![Value::from(1)]));
    }

    #[test]
    fn nan_is_stable() {
        let scope = Scope::new();
        scope.set("n", Value::from(f64::NAN));
        let watcher = watcher_on("n", false);
        assert!(watcher.check(&scope).unwrap().is_some());
        assert!(watcher.check(&scope).unwrap().is_none());
    }

    #[test]
    fn handle_runs_its_removal() {
        let count = Arc::new(AtomicI32::new(0));
        let counter = count.clone();
        let handle = WatchHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.remove();
        handle.clone().remove();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
