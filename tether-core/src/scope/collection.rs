//! Group and Collection Watches
//!
//! `watch_group` funnels several watch functions into one listener call per
//! digest. `watch_collection` watches the shallow contents of an array-like
//! value instead of its identity, without the cost of a deep comparison.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Scope, WatchFn, WatchHandle};
use crate::error::Result;
use crate::value::{Array, Value};

struct GroupState {
    new_values: Array,
    old_values: Array,
    first_run: AtomicBool,
    scheduled: AtomicBool,
}

struct CollectionState {
    /// Shadow copy used for change detection.
    shadow: Value,
    change_count: u64,
    /// The value the watch function returned last.
    latest: Value,
    /// Shallow copy of the value as of the previous listener call.
    previous: Value,
    first_run: bool,
}

impl Scope {
    /// Watch several values with one listener. The listener receives arrays
    /// of the current and previous values, and runs at most once per digest
    /// however many inputs changed. On the first call the same array is
    /// passed as both.
    pub fn watch_group<L>(&self, watch_fns: Vec<Box<WatchFn>>, listener: L) -> WatchHandle
    where
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);

        if watch_fns.is_empty() {
            let should_call = Arc::new(AtomicBool::new(true));
            let flag = Arc::clone(&should_call);
            self.eval_async(move |scope| {
                if flag.load(Ordering::Acquire) {
                    let empty = Value::array(Vec::new());
                    listener(&empty, &empty, scope)?;
                }
                Ok(())
            });
            return WatchHandle::new(move || should_call.store(false, Ordering::Release));
        }

        let state = Arc::new(GroupState {
            new_values: Array::from_vec(vec![Value::Undefined; watch_fns.len()]),
            old_values: Array::from_vec(vec![Value::Undefined; watch_fns.len()]),
            first_run: AtomicBool::new(true),
            scheduled: AtomicBool::new(false),
        });

        let handles: Vec<WatchHandle> = watch_fns
            .into_iter()
            .enumerate()
            .map(|(index, watch_fn)| {
                let state = Arc::clone(&state);
                let listener = Arc::clone(&listener);
                self.watch(
                    move |scope| watch_fn(scope),
                    move |new, old, scope| {
                        state.new_values.set(index, new.clone())?;
                        state.old_values.set(index, old.clone())?;
                        if !state.scheduled.swap(true, Ordering::AcqRel) {
                            let state = Arc::clone(&state);
                            let listener = Arc::clone(&listener);
                            scope.eval_async(move |scope| {
                                let new_values = Value::Array(state.new_values.clone());
                                let result = if state.first_run.swap(false, Ordering::AcqRel) {
                                    listener(&new_values, &new_values, scope)
                                } else {
                                    let old_values = Value::Array(state.old_values.clone());
                                    listener(&new_values, &old_values, scope)
                                };
                                state.scheduled.store(false, Ordering::Release);
                                result
                            });
                        }
                        Ok(())
                    },
                    false,
                )
            })
            .collect();

        WatchHandle::new(move || {
            for handle in &handles {
                handle.remove();
            }
        })
    }

    /// Watch the shallow contents of a collection.
    ///
    /// For array-like values (arrays, and objects with a numeric `length`)
    /// a change is a switch to array-like, a length change or a different
    /// element at any index. Other values are compared by identity. `NaN`
    /// always equals `NaN`.
    ///
    /// The listener receives the value itself and a shallow copy of it as of
    /// the previous listener call (the value itself on the first call).
    pub fn watch_collection<W, L>(&self, watch_fn: W, listener: L) -> WatchHandle
    where
        W: Fn(&Scope) -> Result<Value> + Send + Sync + 'static,
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let state = Arc::new(Mutex::new(CollectionState {
            shadow: Value::Undefined,
            change_count: 0,
            latest: Value::Undefined,
            previous: Value::Undefined,
            first_run: true,
        }));

        let watch_state = Arc::clone(&state);
        let internal_watch = move |scope: &Scope| -> Result<Value> {
            let new_value = watch_fn(scope)?;
            let mut state = watch_state.lock();
            detect_changes(&mut state, &new_value);
            state.latest = new_value;
            Ok(Value::from(state.change_count as f64))
        };

        let internal_listener = move |_: &Value, _: &Value, scope: &Scope| -> Result<()> {
            let (latest, old) = {
                let mut state = state.lock();
                let latest = state.latest.clone();
                let old = if state.first_run {
                    state.first_run = false;
                    latest.clone()
                } else {
                    state.previous.clone()
                };
                state.previous = latest.shallow_clone();
                (latest, old)
            };
            listener(&latest, &old, scope)
        };

        self.watch(internal_watch, internal_listener, false)
    }
}

fn detect_changes(state: &mut CollectionState, new_value: &Value) {
    if !new_value.is_array_like() {
        if !new_value.same(&state.shadow) {
            state.change_count += 1;
        }
        state.shadow = new_value.clone();
        return;
    }

    let previous = match &state.shadow {
        Value::Array(shadow) => Some(shadow.to_vec()),
        _ => None,
    };
    let items = new_value.array_like_items();
    match previous {
        None => state.change_count += 1,
        Some(previous) => {
            if items.len() != previous.len() {
                state.change_count += 1;
            }
            for (index, item) in items.iter().enumerate() {
                let unchanged = previous.get(index).is_some_and(|old| item.same(old));
                if !unchanged {
                    state.change_count += 1;
                }
            }
        }
    }
    state.shadow = Value::Array(Array::from_vec(items));
}
