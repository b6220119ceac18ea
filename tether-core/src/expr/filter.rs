//! Filters
//!
//! A filter is a named function applied with the pipe syntax,
//! `input | name:arg1:arg2`. The compiler resolves every filter name an
//! expression uses through a [`FilterLookup`] once, at compile time, and the
//! expression keeps the resolved filters for its lifetime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::value::Value;

/// Signature of a filter: the piped input followed by the extra arguments.
pub type FilterFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

#[derive(Clone)]
pub struct Filter {
    func: Arc<FilterFn>,
    stateful: bool,
}

impl Filter {
    /// A pure filter. Its output depends only on its arguments, which lets
    /// the analysis pass watch the arguments instead of the filter call.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            stateful: false,
        }
    }

    /// A filter whose output may change between calls with equal arguments.
    pub fn stateful<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            stateful: true,
        }
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    pub fn apply(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("stateful", &self.stateful)
            .finish_non_exhaustive()
    }
}

/// Resolves filter names to filters.
pub trait FilterLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Filter>;
}

impl<F> FilterLookup for F
where
    F: Fn(&str) -> Option<Filter> + Send + Sync,
{
    fn lookup(&self, name: &str) -> Option<Filter> {
        self(name)
    }
}

/// A mutable name-to-filter table.
///
/// Registering after an expression was compiled does not affect that
/// expression; it already holds its resolved filters.
#[derive(Default)]
pub struct FilterRegistry {
    filters: RwLock<HashMap<String, Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a filter.
    pub fn register(&self, name: impl Into<String>, filter: Filter) {
        self.filters.write().insert(name.into(), filter);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(self, name: impl Into<String>, filter: Filter) -> Self {
        self.register(name, filter);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }
}

impl FilterLookup for FilterRegistry {
    fn lookup(&self, name: &str) -> Option<Filter> {
        self.filters.read().get(name).cloned()
    }
}
