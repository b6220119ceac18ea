//! Shared Containers
//!
//! Objects and arrays have reference identity. Cloning an [`Object`] or an
//! [`Array`] clones the `Arc<RwLock<_>>` handle, not the contents. The
//! digest engine relies on this: a watcher with reference equality sees a
//! mutated object as unchanged, while a `value_eq` watcher deep-compares it.
//!
//! An object may carry a prototype link. Reads (`get`, `has`) walk the
//! chain; writes always land on the object itself. Non-isolated child scopes
//! use this to fall through to their parent's properties.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::Value;
use crate::error::{Error, Result};

#[derive(Default)]
struct ObjectData {
    props: IndexMap<String, Value>,
    proto: Option<Object>,
}

/// A shared, ordered key/value container.
#[derive(Clone, Default)]
pub struct Object {
    data: Arc<RwLock<ObjectData>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty object whose reads fall through to `proto`.
    pub fn with_proto(proto: &Object) -> Self {
        Self {
            data: Arc::new(RwLock::new(ObjectData {
                props: IndexMap::new(),
                proto: Some(proto.clone()),
            })),
        }
    }

    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let props = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            data: Arc::new(RwLock::new(ObjectData { props, proto: None })),
        }
    }

    pub fn proto(&self) -> Option<Object> {
        self.data.read().proto.clone()
    }

    /// Read a property, walking the prototype chain.
    pub fn get(&self, key: &str) -> Value {
        let mut current = self.clone();
        loop {
            let next = {
                let data = current.data.read();
                if let Some(value) = data.props.get(key) {
                    return value.clone();
                }
                data.proto.clone()
            };
            match next {
                Some(proto) => current = proto,
                None => return Value::Undefined,
            }
        }
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.data.read().props.get(key).cloned()
    }

    /// Whether the key is present on the object or anywhere on its chain.
    pub fn has(&self, key: &str) -> bool {
        let mut current = self.clone();
        loop {
            let next = {
                let data = current.data.read();
                if data.props.contains_key(key) {
                    return true;
                }
                data.proto.clone()
            };
            match next {
                Some(proto) => current = proto,
                None => return false,
            }
        }
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.data.read().props.contains_key(key)
    }

    /// Write an own property. Shadows any inherited property of that name.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.write().props.insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.write().props.shift_remove(key)
    }

    /// Own keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.data.read().props.keys().cloned().collect()
    }

    /// Own entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.data
            .read()
            .props
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.write().props.clear();
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries();
        f.debug_map()
            .entries(entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

/// How far past its current end a single write may grow an [`Array`].
pub const MAX_ARRAY_GROWTH: usize = 1 << 16;

/// A shared, growable list of values.
#[derive(Clone, Default)]
pub struct Array {
    items: Arc<RwLock<Vec<Value>>>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn get(&self, index: usize) -> Value {
        self.items
            .read()
            .get(index)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    /// Write an element, padding with `undefined` when past the end.
    /// Writes more than [`MAX_ARRAY_GROWTH`] past the end are refused.
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        let mut items = self.items.write();
        if index >= items.len() {
            let len = index
                .checked_add(1)
                .filter(|&len| len - items.len() <= MAX_ARRAY_GROWTH)
                .ok_or_else(|| growth_error(items.len(), index))?;
            items.resize(len, Value::Undefined);
        }
        items[index] = value;
        Ok(())
    }

    pub fn push(&self, value: Value) {
        self.items.write().push(value);
    }

    pub fn pop(&self) -> Option<Value> {
        self.items.write().pop()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncate or pad with `undefined`. Growing by more than
    /// [`MAX_ARRAY_GROWTH`] is refused.
    pub fn set_len(&self, len: usize) -> Result<()> {
        let mut items = self.items.write();
        if len > items.len() && len - items.len() > MAX_ARRAY_GROWTH {
            return Err(growth_error(items.len(), len));
        }
        items.resize(len, Value::Undefined);
        Ok(())
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

fn growth_error(len: usize, requested: usize) -> Error {
    Error::Eval(format!(
        "cannot grow an array of length {len} to cover index {requested}"
    ))
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec().iter()).finish()
    }
}
