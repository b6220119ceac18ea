//! Tether Core
//!
//! This crate provides the runtime behind Tether's data bindings. It
//! implements:
//!
//! - An expression language (lexer, parser, static analysis, interpreter)
//!   with security guards on every dereference and call
//! - Scope trees with prototypal property inheritance
//! - The dirty-checking digest loop, with async, apply and post-digest queues
//! - Group, collection and expression watches
//! - Scope events
//!
//! # Architecture
//!
//! - `value`: the dynamic values expressions and watchers work with
//! - `expr`: expression compilation and evaluation
//! - `scope`: the scope tree and digest engine
//! - `config`: runtime configuration
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use tether_core::{Scope, Value};
//!
//! let scope = Scope::new();
//! scope.set("a", 2);
//! scope.set("b", 3);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! scope
//!     .watch_expr("a + b", move |new, _, _| {
//!         sink.lock().push(new.clone());
//!         Ok(())
//!     }, false)
//!     .unwrap();
//!
//! scope.digest().unwrap();
//! assert_eq!(*seen.lock(), vec![Value::from(5)]);
//! ```

pub mod config;
pub mod error;
pub mod expr;
pub mod scope;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{Error, Phase, Result};
pub use expr::{Expression, Filter, FilterLookup, FilterRegistry, Parser};
pub use scope::{
    Defer, ListenerHandle, ManualDefer, RootScopeBuilder, Scope, ScopeEvent, TokioDefer,
    WatchHandle,
};
pub use value::{Array, Function, Object, Value};
