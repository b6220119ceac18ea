//! Scopes
//!
//! A scope is a node in the binding-context tree. Each scope owns a
//! property object (the context expressions are evaluated against), a list
//! of watchers, event listeners and its children. Everything that must be
//! coordinated across the tree (the current phase, the task queues, the
//! last dirty watcher) lives in one [`TreeState`] shared by every scope of
//! the tree.
//!
//! # Inheritance
//!
//! A non-isolated child's property object has its parent's object as
//! prototype: reads fall through to the parent, writes land on the child.
//! An isolated child starts with an empty object of its own and sees
//! nothing of its parent's properties, but still shares the tree state.
//!
//! # Ownership
//!
//! Parents own their children; children point back weakly. Keep the root
//! alive for as long as the tree is in use.

mod collection;
mod delegate;
mod digest;
mod events;
mod queue;
mod watcher;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

pub use events::{EventListenerFn, ListenerHandle, ScopeEvent};
pub use queue::{Defer, DeferredJob, ManualDefer, PostDigestTask, Task, TaskHandle, TokioDefer};
pub use watcher::{ListenerFn, WatchFn, WatchHandle, WatcherId};

use crate::config::RuntimeConfig;
use crate::error::{Error, Phase, Result};
use crate::expr::{FilterLookup, FilterRegistry, Parser};
use crate::value::{Object, Value};
use events::EventListener;
use queue::{ScopedTask, TaskQueue};
use watcher::Watcher;

/// Receives errors raised by user callbacks.
pub type ExceptionHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// State shared by every scope of one tree.
pub(crate) struct TreeState {
    root: Weak<ScopeInner>,
    phase: Mutex<Option<Phase>>,
    last_dirty: Mutex<Option<WatcherId>>,
    async_queue: TaskQueue<ScopedTask>,
    apply_queue: TaskQueue<ScopedTask>,
    apply_flush: Mutex<Option<TaskHandle>>,
    post_digest: TaskQueue<PostDigestTask>,
    defer: Arc<dyn Defer>,
    parser: Arc<Parser>,
    config: RuntimeConfig,
    exception_handler: ExceptionHandler,
}

struct ScopeInner {
    id: u64,
    data: Object,
    isolated: bool,
    parent: Option<Weak<ScopeInner>>,
    children: Mutex<Vec<Scope>>,
    /// `None` once the scope is destroyed.
    watchers: Mutex<Option<Vec<Arc<Watcher>>>>,
    listeners: Mutex<HashMap<String, Vec<Arc<EventListener>>>>,
    destroyed: AtomicBool,
    tree: Arc<TreeState>,
}

fn next_scope_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A handle to a scope. Clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

/// Builds the root scope of a new tree.
pub struct RootScopeBuilder {
    config: RuntimeConfig,
    defer: Option<Arc<dyn Defer>>,
    parser: Option<Arc<Parser>>,
    exception_handler: Option<ExceptionHandler>,
}

impl RootScopeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            defer: None,
            parser: None,
            exception_handler: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Where deferred digests and apply flushes run. Defaults to a
    /// [`ManualDefer`] nobody flushes.
    pub fn defer(mut self, defer: impl Defer + 'static) -> Self {
        self.defer = Some(Arc::new(defer));
        self
    }

    /// Filters available to expressions compiled by this tree.
    pub fn filters(mut self, filters: impl FilterLookup + 'static) -> Self {
        self.parser = Some(Arc::new(Parser::with_filters(filters)));
        self
    }

    /// Share an existing parser (and its cache).
    pub fn parser(mut self, parser: Arc<Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Scope> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> Scope {
        let defer = self
            .defer
            .unwrap_or_else(|| Arc::new(ManualDefer::new()));
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(Parser::with_filters(FilterRegistry::new())));
        let exception_handler = self.exception_handler.unwrap_or_else(|| {
            Arc::new(|err: &Error| error!(error = %err, "uncaught error in scope callback"))
        });
        let config = self.config;

        let inner = Arc::new_cyclic(|root| ScopeInner {
            id: next_scope_id(),
            data: Object::new(),
            isolated: false,
            parent: None,
            children: Mutex::new(Vec::new()),
            watchers: Mutex::new(Some(Vec::new())),
            listeners: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            tree: Arc::new(TreeState {
                root: root.clone(),
                phase: Mutex::new(None),
                last_dirty: Mutex::new(None),
                async_queue: TaskQueue::new(),
                apply_queue: TaskQueue::new(),
                apply_flush: Mutex::new(None),
                post_digest: TaskQueue::new(),
                defer,
                parser,
                config,
                exception_handler,
            }),
        });
        Scope { inner }
    }
}

impl Default for RootScopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A root scope with default configuration, no filters and manual
    /// deferral.
    pub fn new() -> Self {
        RootScopeBuilder::new().assemble()
    }

    pub fn builder() -> RootScopeBuilder {
        RootScopeBuilder::new()
    }

    fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn tree(&self) -> &TreeState {
        &self.inner.tree
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Scope::from_inner)
    }

    /// The root of this scope's tree. Falls back to `self` if the root was
    /// dropped.
    pub fn root(&self) -> Scope {
        self.tree()
            .root
            .upgrade()
            .map(Scope::from_inner)
            .unwrap_or_else(|| self.clone())
    }

    pub fn children(&self) -> Vec<Scope> {
        self.inner.children.lock().clone()
    }

    /// The scope's property object as a value, the context its expressions
    /// evaluate against.
    pub fn data(&self) -> Value {
        Value::Object(self.inner.data.clone())
    }

    /// Read a property, falling through to ancestors unless isolated.
    pub fn get(&self, key: &str) -> Value {
        self.inner.data.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.data.has(key)
    }

    /// Write an own property.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.data.set(key, value.into());
    }

    pub fn parser(&self) -> Arc<Parser> {
        Arc::clone(&self.tree().parser)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.tree().config
    }

    /// The phase the tree is in, if any.
    pub fn phase(&self) -> Option<Phase> {
        *self.tree().phase.lock()
    }

    /// Route an error from user code to the tree's exception handler.
    pub fn handle_error(&self, err: Error) {
        (self.tree().exception_handler)(&err);
    }

    /// Create a child scope.
    pub fn new_child(&self, isolated: bool) -> Scope {
        self.new_child_with_parent(isolated, self)
    }

    /// Create a child that inherits from `self` but is registered under
    /// `parent`, which then owns it and digests it.
    pub fn new_child_with_parent(&self, isolated: bool, parent: &Scope) -> Scope {
        let data = if isolated {
            Object::new()
        } else {
            Object::with_proto(&self.inner.data)
        };
        let child = Scope::from_inner(Arc::new(ScopeInner {
            id: next_scope_id(),
            data,
            isolated,
            parent: Some(Arc::downgrade(&parent.inner)),
            children: Mutex::new(Vec::new()),
            watchers: Mutex::new(Some(Vec::new())),
            listeners: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            tree: Arc::clone(&parent.inner.tree),
        }));
        parent.inner.children.lock().push(child.clone());
        child
    }

    /// Tear the scope down: broadcast `$destroy`, detach from the parent,
    /// and drop the watchers and listeners for good. Children are not
    /// destroyed; they become unreachable with this scope.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broadcast("$destroy", &[]);
        if let Some(parent) = self.parent() {
            parent
                .inner
                .children
                .lock()
                .retain(|child| !child.ptr_eq(self));
        }
        *self.inner.watchers.lock() = None;
        self.clear_listeners();
        *self.tree().last_dirty.lock() = None;
    }

    /// Register a watcher. The listener runs on the first digest and then
    /// whenever the watched value changes: by identity, or structurally
    /// when `value_eq` is set.
    pub fn watch<W, L>(&self, watch_fn: W, listener: L, value_eq: bool) -> WatchHandle
    where
        W: Fn(&Scope) -> Result<Value> + Send + Sync + 'static,
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let watcher = Arc::new(Watcher::new(Box::new(watch_fn), Box::new(listener), value_eq));
        if let Some(watchers) = self.inner.watchers.lock().as_mut() {
            watchers.push(Arc::clone(&watcher));
        }
        *self.tree().last_dirty.lock() = None;

        let scope = Arc::downgrade(&self.inner);
        WatchHandle::new(move || {
            watcher.deactivate();
            let Some(inner) = scope.upgrade() else {
                return;
            };
            let removed = match inner.watchers.lock().as_mut() {
                Some(watchers) => {
                    let before = watchers.len();
                    watchers.retain(|w| !Arc::ptr_eq(w, &watcher));
                    watchers.len() != before
                }
                None => false,
            };
            if removed {
                *inner.tree.last_dirty.lock() = None;
            }
        })
    }

    /// Live watchers in registration order.
    pub(crate) fn watchers(&self) -> Vec<Arc<Watcher>> {
        self.inner.watchers.lock().clone().unwrap_or_default()
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().as_ref().map_or(0, Vec::len)
    }

    /// Evaluate `f` against this scope right away.
    pub fn eval<F>(&self, f: F) -> Result<Value>
    where
        F: FnOnce(&Scope) -> Result<Value>,
    {
        f(self)
    }

    /// Compile `source` with the tree's parser and evaluate it against this
    /// scope.
    pub fn eval_expr(&self, source: &str, locals: Option<&Value>) -> Result<Value> {
        self.parser().parse(source)?.eval(&self.data(), locals)
    }

    /// Queue `task` to run in the current or next digest. Outside a digest
    /// this schedules one on the root.
    pub fn eval_async<F>(&self, task: F)
    where
        F: FnOnce(&Scope) -> Result<()> + Send + 'static,
    {
        let tree = self.tree();
        let idle = tree.phase.lock().is_none();
        let was_empty = tree.async_queue.push(ScopedTask {
            scope: self.clone(),
            task: Box::new(task),
        });
        if idle && was_empty {
            let root = Arc::downgrade(&self.root().inner);
            let delay = Duration::from_millis(tree.config.eval_async_delay_ms);
            // Fire-and-forget: the job checks the queue before digesting.
            let _ = tree.defer.defer(
                delay,
                Box::new(move || {
                    let Some(root) = root.upgrade().map(Scope::from_inner) else {
                        return;
                    };
                    if !root.tree().async_queue.is_empty() {
                        if let Err(err) = root.digest() {
                            root.handle_error(err);
                        }
                    }
                }),
            );
        }
    }

    /// Run `f` in the apply phase, then digest the whole tree. The digest
    /// runs even when `f` fails; a digest error takes precedence.
    pub fn apply<F>(&self, f: F) -> Result<Value>
    where
        F: FnOnce(&Scope) -> Result<Value>,
    {
        self.begin_phase(Phase::Apply)?;
        let result = f(self);
        self.clear_phase();
        self.root().digest()?;
        result
    }

    /// [`apply`](Self::apply) a compiled expression.
    pub fn apply_expr(&self, source: &str) -> Result<Value> {
        self.apply(|scope| scope.eval_expr(source, None))
    }

    /// Queue `task` for a coalesced apply: every task queued before the
    /// flush runs inside a single `apply`.
    pub fn apply_async<F>(&self, task: F)
    where
        F: FnOnce(&Scope) -> Result<()> + Send + 'static,
    {
        let tree = self.tree();
        tree.apply_queue.push(ScopedTask {
            scope: self.clone(),
            task: Box::new(task),
        });
        self.schedule_apply_flush();
    }

    /// Arm the deferred job that drains the apply queue, unless one is
    /// already pending or there is nothing to drain.
    fn schedule_apply_flush(&self) {
        let tree = self.tree();
        let mut flush = tree.apply_flush.lock();
        if flush.is_some() || tree.apply_queue.is_empty() {
            return;
        }
        let root = Arc::downgrade(&self.root().inner);
        let delay = Duration::from_millis(tree.config.apply_async_delay_ms);
        *flush = Some(tree.defer.defer(
            delay,
            Box::new(move || {
                let Some(root) = root.upgrade().map(Scope::from_inner) else {
                    return;
                };
                // A digest may have flushed the queue already.
                if root.tree().apply_flush.lock().take().is_none() {
                    return;
                }
                let result = root.apply(|scope| {
                    scope.flush_apply_queue();
                    Ok(Value::Undefined)
                });
                match result {
                    Ok(_) => {}
                    Err(Error::Phase(phase)) => {
                        debug!(?phase, "apply flush deferred until the phase ends");
                        let retry = Arc::downgrade(&root.inner);
                        root.post_digest(move || {
                            if let Some(root) = retry.upgrade().map(Scope::from_inner) {
                                root.schedule_apply_flush();
                            }
                            Ok(())
                        });
                    }
                    Err(err) => root.handle_error(err),
                }
            }),
        ));
    }

    /// Run `task` once the current (or next) digest settles.
    pub fn post_digest<F>(&self, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.tree().post_digest.push(Box::new(task));
    }

    pub(crate) fn flush_apply_queue(&self) {
        while let Some(task) = self.tree().apply_queue.pop() {
            task.run();
        }
    }

    pub(crate) fn begin_phase(&self, phase: Phase) -> Result<()> {
        let mut current = self.tree().phase.lock();
        if let Some(active) = *current {
            return Err(Error::Phase(active));
        }
        *current = Some(phase);
        Ok(())
    }

    pub(crate) fn clear_phase(&self) {
        *self.tree().phase.lock() = None;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("isolated", &self.inner.isolated)
            .field("watchers", &self.watcher_count())
            .field("children", &self.inner.children.lock().len())
            .finish()
    }
}
