//! Expression Watches
//!
//! Watching a compiled expression picks a strategy from what the compiler
//! learned about it:
//!
//! | expression               | strategy                                         |
//! |--------------------------|--------------------------------------------------|
//! | constant                 | call the listener once, then deregister          |
//! | one-time (`::`)          | deregister after a digest that ends defined      |
//! | one-time literal         | same, once every element or value is defined     |
//! | has inputs, reference eq | re-evaluate only when some input changed         |
//! | anything else            | plain watch on the whole expression              |

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Scope, WatchHandle};
use crate::error::Result;
use crate::expr::{Expression, InputExpression};
use crate::value::Value;

/// Where a self-removing watcher finds its own handle.
type HandleSlot = Arc<Mutex<Option<WatchHandle>>>;

impl Scope {
    /// Compile `source` with the tree's parser and watch it.
    pub fn watch_expr<L>(&self, source: &str, listener: L, value_eq: bool) -> Result<WatchHandle>
    where
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let expression = self.parser().parse(source)?;
        Ok(self.watch_expression(expression, listener, value_eq))
    }

    /// Watch an already compiled expression.
    pub fn watch_expression<L>(
        &self,
        expression: Arc<Expression>,
        listener: L,
        value_eq: bool,
    ) -> WatchHandle
    where
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        if expression.is_constant() {
            self.watch_constant(expression, listener, value_eq)
        } else if expression.is_one_time() {
            self.watch_one_time(expression, listener, value_eq)
        } else if expression.has_inputs() && !value_eq {
            self.watch_inputs(expression, listener)
        } else {
            self.watch(
                move |scope| expression.eval(&scope.data(), None),
                listener,
                value_eq,
            )
        }
    }

    fn watch_constant<L>(
        &self,
        expression: Arc<Expression>,
        listener: L,
        value_eq: bool,
    ) -> WatchHandle
    where
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let slot: HandleSlot = Arc::new(Mutex::new(None));
        let own = Arc::clone(&slot);
        let handle = self.watch(
            move |scope| expression.eval(&scope.data(), None),
            move |new, old, scope| {
                let result = listener(new, old, scope);
                let handle = own.lock().take();
                if let Some(handle) = handle {
                    handle.remove();
                }
                result
            },
            value_eq,
        );
        install(&slot, handle)
    }

    fn watch_one_time<L>(
        &self,
        expression: Arc<Expression>,
        listener: L,
        value_eq: bool,
    ) -> WatchHandle
    where
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let settled: fn(&Value) -> bool = if expression.is_literal() {
            all_defined
        } else {
            Value::is_defined
        };
        let slot: HandleSlot = Arc::new(Mutex::new(None));
        let last_value = Arc::new(Mutex::new(Value::Undefined));

        let own = Arc::clone(&slot);
        let handle = self.watch(
            move |scope| expression.eval(&scope.data(), None),
            move |new, old, scope| {
                *last_value.lock() = new.clone();
                let result = listener(new, old, scope);
                if settled(new) {
                    let own = Arc::clone(&own);
                    let last_value = Arc::clone(&last_value);
                    scope.post_digest(move || {
                        if settled(&last_value.lock()) {
                            let handle = own.lock().take();
                            if let Some(handle) = handle {
                                handle.remove();
                            }
                        }
                        Ok(())
                    });
                }
                result
            },
            value_eq,
        );
        install(&slot, handle)
    }

    fn watch_inputs<L>(&self, expression: Arc<Expression>, listener: L) -> WatchHandle
    where
        L: Fn(&Value, &Value, &Scope) -> Result<()> + Send + Sync + 'static,
    {
        let inputs: Vec<InputExpression> = expression.inputs();
        let last_inputs: Mutex<Vec<Option<Value>>> = Mutex::new(vec![None; inputs.len()]);
        let last_result = Mutex::new(Value::Undefined);

        self.watch(
            move |scope| {
                let data = scope.data();
                let values = inputs
                    .iter()
                    .map(|input| input.eval(&data, None))
                    .collect::<Result<Vec<_>>>()?;
                let changed = {
                    let last_inputs = last_inputs.lock();
                    values.iter().zip(last_inputs.iter()).any(|(value, last)| {
                        !matches!(last, Some(last) if last.same(value))
                    })
                };
                if changed {
                    // Inputs are only recorded once the result is.
                    let result = expression.eval(&data, None)?;
                    *last_result.lock() = result;
                    *last_inputs.lock() = values.into_iter().map(Some).collect();
                }
                Ok(last_result.lock().clone())
            },
            listener,
            false,
        )
    }
}

/// Record `handle` in `slot` and return a handle that also empties the slot,
/// so a watcher removed from outside does not keep itself alive.
fn install(slot: &HandleSlot, handle: WatchHandle) -> WatchHandle {
    *slot.lock() = Some(handle.clone());
    let slot = Arc::clone(slot);
    WatchHandle::new(move || {
        handle.remove();
        slot.lock().take();
    })
}

fn all_defined(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.to_vec().iter().all(Value::is_defined),
        Value::Object(object) => object.entries().iter().all(|(_, v)| v.is_defined()),
        other => other.is_defined(),
    }
}
