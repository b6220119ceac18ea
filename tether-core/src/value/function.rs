//! Function Values
//!
//! Functions reachable from expressions are native Rust closures. Besides
//! ordinary functions there are a handful of intrinsics that exist so the
//! evaluator guards have something concrete to refuse: the `call`, `apply`
//! and `bind` members every function exposes, and the `Function` / `Object`
//! constructors. The intrinsics are process-wide singletons, so identity
//! checks against them are stable.

use std::fmt;
use std::sync::{Arc, OnceLock};

use super::{Object, Value};
use crate::error::{Error, Result};

/// Signature of a native function: `(this, arguments) -> value`.
pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Native,
    Call,
    Apply,
    Bind,
    FunctionConstructor,
    ObjectConstructor,
}

#[derive(Clone)]
pub struct Function {
    kind: FunctionKind,
    name: Arc<str>,
    body: Arc<NativeFn>,
}

impl Function {
    /// Wrap a closure as a function value.
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::with_kind(FunctionKind::Native, name, body)
    }

    fn with_kind<F>(kind: FunctionKind, name: &str, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            kind,
            name: Arc::from(name),
            body: Arc::new(body),
        }
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with an explicit `this`.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        (self.body)(this, args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }

    /// `Function.prototype.call`.
    pub fn call_intrinsic() -> Function {
        static CALL: OnceLock<Function> = OnceLock::new();
        CALL.get_or_init(|| {
            Function::with_kind(FunctionKind::Call, "call", |this, args| {
                let target = expect_function(this, "call")?;
                let bound_this = args.first().cloned().unwrap_or_default();
                target.call(&bound_this, args.get(1..).unwrap_or(&[]))
            })
        })
        .clone()
    }

    /// `Function.prototype.apply`.
    pub fn apply_intrinsic() -> Function {
        static APPLY: OnceLock<Function> = OnceLock::new();
        APPLY
            .get_or_init(|| {
                Function::with_kind(FunctionKind::Apply, "apply", |this, args| {
                    let target = expect_function(this, "apply")?;
                    let bound_this = args.first().cloned().unwrap_or_default();
                    let spread = match args.get(1) {
                        Some(Value::Array(items)) => items.to_vec(),
                        _ => Vec::new(),
                    };
                    target.call(&bound_this, &spread)
                })
            })
            .clone()
    }

    /// `Function.prototype.bind`.
    pub fn bind_intrinsic() -> Function {
        static BIND: OnceLock<Function> = OnceLock::new();
        BIND.get_or_init(|| {
            Function::with_kind(FunctionKind::Bind, "bind", |this, args| {
                let target = expect_function(this, "bind")?;
                let bound_this = args.first().cloned().unwrap_or_default();
                let bound_args: Vec<Value> = args.get(1..).unwrap_or(&[]).to_vec();
                let name = format!("bound {}", target.name());
                Ok(Value::Function(Function::new(&name, move |_, rest| {
                    let mut all = bound_args.clone();
                    all.extend_from_slice(rest);
                    target.call(&bound_this, &all)
                })))
            })
        })
        .clone()
    }

    /// The `Function` constructor. Compiling source text at runtime is not
    /// supported, so invoking it always fails.
    pub fn function_constructor() -> Function {
        static CTOR: OnceLock<Function> = OnceLock::new();
        CTOR.get_or_init(|| {
            Function::with_kind(FunctionKind::FunctionConstructor, "Function", |_, _| {
                Err(Error::Eval(
                    "the Function constructor cannot compile source text".into(),
                ))
            })
        })
        .clone()
    }

    /// The `Object` constructor.
    pub fn object_constructor() -> Function {
        static CTOR: OnceLock<Function> = OnceLock::new();
        CTOR.get_or_init(|| {
            Function::with_kind(FunctionKind::ObjectConstructor, "Object", |_, args| {
                Ok(match args.first() {
                    Some(value @ (Value::Object(_) | Value::Array(_) | Value::Function(_))) => {
                        value.clone()
                    }
                    _ => Value::Object(Object::new()),
                })
            })
        })
        .clone()
    }

    /// Members readable on a function value.
    pub(crate) fn member(&self, key: &str) -> Value {
        match key {
            "call" => Value::Function(Function::call_intrinsic()),
            "apply" => Value::Function(Function::apply_intrinsic()),
            "bind" => Value::Function(Function::bind_intrinsic()),
            "name" => Value::String(self.name.to_string()),
            _ => Value::Undefined,
        }
    }
}

fn expect_function(this: &Value, intrinsic: &str) -> Result<Function> {
    match this {
        Value::Function(f) => Ok(f.clone()),
        other => Err(Error::Eval(format!(
            "{intrinsic} called on a non-function ({})",
            other.type_name()
        ))),
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
