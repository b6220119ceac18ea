//! Evaluator
//!
//! Walks the analysed AST directly. Every dereference and every call passes
//! through the guards in [`super::guard`]: identifier and member results,
//! call arguments, the call's `this`, call results and assigned values.
//!
//! Assignment targets are resolved in create mode: a missing (`undefined` or
//! `null`) intermediate along the chain is replaced by a fresh empty object,
//! so `a.b.c = 1` works on an empty scope.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::ast::{Ast, BinaryOp, LogicalOp, NodeId, NodeKind, UnaryOp};
use super::filter::Filter;
use super::guard::{ensure_safe_function, ensure_safe_member_name, ensure_safe_object};
use crate::error::{Error, Result};
use crate::value::{Object, Value};

/// A resolved location: the container and the member name within it.
struct Reference {
    base: Value,
    name: String,
    value: Value,
}

pub(crate) struct Evaluator<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) filters: &'a HashMap<String, Filter>,
    pub(crate) source: &'a str,
    pub(crate) scope: &'a Value,
    pub(crate) locals: Option<&'a Value>,
}

impl Evaluator<'_> {
    pub(crate) fn eval(&self, id: NodeId) -> Result<Value> {
        match self.ast.kind(id) {
            NodeKind::Program(body) => {
                let mut last = Value::Undefined;
                for statement in body {
                    last = self.eval(*statement)?;
                }
                Ok(last)
            }
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::Array(elements) => {
                let items = elements
                    .iter()
                    .map(|element| self.eval(*element))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::array(items))
            }
            NodeKind::Object(properties) => {
                let object = Object::new();
                for property in properties {
                    if let NodeKind::Property { key, value } = self.ast.kind(*property) {
                        object.set(key.clone(), self.eval(*value)?);
                    }
                }
                Ok(Value::Object(object))
            }
            NodeKind::Property { value, .. } => self.eval(*value),
            NodeKind::Identifier(_) | NodeKind::Member { .. } => {
                Ok(self.reference(id, false)?.value)
            }
            NodeKind::This => Ok(self.scope.clone()),
            NodeKind::Locals => Ok(self.locals.cloned().unwrap_or_default()),
            NodeKind::Call {
                callee,
                arguments,
                filter: true,
            } => self.call_filter(*callee, arguments),
            NodeKind::Call {
                callee, arguments, ..
            } => self.call(*callee, arguments),
            NodeKind::Assignment { target, value } => self.assign(*target, *value),
            NodeKind::Unary { op, argument } => {
                let operand = self.eval(*argument)?;
                Ok(match op {
                    UnaryOp::Plus => Value::Number(operand.if_defined(Value::from(0)).to_number()),
                    UnaryOp::Minus => {
                        Value::Number(-operand.if_defined(Value::from(0)).to_number())
                    }
                    UnaryOp::Not => Value::Bool(!operand.truthy()),
                })
            }
            NodeKind::Binary { op, left, right } => {
                let left = self.eval(*left)?;
                let right = self.eval(*right)?;
                Ok(binary(*op, left, right))
            }
            NodeKind::Logical { op, left, right } => {
                let left = self.eval(*left)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, true) | (LogicalOp::Or, false) => self.eval(*right),
                    _ => Ok(left),
                }
            }
            NodeKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(*test)?.truthy() {
                    self.eval(*consequent)
                } else {
                    self.eval(*alternate)
                }
            }
        }
    }

    /// Store `value` into the location denoted by `target`.
    pub(crate) fn assign_value(&self, target: NodeId, value: Value) -> Result<Value> {
        let reference = self.reference(target, true)?;
        self.store(&reference, value)
    }

    fn assign(&self, target: NodeId, value: NodeId) -> Result<Value> {
        let reference = self.reference(target, true)?;
        let value = self.eval(value)?;
        self.store(&reference, value)
    }

    fn store(&self, reference: &Reference, value: Value) -> Result<Value> {
        ensure_safe_object(&value, self.source)?;
        reference.base.set_member(&reference.name, value.clone())?;
        Ok(value)
    }

    /// Resolve an identifier or member expression. With `create`, missing
    /// intermediate containers along the chain are created, but the final
    /// member itself is left alone.
    fn reference(&self, id: NodeId, create: bool) -> Result<Reference> {
        match self.ast.kind(id) {
            NodeKind::Identifier(name) => {
                ensure_safe_member_name(name, self.source)?;
                let base = match self.locals {
                    Some(locals) if locals.has_member(name) => locals.clone(),
                    _ => self.scope.clone(),
                };
                let value = base.get_member(name);
                ensure_safe_object(&value, self.source)?;
                Ok(Reference {
                    base,
                    name: name.clone(),
                    value,
                })
            }
            NodeKind::Member {
                object,
                property,
                computed,
            } => {
                let base = if create {
                    self.vivify(*object)?
                } else {
                    self.eval(*object)?
                };
                let name = if *computed {
                    self.eval(*property)?.to_string()
                } else {
                    self.property_name(*property)?
                };
                ensure_safe_member_name(&name, self.source)?;
                if create {
                    ensure_safe_object(&base, self.source)?;
                }
                let value = if is_nullish(&base) {
                    Value::Undefined
                } else {
                    base.get_member(&name)
                };
                ensure_safe_object(&value, self.source)?;
                Ok(Reference { base, name, value })
            }
            other => Err(Error::Eval(format!(
                "{} is not an assignable location",
                node_name(other)
            ))),
        }
    }

    /// Evaluate an intermediate of an assignment target, creating an empty
    /// object in its place when it is missing.
    fn vivify(&self, id: NodeId) -> Result<Value> {
        if !matches!(
            self.ast.kind(id),
            NodeKind::Identifier(_) | NodeKind::Member { .. }
        ) {
            return self.eval(id);
        }
        let reference = self.reference(id, true)?;
        if is_nullish(&reference.value) && !is_nullish(&reference.base) {
            let created = Value::Object(Object::new());
            reference.base.set_member(&reference.name, created.clone())?;
            return Ok(created);
        }
        Ok(reference.value)
    }

    fn property_name(&self, id: NodeId) -> Result<String> {
        match self.ast.kind(id) {
            NodeKind::Identifier(name) => Ok(name.clone()),
            other => Err(Error::Eval(format!(
                "expected a property name, found {}",
                node_name(other)
            ))),
        }
    }

    fn call(&self, callee: NodeId, arguments: &[NodeId]) -> Result<Value> {
        let (this, function) = match self.ast.kind(callee) {
            NodeKind::Identifier(_) | NodeKind::Member { .. } => {
                let reference = self.reference(callee, false)?;
                (reference.base, reference.value)
            }
            _ => (Value::Undefined, self.eval(callee)?),
        };
        if is_nullish(&function) {
            return Ok(Value::Undefined);
        }

        ensure_safe_object(&this, self.source)?;
        ensure_safe_function(&function, self.source)?;
        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let value = self.eval(*argument)?;
            ensure_safe_object(&value, self.source)?;
            args.push(value);
        }

        let Value::Function(function) = function else {
            return Err(Error::Eval(format!(
                "{} is not a function in expression `{}`",
                function.type_name(),
                self.source
            )));
        };
        let result = function.call(&this, &args)?;
        ensure_safe_object(&result, self.source)?;
        Ok(result)
    }

    fn call_filter(&self, callee: NodeId, arguments: &[NodeId]) -> Result<Value> {
        let name = self.property_name(callee)?;
        let filter = self
            .filters
            .get(&name)
            .ok_or_else(|| Error::UnknownFilter(name.clone()))?;
        let args = arguments
            .iter()
            .map(|argument| self.eval(*argument))
            .collect::<Result<Vec<_>>>()?;
        filter.apply(&args)
    }
}

fn is_nullish(value: &Value) -> bool {
    matches!(value, Value::Undefined | Value::Null)
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match op {
        BinaryOp::Add => {
            let (left, right) = (
                left.if_defined(Value::from(0)),
                right.if_defined(Value::from(0)),
            );
            if is_stringish(&left) || is_stringish(&right) {
                Value::String(format!("{left}{right}"))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(
            left.if_defined(Value::from(0)).to_number()
                - right.if_defined(Value::from(0)).to_number(),
        ),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(&right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(&right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(&right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(&right)),
        BinaryOp::Lt => Value::Bool(compare(&left, &right) == Some(Ordering::Less)),
        BinaryOp::Gt => Value::Bool(compare(&left, &right) == Some(Ordering::Greater)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}

/// Values that `+` concatenates rather than adds.
fn is_stringish(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_)
    )
}

/// Relational comparison: lexicographic for two strings, numeric otherwise.
/// `None` when either side is `NaN`.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn node_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Program(_) => "a program",
        NodeKind::Literal(_) => "a literal",
        NodeKind::Array(_) => "an array literal",
        NodeKind::Object(_) => "an object literal",
        NodeKind::Property { .. } => "a property",
        NodeKind::Identifier(_) => "an identifier",
        NodeKind::This => "`this`",
        NodeKind::Locals => "`$locals`",
        NodeKind::Member { .. } => "a member expression",
        NodeKind::Call { .. } => "a call",
        NodeKind::Assignment { .. } => "an assignment",
        NodeKind::Unary { .. } => "a unary expression",
        NodeKind::Binary { .. } => "a binary expression",
        NodeKind::Logical { .. } => "a logical expression",
        NodeKind::Conditional { .. } => "a conditional expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{lexer::lex, parser::parse};
    use serde_json::json;

    fn run(source: &str, scope: &Value) -> Result<Value> {
        run_with(source, scope, None)
    }

    fn run_with(source: &str, scope: &Value, locals: Option<&Value>) -> Result<Value> {
        let ast = parse(lex(source)?)?;
        let filters = HashMap::new();
        let evaluator = Evaluator {
            ast: &ast,
            filters: &filters,
            source,
            scope,
            locals,
        };
        evaluator.eval(ast.root())
    }

    fn empty() -> Value {
        Value::object(Vec::<(String, Value)>::new())
    }

    #[test]
    fn arithmetic_and_precedence() {
        let scope = empty();
        assert_eq!(run("1 + 2 * 3", &scope).unwrap(), Value::from(7));
        assert_eq!(run("(1 + 2) * 3", &scope).unwrap(), Value::from(9));
        assert_eq!(run("7 % 4 - 1", &scope).unwrap(), Value::from(2));
        assert_eq!(run("-2 * -2", &scope).unwrap(), Value::from(4));
        assert_eq!(run("1 / 0", &scope).unwrap(), Value::from(f64::INFINITY));
    }

    #[test]
    fn undefined_operands_count_as_zero_for_add_and_sub() {
        let scope = empty();
        assert_eq!(run("missing + 1", &scope).unwrap(), Value::from(1));
        assert_eq!(run("1 - missing", &scope).unwrap(), Value::from(1));
        assert_eq!(run("-missing", &scope).unwrap(), Value::from(-0.0));
        assert!(run("missing * 2", &scope).unwrap().to_number().is_nan());
    }

    #[test]
    fn string_concatenation() {
        let scope = Value::from(json!({"name": "bob"}));
        assert_eq!(run("'hi ' + name", &scope).unwrap(), Value::from("hi bob"));
        assert_eq!(run("1 + '2'", &scope).unwrap(), Value::from("12"));
    }

    #[test]
    fn comparisons() {
        let scope = empty();
        assert_eq!(run("'a' < 'b'", &scope).unwrap(), Value::from(true));
        assert_eq!(run("'10' < '9'", &scope).unwrap(), Value::from(true));
        assert_eq!(run("10 < '9'", &scope).unwrap(), Value::from(false));
        assert_eq!(run("2 >= 2", &scope).unwrap(), Value::from(true));
        assert_eq!(run("1 == '1'", &scope).unwrap(), Value::from(true));
        assert_eq!(run("1 === '1'", &scope).unwrap(), Value::from(false));
        assert_eq!(run("null != undefined", &scope).unwrap(), Value::from(false));
    }

    #[test]
    fn logical_operators_return_operands() {
        let scope = Value::from(json!({"a": 0, "b": "x"}));
        assert_eq!(run("a || b", &scope).unwrap(), Value::from("x"));
        assert_eq!(run("a && b", &scope).unwrap(), Value::from(0));
        assert_eq!(run("!a", &scope).unwrap(), Value::from(true));
        assert_eq!(run("a ? 1 : 2", &scope).unwrap(), Value::from(2));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicI32::new(0));
        let counter = calls.clone();
        let scope = empty();
        scope
            .set_member(
                "touch",
                Value::function("touch", move |_, _| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(Value::from(true))
                }),
            )
            .unwrap();
        run("false && touch()", &scope).unwrap();
        run("true || touch()", &scope).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn member_access() {
        let scope = Value::from(json!({"a": {"b": [10, 20]}, "k": "b"}));
        assert_eq!(run("a.b[1]", &scope).unwrap(), Value::from(20));
        assert_eq!(run("a[k].length", &scope).unwrap(), Value::from(2));
        assert!(run("a.missing.deeper", &scope).unwrap().is_undefined());
        assert!(run("nothing[0]", &scope).unwrap().is_undefined());
    }

    #[test]
    fn literals_build_fresh_containers() {
        let scope = Value::from(json!({"a": 1}));
        assert_eq!(run("[a, 2]", &scope).unwrap(), Value::from(json!([1, 2])));
        assert_eq!(
            run("{x: a, 'y': [a]}", &scope).unwrap(),
            Value::from(json!({"x": 1, "y": [1]}))
        );
    }

    #[test]
    fn statements_yield_the_last_value() {
        let scope = empty();
        assert_eq!(run("a = 1; a + 1", &scope).unwrap(), Value::from(2));
        assert!(run("", &scope).unwrap().is_undefined());
    }

    #[test]
    fn assignment_creates_intermediates() {
        let scope = empty();
        assert_eq!(run("a.b.c = 1", &scope).unwrap(), Value::from(1));
        assert_eq!(scope.to_json(), json!({"a": {"b": {"c": 1}}}));

        run("a['x'].y = 2", &scope).unwrap();
        assert_eq!(scope.get_member("a").get_member("x").to_json(), json!({"y": 2}));
    }

    #[test]
    fn huge_array_writes_are_refused() {
        let scope = Value::from(json!({"arr": [1]}));
        assert!(matches!(
            run("arr['18446744073709551615'] = 1", &scope),
            Err(Error::Eval(_))
        ));
        assert!(matches!(run("arr[4000000000] = 1", &scope), Err(Error::Eval(_))));
        assert!(matches!(run("arr.length = 1e12", &scope), Err(Error::Eval(_))));
        assert_eq!(scope.get_member("arr").to_json(), json!([1]));

        run("arr[2] = 3", &scope).unwrap();
        assert_eq!(scope.get_member("arr").to_json(), json!([1, null, 3]));
    }

    #[test]
    fn assignment_into_primitive_intermediate_is_ignored() {
        let scope = Value::from(json!({"a": 1}));
        assert_eq!(run("a.b = 2", &scope).unwrap(), Value::from(2));
        assert_eq!(scope.get_member("a"), Value::from(1));
    }

    #[test]
    fn locals_shadow_the_scope() {
        let scope = Value::from(json!({"a": {"b": 1}, "c": 3}));
        let locals = Value::from(json!({"a": {"b": 2}}));
        assert_eq!(run_with("a.b", &scope, Some(&locals)).unwrap(), Value::from(2));
        assert_eq!(run_with("c", &scope, Some(&locals)).unwrap(), Value::from(3));
        assert_eq!(run_with("$locals.a.b", &scope, Some(&locals)).unwrap(), Value::from(2));
        assert_eq!(run_with("this.a.b", &scope, Some(&locals)).unwrap(), Value::from(1));

        run_with("a.b = 5", &scope, Some(&locals)).unwrap();
        assert_eq!(locals.get_member("a").get_member("b"), Value::from(5));
        assert_eq!(scope.get_member("a").get_member("b"), Value::from(1));
    }

    #[test]
    fn calls_bind_this_to_the_base() {
        let scope = Value::from(json!({"obj": {"v": 42}}));
        scope
            .get_member("obj")
            .set_member(
                "get",
                Value::function("get", |this, _| Ok(this.get_member("v"))),
            )
            .unwrap();
        assert_eq!(run("obj.get()", &scope).unwrap(), Value::from(42));
    }

    #[test]
    fn calls_pass_arguments() {
        let scope = empty();
        scope
            .set_member(
                "sum",
                Value::function("sum", |_, args| {
                    Ok(Value::from(args.iter().map(Value::to_number).sum::<f64>()))
                }),
            )
            .unwrap();
        assert_eq!(run("sum(1, 2, 3)", &scope).unwrap(), Value::from(6));
    }

    #[test]
    fn calling_undefined_yields_undefined() {
        let scope = empty();
        assert!(run("missing()", &scope).unwrap().is_undefined());
        assert!(run("a.b.c()", &scope).unwrap().is_undefined());
    }

    #[test]
    fn calling_a_non_function_fails() {
        let scope = Value::from(json!({"n": 1}));
        assert!(matches!(run("n()", &scope), Err(Error::Eval(_))));
    }

    #[test]
    fn guards_reject_constructor_access() {
        let scope = Value::from(json!({"obj": {}}));
        assert!(matches!(run("obj.constructor", &scope), Err(Error::Security(_))));
        assert!(matches!(run("obj['__proto__']", &scope), Err(Error::Security(_))));
        assert!(matches!(
            run("obj['const' + 'ructor']", &scope),
            Err(Error::Security(_))
        ));
    }

    #[test]
    fn guards_reject_call_apply_bind() {
        let scope = empty();
        scope
            .set_member("fn", Value::function("fn", |_, _| Ok(Value::Null)))
            .unwrap();
        scope.set_member("x", Value::from(1)).unwrap();
        assert!(matches!(run("fn.apply(x)", &scope), Err(Error::Security(_))));
        assert!(matches!(run("fn.call(x)", &scope), Err(Error::Security(_))));
        assert!(matches!(run("fn.bind(x)", &scope), Err(Error::Security(_))));
        assert!(run("fn.apply", &scope).is_ok());
    }

    #[test]
    fn guards_reject_dangerous_arguments_and_results() {
        let scope = empty();
        let window = Object::new();
        window.set("window", Value::Object(window.clone()));
        let win = Value::Object(window);
        let leak = win.clone();
        scope
            .set_member("leak", Value::function("leak", move |_, _| Ok(leak.clone())))
            .unwrap();
        scope
            .set_member("id", Value::function("id", |_, args| {
                Ok(args.first().cloned().unwrap_or_default())
            }))
            .unwrap();
        assert!(matches!(run("leak()", &scope), Err(Error::Security(_))));

        let locals = Value::object(vec![("w", win)]);
        assert!(matches!(
            run_with("id(w)", &scope, Some(&locals)),
            Err(Error::Security(_))
        ));
    }

    #[test]
    fn unknown_filter_fails_at_evaluation_without_resolution() {
        let scope = empty();
        assert!(matches!(run("1 | nope", &scope), Err(Error::UnknownFilter(_))));
    }
}
