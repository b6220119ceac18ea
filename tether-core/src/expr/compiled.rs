//! Compiled Expressions
//!
//! [`Expression`] is the compiler's output: an analysed AST, the filters it
//! pipes through, and the metadata the digest engine keys its watch
//! strategies on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use super::analysis;
use super::ast::{Ast, NodeId};
use super::filter::{Filter, FilterLookup};
use super::interpreter::Evaluator;
use super::{lexer, parser};
use crate::error::{Error, Result};
use crate::value::Value;

/// A compiled expression. Cheap to share behind an `Arc`; evaluation never
/// mutates it.
pub struct Expression {
    source: String,
    ast: Arc<Ast>,
    filters: Arc<HashMap<String, Filter>>,
    constant: bool,
    literal: bool,
    one_time: bool,
    inputs: Vec<NodeId>,
    assignable: Option<NodeId>,
}

impl Expression {
    /// Lex, parse, resolve filters and analyse `source`.
    pub(crate) fn compile(source: &str, one_time: bool, lookup: &dyn FilterLookup) -> Result<Self> {
        let mut ast = parser::parse(lexer::lex(source)?)?;

        let mut filters = HashMap::new();
        for name in ast.filter_names() {
            let filter = lookup
                .lookup(name)
                .ok_or_else(|| Error::UnknownFilter(name.to_string()))?;
            filters.insert(name.to_string(), filter);
        }

        analysis::analyze(&mut ast, &|name| {
            filters.get(name).is_some_and(Filter::is_stateful)
        });

        let expression = Self {
            source: source.to_string(),
            constant: ast.node(ast.root()).constant,
            literal: analysis::is_literal(&ast),
            inputs: analysis::inputs(&ast),
            assignable: analysis::assignable(&ast),
            one_time,
            ast: Arc::new(ast),
            filters: Arc::new(filters),
        };
        trace!(
            source,
            constant = expression.constant,
            inputs = expression.inputs.len(),
            "compiled expression"
        );
        Ok(expression)
    }

    /// Source text, without any one-time prefix.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// The value can never change between evaluations.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// The expression is a bare array or object (or primitive) literal.
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// The source was prefixed with `::`.
    pub fn is_one_time(&self) -> bool {
        self.one_time
    }

    pub fn is_assignable(&self) -> bool {
        self.assignable.is_some()
    }

    /// Evaluate against `context`, consulting `locals` first for identifiers.
    pub fn eval(&self, context: &Value, locals: Option<&Value>) -> Result<Value> {
        self.evaluator(context, locals).eval(self.ast.root())
    }

    /// Store `value` at the location this expression denotes.
    pub fn assign(&self, context: &Value, value: Value, locals: Option<&Value>) -> Result<Value> {
        let target = self
            .assignable
            .ok_or_else(|| Error::NotAssignable(self.source.clone()))?;
        self.evaluator(context, locals).assign_value(target, value)
    }

    /// Narrower evaluators whose results determine this expression's result.
    /// Empty when no tighter set than the whole expression is known.
    pub fn inputs(&self) -> Vec<InputExpression> {
        self.inputs
            .iter()
            .map(|&node| InputExpression {
                source: self.source.clone(),
                ast: Arc::clone(&self.ast),
                filters: Arc::clone(&self.filters),
                node,
            })
            .collect()
    }

    pub fn has_inputs(&self) -> bool {
        !self.inputs.is_empty()
    }

    fn evaluator<'a>(&'a self, context: &'a Value, locals: Option<&'a Value>) -> Evaluator<'a> {
        Evaluator {
            ast: &self.ast,
            filters: &self.filters,
            source: &self.source,
            scope: context,
            locals,
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("constant", &self.constant)
            .field("literal", &self.literal)
            .field("one_time", &self.one_time)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// One sub-expression of an [`Expression`]'s watch set, evaluable on its
/// own. Shares the parent's tree.
#[derive(Clone)]
pub struct InputExpression {
    source: String,
    ast: Arc<Ast>,
    filters: Arc<HashMap<String, Filter>>,
    node: NodeId,
}

impl InputExpression {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn eval(&self, context: &Value, locals: Option<&Value>) -> Result<Value> {
        Evaluator {
            ast: &self.ast,
            filters: &self.filters,
            source: &self.source,
            scope: context,
            locals,
        }
        .eval(self.node)
    }
}

impl fmt::Debug for InputExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputExpression")
            .field("source", &self.source)
            .field("node", &self.node)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::filter::FilterRegistry;
    use serde_json::json;

    fn compile(source: &str) -> Expression {
        Expression::compile(source, false, &FilterRegistry::new()).unwrap()
    }

    fn upper_registry() -> FilterRegistry {
        FilterRegistry::new()
            .with(
                "upper",
                Filter::new(|args| {
                    Ok(Value::from(
                        args.first().map(|v| v.to_string().to_uppercase()).unwrap_or_default(),
                    ))
                }),
            )
            .with("stamp", Filter::stateful(|_| Ok(Value::from(1))))
    }

    #[test]
    fn evaluates_against_a_context() {
        let scope = Value::from(json!({"a": 2, "b": 3}));
        assert_eq!(compile("a + b").eval(&scope, None).unwrap(), Value::from(5));
    }

    #[test]
    fn metadata() {
        let e = compile("[1, 2]");
        assert!(e.is_constant());
        assert!(e.is_literal());
        assert!(!e.is_assignable());

        let e = compile("a.b");
        assert!(!e.is_constant());
        assert!(!e.is_literal());
        assert!(e.is_assignable());
        assert!(!e.has_inputs());

        let e = compile("a + b");
        assert!(e.has_inputs());
        assert_eq!(e.inputs().len(), 2);
    }

    #[test]
    fn inputs_evaluate_their_sub_expressions() {
        let scope = Value::from(json!({"a": 2, "b": 3}));
        let e = compile("a * 10 + b");
        let values: Vec<Value> = e
            .inputs()
            .iter()
            .map(|input| input.eval(&scope, None).unwrap())
            .collect();
        assert_eq!(values, vec![Value::from(2), Value::from(3)]);
    }

    #[test]
    fn assign_writes_through_the_location() {
        let scope = Value::from(json!({}));
        let e = compile("user.name");
        e.assign(&scope, Value::from("ann"), None).unwrap();
        assert_eq!(scope.to_json(), json!({"user": {"name": "ann"}}));
        assert_eq!(e.eval(&scope, None).unwrap(), Value::from("ann"));
    }

    #[test]
    fn assign_on_a_non_location_fails() {
        let scope = Value::from(json!({}));
        assert!(matches!(
            compile("a + 1").assign(&scope, Value::Null, None),
            Err(Error::NotAssignable(source)) if source == "a + 1"
        ));
    }

    #[test]
    fn filters_are_resolved_at_compile_time() {
        let registry = upper_registry();
        let e = Expression::compile("name | upper", false, &registry).unwrap();
        let scope = Value::from(json!({"name": "ann"}));
        assert_eq!(e.eval(&scope, None).unwrap(), Value::from("ANN"));

        assert!(matches!(
            Expression::compile("name | lower", false, &registry),
            Err(Error::UnknownFilter(name)) if name == "lower"
        ));
    }

    #[test]
    fn filter_statefulness_drives_analysis() {
        let registry = upper_registry();
        let pure = Expression::compile("'x' | upper", false, &registry).unwrap();
        assert!(pure.is_constant());
        let stateful = Expression::compile("'x' | stamp", false, &registry).unwrap();
        assert!(!stateful.is_constant());
        let piped = Expression::compile("a | upper", false, &registry).unwrap();
        assert_eq!(piped.inputs().len(), 1);
    }

    #[test]
    fn compile_errors_surface() {
        let registry = FilterRegistry::new();
        assert!(matches!(
            Expression::compile("a +", false, &registry),
            Err(Error::Syntax(_))
        ));
        assert!(matches!(
            Expression::compile("a # b", false, &registry),
            Err(Error::Lex { .. })
        ));
    }
}
