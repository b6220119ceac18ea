//! Static Analysis
//!
//! Annotates every node with `constant` and `to_watch`, bottom-up. A node's
//! `to_watch` is the smallest set of sub-expressions whose change is
//! necessary for the node's value to change; when no tighter set can be
//! proven it is the node itself.
//!
//! Calls are opaque: a function may read anything, so a call (or a stateful
//! filter) watches itself. Stateless filters are pure functions of their
//! arguments and watch the arguments' inputs instead.

use super::ast::{Ast, NodeId, NodeKind, WatchSet};

/// Annotate `ast` in place. `is_stateful` reports whether the named filter
/// keeps state between calls.
pub(crate) fn analyze(ast: &mut Ast, is_stateful: &dyn Fn(&str) -> bool) {
    let root = ast.root();
    visit(ast, root, is_stateful);
}

fn visit(ast: &mut Ast, id: NodeId, is_stateful: &dyn Fn(&str) -> bool) -> bool {
    let (constant, to_watch) = match ast.kind(id).clone() {
        NodeKind::Program(body) => {
            let mut all = true;
            for statement in body {
                all &= visit(ast, statement, is_stateful);
            }
            (all, WatchSet::new())
        }
        NodeKind::Literal(_) => (true, WatchSet::new()),
        NodeKind::Identifier(_) => (false, watch_self(id)),
        NodeKind::This | NodeKind::Locals => (false, WatchSet::new()),
        NodeKind::Array(children) | NodeKind::Object(children) => {
            union(ast, &children, is_stateful)
        }
        NodeKind::Property { value, .. } => {
            let constant = visit(ast, value, is_stateful);
            (constant, ast.node(value).to_watch.clone())
        }
        NodeKind::Member {
            object,
            property,
            computed,
        } => {
            let object_constant = visit(ast, object, is_stateful);
            let property_constant = !computed || visit(ast, property, is_stateful);
            (object_constant && property_constant, watch_self(id))
        }
        NodeKind::Call {
            callee,
            arguments,
            filter,
        } => {
            let stateless_filter = filter
                && match ast.kind(callee) {
                    NodeKind::Identifier(name) => !is_stateful(name),
                    _ => false,
                };
            if stateless_filter {
                union(ast, &arguments, is_stateful)
            } else {
                if !filter {
                    visit(ast, callee, is_stateful);
                }
                for argument in arguments {
                    visit(ast, argument, is_stateful);
                }
                (false, watch_self(id))
            }
        }
        NodeKind::Assignment { target, value } => {
            let target_constant = visit(ast, target, is_stateful);
            let value_constant = visit(ast, value, is_stateful);
            (target_constant && value_constant, watch_self(id))
        }
        NodeKind::Unary { argument, .. } => {
            let constant = visit(ast, argument, is_stateful);
            (constant, ast.node(argument).to_watch.clone())
        }
        NodeKind::Binary { left, right, .. } => {
            let left_constant = visit(ast, left, is_stateful);
            let right_constant = visit(ast, right, is_stateful);
            let mut to_watch = ast.node(left).to_watch.clone();
            to_watch.extend_from_slice(&ast.node(right).to_watch);
            (left_constant && right_constant, to_watch)
        }
        NodeKind::Logical { left, right, .. } => {
            let left_constant = visit(ast, left, is_stateful);
            let right_constant = visit(ast, right, is_stateful);
            (left_constant && right_constant, watch_self(id))
        }
        NodeKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            let mut all = visit(ast, test, is_stateful);
            all &= visit(ast, consequent, is_stateful);
            all &= visit(ast, alternate, is_stateful);
            (all, watch_self(id))
        }
    };

    let node = ast.node_mut(id);
    node.constant = constant;
    node.to_watch = to_watch;
    constant
}

/// AND of the children's constancy, union of the non-constant children's
/// watch sets.
fn union(ast: &mut Ast, children: &[NodeId], is_stateful: &dyn Fn(&str) -> bool) -> (bool, WatchSet) {
    let mut all = true;
    let mut to_watch = WatchSet::new();
    for &child in children {
        let constant = visit(ast, child, is_stateful);
        all &= constant;
        if !constant {
            to_watch.extend_from_slice(&ast.node(child).to_watch);
        }
    }
    (all, to_watch)
}

fn watch_self(id: NodeId) -> WatchSet {
    let mut set = WatchSet::new();
    set.push(id);
    set
}

/// The narrower evaluators worth watching instead of the whole expression:
/// the single statement's watch set, unless it is empty or just the
/// statement itself.
pub(crate) fn inputs(ast: &Ast) -> Vec<NodeId> {
    match ast.body() {
        [statement] => {
            let to_watch = &ast.node(*statement).to_watch;
            if to_watch.is_empty() || to_watch.as_slice() == [*statement] {
                Vec::new()
            } else {
                to_watch.to_vec()
            }
        }
        _ => Vec::new(),
    }
}

/// An empty program, or a single literal, array or object statement.
pub(crate) fn is_literal(ast: &Ast) -> bool {
    match ast.body() {
        [] => true,
        [statement] => matches!(
            ast.kind(*statement),
            NodeKind::Literal(_) | NodeKind::Array(_) | NodeKind::Object(_)
        ),
        _ => false,
    }
}

/// The assignable statement of a single-statement program.
pub(crate) fn assignable(ast: &Ast) -> Option<NodeId> {
    match ast.body() {
        [statement]
            if matches!(
                ast.kind(*statement),
                NodeKind::Identifier(_) | NodeKind::Member { .. }
            ) =>
        {
            Some(*statement)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{lexer::lex, parser::parse};

    fn analyzed(source: &str) -> Ast {
        let mut ast = parse(lex(source).unwrap()).unwrap();
        analyze(&mut ast, &|name| name == "random");
        ast
    }

    fn statement(ast: &Ast) -> NodeId {
        ast.body()[0]
    }

    fn watched_names(ast: &Ast) -> Vec<String> {
        inputs(ast)
            .into_iter()
            .map(|id| match ast.kind(id) {
                NodeKind::Identifier(name) => name.clone(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn literals_are_constant() {
        for source in ["1", "'a'", "null", "[1, 2]", "{a: 1}", "1 + 2", "-1", "true ? 1 : 2"] {
            let ast = analyzed(source);
            assert!(ast.node(ast.root()).constant, "{source} should be constant");
        }
    }

    #[test]
    fn identifiers_and_calls_are_not_constant() {
        for source in ["a", "a.b", "f()", "this", "$locals", "[a]", "1 + a", "a = 1"] {
            let ast = analyzed(source);
            assert!(!ast.node(ast.root()).constant, "{source} should not be constant");
        }
    }

    #[test]
    fn member_constancy_depends_on_computed_property() {
        let ast = analyzed("[1, 2][0]");
        assert!(ast.node(statement(&ast)).constant);
        let ast = analyzed("[1, 2][i]");
        assert!(!ast.node(statement(&ast)).constant);
    }

    #[test]
    fn binary_expressions_watch_their_operands() {
        let ast = analyzed("a + b");
        assert_eq!(watched_names(&ast), vec!["a", "b"]);

        let ast = analyzed("a * 2 - -c");
        assert_eq!(watched_names(&ast), vec!["a", "c"]);
    }

    #[test]
    fn arrays_and_objects_union_non_constant_children() {
        let ast = analyzed("[a, 1, b]");
        assert_eq!(watched_names(&ast), vec!["a", "b"]);
        let ast = analyzed("{x: a, y: 2}");
        assert_eq!(watched_names(&ast), vec!["a"]);
    }

    #[test]
    fn opaque_nodes_watch_themselves() {
        for source in ["a.b", "f(a)", "a && b", "a ? b : c", "a = b", "a"] {
            let ast = analyzed(source);
            let id = statement(&ast);
            assert_eq!(ast.node(id).to_watch.as_slice(), [id], "{source}");
            assert!(inputs(&ast).is_empty(), "{source} should have no inputs");
        }
    }

    #[test]
    fn stateless_filters_watch_their_arguments() {
        let ast = analyzed("a | upper:b");
        assert_eq!(watched_names(&ast), vec!["a", "b"]);
    }

    #[test]
    fn stateful_filters_watch_themselves() {
        let ast = analyzed("a | random");
        let id = statement(&ast);
        assert_eq!(ast.node(id).to_watch.as_slice(), [id]);
        assert!(!ast.node(id).constant);
    }

    #[test]
    fn stateless_filter_of_constants_is_constant() {
        let ast = analyzed("'abc' | upper");
        assert!(ast.node(statement(&ast)).constant);
    }

    #[test]
    fn this_and_locals_watch_nothing() {
        let ast = analyzed("this");
        assert!(ast.node(statement(&ast)).to_watch.is_empty());
        assert!(inputs(&ast).is_empty());
    }

    #[test]
    fn multi_statement_programs_have_no_inputs() {
        assert!(inputs(&analyzed("a + b; c + d")).is_empty());
    }

    #[test]
    fn literal_and_assignable_shapes() {
        assert!(is_literal(&analyzed("")));
        assert!(is_literal(&analyzed("[a]")));
        assert!(is_literal(&analyzed("{a: b}")));
        assert!(!is_literal(&analyzed("a")));
        assert!(assignable(&analyzed("a.b[c]")).is_some());
        assert!(assignable(&analyzed("a + b")).is_none());
        assert!(assignable(&analyzed("a; b")).is_none());
    }
}
