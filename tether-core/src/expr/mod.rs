//! Expression Compiler
//!
//! Turns template expressions into guarded evaluators.
//!
//! # Pipeline
//!
//! 1. [`lexer`] splits the source into tokens.
//! 2. [`parser`] builds an arena [`Ast`] by recursive descent.
//! 3. `analysis` marks every node `constant` and computes its watch set.
//! 4. The resulting [`Expression`] evaluates the tree directly, applying the
//!    security guards at each dereference.
//!
//! [`Parser`] ties the steps together and caches compiled expressions by
//! source text.

pub mod ast;
pub mod lexer;
pub mod parser;

mod analysis;
mod compiled;
mod filter;
mod guard;
mod interpreter;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

pub use ast::{Ast, Node, NodeId, NodeKind};
pub use compiled::{Expression, InputExpression};
pub use filter::{Filter, FilterFn, FilterLookup, FilterRegistry};
pub use lexer::{lex, Token, TokenKind};

use crate::error::Result;

/// Prefix marking a one-time binding.
const ONE_TIME_PREFIX: &str = "::";

/// The expression service: compiles source text with a fixed filter lookup
/// and caches the results.
pub struct Parser {
    filters: Arc<dyn FilterLookup>,
    cache: DashMap<String, Arc<Expression>>,
}

impl Parser {
    /// A parser with no filters.
    pub fn new() -> Self {
        Self::with_filters(FilterRegistry::new())
    }

    pub fn with_filters(filters: impl FilterLookup + 'static) -> Self {
        Self::with_shared_filters(Arc::new(filters))
    }

    pub fn with_shared_filters(filters: Arc<dyn FilterLookup>) -> Self {
        Self {
            filters,
            cache: DashMap::new(),
        }
    }

    /// Compile `source`, or return the cached compilation. A leading `::`
    /// is stripped and marks the expression one-time.
    pub fn parse(&self, source: &str) -> Result<Arc<Expression>> {
        let key = source.trim();
        if let Some(cached) = self.cache.get(key) {
            return Ok(Arc::clone(cached.value()));
        }

        let (body, one_time) = match key.strip_prefix(ONE_TIME_PREFIX) {
            Some(rest) => (rest.trim_start(), true),
            None => (key, false),
        };
        let expression = Arc::new(Expression::compile(body, one_time, self.filters.as_ref())?);
        self.cache.insert(key.to_string(), Arc::clone(&expression));
        Ok(expression)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Parse `source` into an unanalysed tree.
pub fn parse(source: &str) -> Result<Ast> {
    parser::parse(lexer::lex(source)?)
}
