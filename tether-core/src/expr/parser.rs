//! AST Builder
//!
//! Recursive descent over the token list. Each grammar level is one method,
//! from loosest to tightest binding:
//!
//! ```text
//! program     := filter? (';' filter?)*
//! filter      := assignment ('|' IDENT (':' assignment)*)*
//! assignment  := ternary ('=' assignment)?
//! ternary     := logicalOr ('?' assignment ':' assignment)?
//! logicalOr   := logicalAnd ('||' logicalAnd)*
//! logicalAnd  := equality ('&&' equality)*
//! equality    := relational (('==' | '!=' | '===' | '!==') relational)*
//! relational  := additive (('<' | '>' | '<=' | '>=') additive)*
//! additive    := multiplicative (('+' | '-') multiplicative)*
//! multiplicative := unary (('*' | '/' | '%') unary)*
//! unary       := ('+' | '-' | '!') unary | primary
//! primary     := ( '(' filter ')' | array | object | CONST | IDENT | literal )
//!                ( '.' IDENT | '[' filter ']' | '(' arguments ')' )*
//! ```

use std::collections::VecDeque;

use super::ast::{Ast, BinaryOp, LogicalOp, NodeId, NodeKind, UnaryOp};
use super::lexer::{Token, TokenKind};
use crate::error::{Error, Result};
use crate::value::Value;

/// Build an AST from a token list.
pub fn parse(tokens: Vec<Token>) -> Result<Ast> {
    let mut builder = AstBuilder {
        tokens: tokens.into(),
        ast: Ast::new(),
    };
    let root = builder.program()?;
    builder.ast.set_root(root);
    Ok(builder.ast)
}

struct AstBuilder {
    tokens: VecDeque<Token>,
    ast: Ast,
}

impl AstBuilder {
    fn program(&mut self) -> Result<NodeId> {
        let mut body = Vec::new();
        loop {
            if !self.tokens.is_empty() && self.peek(&[";"]).is_none() {
                body.push(self.filter()?);
            }
            if self.expect(&[";"]).is_none() {
                break;
            }
        }
        if let Some(token) = self.tokens.front() {
            return Err(Error::Syntax(format!("unexpected token '{}'", token.text)));
        }
        Ok(self.ast.add(NodeKind::Program(body)))
    }

    fn filter(&mut self) -> Result<NodeId> {
        let mut left = self.assignment()?;
        while self.expect(&["|"]).is_some() {
            let callee = self.identifier()?;
            let mut arguments = vec![left];
            while self.expect(&[":"]).is_some() {
                arguments.push(self.assignment()?);
            }
            left = self.ast.add(NodeKind::Call {
                callee,
                arguments,
                filter: true,
            });
        }
        Ok(left)
    }

    fn assignment(&mut self) -> Result<NodeId> {
        let target = self.ternary()?;
        if self.expect(&["="]).is_some() {
            if !matches!(
                self.ast.kind(target),
                NodeKind::Identifier(_) | NodeKind::Member { .. }
            ) {
                return Err(Error::Syntax(
                    "trying to assign a value to a non l-value".into(),
                ));
            }
            let value = self.assignment()?;
            return Ok(self.ast.add(NodeKind::Assignment { target, value }));
        }
        Ok(target)
    }

    fn ternary(&mut self) -> Result<NodeId> {
        let test = self.logical_or()?;
        if self.expect(&["?"]).is_some() {
            let consequent = self.assignment()?;
            self.consume(":")?;
            let alternate = self.assignment()?;
            return Ok(self.ast.add(NodeKind::Conditional {
                test,
                consequent,
                alternate,
            }));
        }
        Ok(test)
    }

    fn logical_or(&mut self) -> Result<NodeId> {
        let mut left = self.logical_and()?;
        while self.expect(&["||"]).is_some() {
            let right = self.logical_and()?;
            left = self.ast.add(NodeKind::Logical {
                op: LogicalOp::Or,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<NodeId> {
        let mut left = self.equality()?;
        while self.expect(&["&&"]).is_some() {
            let right = self.equality()?;
            left = self.ast.add(NodeKind::Logical {
                op: LogicalOp::And,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<NodeId> {
        self.binary_level(&["==", "!=", "===", "!=="], Self::relational)
    }

    fn relational(&mut self) -> Result<NodeId> {
        self.binary_level(&["<", ">", "<=", ">="], Self::additive)
    }

    fn additive(&mut self) -> Result<NodeId> {
        self.binary_level(&["+", "-"], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<NodeId> {
        self.binary_level(&["*", "/", "%"], Self::unary)
    }

    /// One left-associative binary precedence level.
    fn binary_level(
        &mut self,
        operators: &[&str],
        next: fn(&mut Self) -> Result<NodeId>,
    ) -> Result<NodeId> {
        let mut left = next(self)?;
        while let Some(token) = self.expect(operators) {
            let op = BinaryOp::from_token(&token.text)
                .ok_or_else(|| Error::Syntax(format!("unknown operator '{}'", token.text)))?;
            let right = next(self)?;
            left = self.ast.add(NodeKind::Binary { op, left, right });
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<NodeId> {
        if let Some(token) = self.expect(&["+", "-", "!"]) {
            let op = match token.text.as_str() {
                "+" => UnaryOp::Plus,
                "-" => UnaryOp::Minus,
                _ => UnaryOp::Not,
            };
            let argument = self.unary()?;
            return Ok(self.ast.add(NodeKind::Unary { op, argument }));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<NodeId> {
        let mut primary = if self.expect(&["("]).is_some() {
            let inner = self.filter()?;
            self.consume(")")?;
            inner
        } else if self.expect(&["["]).is_some() {
            self.array_declaration()?
        } else if self.expect(&["{"]).is_some() {
            self.object()?
        } else if let Some(kind) = self.keyword_constant() {
            self.tokens.pop_front();
            self.ast.add(kind)
        } else if self.tokens.front().is_some_and(Token::is_identifier) {
            self.identifier()?
        } else {
            self.constant()?
        };

        while let Some(token) = self.expect(&[".", "[", "("]) {
            primary = match token.text.as_str() {
                "[" => {
                    let property = self.filter()?;
                    self.consume("]")?;
                    self.ast.add(NodeKind::Member {
                        object: primary,
                        property,
                        computed: true,
                    })
                }
                "." => {
                    let property = self.identifier()?;
                    self.ast.add(NodeKind::Member {
                        object: primary,
                        property,
                        computed: false,
                    })
                }
                _ => {
                    let arguments = self.arguments()?;
                    self.consume(")")?;
                    self.ast.add(NodeKind::Call {
                        callee: primary,
                        arguments,
                        filter: false,
                    })
                }
            };
        }
        Ok(primary)
    }

    /// `null`, `true`, `false`, `this` and `$locals`.
    fn keyword_constant(&self) -> Option<NodeKind> {
        let token = self.tokens.front().filter(|t| t.is_identifier())?;
        Some(match token.text.as_str() {
            "null" => NodeKind::Literal(Value::Null),
            "true" => NodeKind::Literal(Value::Bool(true)),
            "false" => NodeKind::Literal(Value::Bool(false)),
            "this" => NodeKind::This,
            "$locals" => NodeKind::Locals,
            _ => return None,
        })
    }

    fn array_declaration(&mut self) -> Result<NodeId> {
        let mut elements = Vec::new();
        if self.peek(&["]"]).is_none() {
            loop {
                elements.push(self.assignment()?);
                if self.expect(&[","]).is_none() {
                    break;
                }
            }
        }
        self.consume("]")?;
        Ok(self.ast.add(NodeKind::Array(elements)))
    }

    fn object(&mut self) -> Result<NodeId> {
        let mut properties = Vec::new();
        if self.peek(&["}"]).is_none() {
            loop {
                let key = match self.tokens.front() {
                    Some(token) if token.is_identifier() => self.take()?.text,
                    _ => {
                        let literal = self.constant()?;
                        match self.ast.kind(literal) {
                            NodeKind::Literal(value) => value.to_string(),
                            _ => unreachable!("constant() only builds literals"),
                        }
                    }
                };
                self.consume(":")?;
                let value = self.assignment()?;
                properties.push(self.ast.add(NodeKind::Property { key, value }));
                if self.expect(&[","]).is_none() {
                    break;
                }
            }
        }
        self.consume("}")?;
        Ok(self.ast.add(NodeKind::Object(properties)))
    }

    fn arguments(&mut self) -> Result<Vec<NodeId>> {
        let mut arguments = Vec::new();
        if self.peek(&[")"]).is_none() {
            loop {
                arguments.push(self.assignment()?);
                if self.expect(&[","]).is_none() {
                    break;
                }
            }
        }
        Ok(arguments)
    }

    fn identifier(&mut self) -> Result<NodeId> {
        let token = self.take()?;
        if !token.is_identifier() {
            return Err(Error::Syntax(format!(
                "expected an identifier but found '{}'",
                token.text
            )));
        }
        Ok(self.ast.add(NodeKind::Identifier(token.text)))
    }

    fn constant(&mut self) -> Result<NodeId> {
        let token = self.take()?;
        let value = match token.kind {
            TokenKind::Number(n) => Value::Number(n),
            TokenKind::String(s) => Value::String(s),
            _ => {
                return Err(Error::Syntax(format!(
                    "unexpected token '{}'",
                    token.text
                )))
            }
        };
        Ok(self.ast.add(NodeKind::Literal(value)))
    }

    /// The next token if it is one of `texts`.
    fn peek(&self, texts: &[&str]) -> Option<&Token> {
        self.tokens
            .front()
            .filter(|token| texts.iter().any(|text| token.is(text)))
    }

    /// Take the next token if it is one of `texts`.
    fn expect(&mut self, texts: &[&str]) -> Option<Token> {
        self.peek(texts)?;
        self.tokens.pop_front()
    }

    /// Take the next token, which must be `text`.
    fn consume(&mut self, text: &str) -> Result<Token> {
        if let Some(token) = self.expect(&[text]) {
            return Ok(token);
        }
        Err(Error::Syntax(match self.tokens.front() {
            Some(found) => format!("expected '{text}' but found '{}'", found.text),
            None => format!("expected '{text}' but reached the end of the expression"),
        }))
    }

    fn take(&mut self) -> Result<Token> {
        self.tokens
            .pop_front()
            .ok_or_else(|| Error::Syntax("unexpected end of expression".into()))
    }
}
