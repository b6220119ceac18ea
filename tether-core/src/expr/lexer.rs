//! Lexer
//!
//! Turns expression source into a flat token list. The lexer is a total
//! function over its input: every character either belongs to a token,
//! is skipped as whitespace, or produces an [`Error::Lex`] naming its
//! column.

use crate::error::{Error, Result};

/// Multi-character operators, longest first so matching is greedy.
const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "!", "=", "<",
    ">", "|",
];

const PUNCTUATION: &str = "[],{}:.()?;";

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    /// Decoded string contents (escapes already applied).
    String(String),
    Identifier,
    /// Operators and punctuation. The token text is the operator.
    Operator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Source text of the token. For strings this is the raw literal
    /// including quotes.
    pub text: String,
    pub kind: TokenKind,
}

impl Token {
    pub fn is_identifier(&self) -> bool {
        self.kind == TokenKind::Identifier
    }

    pub fn is(&self, text: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == text
    }
}

/// Tokenize `text`.
pub fn lex(text: &str) -> Result<Vec<Token>> {
    Lexer::new(text).run()
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            index: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() || (ch == '.' && self.peek(1).is_some_and(|c| c.is_ascii_digit())) {
                self.read_number()?;
            } else if ch == '\'' || ch == '"' {
                self.read_string(ch)?;
            } else if is_ident_start(ch) {
                self.read_identifier();
            } else if is_whitespace(ch) {
                self.index += 1;
            } else if PUNCTUATION.contains(ch) {
                self.push(ch.to_string(), TokenKind::Operator);
                self.index += 1;
            } else if let Some(op) = self.match_operator() {
                self.push(op.to_string(), TokenKind::Operator);
                self.index += op.len();
            } else {
                return Err(Error::lex(format!("unexpected character '{ch}'"), self.index));
            }
        }
        Ok(self.tokens)
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn push(&mut self, text: String, kind: TokenKind) {
        self.tokens.push(Token { text, kind });
    }

    fn match_operator(&self) -> Option<&'static str> {
        OPERATORS.iter().copied().find(|op| {
            op.chars()
                .enumerate()
                .all(|(offset, c)| self.peek(offset) == Some(c))
        })
    }

    fn read_number(&mut self) -> Result<()> {
        let start = self.index;
        let mut number = String::new();
        let mut seen_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                number.push(ch);
            } else if ch == '.' && !seen_dot {
                seen_dot = true;
                number.push(ch);
            } else {
                break;
            }
            self.index += 1;
        }

        if matches!(self.current(), Some('e' | 'E')) {
            number.push('e');
            self.index += 1;
            if let Some(sign @ ('+' | '-')) = self.current() {
                number.push(sign);
                self.index += 1;
            }
            if !self.current().is_some_and(|c| c.is_ascii_digit()) {
                return Err(Error::lex("invalid exponent", self.index));
            }
            while let Some(ch) = self.current().filter(char::is_ascii_digit) {
                number.push(ch);
                self.index += 1;
            }
        }

        let value: f64 = number
            .parse()
            .map_err(|_| Error::lex(format!("invalid number '{number}'"), start))?;
        self.push(number, TokenKind::Number(value));
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> Result<()> {
        let start = self.index;
        let mut raw = String::from(quote);
        let mut value = String::new();
        let mut escape = false;
        self.index += 1;

        while let Some(ch) = self.current() {
            raw.push(ch);
            if escape {
                if ch == 'u' {
                    let hex: String = self.chars.iter().skip(self.index + 1).take(4).collect();
                    let decoded = (hex.len() == 4 && hex.chars().all(|c| c.is_ascii_hexdigit()))
                        .then(|| u32::from_str_radix(&hex, 16).ok())
                        .flatten()
                        .and_then(char::from_u32)
                        .ok_or_else(|| Error::lex("invalid unicode escape", self.index))?;
                    raw.push_str(&hex);
                    value.push(decoded);
                    self.index += 4;
                } else {
                    value.push(match ch {
                        'n' => '\n',
                        'f' => '\u{000C}',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\u{000B}',
                        other => other,
                    });
                }
                escape = false;
            } else if ch == quote {
                self.index += 1;
                self.push(raw, TokenKind::String(value));
                return Ok(());
            } else if ch == '\\' {
                escape = true;
            } else {
                value.push(ch);
            }
            self.index += 1;
        }

        Err(Error::lex("unmatched quote", start))
    }

    fn read_identifier(&mut self) {
        let start = self.index;
        while self.current().is_some_and(is_ident_part) {
            self.index += 1;
        }
        let text: String = self.chars[start..self.index].iter().collect();
        self.push(text, TokenKind::Identifier);
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_part(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\r' | '\t' | '\n' | '\u{000B}' | '\u{00A0}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        lex(source).unwrap().into_iter().map(|t| t.text).collect()
    }

    fn single(source: &str) -> Token {
        let mut tokens = lex(source).unwrap();
        assert_eq!(tokens.len(), 1, "expected one token for {source:?}");
        tokens.remove(0)
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(single("42").kind, TokenKind::Number(42.0));
        assert_eq!(single("4.2").kind, TokenKind::Number(4.2));
        assert_eq!(single(".42").kind, TokenKind::Number(0.42));
        assert_eq!(single("42e3").kind, TokenKind::Number(42000.0));
        assert_eq!(single("42E-2").kind, TokenKind::Number(0.42));
        assert_eq!(single(".42e+2").kind, TokenKind::Number(42.0));
    }

    #[test]
    fn rejects_dangling_exponent() {
        assert!(matches!(lex("42e"), Err(Error::Lex { .. })));
        assert!(matches!(lex("42e-"), Err(Error::Lex { .. })));
        assert!(matches!(lex("42e-a"), Err(Error::Lex { .. })));
    }

    #[test]
    fn a_second_dot_starts_a_new_token() {
        assert_eq!(texts("1.2.3"), vec!["1.2", ".3"]);
    }

    #[test]
    fn lexes_strings_with_either_quote() {
        assert_eq!(single("'abc'").kind, TokenKind::String("abc".into()));
        assert_eq!(single("\"abc\"").kind, TokenKind::String("abc".into()));
        assert_eq!(single("\"it's\"").kind, TokenKind::String("it's".into()));
    }

    #[test]
    fn decodes_escapes() {
        assert_eq!(
            single(r#"'a\nb\tc\'d\"e\\f\qg'"#).kind,
            TokenKind::String("a\nb\tc'd\"e\\fqg".into())
        );
        assert_eq!(single("'\\u00A0'").kind, TokenKind::String("\u{00A0}".into()));
    }

    #[test]
    fn rejects_bad_unicode_escape() {
        let err = lex(r"'\u00T0'").unwrap_err();
        assert!(err.to_string().contains("invalid unicode escape"));
        assert!(lex(r"'\u12'").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = lex("'abc").unwrap_err();
        assert!(err.to_string().contains("unmatched quote"));
        assert!(lex("'abc\"").is_err());
    }

    #[test]
    fn lexes_identifiers() {
        let token = single("$a_b1");
        assert!(token.is_identifier());
        assert_eq!(token.text, "$a_b1");
        assert_eq!(texts("a.b"), vec!["a", ".", "b"]);
    }

    #[test]
    fn operators_match_longest_first() {
        assert_eq!(texts("a===b"), vec!["a", "===", "b"]);
        assert_eq!(texts("a!==b"), vec!["a", "!==", "b"]);
        assert_eq!(texts("a<=b"), vec!["a", "<=", "b"]);
        assert_eq!(texts("!a||b|c"), vec!["!", "a", "||", "b", "|", "c"]);
    }

    #[test]
    fn skips_whitespace() {
        assert_eq!(texts(" a \t\n\r\u{000B}\u{00A0}+ 1 "), vec!["a", "+", "1"]);
        assert!(lex("   ").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = lex("a # b").unwrap_err();
        assert_eq!(
            err,
            Error::Lex {
                message: "unexpected character '#'".into(),
                position: 2
            }
        );
        assert!(lex("a & b").is_err());
    }
}
