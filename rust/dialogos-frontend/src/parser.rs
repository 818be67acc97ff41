//! Recursive-descent parser over the JSON5 token stream, producing a
//! source-line-annotated value tree.

use crate::lexer::{LexError, Lexer, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("expected {expected} at line {line}, found {found:?}")]
    Expected { expected: &'static str, found: TokenKind, line: usize },
    #[error("trailing content after top-level value at line {line}")]
    TrailingContent { line: usize },
}

/// A parsed JSON5 value, still shaped as data (booleans/numbers/strings/
/// arrays/objects) rather than a task tree — `ast.rs` builds the task tree
/// on top of this.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Spanned<JsonValue>>),
    /// Insertion-ordered key/value pairs (JSON5 objects read their keys in
    /// declaration order; program semantics never depend on ordering, but
    /// diagnostics and `show_inserts`-style rendering read more naturally
    /// when they do not silently re-sort a user's document).
    Object(Vec<(String, Spanned<JsonValue>)>),
}

/// A value paired with the 1-based source line its first token started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub line: usize,
}

impl JsonValue {
    pub fn as_object(&self) -> Option<&[(String, Spanned<JsonValue>)]> {
        match self {
            JsonValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn get<'a>(&'a self, key: &str) -> Option<&'a Spanned<JsonValue>> {
        self.as_object()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn parse_document(src: &str) -> Result<Spanned<JsonValue>, ParseError> {
        let toks = Lexer::new(src).tokenize()?;
        let mut p = Parser { toks, pos: 0 };
        let value = p.parse_value()?;
        match p.peek().kind.clone() {
            TokenKind::Eof => Ok(value),
            _ => Err(ParseError::TrailingContent { line: p.peek().line }),
        }
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: &TokenKind, expected: &'static str) -> Result<Token, ParseError> {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            Ok(self.bump())
        } else {
            Err(ParseError::Expected {
                expected,
                found: self.peek().kind.clone(),
                line: self.peek().line,
            })
        }
    }

    fn parse_value(&mut self) -> Result<Spanned<JsonValue>, ParseError> {
        let line = self.peek().line;
        let value = match self.peek().kind.clone() {
            TokenKind::LBrace => self.parse_object()?,
            TokenKind::LBracket => self.parse_array()?,
            TokenKind::Str(s) => {
                self.bump();
                JsonValue::String(s)
            }
            TokenKind::Int(n) => {
                self.bump();
                JsonValue::Int(n)
            }
            TokenKind::Float(f) => {
                self.bump();
                JsonValue::Float(f)
            }
            TokenKind::True => {
                self.bump();
                JsonValue::Bool(true)
            }
            TokenKind::False => {
                self.bump();
                JsonValue::Bool(false)
            }
            TokenKind::Null => {
                self.bump();
                JsonValue::Null
            }
            other => {
                return Err(ParseError::Expected { expected: "value", found: other, line })
            }
        };
        Ok(Spanned { value, line })
    }

    fn parse_array(&mut self) -> Result<JsonValue, ParseError> {
        self.expect(&TokenKind::LBracket, "[")?;
        let mut items = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RBracket {
                self.bump();
                break;
            }
            items.push(self.parse_value()?);
            match self.peek().kind.clone() {
                TokenKind::Comma => {
                    self.bump();
                }
                TokenKind::RBracket => {
                    self.bump();
                    break;
                }
                other => {
                    return Err(ParseError::Expected {
                        expected: ", or ]",
                        found: other,
                        line: self.peek().line,
                    })
                }
            }
        }
        Ok(JsonValue::Array(items))
    }

    fn parse_object(&mut self) -> Result<JsonValue, ParseError> {
        self.expect(&TokenKind::LBrace, "{")?;
        let mut fields = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RBrace {
                self.bump();
                break;
            }
            let key = match self.bump().kind {
                TokenKind::Ident(s) => s,
                TokenKind::Str(s) => s,
                other => {
                    return Err(ParseError::Expected {
                        expected: "object key",
                        found: other,
                        line: self.peek().line,
                    })
                }
            };
            self.expect(&TokenKind::Colon, ":")?;
            let value = self.parse_value()?;
            fields.push((key, value));
            match self.peek().kind.clone() {
                TokenKind::Comma => {
                    self.bump();
                }
                TokenKind::RBrace => {
                    self.bump();
                    break;
                }
                other => {
                    return Err(ParseError::Expected {
                        expected: ", or }",
                        found: other,
                        line: self.peek().line,
                    })
                }
            }
        }
        Ok(JsonValue::Object(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_object_with_line_numbers() {
        let src = "{\n  order: [\n    {cmd: 'print', text: 'hi'}\n  ]\n}";
        let doc = Parser::parse_document(src).unwrap();
        let order = doc.value.get("order").unwrap();
        let JsonValue::Array(items) = &order.value else { panic!("expected array") };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].line, 3);
    }

    #[test]
    fn parses_trailing_commas_and_unquoted_keys() {
        let src = "{a: 1, b: [1, 2,],}";
        let doc = Parser::parse_document(src).unwrap();
        assert!(doc.value.get("a").is_some());
        assert!(doc.value.get("b").is_some());
    }

    #[test]
    fn rejects_trailing_content() {
        let src = "{a: 1} garbage";
        let result = Parser::parse_document(src);
        assert!(matches!(result, Err(ParseError::TrailingContent { .. })));
    }

    #[test]
    fn missing_colon_is_a_parse_error() {
        let src = "{a 1}";
        let result = Parser::parse_document(src);
        assert!(result.is_err());
    }
}
