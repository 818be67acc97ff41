//! Hand-rolled JSON5 lexer.
//!
//! JSON5 permits `//` and `/* */` comments, trailing commas, unquoted
//! identifier keys, and both single- and double-quoted strings. This
//! tracks source line numbers through all of it so the parser can stamp
//! every task object with the line its opening `{` appeared on.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}")]
    UnexpectedChar { ch: char, line: usize },
    #[error("unterminated string starting at line {line}")]
    UnterminatedString { line: usize },
    #[error("unterminated block comment starting at line {line}")]
    UnterminatedComment { line: usize },
    #[error("invalid number at line {line}")]
    InvalidNumber { line: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub struct Lexer {
    src: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    pub fn new(src: &str) -> Self {
        Self { src: src.chars().collect(), pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
        c
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let start_line = self.line;
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            None => return Err(LexError::UnterminatedComment { line: start_line }),
                            Some('*') if self.peek2() == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> Result<String, LexError> {
        let start_line = self.line;
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(LexError::UnterminatedString { line: start_line }),
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    // Escaped braces must survive an interpolation pass
                    // unchanged (spec §6), so they pass through the lexer
                    // unchanged too.
                    Some('{') => out.push_str("\\{"),
                    Some('}') => out.push_str("\\}"),
                    Some('\n') => {} // line continuation
                    Some(other) => out.push(other),
                    None => return Err(LexError::UnterminatedString { line: start_line }),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn read_number(&mut self) -> Result<TokenKind, LexError> {
        let start_line = self.line;
        let start = self.pos;
        if matches!(self.peek(), Some('+') | Some('-')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else if c == '.' && !is_float {
                is_float = true;
                self.bump();
            } else if (c == 'e' || c == 'E')
                && matches!(self.src.get(self.pos + 1), Some('+') | Some('-') | Some('0'..='9'))
            {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| LexError::InvalidNumber { line: start_line })
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| LexError::InvalidNumber { line: start_line })
        }
    }

    fn read_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.bump();
            } else {
                break;
            }
        }
        self.src[start..self.pos].iter().collect()
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, line });
        };
        let kind = match c {
            '{' => {
                self.bump();
                TokenKind::LBrace
            }
            '}' => {
                self.bump();
                TokenKind::RBrace
            }
            '[' => {
                self.bump();
                TokenKind::LBracket
            }
            ']' => {
                self.bump();
                TokenKind::RBracket
            }
            ':' => {
                self.bump();
                TokenKind::Colon
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '\'' | '"' => TokenKind::Str(self.read_string(c)?),
            '+' | '-' => self.read_number()?,
            c if c.is_ascii_digit() => self.read_number()?,
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let ident = self.read_ident();
                match ident.as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    _ => TokenKind::Ident(ident),
                }
            }
            other => return Err(LexError::UnexpectedChar { ch: other, line }),
        };
        Ok(Token { kind, line })
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            out.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_unquoted_keys_and_trailing_commas() {
        let toks = Lexer::new("{a: 1, b: 2,}").tokenize().unwrap();
        assert_eq!(
            toks.iter().map(|t| t.kind.clone()).collect::<Vec<_>>(),
            vec![
                TokenKind::LBrace,
                TokenKind::Ident("a".into()),
                TokenKind::Colon,
                TokenKind::Int(1),
                TokenKind::Comma,
                TokenKind::Ident("b".into()),
                TokenKind::Colon,
                TokenKind::Int(2),
                TokenKind::Comma,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_line_and_block_comments() {
        let toks = Lexer::new("{ // hi\n a: 1 /* mid */ }").tokenize().unwrap();
        assert!(toks.iter().any(|t| t.kind == TokenKind::Ident("a".into())));
    }

    #[test]
    fn tracks_line_numbers_across_newlines() {
        let toks = Lexer::new("{\n  a: 1,\n  b: 2\n}").tokenize().unwrap();
        let b_tok = toks.iter().find(|t| t.kind == TokenKind::Ident("b".into())).unwrap();
        assert_eq!(b_tok.line, 3);
    }

    #[test]
    fn escaped_braces_survive_unchanged() {
        let toks = Lexer::new(r#"{a: "\{x\}"}"#).tokenize().unwrap();
        let str_tok = toks.iter().find_map(|t| match &t.kind {
            TokenKind::Str(s) => Some(s.clone()),
            _ => None,
        });
        assert_eq!(str_tok.unwrap(), "\\{x\\}");
    }

    #[test]
    fn negative_and_float_numbers() {
        let toks = Lexer::new("[-3, 4.5, 1e3]").tokenize().unwrap();
        let kinds: Vec<TokenKind> = toks.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LBracket,
                TokenKind::Int(-3),
                TokenKind::Comma,
                TokenKind::Float(4.5),
                TokenKind::Comma,
                TokenKind::Float(1000.0),
                TokenKind::RBracket,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let result = Lexer::new("{a: \"abc").tokenize();
        assert!(matches!(result, Err(LexError::UnterminatedString { .. })));
    }
}
