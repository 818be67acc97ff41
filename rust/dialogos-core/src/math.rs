//! Math sub-language (spec §4.3): additive over multiplicative over unary
//! minus over atoms, with parentheses and a handful of named functions.
//! Everything reduces to `i64`; anything else is a [`MathError`].

use crate::value::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MathError {
    #[error("unexpected character '{0}' in math expression")]
    UnexpectedChar(char),
    #[error("unexpected end of math expression")]
    UnexpectedEnd,
    #[error("expected {expected}, found '{found}'")]
    Expected { expected: &'static str, found: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("'{0}' is not a list-valued or string-valued insert")]
    NotListOrString(String),
    #[error("unknown insert '{0}'")]
    UnknownInsert(String),
    #[error("min()/max() needs at least one argument")]
    EmptyArgs,
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("result is not an integer")]
    NotInteger,
}

/// Host callback: resolve a bare name used inside `length(name)` /
/// `min(name)` / `max(name)` to a list (for `length`/`min`/`max` over a
/// list-valued insert) or a string (for `length` over a string-valued
/// insert).
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok {
    Int(i64),
    Ident, // function name follows in `text`
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

struct Token {
    kind: Tok,
    text: String,
}

fn lex(src: &str) -> Result<Vec<Token>, MathError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                out.push(Token { kind: Tok::Plus, text: "+".into() });
                i += 1;
            }
            '-' => {
                out.push(Token { kind: Tok::Minus, text: "-".into() });
                i += 1;
            }
            '*' => {
                out.push(Token { kind: Tok::Star, text: "*".into() });
                i += 1;
            }
            '/' => {
                out.push(Token { kind: Tok::Slash, text: "/".into() });
                i += 1;
            }
            '%' => {
                out.push(Token { kind: Tok::Percent, text: "%".into() });
                i += 1;
            }
            '(' => {
                out.push(Token { kind: Tok::LParen, text: "(".into() });
                i += 1;
            }
            ')' => {
                out.push(Token { kind: Tok::RParen, text: ")".into() });
                i += 1;
            }
            ',' => {
                out.push(Token { kind: Tok::Comma, text: ",".into() });
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: i64 = text.parse().map_err(|_| MathError::Overflow)?;
                out.push(Token { kind: Tok::Int(n), text });
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                out.push(Token { kind: Tok::Ident, text });
            }
            other => return Err(MathError::UnexpectedChar(other)),
        }
    }
    Ok(out)
}

struct Parser<'a, R: NameResolver> {
    toks: Vec<Token>,
    pos: usize,
    resolver: &'a R,
}

impl<'a, R: NameResolver> Parser<'a, R> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.toks.get(self.pos);
        self.pos += 1;
        t
    }

    fn parse_additive(&mut self) -> Result<i64, MathError> {
        let mut acc = self.parse_multiplicative()?;
        loop {
            match self.peek().map(|t| t.kind) {
                Some(Tok::Plus) => {
                    self.bump();
                    let rhs = self.parse_multiplicative()?;
                    acc = acc.checked_add(rhs).ok_or(MathError::Overflow)?;
                }
                Some(Tok::Minus) => {
                    self.bump();
                    let rhs = self.parse_multiplicative()?;
                    acc = acc.checked_sub(rhs).ok_or(MathError::Overflow)?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn parse_multiplicative(&mut self) -> Result<i64, MathError> {
        let mut acc = self.parse_unary()?;
        loop {
            match self.peek().map(|t| t.kind) {
                Some(Tok::Star) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    acc = acc.checked_mul(rhs).ok_or(MathError::Overflow)?;
                }
                Some(Tok::Slash) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    if rhs == 0 {
                        return Err(MathError::DivisionByZero);
                    }
                    acc = acc.checked_div(rhs).ok_or(MathError::Overflow)?;
                }
                Some(Tok::Percent) => {
                    self.bump();
                    let rhs = self.parse_unary()?;
                    if rhs == 0 {
                        return Err(MathError::DivisionByZero);
                    }
                    acc = acc.checked_rem(rhs).ok_or(MathError::Overflow)?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn parse_unary(&mut self) -> Result<i64, MathError> {
        if let Some(Tok::Minus) = self.peek().map(|t| t.kind) {
            self.bump();
            let v = self.parse_unary()?;
            return v.checked_neg().ok_or(MathError::Overflow);
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<i64, MathError> {
        match self.bump().map(|t| (t.kind, t.text.clone())) {
            Some((Tok::Int(n), _)) => Ok(n),
            Some((Tok::LParen, _)) => {
                let v = self.parse_additive()?;
                match self.bump().map(|t| t.kind) {
                    Some(Tok::RParen) => Ok(v),
                    other => Err(MathError::Expected {
                        expected: ")",
                        found: format!("{other:?}"),
                    }),
                }
            }
            Some((Tok::Ident, name)) => self.parse_call(&name),
            Some((_, text)) => Err(MathError::Expected { expected: "atom", found: text }),
            None => Err(MathError::UnexpectedEnd),
        }
    }

    fn expect_lparen(&mut self) -> Result<(), MathError> {
        match self.bump().map(|t| t.kind) {
            Some(Tok::LParen) => Ok(()),
            other => Err(MathError::Expected { expected: "(", found: format!("{other:?}") }),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), MathError> {
        match self.bump().map(|t| t.kind) {
            Some(Tok::RParen) => Ok(()),
            other => Err(MathError::Expected { expected: ")", found: format!("{other:?}") }),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<i64, MathError> {
        match name {
            "length" => {
                self.expect_lparen()?;
                // `length(name)` takes a bare insert name, not a sub-expression.
                let ident = match self.bump() {
                    Some(t) if t.kind == Tok::Ident => t.text.clone(),
                    other => {
                        return Err(MathError::Expected {
                            expected: "insert name",
                            found: format!("{:?}", other.map(|t| &t.text)),
                        })
                    }
                };
                self.expect_rparen()?;
                let value = self
                    .resolver
                    .resolve(&ident)
                    .ok_or_else(|| MathError::UnknownInsert(ident.clone()))?;
                match value {
                    Value::List(items) => Ok(items.len() as i64),
                    Value::String(s) => Ok(s.chars().count() as i64),
                    _ => Err(MathError::NotListOrString(ident)),
                }
            }
            "min" | "max" => {
                self.expect_lparen()?;
                // Either a comma-separated list of sub-expressions, or a
                // single bare name naming a list-valued insert.
                if let Some(Tok::Ident) = self.peek().map(|t| t.kind) {
                    let save = self.pos;
                    let ident = self.peek().unwrap().text.clone();
                    self.bump();
                    if matches!(self.peek().map(|t| t.kind), Some(Tok::RParen)) {
                        self.bump();
                        let value = self
                            .resolver
                            .resolve(&ident)
                            .ok_or_else(|| MathError::UnknownInsert(ident.clone()))?;
                        let items = value
                            .as_list()
                            .ok_or_else(|| MathError::NotListOrString(ident.clone()))?;
                        let ints: Result<Vec<i64>, MathError> = items
                            .iter()
                            .map(|v| v.as_int().ok_or(MathError::NotInteger))
                            .collect();
                        let ints = ints?;
                        return reduce(name, &ints);
                    }
                    self.pos = save;
                }
                let mut args = vec![self.parse_additive()?];
                while matches!(self.peek().map(|t| t.kind), Some(Tok::Comma)) {
                    self.bump();
                    args.push(self.parse_additive()?);
                }
                self.expect_rparen()?;
                reduce(name, &args)
            }
            "round" => {
                self.expect_lparen()?;
                let v = self.parse_additive()?;
                self.expect_rparen()?;
                Ok(v)
            }
            "sign" => {
                self.expect_lparen()?;
                let v = self.parse_additive()?;
                self.expect_rparen()?;
                Ok(v.signum())
            }
            other => Err(MathError::UnknownFunction(other.to_string())),
        }
    }
}

fn reduce(name: &str, args: &[i64]) -> Result<i64, MathError> {
    if args.is_empty() {
        return Err(MathError::EmptyArgs);
    }
    Ok(match name {
        "min" => *args.iter().min().unwrap(),
        "max" => *args.iter().max().unwrap(),
        _ => unreachable!(),
    })
}

/// Evaluate a math expression (already interpolated by the caller) against
/// a name resolver for `length`/`min`/`max` over inserts.
pub fn eval(expr: &str, resolver: &impl NameResolver) -> Result<i64, MathError> {
    let toks = lex(expr)?;
    let mut parser = Parser { toks, pos: 0, resolver };
    let v = parser.parse_additive()?;
    if parser.pos != parser.toks.len() {
        return Err(MathError::Expected {
            expected: "end of expression",
            found: parser.toks[parser.pos].text.clone(),
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Env(Vec<(&'static str, Value)>);
    impl NameResolver for Env {
        fn resolve(&self, name: &str) -> Option<Value> {
            self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let env = Env(vec![]);
        assert_eq!(eval("1+2*3", &env), Ok(7));
        assert_eq!(eval("(1+2)*3", &env), Ok(9));
        assert_eq!(eval("-3+5", &env), Ok(2));
    }

    #[test]
    fn division_truncates_toward_zero_and_mod_signed() {
        let env = Env(vec![]);
        assert_eq!(eval("7/2", &env), Ok(3));
        assert_eq!(eval("-7/2", &env), Ok(-3));
        assert_eq!(eval("-7%2", &env), Ok(-1));
        assert_eq!(eval("7%-2", &env), Ok(1));
    }

    #[test]
    fn division_by_zero_errors() {
        let env = Env(vec![]);
        assert_eq!(eval("1/0", &env), Err(MathError::DivisionByZero));
    }

    #[test]
    fn max_min_and_length_with_list_insert() {
        let env = Env(vec![("xs", Value::List(vec![Value::Int(10), Value::Int(20)]))]);
        assert_eq!(eval("max(1,2,3)+length(xs)", &env), Ok(5));
        assert_eq!(eval("min(xs)", &env), Ok(10));
        assert_eq!(eval("max(xs)", &env), Ok(20));
    }

    #[test]
    fn length_over_string_insert_counts_chars() {
        let env = Env(vec![("s", Value::String("héllo".into()))]);
        assert_eq!(eval("length(s)", &env), Ok(5));
    }

    #[test]
    fn sign_function() {
        let env = Env(vec![]);
        assert_eq!(eval("sign(-5)", &env), Ok(-1));
        assert_eq!(eval("sign(0)", &env), Ok(0));
        assert_eq!(eval("sign(5)", &env), Ok(1));
    }

    #[test]
    fn overflow_is_an_error_not_a_wrap() {
        let env = Env(vec![]);
        let expr = format!("{}*2", i64::MAX);
        assert_eq!(eval(&expr, &env), Err(MathError::Overflow));
    }
}
