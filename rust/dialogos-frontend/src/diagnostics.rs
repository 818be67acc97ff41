//! Human-readable diagnostic rendering (spec §7: `"Error at line L: <message>"`).

use crate::analyze::AnalyzeError;
use crate::ast::AstError;
use crate::parser::ParseError;
use std::fmt;

/// A diagnostic with the source line it pertains to, when one is known.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Error at line {line}: {}", self.message),
            None => write!(f, "Error: {}", self.message),
        }
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let line = match e {
            ParseError::Lex(_) => None,
            ParseError::Expected { line, .. } => Some(*line),
            ParseError::TrailingContent { line } => Some(*line),
        };
        Diagnostic { line, message: e.to_string() }
    }
}

impl From<&AstError> for Diagnostic {
    fn from(e: &AstError) -> Self {
        let line = match e {
            AstError::MissingCmd { line } => Some(*line),
            AstError::CmdNotString { line } => Some(*line),
            AstError::ExpectedObject { line } => Some(*line),
            AstError::ExpectedArray { line, .. } => Some(*line),
            AstError::RootNotObject => None,
        };
        Diagnostic { line, message: e.to_string() }
    }
}

impl From<&AnalyzeError> for Diagnostic {
    fn from(e: &AnalyzeError) -> Self {
        let line = match e {
            AnalyzeError::UnknownCommand { line, .. } => Some(*line),
            AnalyzeError::MissingField { line, .. } => Some(*line),
            AnalyzeError::WrongShape { line, .. } => Some(*line),
            AnalyzeError::UnresolvableLabel { line, .. } => Some(*line),
        };
        Diagnostic { line, message: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_line_prefix() {
        let d = Diagnostic { line: Some(7), message: "boom".to_string() };
        assert_eq!(d.to_string(), "Error at line 7: boom");
    }
}
