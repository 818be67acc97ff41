//! Dialogos Frontend
//!
//! JSON5 lexer and recursive-descent parser, the program AST, and the
//! static analyzer that runs before the interpreter ever sees a [`Program`].

pub mod analyze;
pub mod ast;
pub mod diagnostics;
pub mod lexer;
pub mod parser;

use diagnostics::Diagnostic;

/// Parse + build + analyze a JSON5 program document in one call. Returns
/// every diagnostic found rather than stopping at the first.
pub fn load_program(src: &str) -> Result<ast::Program, Vec<Diagnostic>> {
    let doc = match parser::Parser::parse_document(src) {
        Ok(doc) => doc,
        Err(e) => return Err(vec![Diagnostic::from(&e)]),
    };

    let program = match ast::build_program(&doc) {
        Ok(p) => p,
        Err(e) => return Err(vec![Diagnostic::from(&e)]),
    };

    let analyze_errors = analyze::analyze(&program);
    if !analyze_errors.is_empty() {
        return Err(analyze_errors.iter().map(Diagnostic::from).collect());
    }

    Ok(program)
}
