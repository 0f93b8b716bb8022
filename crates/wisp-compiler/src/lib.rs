//! Front end and closure-conversion middle end for the wisp language.
//!
//! `lexer` and `parser` turn source text into an [`ast::Expr`] tree, with
//! `cond` already lowered to nested `if` (see [`parser`]). `closure_convert`
//! is the core of this crate: it flattens nested function definitions to
//! top level and rewrites free-variable access into explicit boxing and
//! closure-field loads. `diagnostics` is the shared error-reporting type
//! every stage emits through.

pub mod ast;
pub mod closure_convert;
pub mod diagnostics;
mod error;
pub mod lexer;
pub mod parser;

pub use error::Error;

use diagnostics::Diagnostics;

/// Result of lexing + parsing + lowering one top-level form.
pub type ParseResult = (Option<ast::Expr>, Diagnostics);

/// Parse a single top-level form out of `tokens`, advancing `tokens` past
/// it. On a syntax error this returns `(None, diagnostics)` having
/// consumed exactly one token, matching the driver's resynchronization
/// contract.
pub fn parse_top_level_form(
    tokens: &mut lexer::TokenStream<'_>,
    interner: &mut wisp_core::Interner,
) -> ParseResult {
    parser::parse_top_level(tokens, interner)
}
