//! Closure conversion: the core transformation of this compiler.
//!
//! [`convert`] takes one top-level [`Function`](crate::ast::Function) as
//! parsed (possibly containing nested `Function` definitions) and returns
//! a flat list of top-level functions with every nested definition lifted
//! out, every escaping binding boxed, and every captured reference
//! rewritten into an indexed closure-field load. See the module-level
//! phases below; they correspond directly to Phase A-D as designed.

mod convert;
mod scope;

pub use convert::convert;
pub use scope::ScopeRecord;
