//! Internal-invariant failures, as opposed to user-facing diagnostics
//! (see [`crate::diagnostics`]). These indicate a bug in the pass itself,
//! not a mistake in the input program.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`_obj` is a reserved identifier and cannot be used in user code")]
    ReservedIdentifier,
    #[error("closure conversion referenced unknown flat function `{0}`")]
    UnknownFlatName(String),
}
