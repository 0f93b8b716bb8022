#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A semantic-at-compile-time condition (unbound name, wrong argument
    /// count to a direct call, ...) was already reported into the
    /// `Diagnostics` batch passed to `compile_function`. Carries no text
    /// of its own: it only unwinds the current function's codegen so the
    /// caller can discard the partially built function and move on.
    #[error("semantic error reported via diagnostics")]
    Semantic,
    #[error("cranelift module error: {0}")]
    Module(#[from] cranelift_module::ModuleError),
    #[error("code generation error: {0}")]
    Codegen(#[from] cranelift_codegen::CodegenError),
    #[error("failed to initialize the JIT backend: {0}")]
    Jit(String),
}
