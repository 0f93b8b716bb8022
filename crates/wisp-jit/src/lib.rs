//! Native code generation and the compiler driver.
//!
//! [`codegen`] turns one post-closure-conversion function into Cranelift
//! IR calling into `wisp-runtime`'s tagged-value primitives. [`driver`]
//! owns the process-wide state the pipeline needs between top-level
//! forms: the prototype table, the buffered-but-not-yet-compiled
//! function list, and the JIT module itself (see the concurrency section
//! of the design: all of this is main-thread-only, mutated one top-level
//! form at a time).

mod codegen;
mod driver;
mod error;

pub use driver::Driver;
pub use error::Error;
