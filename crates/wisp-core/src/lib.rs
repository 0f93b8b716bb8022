//! Shared low-level types used across the compiler, runtime and JIT crates.
//!
//! Currently this is just string interning: every identifier and generated
//! flat name that flows through the pipeline is represented as a [`Symbol`]
//! rather than an owned `String`, so name comparisons during closure
//! conversion stay O(1).

mod interner;

pub use interner::{Interner, Symbol};
