//! The tagged-value runtime the JIT-generated code calls into.
//!
//! This crate has no knowledge of the surface language or the closure
//! conversion pass; it is a small C-ABI library of heap records and
//! primitives over them, in the spirit of a GC runtime's object layer.
//! Everything here is `extern "C"` and operates on raw pointers because
//! the only caller is generated machine code, never safe Rust.

mod gcroot;
mod value;

pub use gcroot::{pop_root_frame, push_root_frame, RootFrame};
pub use value::{
    as_bool, binary_int64, boxed, closure, error, get_callable, getfield, int64_bits, new_fptr,
    new_int64, set_box, typeof_raw, typeof_tag, unbox, BinOp, Kind, Value, BT_FALSE, BT_TRUE,
};
