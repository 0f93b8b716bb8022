//! The root-stack (shadow-stack) convention generated code uses to keep
//! live heap values reachable across calls.
//!
//! There is no collector behind this yet (out of scope); the root stack
//! exists so a future collector can walk it, and so the ABI generated code
//! targets is already shaped the way a real GC runtime would need.
//!
//! A frame is `[n<<1][prev][slot0..slot(n-1)]`, linked through a
//! thread-local pointer named `pgcstack` in the ABI. `n` is tagged with a
//! low bit (always 0 here) the way shadow-stack conventions commonly
//! reserve it for a "is this frame being unwound" marker.

use std::cell::Cell;

#[repr(C)]
pub struct RootFrame {
    tagged_len: usize,
    prev: *mut RootFrame,
}

thread_local! {
    static PGC_STACK: Cell<*mut RootFrame> = Cell::new(std::ptr::null_mut());
}

fn slots_ptr(frame: *mut RootFrame) -> *mut *mut u8 {
    unsafe { (frame as *mut u8).add(std::mem::size_of::<RootFrame>()) as *mut *mut u8 }
}

/// Push a new frame of `n` root slots onto the current thread's root
/// stack and return a pointer to its first slot, for generated code to
/// fill in with the formals it must keep alive.
///
/// # Safety
/// Caller must pop the frame (via [`pop_root_frame`]) on every exit path,
/// including error paths, before the thread-local pointer is read again.
pub unsafe extern "C" fn push_root_frame(n: usize) -> *mut *mut u8 {
    let layout = std::alloc::Layout::from_size_align(
        std::mem::size_of::<RootFrame>() + n * std::mem::size_of::<*mut u8>(),
        std::mem::align_of::<RootFrame>(),
    )
    .expect("root frame layout is always valid");
    let frame = std::alloc::alloc(layout) as *mut RootFrame;
    let prev = PGC_STACK.with(|cell| cell.get());
    (*frame).tagged_len = n << 1;
    (*frame).prev = prev;
    PGC_STACK.with(|cell| cell.set(frame));
    slots_ptr(frame)
}

/// Pop the current thread's top root-stack frame, restoring `pgcstack` to
/// the previous frame.
///
/// # Safety
/// There must be a frame pushed by [`push_root_frame`] currently on top.
pub unsafe extern "C" fn pop_root_frame() {
    PGC_STACK.with(|cell| {
        let frame = cell.get();
        debug_assert!(!frame.is_null(), "pop_root_frame with empty root stack");
        let prev = (*frame).prev;
        let n = (*frame).tagged_len >> 1;
        let layout = std::alloc::Layout::from_size_align(
            std::mem::size_of::<RootFrame>() + n * std::mem::size_of::<*mut u8>(),
            std::mem::align_of::<RootFrame>(),
        )
        .expect("root frame layout is always valid");
        std::alloc::dealloc(frame as *mut u8, layout);
        cell.set(prev);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_restores_empty_stack() {
        unsafe {
            let slots = push_root_frame(2);
            *slots.add(0) = std::ptr::null_mut();
            *slots.add(1) = std::ptr::null_mut();
            pop_root_frame();
        }
        assert!(PGC_STACK.with(|cell| cell.get().is_null()));
    }

    #[test]
    fn nested_frames_link_through_prev() {
        unsafe {
            let _outer = push_root_frame(1);
            let outer_frame = PGC_STACK.with(|cell| cell.get());
            let _inner = push_root_frame(1);
            let inner_frame = PGC_STACK.with(|cell| cell.get());
            assert_eq!((*inner_frame).prev, outer_frame);
            pop_root_frame();
            assert_eq!(PGC_STACK.with(|cell| cell.get()), outer_frame);
            pop_root_frame();
        }
    }
}
