//! A segregated-fit heap allocator built directly on anonymous memory
//! mappings.
//!
//! Requests below 32 bytes are served from bitmap-tracked containers of
//! power-of-two slots. Everything else is carved from mapped regions: free
//! chunks sit in bins grouped by order of magnitude, are split on allocation
//! and coalesced with their neighbours on release, and a region is unmapped
//! as soon as a single free chunk spans it again.
//!
//! The free functions operate on a heap owned by the calling thread, created
//! on first use from [`Config::from_env`]. A [`Heap`] can also be owned
//! directly.
//!
//! ```rust
//! let ptr = segalloc::alloc(70).unwrap();
//!
//! unsafe {
//!     ptr.as_ptr().write_bytes(7, 70);
//!     segalloc::free(ptr.as_ptr()).unwrap();
//! }
//!
//! assert_eq!(segalloc::stats().allocated_chunks, 0);
//! ```

mod bins;
mod chunk;
mod config;
mod constants;
mod container;
mod error;
mod header;
mod heap;
mod large;
mod region;
mod size_class;
mod small;
mod stats;
mod trace;

use std::cell::RefCell;
use std::ptr::NonNull;

pub use config::{Config, TraceTarget, TRACE_VAR};
pub use constants::{MAX_ALIGN, SMALL_LIMIT};
pub use error::AllocError;
pub use heap::Heap;
pub use stats::Stats;
pub use trace::{CsvTrace, Op, Timer, TraceSink};

thread_local! {
    static HEAP: RefCell<Heap> = RefCell::new(Heap::with_config(&Config::from_env()));
}

/// Allocates `size` bytes, aligned to [`MAX_ALIGN`].
pub fn alloc(size: isize) -> Result<NonNull<u8>, AllocError> {
    HEAP.with(|heap| heap.borrow_mut().alloc(size))
}

/// Releases memory returned by [`alloc`] on this thread.
///
/// # Safety
/// `ptr` must not be used after this call, and must not point into this
/// thread's heap unless it came from [`alloc`].
pub unsafe fn free(ptr: *mut u8) -> Result<usize, AllocError> {
    HEAP.with(|heap| heap.borrow_mut().free(ptr))
}

pub fn stats() -> Stats {
    HEAP.with(|heap| heap.borrow().stats())
}

/// Directs trace output for this thread's heap. Succeeds at most once,
/// including any destination picked up from the environment.
pub fn set_trace(target: TraceTarget) -> Result<(), AllocError> {
    HEAP.with(|heap| heap.borrow_mut().set_trace_target(&target))
}

pub fn close_trace() -> Result<(), AllocError> {
    HEAP.with(|heap| heap.borrow_mut().close_trace())
}
