//! The minimal allocate/free contract the kernel consumes for
//! kernel-allocated ("dynamic form") objects (§6.4).
//!
//! The core deliberately does not pick or embed an allocator implementation;
//! a port or application wires one in. The kernel never calls this from
//! inside a critical section (`create`/`delete` only, never a fast path).

/// Thread-safe allocate/free contract (§6.4: "Thread-safe; no reentrance
/// requirements from within kernel calls").
pub trait Allocator: Sync {
    /// Returns a pointer to at least `bytes` of suitably-aligned memory, or
    /// `None` if the request cannot be satisfied.
    fn alloc(&self, bytes: usize) -> Option<*mut u8>;

    /// Returns a block previously obtained from [`Allocator::alloc`] on the
    /// same allocator.
    ///
    /// # Safety
    /// `ptr` must have been returned by `alloc` on `self` and not already
    /// freed.
    unsafe fn free(&self, ptr: *mut u8);
}
