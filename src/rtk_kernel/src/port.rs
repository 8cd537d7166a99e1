//! The platform port contract (§4.A, §6.2).
//!
//! `rtk_kernel` is the only crate that knows about ready sets, wait queues,
//! and priority inheritance; it knows nothing about Cortex-M exception
//! frames. Everything architecture-specific is behind this trait, which a
//! board crate (e.g. `rtk_port_cm4`) implements once. No other module in
//! this crate may reference architecture state directly.
use rtk_core::time::Instant;

/// Opaque, port-defined interrupt-enable state as returned by
/// [`Port::mask_interrupts`] and consumed by [`Port::restore_interrupts`].
///
/// Kept as an associated type (rather than a fixed `bool`) because some
/// architectures encode more than "on/off" in their interrupt-mask register.
pub trait Port: 'static {
    type InterruptState: Copy;

    /// Mask interrupts at or below the kernel's boundary and return the
    /// previous state. Must be callable from both task and ISR context.
    fn mask_interrupts() -> Self::InterruptState;

    /// Restore a previously-saved interrupt state.
    ///
    /// # Safety
    /// `prev` must have been returned by a matching [`Port::mask_interrupts`]
    /// call with no other restore in between.
    unsafe fn restore_interrupts(prev: Self::InterruptState);

    /// Write an architectural exception frame onto the task's stack such
    /// that, on first dispatch, PC = `entry`, the first argument register
    /// holds `arg`, LR = `exit_handler`, and the processor is in Thumb
    /// state (§4.A). Returns the new top-of-stack (the initial SP).
    ///
    /// # Safety
    /// `stack_top` must point one-past-the-end of a region of at least
    /// `MIN_FRAME_BYTES` writable, properly aligned bytes.
    unsafe fn init_task_frame(
        entry: fn(usize),
        arg: usize,
        stack_top: *mut u8,
        exit_handler: fn() -> !,
    ) -> *mut u8;

    /// Request the lowest-priority pending-switch exception (PendSV on
    /// Cortex-M). Idempotent: calling it while a request is already
    /// pending is a no-op.
    fn request_context_switch();

    /// Program the hardware one-shot to fire `nanos_from_now` from now,
    /// clamped to `[minimum_resolvable_interval, hardware_max]` (§4.A).
    fn set_oneshot(nanos_from_now: u64);

    /// Disarm the hardware one-shot.
    fn cancel_oneshot();

    /// Monotonic nanoseconds since boot. Must be non-decreasing (§8
    /// invariant 5) and at least 1 µs resolution (§6.2).
    fn now() -> Instant;
}
