//! Hosted simulation port (§6.2 "reference port for development").
//!
//! Unlike [`rtk_port_cm4`](../rtk_port_cm4), this port does not drive real
//! task execution: [`StdPort::init_task_frame`] never writes an executable
//! frame, and [`StdPort::request_context_switch`] is a no-op, exactly like
//! the `TestPort` `rtk_kernel`'s own unit tests use internally. What this
//! port adds over that internal `TestPort` is a *real* clock and a *real*
//! one-shot timer, so integration tests can assert on wall-clock accuracy
//! (tickless delay/timeout behavior) without needing genuine preemptive
//! multitasking across OS threads.
//!
//! A fully preemptive hosted port (one OS thread per task, real signal-based
//! preemption) is possible but out of scope here — the kernel's scheduling
//! and timing logic is what needs exercising under `std`, not concurrent
//! task bodies.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Instant as StdInstant;

use rtk_core::time::Instant;
use rtk_kernel::Port;

static BOOT: OnceLock<StdInstant> = OnceLock::new();

/// Generation counter for the in-flight one-shot timer thread (§4.D): each
/// `set_oneshot` bumps it, and a timer thread that wakes up to find the
/// generation has since moved on knows it was superseded or cancelled and
/// fires nothing.
static TIMER_GEN: AtomicU64 = AtomicU64::new(0);

static CLOCK_DISPATCH: AtomicUsize = AtomicUsize::new(0);

/// Registers the callback the hosted one-shot timer invokes when it fires —
/// ordinarily a thin wrapper around the application's concrete
/// `Kernel::advance_clock`. Mirrors [`rtk_port_cm4::install_dispatcher`]'s
/// role for the context-switch side.
pub fn install_clock_dispatcher(f: extern "C" fn()) {
    CLOCK_DISPATCH.store(f as usize, Ordering::SeqCst);
}

/// Process-wide critical section standing in for interrupt masking. Unlike
/// real interrupt masking this cannot stop another OS thread running kernel
/// code, but every entry point this port's users call funnels through
/// `rtk_kernel`'s own `enter_critical`/`exit_critical`, so a simple
/// reentrant mutex is sufficient (§4.B "Critical sections").
mod lock {
    use std::cell::Cell;
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    thread_local! {
        static DEPTH: Cell<u32> = const { Cell::new(0) };
        static GUARD: Cell<Option<MutexGuard<'static, ()>>> = const { Cell::new(None) };
    }

    /// Returns whether this call was the outermost (depth 0 -> 1) entry.
    pub fn enter() -> bool {
        let depth = DEPTH.with(|d| d.get());
        if depth == 0 {
            let guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
            // Safety: the 'static extension is sound because `exit` always
            // drops this guard, from the same thread, before `DEPTH` can
            // return to 0 again — it never outlives the critical section it
            // was taken for.
            let guard: MutexGuard<'static, ()> = unsafe { std::mem::transmute(guard) };
            GUARD.with(|g| g.set(Some(guard)));
        }
        DEPTH.with(|d| d.set(depth + 1));
        depth == 0
    }

    pub fn exit(was_outermost: bool) {
        let depth = DEPTH.with(|d| d.get());
        DEPTH.with(|d| d.set(depth - 1));
        if was_outermost {
            GUARD.with(|g| drop(g.take()));
        }
    }
}

/// Hosted implementation of [`rtk_kernel::Port`].
pub struct StdPort;

impl Port for StdPort {
    type InterruptState = bool;

    #[inline]
    fn mask_interrupts() -> bool {
        lock::enter()
    }

    #[inline]
    unsafe fn restore_interrupts(was_outermost: bool) {
        lock::exit(was_outermost);
    }

    /// No real task execution happens on this port (see module docs); the
    /// stack region is left untouched and its top returned unchanged,
    /// exactly as `rtk_kernel`'s internal `TestPort` does.
    unsafe fn init_task_frame(
        _entry: fn(usize),
        _arg: usize,
        stack_top: *mut u8,
        _exit_handler: fn() -> !,
    ) -> *mut u8 {
        stack_top
    }

    /// No-op: this port never dispatches through an asynchronous exception,
    /// so there is nothing to pend. Callers that need `on_pend_sv` driven
    /// do so directly (as `rtk_kernel`'s own scheduler tests do).
    #[inline]
    fn request_context_switch() {}

    fn set_oneshot(nanos_from_now: u64) {
        let gen = TIMER_GEN.fetch_add(1, Ordering::SeqCst) + 1;
        log::trace!("oneshot armed: {nanos_from_now}ns (gen {gen})");
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_nanos(nanos_from_now));
            if TIMER_GEN.load(Ordering::SeqCst) != gen {
                return; // superseded by a later `set_oneshot` or cancelled
            }
            let f = CLOCK_DISPATCH.load(Ordering::SeqCst);
            if f == 0 {
                return;
            }
            log::trace!("oneshot fired (gen {gen})");
            // Safety: `f` was stored by `install_clock_dispatcher` as an
            // `extern "C" fn()`; this is the exact cast back.
            let f: extern "C" fn() = unsafe { std::mem::transmute(f) };
            f();
        });
    }

    #[inline]
    fn cancel_oneshot() {
        TIMER_GEN.fetch_add(1, Ordering::SeqCst);
        log::trace!("oneshot cancelled");
    }

    fn now() -> Instant {
        let boot = *BOOT.get_or_init(StdInstant::now);
        Instant::from_nanos(StdInstant::now().duration_since(boot).as_nanos() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn now_is_monotonic() {
        let a = StdPort::now();
        let b = StdPort::now();
        assert!(b >= a);
    }

    #[test]
    fn critical_section_nests() {
        let outer = StdPort::mask_interrupts();
        assert!(outer);
        let inner = StdPort::mask_interrupts();
        assert!(!inner);
        unsafe { StdPort::restore_interrupts(inner) };
        unsafe { StdPort::restore_interrupts(outer) };
    }

    static FIRED: AtomicBool = AtomicBool::new(false);

    extern "C" fn mark_fired() {
        FIRED.store(true, Ordering::SeqCst);
    }

    #[test]
    fn one_shot_fires_once() {
        let _ = env_logger::try_init();
        FIRED.store(false, Ordering::SeqCst);
        install_clock_dispatcher(mark_fired);
        StdPort::set_oneshot(1_000_000); // 1ms
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(FIRED.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_one_shot_does_not_fire() {
        FIRED.store(false, Ordering::SeqCst);
        install_clock_dispatcher(mark_fired);
        StdPort::set_oneshot(50_000_000); // 50ms
        StdPort::cancel_oneshot();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!FIRED.load(Ordering::SeqCst));
    }
}
