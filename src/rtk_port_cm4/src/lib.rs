//! Cortex-M4 hardware port for the rtk real-time kernel (§4.A, §6.2).
//!
//! Implements [`rtk_kernel::Port`] on top of `cortex-m`/`cortex-m-rt`: PendSV
//! for the pending context switch, `PRIMASK` for interrupt masking, and the
//! SysTick peripheral reprogrammed on every call as the tickless one-shot
//! (§4.D). `now()` is read off the free-running DWT cycle counter rather
//! than SysTick, since SysTick's reload is constantly rewritten to the next
//! deadline and is therefore useless as a monotonic clock on its own.
//!
//! This crate knows only about `Kernel::on_pend_sv`/`first_task_sp`/
//! `advance_clock`; it has no idea which `Kernel<...>` const-generic
//! instantiation the application chose. The glue is a single function
//! pointer, [`install_dispatcher`], the application registers once at boot —
//! the same role `vPortSVCHandler`'s call into the scheduler plays in other
//! RTOS ports, just explicit instead of a weak symbol.
#![no_std]

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use cortex_m::peripheral::{DWT, SCB, SYST};
use rtk_core::time::Instant;
use rtk_kernel::Port;

/// EXC_RETURN value written into every task's initial frame and restored by
/// the PendSV trampoline: "return to Thread mode, use PSP" (§4.A). FPU
/// lazy-stacking variants are not supported by this port.
const EXC_RETURN: u32 = 0xFFFF_FFFD;

/// Bytes of stack consumed by one saved context: 8 software-saved registers
/// (R4-R11) plus the 8-word hardware exception frame (R0-R3, R12, LR, PC,
/// xPSR), 4 bytes each.
pub const MIN_FRAME_BYTES: usize = 16 * 4;

static DISPATCH_FN: AtomicUsize = AtomicUsize::new(0);

/// CPU clock frequency in Hz, set once by [`init`] and used to convert the
/// DWT cycle counter into nanoseconds.
static CYCLES_PER_SEC: AtomicU32 = AtomicU32::new(0);

/// High half of the monotonic clock: the DWT cycle counter is only 32 bits
/// wide, so [`Cm4Port::now`] extends it in software. This assumes `now()`
/// (or `advance_clock`, which calls it) runs at least twice per wrap period
/// — at a typical >= 16 MHz core clock that's once every ~4 minutes, far
/// more often than any realistic deadline spacing, so a periodic background
/// tick isn't needed for correctness here, only liveness of `now()` itself.
static WRAP_COUNT: AtomicU32 = AtomicU32::new(0);
static LAST_CYCCNT: AtomicU32 = AtomicU32::new(0);

/// Registers the application's concrete `Kernel::on_pend_sv` as the target
/// of the PendSV trampoline. Must be called once, before interrupts are
/// unmasked and before [`Cm4Port`] is used as a kernel's [`Port`].
pub fn install_dispatcher(f: extern "C" fn(*mut u8) -> *mut u8) {
    DISPATCH_FN.store(f as usize, Ordering::SeqCst);
}

/// One-time hardware setup: lowest priority for PendSV (§4.A: "PendSV must
/// run at the lowest exception priority so it never preempts an ISR"),
/// enables the DWT cycle counter, and records the core clock for `now()`'s
/// cycle-to-nanosecond conversion.
///
/// # Safety
/// Must be called exactly once, at boot, before the scheduler starts.
pub unsafe fn init(core_clock_hz: u32) {
    let mut cp = unsafe { cortex_m::Peripherals::steal() };
    unsafe {
        cp.SCB.set_priority(cortex_m::peripheral::scb::SystemHandler::PendSV, 0xff);
    }
    cp.DCB.enable_trace();
    cp.DWT.enable_cycle_counter();
    CYCLES_PER_SEC.store(core_clock_hz, Ordering::SeqCst);
    WRAP_COUNT.store(0, Ordering::SeqCst);
    LAST_CYCCNT.store(DWT::cycle_count(), Ordering::SeqCst);
}

/// Jumps into the first task selected by [`rtk_kernel::Kernel::start_scheduler`].
/// Never returns.
///
/// # Safety
/// Must be called from Thread mode/MSP exactly once, after `init` and
/// `start_scheduler`, with interrupts still masked (this function unmasks
/// them as its very last step, after the stack has already switched to the
/// first task's PSP).
pub unsafe fn start_first_task(first_sp: *mut u8) -> ! {
    unsafe {
        core::arch::asm!(
            "msr psp, {sp}",
            "movs r0, #2",
            "msr control, r0",
            "isb",
            "cpsie i",
            "b {trampoline}",
            sp = in(reg) first_sp,
            trampoline = sym pend_sv_trampoline_entry,
            options(noreturn),
        )
    }
}

/// First-dispatch-only helper: `pend_sv_trampoline` expects to have already
/// popped R4-R11 off `psp` by the time it runs (the naked handler's job);
/// the boot path instead lands here directly with PSP freshly pointing at
/// `init_task_frame`'s software-saved region, so it does that pop itself
/// before falling into the ordinary exception-return sequence.
#[naked]
unsafe extern "C" fn pend_sv_trampoline_entry() -> ! {
    unsafe {
        core::arch::naked_asm!(
            "mrs r0, psp",
            "ldmia r0!, {{r4-r11}}",
            "msr psp, r0",
            "ldr lr, ={exc_return}",
            "bx lr",
            exc_return = const EXC_RETURN,
        )
    }
}

/// Calls the application-installed dispatcher. `extern "C"` so the naked
/// PendSV handler can `bl` straight into it with `prev_sp` in `r0` and the
/// result in `r0`, per AAPCS.
extern "C" fn pend_sv_trampoline(prev_sp: *mut u8) -> *mut u8 {
    let f = DISPATCH_FN.load(Ordering::SeqCst);
    debug_assert_ne!(f, 0, "rtk_port_cm4::install_dispatcher was never called");
    // Safety: `f` was stored by `install_dispatcher` as an
    // `extern "C" fn(*mut u8) -> *mut u8`; this is the exact cast back.
    let f: extern "C" fn(*mut u8) -> *mut u8 = unsafe { core::mem::transmute(f) };
    f(prev_sp)
}

/// The PendSV handler (§4.A "Mechanism"). Saves the outgoing task's
/// callee-saved registers, calls into the kernel to choose the next task,
/// and restores its context. `psp == 0` only at the very first dispatch
/// (Cortex-M resets PSP to 0), in which case there is nothing to save.
///
/// Registered by linking against this symbol name, which `cortex-m-rt`
/// resolves as the PendSV vector entry — this bypasses `#[exception]`
/// since that macro does not support naked functions.
#[naked]
#[no_mangle]
pub unsafe extern "C" fn PendSV() {
    unsafe {
        core::arch::naked_asm!(
            "mrs r0, psp",
            "cmp r0, #0",
            "beq 1f",
            "subs r0, r0, #32",
            "stmia r0!, {{r4-r11}}",
            "subs r0, r0, #32",
            "b 2f",
            "1:",
            "movs r0, #0",
            "2:",
            "bl {trampoline}",
            "ldmia r0!, {{r4-r11}}",
            "msr psp, r0",
            "ldr lr, ={exc_return}",
            "bx lr",
            trampoline = sym pend_sv_trampoline,
            exc_return = const EXC_RETURN,
        )
    }
}

/// The SysTick handler: SysTick is reprogrammed by [`Cm4Port::set_oneshot`]
/// on every call rather than left free-running, so every firing here is a
/// genuine kernel deadline (§4.D). Disarms itself (true one-shot) and hands
/// off to [`rtk_kernel::Kernel::advance_clock`] via the same installed
/// dispatcher's caller — the application's own SysTick override calls
/// `advance_clock` directly on its concrete kernel, so this crate does not
/// need a second function-pointer slot for it.
pub fn sys_tick_fired() {
    // Safety: only ever touches SYST, which nothing else in this port writes
    // to outside of `set_oneshot`/`cancel_oneshot`.
    let mut syst = unsafe { cortex_m::Peripherals::steal().SYST };
    syst.disable_interrupt();
    syst.disable_counter();
}

/// Cortex-M4 implementation of [`rtk_kernel::Port`].
pub struct Cm4Port;

impl Port for Cm4Port {
    type InterruptState = bool;

    #[inline]
    fn mask_interrupts() -> bool {
        let was_active = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        was_active
    }

    #[inline]
    unsafe fn restore_interrupts(prev: bool) {
        if prev {
            // Safety: matches the `disable()` in `mask_interrupts`; we are
            // the same critical section restoring what it observed.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    unsafe fn init_task_frame(
        entry: fn(usize),
        arg: usize,
        stack_top: *mut u8,
        exit_handler: fn() -> !,
    ) -> *mut u8 {
        // 8-byte-align per AAPCS, then carve out the hardware frame.
        let top = (stack_top as usize & !0x7) as *mut u32;
        let hw_frame = unsafe { top.sub(8) };
        unsafe {
            hw_frame.add(0).write(arg as u32); // R0: entry-point argument
            hw_frame.add(1).write(0); // R1
            hw_frame.add(2).write(0); // R2
            hw_frame.add(3).write(0); // R3
            hw_frame.add(4).write(0); // R12
            hw_frame.add(5).write((exit_handler as usize as u32) | 1); // LR, Thumb bit set
            hw_frame.add(6).write((entry as usize as u32) & !1); // PC
            hw_frame.add(7).write(0x0100_0000); // xPSR: Thumb bit (T) set
        }
        let sw_frame = unsafe { hw_frame.sub(8) };
        for i in 0..8u32 {
            let pattern = if cfg!(feature = "preload-registers") {
                0x0404_0404u32.wrapping_mul(i + 1)
            } else {
                0
            };
            unsafe { sw_frame.add(i as usize).write(pattern) };
        }
        sw_frame as *mut u8
    }

    #[inline]
    fn request_context_switch() {
        SCB::set_pendsv();
    }

    /// Clamped to SysTick's 24-bit reload range (§4.A "clamped to
    /// [minimum_resolvable_interval, hardware_max]"); a deadline further out
    /// than that is split by re-arming on each firing rather than trying to
    /// represent it in one reload, since `advance_clock` re-programs the
    /// one-shot to the new earliest deadline every time it's called anyway.
    fn set_oneshot(nanos_from_now: u64) {
        let hz = CYCLES_PER_SEC.load(Ordering::SeqCst).max(1) as u64;
        let ticks = (nanos_from_now.saturating_mul(hz) / 1_000_000_000).max(1);
        let ticks = ticks.min(0x00FF_FFFF) as u32;
        let mut syst = unsafe { cortex_m::Peripherals::steal().SYST };
        syst.disable_counter();
        syst.clear_current();
        syst.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
        syst.set_reload(ticks);
        syst.enable_interrupt();
        syst.enable_counter();
    }

    #[inline]
    fn cancel_oneshot() {
        let mut syst = unsafe { cortex_m::Peripherals::steal().SYST };
        syst.disable_interrupt();
        syst.disable_counter();
    }

    /// DWT cycle count converted to nanoseconds, extended to 64 bits by
    /// detecting 32-bit wraps between calls (see [`WRAP_COUNT`]).
    fn now() -> Instant {
        let hz = CYCLES_PER_SEC.load(Ordering::SeqCst).max(1) as u64;
        let raw = DWT::cycle_count();
        let last = LAST_CYCCNT.swap(raw, Ordering::SeqCst);
        if raw < last {
            WRAP_COUNT.fetch_add(1, Ordering::SeqCst);
        }
        let wraps = WRAP_COUNT.load(Ordering::SeqCst) as u64;
        let cycles = (wraps << 32) | raw as u64;
        Instant::from_nanos(cycles.saturating_mul(1_000_000_000) / hz)
    }
}
