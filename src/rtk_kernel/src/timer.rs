//! Software timer (added to the data model during the ambient-stack
//! expansion — §3 "Software timer", §6.1). Dispatched from the same
//! deadline queue as task wakeups (§4.D), so its state here is just the
//! callback and re-arm policy; scheduling lives in [`crate::timeout`].
use rtk_core::time::Duration;

pub struct Timer {
    pub(crate) period: Duration,
    pub(crate) periodic: bool,
    pub(crate) callback: fn(usize),
    pub(crate) arg: usize,
    pub(crate) running: bool,
    pub(crate) deleted: bool,
}

impl Timer {
    pub fn new(period: Duration, periodic: bool, callback: fn(usize), arg: usize) -> Self {
        Self {
            period,
            periodic,
            callback,
            arg,
            running: false,
            deleted: false,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Invokes the callback. Called from the kernel's deadline-queue
    /// dispatch loop with interrupts masked has already happened by this
    /// point (§4.D "Dispatch ordering"); this method is just the call
    /// itself, kept separate so it's independently testable.
    pub fn fire(&self) {
        (self.callback)(self.arg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn bump(arg: usize) {
        CALLS.fetch_add(arg, Ordering::SeqCst);
    }

    #[test]
    fn fire_invokes_callback_with_arg() {
        CALLS.store(0, Ordering::SeqCst);
        let t = Timer::new(Duration::from_millis(10), true, bump, 7);
        t.fire();
        t.fire();
        assert_eq!(CALLS.load(Ordering::SeqCst), 14);
    }
}
