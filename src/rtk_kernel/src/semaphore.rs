//! Counting semaphore (§3 "Semaphore", §4.G.1).
use rtk_core::error::ErrorKind;

use crate::wait::WaitQueue;

pub struct Semaphore {
    pub(crate) count: u32,
    pub(crate) max_count: u32,
    pub(crate) waiters: WaitQueue,
    /// `delete` poisons the object instead of removing it from its table
    /// slot immediately, so concurrently-blocked ISR-side callers that
    /// still hold a raw index see `Deleted` rather than reusing a freed
    /// slot (§3 "Lifetimes").
    pub(crate) deleted: bool,
}

impl Semaphore {
    pub fn new(initial_count: u32, max_count: u32) -> Result<Self, ErrorKind> {
        if initial_count > max_count {
            return Err(ErrorKind::InvalidParam);
        }
        Ok(Self {
            count: initial_count,
            max_count,
            waiters: WaitQueue::new(),
            deleted: false,
        })
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// §4.G.1 `take` fast path: `true` if a permit was available and taken.
    pub fn try_take_fast(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
            true
        } else {
            false
        }
    }

    /// §4.G.1 `give`: hands the permit directly to a waiter if one exists
    /// (§9 "Direct-handoff on give/send": one critical section, no
    /// transient state observable by any other task), otherwise increments
    /// the count or reports `Overflow`.
    ///
    /// Returns `Ok(Some(woken_task_priority))` when a waiter was woken (so
    /// the caller can decide whether to request a context switch), `Ok(None)`
    /// when the count was simply incremented, or `Err` on overflow.
    pub fn give_fast(&mut self) -> Result<bool, ErrorKind> {
        if !self.waiters.is_empty() {
            // Hand-off: the waiter consumes the release directly; `count`
            // is untouched (§4.G.1: "do NOT increment count").
            Ok(true)
        } else if self.count < self.max_count {
            self.count += 1;
            Ok(false)
        } else {
            Err(ErrorKind::Overflow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservation_holds_across_take_give_cycles() {
        // §8 invariant 8: takes_ok - gives_ok + initial = count + waiters_pending
        let mut s = Semaphore::new(2, 5).unwrap();
        let mut takes_ok = 0u32;
        let mut gives_ok = 0u32;

        assert!(s.try_take_fast());
        takes_ok += 1;
        assert!(s.try_take_fast());
        takes_ok += 1;
        assert!(!s.try_take_fast());

        assert!(!s.give_fast().unwrap()); // no waiters, count++
        gives_ok += 1;
        assert!(!s.give_fast().unwrap());
        gives_ok += 1;

        let waiters_pending = 0;
        assert_eq!(takes_ok as i64 - gives_ok as i64 + 2, (s.count + waiters_pending) as i64);
    }

    #[test]
    fn give_overflows_at_max_count_with_no_waiters() {
        let mut s = Semaphore::new(1, 1).unwrap();
        assert_eq!(s.give_fast(), Err(ErrorKind::Overflow));
    }
}
