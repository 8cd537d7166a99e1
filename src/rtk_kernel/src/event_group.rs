//! Event group: a word of bits tasks can wait on in combination (§3 "Event
//! group", §4.G.4).
//!
//! Unlike the other primitives, waking here is not "pop the head" — every
//! waiter's wait condition must be re-checked against the new bit pattern,
//! since an `All` waiter might still be unsatisfied while a later-queued
//! `Any` waiter is. So the waiter list stores each task's condition
//! alongside it rather than relying purely on [`crate::wait::WaitQueue`]'s
//! priority ordering (§4.G.4 "Evaluation order").
use rtk_core::{error::ErrorKind, params::EventGroupWaitMode};

use crate::task::TaskIdx;

#[derive(Clone, Copy)]
pub(crate) struct EventWaiter {
    pub(crate) task: TaskIdx,
    pub(crate) mask: u32,
    pub(crate) mode: EventGroupWaitMode,
    /// §4.G.4 "consume on satisfy": if true, satisfied bits are cleared
    /// from the group's word when this waiter is woken.
    pub(crate) clear_on_exit: bool,
}

pub struct EventGroup {
    pub(crate) bits: u32,
    pub(crate) waiters: arrayvec::ArrayVec<EventWaiter, { crate::config::MAX_WAITERS_PER_OBJECT }>,
    pub(crate) deleted: bool,
}

impl EventGroup {
    pub fn new(initial_bits: u32) -> Self {
        Self {
            bits: initial_bits,
            waiters: arrayvec::ArrayVec::new(),
            deleted: false,
        }
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn satisfied(bits: u32, mask: u32, mode: EventGroupWaitMode) -> bool {
        match mode {
            EventGroupWaitMode::Any => bits & mask != 0,
            EventGroupWaitMode::All => bits & mask == mask,
        }
    }

    /// §4.G.4 `wait` fast path: `Some(bits_at_match)` if the condition is
    /// already met, without touching the waiter list.
    pub fn try_match(&mut self, mask: u32, mode: EventGroupWaitMode, clear_on_exit: bool) -> Option<u32> {
        if Self::satisfied(self.bits, mask, mode) {
            let observed = self.bits;
            if clear_on_exit {
                self.bits &= !mask;
            }
            Some(observed)
        } else {
            None
        }
    }

    pub fn enqueue_waiter(&mut self, waiter: EventWaiter) -> Result<(), ErrorKind> {
        if self.waiters.is_full() {
            return Err(ErrorKind::OutOfMemory);
        }
        self.waiters.push(waiter);
        Ok(())
    }

    pub fn remove_waiter(&mut self, task: TaskIdx) -> bool {
        if let Some(pos) = self.waiters.iter().position(|w| w.task == task) {
            self.waiters.remove(pos);
            true
        } else {
            false
        }
    }

    /// §4.G.4 `set`: ORs `mask` into the bits, then scans every waiter in
    /// FIFO (enqueue) order, draining and returning those now satisfied.
    /// The caller is responsible for waking each returned task and, if its
    /// `clear_on_exit` is set, for the fact the bits it observed already
    /// had its mask subtracted here.
    pub fn set(&mut self, mask: u32) -> arrayvec::ArrayVec<(EventWaiter, u32), { crate::config::MAX_WAITERS_PER_OBJECT }> {
        self.bits |= mask;
        let mut woken = arrayvec::ArrayVec::new();
        let mut i = 0;
        while i < self.waiters.len() {
            let w = self.waiters[i];
            if Self::satisfied(self.bits, w.mask, w.mode) {
                let observed = self.bits;
                if w.clear_on_exit {
                    self.bits &= !w.mask;
                }
                self.waiters.remove(i);
                let _ = woken.try_push((w, observed));
            } else {
                i += 1;
            }
        }
        woken
    }

    /// §4.G.4 `clear`.
    pub fn clear(&mut self, mask: u32) {
        self.bits &= !mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_mode_matches_on_first_overlapping_bit() {
        let mut g = EventGroup::new(0);
        assert!(g.try_match(0b011, EventGroupWaitMode::Any, false).is_none());
        g.set(0b010);
        assert_eq!(g.try_match(0b011, EventGroupWaitMode::Any, false), Some(0b010));
    }

    #[test]
    fn all_mode_requires_every_bit() {
        let mut g = EventGroup::new(0b001);
        assert!(g.try_match(0b011, EventGroupWaitMode::All, false).is_none());
        g.set(0b010);
        assert_eq!(g.try_match(0b011, EventGroupWaitMode::All, true), Some(0b011));
        assert_eq!(g.bits(), 0);
    }

    #[test]
    fn set_wakes_only_satisfied_waiters_in_fifo_order() {
        let mut g = EventGroup::new(0);
        g.enqueue_waiter(EventWaiter {
            task: TaskIdx(0),
            mask: 0b001,
            mode: EventGroupWaitMode::Any,
            clear_on_exit: false,
        })
        .unwrap();
        g.enqueue_waiter(EventWaiter {
            task: TaskIdx(1),
            mask: 0b110,
            mode: EventGroupWaitMode::All,
            clear_on_exit: false,
        })
        .unwrap();
        let woken = g.set(0b001);
        assert_eq!(woken.len(), 1);
        assert_eq!(woken[0].0.task, TaskIdx(0));
        assert_eq!(g.waiters.len(), 1);
    }
}
