//! The tickless clock and deadline queue (§4.D).
//!
//! Kept as a small sorted `ArrayVec` rather than a binary heap (§6.5
//! `MAX_DEADLINES`, sized generously
//! relative to `MAX_TASKS`/`MAX_TIMERS`): §4.D explicitly allows O(n) here
//! ("the queue is short"), and a flat sorted array makes both "insert
//! ascending" and "drain everything `<= now`" single linear passes with no
//! pointer bookkeeping.
use rtk_core::time::Instant;

use crate::{config::MAX_DEADLINES, task::TaskIdx};

/// What a deadline-queue entry wakes when it expires (§4.D: "task wake →
/// ready; timer → invoke callback").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeadlineTarget {
    Task(TaskIdx),
    Timer(u16),
    /// A running task's timeslice ran out (§4.E preemption point 3).
    Timeslice(TaskIdx),
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    at: Instant,
    /// Insertion sequence, used only to break ties between equal deadlines
    /// so dispatch order is FIFO-by-insertion (§4.D "Dispatch ordering").
    seq: u64,
    target: DeadlineTarget,
}

#[derive(Default)]
pub struct DeadlineQueue {
    entries: arrayvec::ArrayVec<Entry, MAX_DEADLINES>,
    next_seq: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, at: Instant, target: DeadlineTarget) -> Result<(), rtk_core::error::ErrorKind> {
        if self.entries.is_full() {
            return Err(rtk_core::error::ErrorKind::OutOfMemory);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let pos = self
            .entries
            .iter()
            .position(|e| (e.at, e.seq) > (at, seq))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { at, seq, target });
        Ok(())
    }

    /// §4.D `schedule_wakeup`.
    pub fn schedule_wakeup(
        &mut self,
        task: TaskIdx,
        at: Instant,
    ) -> Result<(), rtk_core::error::ErrorKind> {
        self.insert(at, DeadlineTarget::Task(task))
    }

    /// §4.D `schedule_timer`.
    pub fn schedule_timer(
        &mut self,
        timer: u16,
        at: Instant,
    ) -> Result<(), rtk_core::error::ErrorKind> {
        self.insert(at, DeadlineTarget::Timer(timer))
    }

    /// Arms a round-robin timeslice expiry for a newly-scheduled running
    /// task (§4.E preemption point 3).
    pub fn schedule_timeslice(
        &mut self,
        task: TaskIdx,
        at: Instant,
    ) -> Result<(), rtk_core::error::ErrorKind> {
        self.insert(at, DeadlineTarget::Timeslice(task))
    }

    /// §4.D `cancel` specialized to a task's own wakeup deadline (a task has
    /// at most one wakeup entry at a time, per §3 "Invariants").
    pub fn cancel_task(&mut self, task: TaskIdx) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.target == DeadlineTarget::Task(task))
        {
            self.entries.remove(pos);
        }
    }

    /// Cancels a task's timeslice entry, if it has one — called every time
    /// it's switched away from so a task never carries two deadline-queue
    /// entries across a single scheduling decision.
    pub fn cancel_timeslice(&mut self, task: TaskIdx) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.target == DeadlineTarget::Timeslice(task))
        {
            self.entries.remove(pos);
        }
    }

    /// §4.D `cancel` specialized to a timer.
    pub fn cancel_timer(&mut self, timer: u16) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.target == DeadlineTarget::Timer(timer))
        {
            self.entries.remove(pos);
        }
    }

    #[inline]
    pub fn earliest(&self) -> Option<Instant> {
        self.entries.first().map(|e| e.at)
    }

    /// Drains every entry whose deadline has passed, in ascending-deadline
    /// (then FIFO) order (§4.D "Dispatch ordering"), invoking `f` for each.
    /// `f` may itself schedule new deadlines (a rewound software timer
    /// re-arming itself); those are visible to subsequent calls to
    /// `advance`, not to this one, since we snapshot the expired count
    /// before calling out.
    pub fn advance(&mut self, now: Instant, mut f: impl FnMut(DeadlineTarget)) {
        let expired = self.entries.partition_point(|e| e.at <= now);
        let due: arrayvec::ArrayVec<Entry, MAX_DEADLINES> =
            self.entries.drain(..expired).collect();
        for e in due {
            f(e.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_dispatches_in_ascending_then_fifo_order() {
        let mut q = DeadlineQueue::new();
        q.schedule_wakeup(TaskIdx(0), Instant::from_nanos(30)).unwrap();
        q.schedule_wakeup(TaskIdx(1), Instant::from_nanos(10)).unwrap();
        q.schedule_timer(7, Instant::from_nanos(10)).unwrap();
        q.schedule_wakeup(TaskIdx(2), Instant::from_nanos(20)).unwrap();

        let mut order = Vec::new();
        q.advance(Instant::from_nanos(25), |t| order.push(t));
        assert_eq!(
            order,
            vec![
                DeadlineTarget::Task(TaskIdx(1)),
                DeadlineTarget::Timer(7),
                DeadlineTarget::Task(TaskIdx(2)),
            ]
        );
        assert_eq!(q.earliest(), Some(Instant::from_nanos(30)));
    }

    #[test]
    fn advance_is_idempotent_with_no_expired_entries() {
        let mut q = DeadlineQueue::new();
        q.schedule_wakeup(TaskIdx(0), Instant::from_nanos(100)).unwrap();
        let mut calls = 0;
        q.advance(Instant::from_nanos(5), |_| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(q.earliest(), Some(Instant::from_nanos(100)));
    }

    #[test]
    fn cancel_removes_the_right_entry() {
        let mut q = DeadlineQueue::new();
        q.schedule_wakeup(TaskIdx(0), Instant::from_nanos(10)).unwrap();
        q.schedule_wakeup(TaskIdx(1), Instant::from_nanos(20)).unwrap();
        q.cancel_task(TaskIdx(0));
        assert_eq!(q.earliest(), Some(Instant::from_nanos(20)));
    }
}
