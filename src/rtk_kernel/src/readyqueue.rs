//! The ready set (§3 "Ready set", §4.E): a per-priority FIFO plus a bitmap
//! for O(1) "highest ready" selection (§8 invariant 1).
use crate::{task::TaskIdx, util::ReadyBitmap};

/// `N_PRIORITIES` per-priority FIFOs of task indices, each capped at
/// `MAX_TASKS` entries (a task can only be in one FIFO at a time, so the
/// true worst case for any single level is "every task is at this
/// priority").
pub struct ReadyQueue<const N_PRIORITIES: usize, const MAX_TASKS: usize> {
    bitmap: ReadyBitmap,
    fifos: [arrayvec::ArrayVec<TaskIdx, MAX_TASKS>; N_PRIORITIES],
}

impl<const N_PRIORITIES: usize, const MAX_TASKS: usize> ReadyQueue<N_PRIORITIES, MAX_TASKS> {
    pub fn new() -> Self {
        Self {
            bitmap: ReadyBitmap::EMPTY,
            fifos: core::array::from_fn(|_| arrayvec::ArrayVec::new()),
        }
    }

    /// Insert at the tail of `priority`'s FIFO (§3: "a dedicated
    /// lowest-priority ... round-robin ... rotating the FIFO").
    pub fn push_back(&mut self, priority: usize, task: TaskIdx) {
        let fifo = &mut self.fifos[priority];
        debug_assert!(!fifo.contains(&task), "task already in ready queue");
        fifo.push(task);
        self.bitmap.set(priority);
    }

    /// Remove a specific task from wherever it sits in `priority`'s FIFO
    /// (used by `suspend`, `delete`, and `set_priority` — §4.F).
    pub fn remove(&mut self, priority: usize, task: TaskIdx) {
        let fifo = &mut self.fifos[priority];
        if let Some(pos) = fifo.iter().position(|&t| t == task) {
            fifo.remove(pos);
            if fifo.is_empty() {
                self.bitmap.clear(priority);
            }
        }
    }

    /// The highest-ready task's priority level (§4.E `select`:
    /// "least-significant set bit of the bitmap").
    #[inline]
    pub fn highest_priority(&self) -> Option<usize> {
        self.bitmap.lowest_set()
    }

    #[inline]
    pub fn head(&self, priority: usize) -> Option<TaskIdx> {
        self.fifos[priority].first().copied()
    }

    /// Rotate `priority`'s FIFO on timeslice exhaustion (§4.E preemption
    /// point 3): move the head to the tail.
    pub fn rotate(&mut self, priority: usize) {
        let fifo = &mut self.fifos[priority];
        if fifo.len() > 1 {
            let head = fifo.remove(0);
            fifo.push(head);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }
}

impl<const N_PRIORITIES: usize, const MAX_TASKS: usize> Default
    for ReadyQueue<N_PRIORITIES, MAX_TASKS>
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_is_lowest_number() {
        let mut rq: ReadyQueue<8, 4> = ReadyQueue::new();
        rq.push_back(5, TaskIdx(0));
        rq.push_back(2, TaskIdx(1));
        assert_eq!(rq.highest_priority(), Some(2));
        assert_eq!(rq.head(2), Some(TaskIdx(1)));
    }

    #[test]
    fn rotate_moves_head_to_tail() {
        let mut rq: ReadyQueue<8, 4> = ReadyQueue::new();
        rq.push_back(3, TaskIdx(0));
        rq.push_back(3, TaskIdx(1));
        rq.push_back(3, TaskIdx(2));
        rq.rotate(3);
        assert_eq!(rq.head(3), Some(TaskIdx(1)));
        rq.rotate(3);
        assert_eq!(rq.head(3), Some(TaskIdx(2)));
    }

    #[test]
    fn remove_clears_bit_when_last_leaves() {
        let mut rq: ReadyQueue<8, 4> = ReadyQueue::new();
        rq.push_back(1, TaskIdx(0));
        rq.remove(1, TaskIdx(0));
        assert!(rq.is_empty());
    }
}
