//! The generic wait-queue mechanics shared by every blocking primitive
//! (§4.C). Operations here mutate only the list itself and the linked
//! task's blocking fields; waking a task all the way back into the ready
//! set also needs the ready queue and the deadline queue, so [`wake`] and
//! [`wake_all`] take those as explicit collaborators instead of reaching
//! for kernel-global state (§9 "Global state").
use rtk_core::{error::ErrorKind, time::Instant};

use crate::{
    config::MAX_WAITERS_PER_OBJECT,
    readyqueue::ReadyQueue,
    task::{Task, TaskIdx, TaskState, WaitObject},
    timeout::DeadlineQueue,
};

/// Priority-ordered list of tasks blocked on one object (§3 "Wait list").
#[derive(Default)]
pub struct WaitQueue {
    waiters: arrayvec::ArrayVec<TaskIdx, MAX_WAITERS_PER_OBJECT>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    #[inline]
    pub fn head(&self) -> Option<TaskIdx> {
        self.waiters.first().copied()
    }

    /// §4.C `add`: inserts at the first position whose successor has
    /// strictly lower priority, i.e. after every waiter of equal-or-higher
    /// priority (so FIFO order is preserved among equals).
    ///
    /// Aborts if `task` is already linked into a wait list — §4.C: "Adding
    /// while already blocked is a programming error and aborts."
    pub fn add(
        &mut self,
        tasks: &mut [Task],
        task_idx: TaskIdx,
        deadline: Option<Instant>,
        wait_object: WaitObject,
    ) -> Result<(), ErrorKind> {
        if tasks[task_idx.index()].state == TaskState::Blocked {
            panic!("task {task_idx:?} added to a wait list it is already in");
        }
        if self.waiters.is_full() {
            return Err(ErrorKind::OutOfMemory);
        }
        let prio = tasks[task_idx.index()].current_priority;
        let pos = self
            .waiters
            .iter()
            .position(|&t| tasks[t.index()].current_priority > prio)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(pos, task_idx);

        let task = &mut tasks[task_idx.index()];
        task.state = TaskState::Blocked;
        task.wait_object = Some(wait_object);
        task.deadline = deadline;
        Ok(())
    }

    /// §4.C `remove`: unlinks from the list (the deadline queue is a
    /// separate structure; callers cancel it themselves — see
    /// [`DeadlineQueue::cancel_task`]).
    pub fn remove(&mut self, task_idx: TaskIdx) -> bool {
        if let Some(pos) = self.waiters.iter().position(|&t| t == task_idx) {
            self.waiters.remove(pos);
            true
        } else {
            false
        }
    }

    /// §4.C `pop_head`.
    pub fn pop_head(&mut self) -> Option<TaskIdx> {
        if self.waiters.is_empty() {
            None
        } else {
            Some(self.waiters.remove(0))
        }
    }

    /// Re-sort after a waiter's priority changed in place (`set_priority`,
    /// §4.G.2 inheritance promotion/restore) — stable, so arrival order
    /// among now-equal priorities is preserved.
    pub fn resort(&mut self, tasks: &[Task]) {
        self.waiters
            .sort_by_key(|&t| tasks[t.index()].current_priority);
    }

    /// §4.C `wake`: pops the head, writes `result` into its wake slot,
    /// marks it `Ready`, removes it from the deadline queue, and inserts it
    /// into the ready set. Returns the woken task so the caller can decide
    /// whether to request a context switch (§4.C).
    pub fn wake<const N_PRIORITIES: usize, const MAX_TASKS: usize>(
        &mut self,
        tasks: &mut [Task],
        ready: &mut ReadyQueue<N_PRIORITIES, MAX_TASKS>,
        deadlines: &mut DeadlineQueue,
        result: Result<(), ErrorKind>,
    ) -> Option<TaskIdx> {
        let idx = self.pop_head()?;
        if tasks[idx.index()].deadline.take().is_some() {
            deadlines.cancel_task(idx);
        }
        let task = &mut tasks[idx.index()];
        task.wake_result = result;
        task.state = TaskState::Ready;
        task.wait_object = None;
        let prio = task.current_priority.as_usize();
        task.ready_priority = Some(prio);
        ready.push_back(prio, idx);
        Some(idx)
    }

    /// §4.C `wake_all`: drains the list.
    pub fn wake_all<const N_PRIORITIES: usize, const MAX_TASKS: usize>(
        &mut self,
        tasks: &mut [Task],
        ready: &mut ReadyQueue<N_PRIORITIES, MAX_TASKS>,
        deadlines: &mut DeadlineQueue,
        result: Result<(), ErrorKind>,
    ) {
        while self
            .wake(tasks, ready, deadlines, result)
            .is_some()
        {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtk_core::priority::Priority;

    fn task_with_priority(p: u8) -> Task {
        let mut t = Task::default();
        t.live = true;
        t.current_priority = Priority::new(p);
        t.base_priority = Priority::new(p);
        t
    }

    #[test]
    fn orders_by_priority_then_arrival() {
        let mut tasks = vec![
            task_with_priority(5),
            task_with_priority(1),
            task_with_priority(5),
        ];
        let mut wq = WaitQueue::new();
        wq.add(&mut tasks, TaskIdx(0), None, WaitObject::Delay).unwrap();
        wq.add(&mut tasks, TaskIdx(1), None, WaitObject::Delay).unwrap();
        wq.add(&mut tasks, TaskIdx(2), None, WaitObject::Delay).unwrap();
        // task 1 (prio 1) outranks both prio-5 tasks; among the prio-5
        // tasks, arrival order (0 before 2) is preserved.
        assert_eq!(wq.pop_head(), Some(TaskIdx(1)));
        assert_eq!(wq.pop_head(), Some(TaskIdx(0)));
        assert_eq!(wq.pop_head(), Some(TaskIdx(2)));
    }

    #[test]
    fn adding_already_blocked_task_aborts() {
        let mut tasks = vec![task_with_priority(1)];
        let mut wq = WaitQueue::new();
        wq.add(&mut tasks, TaskIdx(0), None, WaitObject::Delay).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut wq2 = WaitQueue::new();
            wq2.add(&mut tasks, TaskIdx(0), None, WaitObject::Delay).unwrap();
        }));
        assert!(result.is_err());
    }
}
