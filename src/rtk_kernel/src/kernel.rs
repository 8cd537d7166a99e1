//! The kernel root: task table, ready set, deadline queue, and the six
//! object tables, tied together by the scheduler (§4.E) and the §4.G
//! wait/release templates.
//!
//! Capacities are `const` generics (§4.K) rather than runtime fields, so two
//! kernels built with different capacities are distinct monomorphizations —
//! a capacity mismatch is a compile-time fact about the build, matching
//! `rtos_config.h`-style configuration without any of its runtime cost.
use rtk_core::{
    error::ErrorKind,
    name::ObjectName,
    params::{
        EventGroupParams, EventGroupWaitMode, MutexParams, PoolParams, QueueParams,
        SemaphoreParams, TaskParams, TimerParams,
    },
    priority::Priority,
    time::{Duration, Instant, Timeout},
    Allocator,
};

use crate::{
    config::{MAX_MUTEX_DEPTH_PER_TASK, MIN_STACK_BYTES},
    error::{
        AcquireError, CreateObjectError, CreateTaskError, DelayError, DeleteObjectError,
        ReleaseError, TaskControlError, UnlockError,
    },
    event_group::{EventGroup, EventWaiter},
    klock::{CriticalSectionState, HasCriticalSectionState},
    mempool::MemoryPool,
    mutex::Mutex,
    port::Port,
    queue::Queue,
    readyqueue::ReadyQueue,
    registry::{Handle, Table},
    semaphore::Semaphore,
    task::{validate_params, StackStorage, Task, TaskHandle, TaskIdx, TaskState, WaitObject},
    timeout::{DeadlineQueue, DeadlineTarget},
    timer::Timer,
};

/// Diagnostic snapshot of a task, returned by [`Kernel::task_info`] (§6.1
/// `get_info`).
#[derive(Clone, Copy, Debug)]
pub struct TaskInfo {
    pub name: Option<ObjectName>,
    pub state: TaskState,
    pub base_priority: Priority,
    pub current_priority: Priority,
    pub switch_count: u64,
    pub cumulative_runtime_ns: u64,
    pub max_stack_watermark: usize,
    pub stack_overflowed: bool,
}

/// The kernel's hook surface (§6.3): every slot is optional, for the
/// application to wire up its own notification of these events. Independent
/// of the `trace` feature's `log` records (§4.I), which fire regardless of
/// whether a hook is set.
#[derive(Default)]
struct Hooks {
    startup: Option<fn()>,
    shutdown: Option<fn()>,
    idle: Option<fn()>,
    task_switch: Option<fn(Option<ObjectName>, Option<ObjectName>)>,
    stack_overflow: Option<fn(Option<ObjectName>)>,
    assertion_failure: Option<fn(&'static str, u32, &'static str)>,
}

pub struct Kernel<
    P: Port,
    const MAX_TASKS: usize,
    const N_PRIORITIES: usize,
    const MAX_SEMS: usize,
    const MAX_MUTEXES: usize,
    const MAX_QUEUES: usize,
    const MAX_EVENT_GROUPS: usize,
    const MAX_POOLS: usize,
    const MAX_TIMERS: usize,
> {
    tasks: [Task; MAX_TASKS],
    ready: ReadyQueue<N_PRIORITIES, MAX_TASKS>,
    deadlines: DeadlineQueue,

    sems: Table<Semaphore, MAX_SEMS>,
    mutexes: Table<Mutex, MAX_MUTEXES>,
    queues: Table<Queue, MAX_QUEUES>,
    event_groups: Table<EventGroup, MAX_EVENT_GROUPS>,
    pools: Table<MemoryPool, MAX_POOLS>,
    timers: Table<Timer, MAX_TIMERS>,

    current: Option<TaskIdx>,
    idle: Option<TaskIdx>,
    switch_pending: bool,
    started: bool,
    allocator: Option<&'static dyn Allocator>,

    /// Set for the duration of `Timer::fire` (§4.D "Timer callbacks are
    /// invoked with the scheduler locked ... must not block"). Every
    /// blocking entry point checks this first and refuses with
    /// `InvalidContext` instead of silently blocking whatever task happens
    /// to be `current`.
    in_timer_callback: bool,

    hooks: Hooks,
    cs_state: CriticalSectionState<P>,
    _port: core::marker::PhantomData<P>,
}

impl<
        P: Port,
        const MAX_TASKS: usize,
        const N_PRIORITIES: usize,
        const MAX_SEMS: usize,
        const MAX_MUTEXES: usize,
        const MAX_QUEUES: usize,
        const MAX_EVENT_GROUPS: usize,
        const MAX_POOLS: usize,
        const MAX_TIMERS: usize,
    > HasCriticalSectionState<P>
    for Kernel<P, MAX_TASKS, N_PRIORITIES, MAX_SEMS, MAX_MUTEXES, MAX_QUEUES, MAX_EVENT_GROUPS, MAX_POOLS, MAX_TIMERS>
{
    fn cs_state_mut(&mut self) -> &mut CriticalSectionState<P> {
        &mut self.cs_state
    }
}

impl<
        P: Port,
        const MAX_TASKS: usize,
        const N_PRIORITIES: usize,
        const MAX_SEMS: usize,
        const MAX_MUTEXES: usize,
        const MAX_QUEUES: usize,
        const MAX_EVENT_GROUPS: usize,
        const MAX_POOLS: usize,
        const MAX_TIMERS: usize,
    > Kernel<P, MAX_TASKS, N_PRIORITIES, MAX_SEMS, MAX_MUTEXES, MAX_QUEUES, MAX_EVENT_GROUPS, MAX_POOLS, MAX_TIMERS>
{
    pub fn new() -> Self {
        Self {
            tasks: core::array::from_fn(|_| Task::default()),
            ready: ReadyQueue::new(),
            deadlines: DeadlineQueue::new(),
            sems: Table::new(),
            mutexes: Table::new(),
            queues: Table::new(),
            event_groups: Table::new(),
            pools: Table::new(),
            timers: Table::new(),
            current: None,
            idle: None,
            switch_pending: false,
            started: false,
            allocator: None,
            in_timer_callback: false,
            hooks: Hooks::default(),
            cs_state: CriticalSectionState::default(),
            _port: core::marker::PhantomData,
        }
    }

    #[inline]
    pub fn now(&self) -> Instant {
        P::now()
    }

    /// Wires in the allocator backing the "dynamic form" of task creation
    /// (§6.4) — a task created with `TaskParams { stack: None, .. }` draws
    /// its stack from this allocator instead of caller-provided storage.
    pub fn set_allocator(&mut self, allocator: &'static dyn Allocator) {
        self.allocator = Some(allocator);
    }

    pub fn set_idle_hook(&mut self, hook: fn()) {
        self.hooks.idle = Some(hook);
    }

    pub fn set_switch_hook(&mut self, hook: fn(Option<ObjectName>, Option<ObjectName>)) {
        self.hooks.task_switch = Some(hook);
    }

    pub fn set_stack_overflow_hook(&mut self, hook: fn(Option<ObjectName>)) {
        self.hooks.stack_overflow = Some(hook);
    }

    pub fn set_assertion_hook(&mut self, hook: fn(&'static str, u32, &'static str)) {
        self.hooks.assertion_failure = Some(hook);
    }

    pub fn set_startup_hook(&mut self, hook: fn()) {
        self.hooks.startup = Some(hook);
    }

    pub fn set_shutdown_hook(&mut self, hook: fn()) {
        self.hooks.shutdown = Some(hook);
    }

    // ----- critical sections / scheduler lock (§4.E, §4.H) -----------------

    /// §6.1 `enter_critical`: masks interrupts on the outermost call (§4.H).
    pub fn enter_critical(&mut self) {
        self.cs_state.enter_raw();
    }

    /// §6.1 `exit_critical`: restores interrupts and honors a pending
    /// switch once depth returns to zero (§4.E "Mechanism").
    pub fn exit_critical(&mut self) {
        self.cs_state.exit_raw();
        if self.cs_state.depth() == 0 && self.switch_pending {
            self.switch_pending = false;
            P::request_context_switch();
        }
    }

    fn request_preempt(&mut self) {
        if self.cs_state.depth() > 0 {
            self.switch_pending = true;
        } else {
            P::request_context_switch();
        }
    }

    /// §4.E `select`: head of the highest-priority non-empty FIFO, or the
    /// idle task if the ready set is empty.
    fn select(&self) -> Option<TaskIdx> {
        self.ready
            .highest_priority()
            .and_then(|p| self.ready.head(p))
            .or(self.idle)
    }

    /// Preempts immediately if the newly-ready task outranks whoever is
    /// current (§4.E preemption points 1, 4, 5).
    fn maybe_preempt(&mut self, candidate: TaskIdx) {
        let candidate_prio = self.tasks[candidate.index()].current_priority;
        let outranks_current = match self.current {
            Some(cur) => candidate_prio < self.tasks[cur.index()].current_priority,
            None => true,
        };
        if outranks_current {
            self.request_preempt();
        }
    }

    fn alloc_task_slot(&mut self) -> Option<TaskIdx> {
        self.tasks.iter().position(|t| !t.live).map(|i| TaskIdx(i as u16))
    }

    fn task_handle(&self, idx: TaskIdx) -> TaskHandle {
        TaskHandle {
            idx,
            generation: self.tasks[idx.index()].generation,
        }
    }

    fn validate_task(&self, h: TaskHandle) -> Result<TaskIdx, ErrorKind> {
        let t = self.tasks.get(h.idx.index()).ok_or(ErrorKind::NotFound)?;
        if !t.live || t.generation != h.generation {
            return Err(ErrorKind::Deleted);
        }
        Ok(h.idx)
    }

    /// Models the synchronous voluntary context switch (§4.E "Mechanism",
    /// §9 "Global state"): on real hardware, `request_context_switch` only
    /// *arms* the pending-switch exception, and this call returns
    /// immediately — but the exception then fires before the caller's next
    /// instruction runs, saving this exact call stack on `idx`'s own stack.
    /// Execution only "continues" past this point once `idx` is rescheduled,
    /// at which point the exception-return path restores the very registers
    /// this call saved. We model that two-stage mechanism as one direct
    /// call, since the only thing that has observably changed by the time
    /// control returns here is `idx`'s `wake_result` slot. The hosted test
    /// port backs this literally with a parked OS thread.
    fn block_current(&mut self) -> Result<(), ErrorKind> {
        let idx = self.current.expect("block_current with no running task");
        self.request_preempt();
        self.tasks[idx.index()].wake_result
    }

    /// §4.D: a timer callback runs with the scheduler locked and must not
    /// block. Every blocking entry point calls this right before it would
    /// otherwise queue the caller and suspend.
    #[inline]
    fn check_not_in_timer_callback(&self) -> Result<(), ErrorKind> {
        if self.in_timer_callback {
            Err(ErrorKind::InvalidContext)
        } else {
            Ok(())
        }
    }

    // ----- task lifecycle (§4.F) --------------------------------------

    pub fn create_task(&mut self, params: TaskParams) -> Result<TaskHandle, CreateTaskError> {
        let validated = validate_params::<P>(params, N_PRIORITIES, MIN_STACK_BYTES)
            .map_err(|_| CreateTaskError::InvalidParam)?;
        let idx = self.alloc_task_slot().ok_or(CreateTaskError::OutOfMemory)?;

        let (stack, dynamic, sp) = match validated.stack {
            Some(buf) => {
                let size = buf.len();
                let base = buf.as_mut_ptr();
                write_stack_canaries(base, size);
                let top = unsafe { base.add(size) };
                let sp = unsafe {
                    P::init_task_frame(validated.entry, validated.arg, top, task_exit_trampoline)
                };
                (StackStorage::Static { base, size }, false, sp)
            }
            None => {
                let size = validated.stack_bytes;
                let alloc = self.allocator.ok_or(CreateTaskError::OutOfMemory)?;
                let base = alloc.alloc(size).ok_or(CreateTaskError::OutOfMemory)?;
                write_stack_canaries(base, size);
                let top = unsafe { base.add(size) };
                let sp = unsafe {
                    P::init_task_frame(validated.entry, validated.arg, top, task_exit_trampoline)
                };
                (StackStorage::Dynamic { base, size }, true, sp)
            }
        };

        let timeslice = if validated.timeslice == Duration::ZERO {
            Duration::from_nanos(crate::config::DEFAULT_TIMESLICE_NS as i64)
        } else {
            validated.timeslice
        };

        let now = P::now();
        let task = &mut self.tasks[idx.index()];
        *task = Task::default();
        task.live = true;
        task.generation = task.generation.wrapping_add(1);
        task.name = validated.name;
        task.dynamic = dynamic;
        task.entry = validated.entry;
        task.arg = validated.arg;
        task.stack = stack;
        task.sp = sp;
        task.base_priority = validated.priority;
        task.current_priority = validated.priority;
        task.timeslice = timeslice;
        task.remaining_timeslice = timeslice;
        task.last_start = now;
        let handle = self.task_handle(idx);

        if validated.autostart {
            self.start_task(handle).map_err(|_| CreateTaskError::InvalidParam)?;
        }
        Ok(handle)
    }

    /// §4.F `start`.
    pub fn start_task(&mut self, h: TaskHandle) -> Result<(), TaskControlError> {
        let idx = self.validate_task(h).map_err(|_| TaskControlError::NotFound)?;
        if self.tasks[idx.index()].state != TaskState::Init {
            return Err(TaskControlError::InvalidParam);
        }
        let prio = self.tasks[idx.index()].current_priority.as_usize();
        self.tasks[idx.index()].state = TaskState::Ready;
        self.tasks[idx.index()].ready_priority = Some(prio);
        self.ready.push_back(prio, idx);
        self.maybe_preempt(idx);
        Ok(())
    }

    /// §4.F `suspend`.
    pub fn suspend_task(&mut self, h: TaskHandle) -> Result<(), TaskControlError> {
        let idx = self.validate_task(h).map_err(|_| TaskControlError::NotFound)?;
        let task = &mut self.tasks[idx.index()];
        task.suspend_count += 1;
        if task.state == TaskState::Ready {
            if let Some(p) = task.ready_priority.take() {
                self.ready.remove(p, idx);
            }
            self.tasks[idx.index()].state = TaskState::Suspended;
        } else if task.state == TaskState::Running {
            self.tasks[idx.index()].state = TaskState::Suspended;
            self.request_preempt();
        }
        Ok(())
    }

    /// §4.F `resume`.
    pub fn resume_task(&mut self, h: TaskHandle) -> Result<(), TaskControlError> {
        let idx = self.validate_task(h).map_err(|_| TaskControlError::NotFound)?;
        let task = &mut self.tasks[idx.index()];
        task.suspend_count = task.suspend_count.saturating_sub(1);
        if task.suspend_count == 0 && task.state == TaskState::Suspended {
            let prio = task.current_priority.as_usize();
            task.state = TaskState::Ready;
            task.ready_priority = Some(prio);
            self.ready.push_back(prio, idx);
            self.maybe_preempt(idx);
        }
        Ok(())
    }

    /// §4.F `delete`.
    pub fn delete_task(&mut self, h: TaskHandle) -> Result<(), TaskControlError> {
        let idx = self.validate_task(h).map_err(|_| TaskControlError::NotFound)?;
        if self.current == Some(idx) {
            return Err(TaskControlError::Busy);
        }
        let state = self.tasks[idx.index()].state;
        match state {
            TaskState::Ready => {
                if let Some(p) = self.tasks[idx.index()].ready_priority.take() {
                    self.ready.remove(p, idx);
                }
            }
            TaskState::Blocked => {
                self.deadlines.cancel_task(idx);
                // The owning wait list is found via the diagnostic tag; a
                // stale removal attempt on the wrong list is harmless
                // (`WaitQueue::remove` just returns `false`).
                self.unlink_from_wait_object(idx);
            }
            _ => {}
        }
        let task = &mut self.tasks[idx.index()];
        task.state = TaskState::Terminated;
        task.live = false;
        let stack = task.stack;
        if let StackStorage::Dynamic { base, .. } = stack {
            if let Some(alloc) = self.allocator {
                // Safety: `base` was obtained from this same allocator in
                // `create_task` and is only freed once, here, on delete.
                unsafe { alloc.free(base) };
            }
        }
        Ok(())
    }

    fn unlink_from_wait_object(&mut self, idx: TaskIdx) {
        match self.tasks[idx.index()].wait_object.take() {
            Some(WaitObject::Semaphore(i)) => {
                if let Some(s) = self.sems.get_by_index_mut(i) {
                    s.waiters.remove(idx);
                }
            }
            Some(WaitObject::Mutex(i)) => {
                if let Some(m) = self.mutexes.get_by_index_mut(i) {
                    m.waiters.remove(idx);
                }
            }
            Some(WaitObject::Queue(i)) => {
                if let Some(q) = self.queues.get_by_index_mut(i) {
                    q.send_waiters.remove(idx);
                    q.recv_waiters.remove(idx);
                }
            }
            Some(WaitObject::EventGroup(i)) => {
                if let Some(g) = self.event_groups.get_by_index_mut(i) {
                    g.remove_waiter(idx);
                }
            }
            Some(WaitObject::Pool(i)) => {
                if let Some(pool) = self.pools.get_by_index_mut(i) {
                    pool.waiters.remove(idx);
                }
            }
            Some(WaitObject::Delay) | None => {}
        }
    }

    /// §4.F `delay`.
    pub fn delay(&mut self, ns: Duration) -> Result<(), DelayError> {
        let idx = self.current.ok_or(DelayError::InvalidContext)?;
        if ns <= Duration::ZERO {
            return Ok(());
        }
        if self.in_timer_callback {
            return Err(DelayError::InvalidContext);
        }
        let now = P::now();
        let deadline = now.saturating_add(ns);
        if let Some(p) = self.tasks[idx.index()].ready_priority.take() {
            self.ready.remove(p, idx);
        }
        self.tasks[idx.index()].state = TaskState::Blocked;
        self.tasks[idx.index()].wait_object = Some(WaitObject::Delay);
        self.tasks[idx.index()].deadline = Some(deadline);
        let _ = self.deadlines.schedule_wakeup(idx, deadline);
        // A delay is only ever ended by its own deadline (no other wake
        // source targets a `WaitObject::Delay`-blocked task), so the
        // `Timeout` that `advance_clock` writes into `wake_result` here is
        // this call's ordinary, successful completion, not an error.
        let _ = self.block_current();
        Ok(())
    }

    /// §6.1 `yield`.
    pub fn yield_now(&mut self) {
        if let Some(idx) = self.current {
            let p = self.tasks[idx.index()].current_priority.as_usize();
            self.ready.rotate(p);
            self.request_preempt();
        }
    }

    pub fn current_task(&self) -> Option<TaskHandle> {
        self.current.map(|idx| self.task_handle(idx))
    }

    /// §4.F `set_priority`.
    pub fn set_priority(&mut self, h: TaskHandle, new: Priority) -> Result<(), TaskControlError> {
        let idx = self.validate_task(h).map_err(|_| TaskControlError::NotFound)?;
        new.validate(N_PRIORITIES).map_err(|_| TaskControlError::InvalidParam)?;
        self.tasks[idx.index()].base_priority = new;
        self.tasks[idx.index()].recompute_current_priority();
        let effective = self.tasks[idx.index()].current_priority;

        match self.tasks[idx.index()].state {
            TaskState::Ready => {
                if let Some(old) = self.tasks[idx.index()].ready_priority.take() {
                    self.ready.remove(old, idx);
                }
                let new_p = effective.as_usize();
                self.ready.push_back(new_p, idx);
                self.tasks[idx.index()].ready_priority = Some(new_p);
                self.maybe_preempt(idx);
            }
            TaskState::Blocked => self.resort_wait_object(idx),
            TaskState::Running => {
                if self.ready.highest_priority().is_some_and(|p| p < effective.as_usize()) {
                    self.request_preempt();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn resort_wait_object(&mut self, idx: TaskIdx) {
        match self.tasks[idx.index()].wait_object {
            Some(WaitObject::Semaphore(i)) => {
                if let Some(s) = self.sems.get_by_index_mut(i) {
                    s.waiters.resort(&self.tasks);
                }
            }
            Some(WaitObject::Mutex(i)) => {
                if let Some(m) = self.mutexes.get_by_index_mut(i) {
                    m.waiters.resort(&self.tasks);
                }
            }
            Some(WaitObject::Queue(i)) => {
                if let Some(q) = self.queues.get_by_index_mut(i) {
                    q.send_waiters.resort(&self.tasks);
                    q.recv_waiters.resort(&self.tasks);
                }
            }
            Some(WaitObject::Pool(i)) => {
                if let Some(pool) = self.pools.get_by_index_mut(i) {
                    pool.waiters.resort(&self.tasks);
                }
            }
            Some(WaitObject::EventGroup(_)) | None => {}
        }
    }

    pub fn task_info(&self, h: TaskHandle) -> Result<TaskInfo, ErrorKind> {
        let idx = self.validate_task(h)?;
        let t = &self.tasks[idx.index()];
        Ok(TaskInfo {
            name: t.name,
            state: t.state,
            base_priority: t.base_priority,
            current_priority: t.current_priority,
            switch_count: t.switch_count,
            cumulative_runtime_ns: t.cumulative_runtime_ns,
            max_stack_watermark: t.max_stack_watermark,
            stack_overflowed: t.stack_overflow,
        })
    }

    // ----- scheduler start / tick --------------------------------------

    /// §4.E "Scheduler start": creates the idle task, marks it Ready,
    /// selects the highest-Ready task. The actual jump into it is the
    /// port's first-task-entry path, invoked by the caller after this
    /// returns.
    pub fn start_scheduler(&mut self, idle_entry: fn(usize), idle_stack: &'static mut [u8]) -> Result<TaskHandle, CreateTaskError> {
        if let Some(hook) = self.hooks.startup {
            hook();
        }
        let idle = self.create_task(TaskParams {
            name: Some(ObjectName::from("idle")),
            entry: idle_entry,
            arg: 0,
            stack_bytes: idle_stack.len(),
            stack: Some(idle_stack),
            priority: Priority::new((N_PRIORITIES - 1) as u8),
            timeslice: Duration::ZERO,
            flags: rtk_core::params::TaskFlags::empty(),
        })?;
        let idx = self.validate_task(idle).unwrap();
        self.idle = Some(idx);
        self.started = true;
        let next = self.select();
        self.current = next;
        Ok(idle)
    }

    /// The initial stack pointer to resume into after [`Self::start_scheduler`]
    /// returns — the port's first-task-entry path reads this once, at boot,
    /// and never again (every subsequent switch goes through
    /// [`Self::on_pend_sv`]).
    pub fn first_task_sp(&self) -> *mut u8 {
        let idx = self.current.expect("start_scheduler must run before first_task_sp");
        self.tasks[idx.index()].sp
    }

    /// §4.A/§4.E dispatcher hook: called by the port's PendSV trampoline
    /// with interrupts already masked and `prev_sp` holding the outgoing
    /// task's saved stack pointer (read out of the hardware stack-pointer
    /// register immediately after the trampoline pushed the callee-saved
    /// registers). Picks the next task to run and returns its saved stack
    /// pointer for the trampoline to restore.
    pub fn on_pend_sv(&mut self, prev_sp: *mut u8) -> *mut u8 {
        let now = P::now();
        if let Some(prev) = self.current {
            self.deadlines.cancel_timeslice(prev);
            let elapsed = now
                .checked_duration_since(self.tasks[prev.index()].last_start)
                .unwrap_or(Duration::ZERO);
            let task = &mut self.tasks[prev.index()];
            task.sp = prev_sp;
            task.cumulative_runtime_ns = task.cumulative_runtime_ns.saturating_add(elapsed.as_nanos().max(0) as u64);
            task.switch_count += 1;
            // §4.E preemption point 3: a task switched away before its
            // timeslice ran out keeps the leftover for its next turn; one
            // that's exhausted it (including via the timeslice-fire path
            // below, which rotates it back into the ready set) starts its
            // next turn fresh.
            if task.timeslice > Duration::ZERO {
                let left = (task.remaining_timeslice.as_nanos() - elapsed.as_nanos()).max(0);
                task.remaining_timeslice = if left == 0 {
                    task.timeslice
                } else {
                    Duration::from_nanos(left)
                };
            }
            if !task.check_canaries() {
                task.stack_overflow = true;
                let name = task.name;
                crate::ktrace!("stack overflow: {:?}", name);
                if let Some(hook) = self.hooks.stack_overflow {
                    hook(name);
                }
            }
            // The idle task never sits in the ready set (§4.E `select`); every
            // other still-`Running` task being switched away from goes back
            // onto its priority's FIFO.
            if self.tasks[prev.index()].state == TaskState::Running && Some(prev) != self.idle {
                let task = &mut self.tasks[prev.index()];
                let prio = task.current_priority.as_usize();
                task.state = TaskState::Ready;
                task.ready_priority = Some(prio);
                self.ready.push_back(prio, prev);
            }
        }
        let next = self
            .select()
            .expect("select() always returns at least the idle task once started");
        if let Some(hook) = self.hooks.task_switch {
            let from = self.current.and_then(|i| self.tasks[i.index()].name);
            let to = self.tasks[next.index()].name;
            hook(from, to);
        }
        crate::ktrace!("switch: {:?} -> {:?}", self.current, next);
        if let Some(p) = self.tasks[next.index()].ready_priority.take() {
            self.ready.remove(p, next);
        }
        self.tasks[next.index()].state = TaskState::Running;
        self.tasks[next.index()].last_start = now;
        self.current = Some(next);
        let next_task = &self.tasks[next.index()];
        if next_task.timeslice > Duration::ZERO {
            let at = now.saturating_add(next_task.remaining_timeslice);
            let _ = self.deadlines.schedule_timeslice(next, at);
        }
        self.tasks[next.index()].sp
    }

    /// §4.D `advance`: dispatches every expired deadline, then re-arms the
    /// one-shot to the new earliest (or disarms it). Called from the
    /// one-shot ISR.
    pub fn advance_clock(&mut self) {
        let now = P::now();
        let mut to_wake = arrayvec::ArrayVec::<TaskIdx, { crate::config::MAX_DEADLINES }>::new();
        let mut to_fire = arrayvec::ArrayVec::<u16, { crate::config::MAX_DEADLINES }>::new();
        let mut to_rotate = arrayvec::ArrayVec::<TaskIdx, { crate::config::MAX_DEADLINES }>::new();
        self.deadlines.advance(now, |target| match target {
            DeadlineTarget::Task(idx) => {
                let _ = to_wake.try_push(idx);
            }
            DeadlineTarget::Timer(i) => {
                let _ = to_fire.try_push(i);
            }
            DeadlineTarget::Timeslice(idx) => {
                let _ = to_rotate.try_push(idx);
            }
        });
        for idx in to_wake {
            self.tasks[idx.index()].deadline = None;
            self.unlink_from_wait_object(idx);
            self.tasks[idx.index()].wake_result = Err(ErrorKind::Timeout);
            self.tasks[idx.index()].state = TaskState::Ready;
            let prio = self.tasks[idx.index()].current_priority.as_usize();
            self.tasks[idx.index()].ready_priority = Some(prio);
            self.ready.push_back(prio, idx);
            self.maybe_preempt(idx);
        }
        for i in to_fire {
            self.fire_timer(i, now);
        }
        for idx in to_rotate {
            // A timeslice entry can outlive the run it was armed for (the
            // task blocked or was preempted first); only rotate if it's
            // still the one actually running at that priority.
            if self.current == Some(idx) && self.tasks[idx.index()].state == TaskState::Running {
                let task = &mut self.tasks[idx.index()];
                task.remaining_timeslice = task.timeslice;
                let p = task.current_priority.as_usize();
                self.ready.rotate(p);
                self.request_preempt();
            }
        }
        match self.deadlines.earliest() {
            Some(at) => {
                let delta = at.checked_duration_since(now).unwrap_or(Duration::ZERO);
                P::set_oneshot(delta.as_nanos().max(0) as u64);
            }
            None => P::cancel_oneshot(),
        }
    }

    fn fire_timer(&mut self, i: u16, now: Instant) {
        let (deleted, periodic_rearm) = {
            let Some(timer) = self.timers.get_by_index_mut(i) else {
                return;
            };
            if timer.deleted {
                (true, None)
            } else {
                self.in_timer_callback = true;
                timer.fire();
                self.in_timer_callback = false;
                crate::ktrace!("timer fired: {}", i);
                (false, (timer.periodic && timer.running).then_some(timer.period))
            }
        };
        if !deleted {
            if let Some(period) = periodic_rearm {
                let _ = self.deadlines.schedule_timer(i, now.saturating_add(period));
            }
        }
    }

    // ----- semaphore (§4.G.1) ------------------------------------------

    pub fn create_semaphore(&mut self, params: SemaphoreParams) -> Result<Handle<Semaphore>, CreateObjectError> {
        let sem = Semaphore::new(params.initial_count, params.max_count)
            .map_err(|_| CreateObjectError::InvalidParam)?;
        self.sems
            .register(params.name, P::now(), sem)
            .map_err(|_| CreateObjectError::OutOfMemory)
    }

    pub fn delete_semaphore(&mut self, h: Handle<Semaphore>) -> Result<(), DeleteObjectError> {
        let sem = self.sems.get_mut(h).map_err(|_| DeleteObjectError::NotFound)?;
        sem.deleted = true;
        sem.waiters
            .wake_all(&mut self.tasks, &mut self.ready, &mut self.deadlines, Err(ErrorKind::Deleted));
        self.sems.remove(h).map_err(|_| DeleteObjectError::Busy)?;
        Ok(())
    }

    pub fn semaphore_try_take(&mut self, h: Handle<Semaphore>) -> Result<(), AcquireError> {
        let sem = self.sems.get_mut(h).map_err(map_acquire)?;
        if sem.deleted {
            return Err(AcquireError::Deleted);
        }
        if sem.try_take_fast() {
            Ok(())
        } else {
            Err(AcquireError::Timeout)
        }
    }

    pub fn semaphore_take(&mut self, h: Handle<Semaphore>, timeout: Timeout) -> Result<(), AcquireError> {
        {
            let sem = self.sems.get_mut(h).map_err(map_acquire)?;
            if sem.deleted {
                return Err(AcquireError::Deleted);
            }
            if sem.try_take_fast() {
                return Ok(());
            }
        }
        if timeout.is_immediate() {
            return Err(AcquireError::Timeout);
        }
        self.check_not_in_timer_callback().map_err(map_acquire)?;
        let idx = self.current.ok_or(AcquireError::InvalidContext)?;
        let now = P::now();
        let deadline = timeout.deadline_from(now);
        let sem = self.sems.get_mut(h).map_err(map_acquire)?;
        sem.waiters
            .add(&mut self.tasks, idx, deadline, WaitObject::Semaphore(h.index() as u16))
            .map_err(|_| AcquireError::InvalidParam)?;
        if let Some(d) = deadline {
            let _ = self.deadlines.schedule_wakeup(idx, d);
        }
        self.block_current().map_err(map_acquire)
    }

    fn semaphore_give_impl(&mut self, h: Handle<Semaphore>) -> Result<(), ReleaseError> {
        let sem = self.sems.get_mut(h).map_err(map_release)?;
        if sem.deleted {
            return Err(ReleaseError::Deleted);
        }
        let handed_off = sem.give_fast().map_err(|_| ReleaseError::Overflow)?;
        if handed_off {
            let woken = self.sems.get_mut(h).unwrap().waiters.wake(
                &mut self.tasks,
                &mut self.ready,
                &mut self.deadlines,
                Ok(()),
            );
            if let Some(w) = woken {
                self.maybe_preempt(w);
            }
        }
        Ok(())
    }

    /// §6.1 `give`.
    pub fn semaphore_give(&mut self, h: Handle<Semaphore>) -> Result<(), ReleaseError> {
        self.semaphore_give_impl(h)
    }

    /// §6.1 `give_from_isr`: must not block; the fast path is the only path,
    /// so this is identical to [`Self::semaphore_give`] other than the name
    /// documenting the calling convention (§5 "ISR-safety").
    pub fn semaphore_give_from_isr(&mut self, h: Handle<Semaphore>) -> Result<(), ReleaseError> {
        self.semaphore_give_impl(h)
    }

    // ----- mutex with priority inheritance (§4.G.2) ---------------------

    pub fn create_mutex(&mut self, params: MutexParams) -> Result<Handle<Mutex>, CreateObjectError> {
        self.mutexes
            .register(params.name, P::now(), Mutex::new())
            .map_err(|_| CreateObjectError::OutOfMemory)
    }

    pub fn delete_mutex(&mut self, h: Handle<Mutex>) -> Result<(), DeleteObjectError> {
        let mtx = self.mutexes.get(h).map_err(|_| DeleteObjectError::NotFound)?;
        if mtx.owner.is_some() {
            return Err(DeleteObjectError::Busy);
        }
        self.mutexes.remove(h).map_err(|_| DeleteObjectError::Busy)?;
        Ok(())
    }

    pub fn mutex_try_lock(&mut self, h: Handle<Mutex>) -> Result<(), AcquireError> {
        let current = self.current.ok_or(AcquireError::InvalidContext)?;
        let mtx_idx = h.index() as u16;
        let mtx = self.mutexes.get_mut(h).map_err(map_acquire)?;
        if mtx.deleted {
            return Err(AcquireError::Deleted);
        }
        match mtx.owner {
            None => {
                self.acquire_mutex_fresh(h, mtx_idx, current);
                Ok(())
            }
            Some(o) if o == current => {
                self.mutexes.get_mut(h).unwrap().nest_count += 1;
                Ok(())
            }
            Some(_) => Err(AcquireError::Timeout),
        }
    }

    fn acquire_mutex_fresh(&mut self, h: Handle<Mutex>, mtx_idx: u16, owner: TaskIdx) {
        let ceiling = self.tasks[owner.index()].current_priority;
        let mtx = self.mutexes.get_mut(h).unwrap();
        mtx.owner = Some(owner);
        mtx.nest_count = 1;
        mtx.ceiling_base_priority = ceiling;
        let task = &mut self.tasks[owner.index()];
        let _ = task.held_mutex_ceilings.try_push((mtx_idx, ceiling));
        task.recompute_current_priority();
    }

    /// §4.G.2 `lock`.
    pub fn mutex_lock(&mut self, h: Handle<Mutex>, timeout: Timeout) -> Result<(), AcquireError> {
        let current = self.current.ok_or(AcquireError::InvalidContext)?;
        let mtx_idx = h.index() as u16;
        let (owner, deleted) = {
            let mtx = self.mutexes.get(h).map_err(map_acquire)?;
            (mtx.owner, mtx.deleted)
        };
        if deleted {
            return Err(AcquireError::Deleted);
        }
        match owner {
            None => {
                self.acquire_mutex_fresh(h, mtx_idx, current);
                return Ok(());
            }
            Some(o) if o == current => {
                self.mutexes.get_mut(h).unwrap().nest_count += 1;
                return Ok(());
            }
            Some(_) => {}
        }
        if timeout.is_immediate() {
            return Err(AcquireError::Timeout);
        }
        self.check_not_in_timer_callback().map_err(map_acquire)?;
        let waiter_priority = self.tasks[current.index()].current_priority;
        self.promote_chain(owner.unwrap(), mtx_idx, waiter_priority);

        let now = P::now();
        let deadline = timeout.deadline_from(now);
        let mtx = self.mutexes.get_mut(h).map_err(map_acquire)?;
        mtx.waiters
            .add(&mut self.tasks, current, deadline, WaitObject::Mutex(mtx_idx))
            .map_err(|_| AcquireError::InvalidParam)?;
        if let Some(d) = deadline {
            let _ = self.deadlines.schedule_wakeup(current, d);
        }
        self.block_current().map_err(map_acquire)
    }

    /// Walks "waiter blocked on mutex owned by task blocked on another
    /// mutex ..." (§4.G.2 "Priority inheritance rule", §9 "Priority-
    /// inheritance chain"), bounded by [`MAX_MUTEX_DEPTH_PER_TASK`] hops to
    /// respect interrupt-stack budgets — an explicit loop, not recursion.
    fn promote_chain(&mut self, mut owner: TaskIdx, mut mtx_idx: u16, waiter_priority: Priority) {
        for _ in 0..MAX_MUTEX_DEPTH_PER_TASK {
            let task = &mut self.tasks[owner.index()];
            let entry = task
                .held_mutex_ceilings
                .iter_mut()
                .find(|(m, _)| *m == mtx_idx);
            let improved = match entry {
                Some(e) if waiter_priority < e.1 => {
                    e.1 = waiter_priority;
                    true
                }
                _ => false,
            };
            if !improved {
                return;
            }
            crate::ktrace!("priority inherit: {:?} -> {:?}", owner, waiter_priority);
            task.recompute_current_priority();

            match task.state {
                TaskState::Ready => {
                    let old_p = task.ready_priority;
                    let new_p = task.current_priority.as_usize();
                    if let Some(old) = old_p {
                        if old != new_p {
                            self.ready.remove(old, owner);
                            self.ready.push_back(new_p, owner);
                            self.tasks[owner.index()].ready_priority = Some(new_p);
                        }
                    }
                    return;
                }
                TaskState::Running => return,
                TaskState::Blocked => {}
                _ => return,
            }

            let next_wait_object = self.tasks[owner.index()].wait_object;
            match next_wait_object {
                Some(WaitObject::Mutex(next_mtx_idx)) => {
                    if let Some(m) = self.mutexes.get_by_index_mut(next_mtx_idx) {
                        m.waiters.resort(&self.tasks);
                        match m.owner {
                            Some(next_owner) => {
                                owner = next_owner;
                                mtx_idx = next_mtx_idx;
                            }
                            None => return,
                        }
                    } else {
                        return;
                    }
                }
                Some(WaitObject::Semaphore(i)) => {
                    if let Some(s) = self.sems.get_by_index_mut(i) {
                        s.waiters.resort(&self.tasks);
                    }
                    return;
                }
                Some(WaitObject::Queue(i)) => {
                    if let Some(q) = self.queues.get_by_index_mut(i) {
                        q.send_waiters.resort(&self.tasks);
                        q.recv_waiters.resort(&self.tasks);
                    }
                    return;
                }
                Some(WaitObject::EventGroup(_)) | Some(WaitObject::Pool(_)) | Some(WaitObject::Delay) | None => {
                    return;
                }
            }
        }
    }

    /// §4.G.2 `unlock`.
    pub fn mutex_unlock(&mut self, h: Handle<Mutex>) -> Result<(), UnlockError> {
        let current = self.current.ok_or(UnlockError::InvalidContext)?;
        let mtx_idx = h.index() as u16;
        let mtx = self.mutexes.get_mut(h).map_err(|_| UnlockError::Deleted)?;
        if mtx.owner != Some(current) {
            if let Some(hook) = self.hooks.assertion_failure {
                hook(file!(), line!(), "mutex_unlock: called by a task that does not own the mutex");
            }
            return Err(UnlockError::InvalidParam);
        }
        if mtx.nest_count > 1 {
            mtx.nest_count -= 1;
            return Ok(());
        }

        // Drop this mutex's ceiling entry and restore our own priority
        // (§4.G.2 unlock, §9 max-ceiling rule).
        let task = &mut self.tasks[current.index()];
        if let Some(pos) = task.held_mutex_ceilings.iter().position(|(m, _)| *m == mtx_idx) {
            task.held_mutex_ceilings.remove(pos);
        }
        let old_priority = task.current_priority;
        task.recompute_current_priority();
        let new_priority = task.current_priority;
        if old_priority != new_priority && task.state == TaskState::Running {
            if self.ready.highest_priority().is_some_and(|p| p < new_priority.as_usize()) {
                self.request_preempt();
            }
        }

        let mtx = self.mutexes.get_mut(h).unwrap();
        if let Some(next) = mtx.waiters.pop_head() {
            mtx.owner = Some(next);
            mtx.nest_count = 1;
            let ceiling = self.tasks[next.index()].current_priority;
            mtx.ceiling_base_priority = ceiling;
            if let Some(d) = self.tasks[next.index()].deadline.take() {
                let _ = d;
                self.deadlines.cancel_task(next);
            }
            let t = &mut self.tasks[next.index()];
            t.wake_result = Ok(());
            t.state = TaskState::Ready;
            t.wait_object = None;
            let _ = t.held_mutex_ceilings.try_push((mtx_idx, ceiling));
            t.recompute_current_priority();
            let prio = t.current_priority.as_usize();
            t.ready_priority = Some(prio);
            self.ready.push_back(prio, next);
            self.maybe_preempt(next);
        } else {
            mtx.owner = None;
            mtx.nest_count = 0;
        }
        Ok(())
    }

    // ----- message queue (§4.G.3) ---------------------------------------

    pub fn create_queue(&mut self, params: QueueParams) -> Result<Handle<Queue>, CreateObjectError> {
        let q = Queue::new(params.item_size, params.max_items, params.backing)
            .map_err(|_| CreateObjectError::InvalidParam)?;
        self.queues
            .register(params.name, P::now(), q)
            .map_err(|_| CreateObjectError::OutOfMemory)
    }

    pub fn delete_queue(&mut self, h: Handle<Queue>) -> Result<(), DeleteObjectError> {
        let q = self.queues.get_mut(h).map_err(|_| DeleteObjectError::NotFound)?;
        q.deleted = true;
        q.send_waiters
            .wake_all(&mut self.tasks, &mut self.ready, &mut self.deadlines, Err(ErrorKind::Deleted));
        self.queues
            .get_mut(h)
            .unwrap()
            .recv_waiters
            .wake_all(&mut self.tasks, &mut self.ready, &mut self.deadlines, Err(ErrorKind::Deleted));
        self.queues.remove(h).map_err(|_| DeleteObjectError::Busy)?;
        Ok(())
    }

    /// §4.G.3 direct handoff: copies `item` straight into the head
    /// receiver's output buffer and wakes it, without ever touching the
    /// ring or its count (§9 "Direct-handoff"). Caller has already checked
    /// `recv_waiters` is non-empty and `item.len()` matches the queue's
    /// item size.
    fn queue_handoff(&mut self, h: Handle<Queue>, item: &[u8]) -> Option<TaskIdx> {
        let receiver = self.queues.get(h).ok()?.recv_waiters.head()?;
        if let Some((ptr, len)) = self.tasks[receiver.index()].recv_buf.take() {
            let n = item.len().min(len);
            unsafe { core::ptr::copy_nonoverlapping(item.as_ptr(), ptr, n) };
        }
        let q = self.queues.get_mut(h).ok()?;
        q.recv_waiters.wake(&mut self.tasks, &mut self.ready, &mut self.deadlines, Ok(()))
    }

    /// §4.G.3 `send`.
    pub fn queue_send(&mut self, h: Handle<Queue>, item: &[u8], timeout: Timeout) -> Result<(), ReleaseError> {
        let (deleted, has_receiver, item_size) = {
            let q = self.queues.get(h).map_err(map_release)?;
            (q.deleted, !q.recv_waiters.is_empty(), q.item_size)
        };
        if deleted {
            return Err(ReleaseError::Deleted);
        }
        if has_receiver {
            if item.len() != item_size {
                return Err(ReleaseError::InvalidParam);
            }
            let woken = self.queue_handoff(h, item);
            if let Some(w) = woken {
                self.maybe_preempt(w);
            }
            return Ok(());
        }
        let q = self.queues.get_mut(h).map_err(map_release)?;
        if q.try_enqueue(item).is_ok() {
            return Ok(());
        }
        if timeout.is_immediate() {
            return Err(ReleaseError::InvalidParam);
        }
        self.check_not_in_timer_callback().map_err(map_release)?;
        let idx = self.current.ok_or(ReleaseError::InvalidContext)?;
        let now = P::now();
        let deadline = timeout.deadline_from(now);
        let q = self.queues.get_mut(h).map_err(map_release)?;
        q.send_waiters
            .add(&mut self.tasks, idx, deadline, WaitObject::Queue(h.index() as u16))
            .map_err(|_| ReleaseError::InvalidParam)?;
        if let Some(d) = deadline {
            let _ = self.deadlines.schedule_wakeup(idx, d);
        }
        let result = self.block_current();
        match result {
            Ok(()) => {
                // Woken because a receiver freed a slot; try once more.
                let q = self.queues.get_mut(h).map_err(map_release)?;
                q.try_enqueue(item).map_err(|_| ReleaseError::InvalidParam)
            }
            Err(e) => Err(map_release(e)),
        }
    }

    pub fn queue_send_from_isr(&mut self, h: Handle<Queue>, item: &[u8]) -> Result<(), ReleaseError> {
        let (deleted, has_receiver, item_size) = {
            let q = self.queues.get(h).map_err(map_release)?;
            (q.deleted, !q.recv_waiters.is_empty(), q.item_size)
        };
        if deleted {
            return Err(ReleaseError::Deleted);
        }
        if has_receiver {
            if item.len() != item_size {
                return Err(ReleaseError::InvalidParam);
            }
            let woken = self.queue_handoff(h, item);
            if let Some(w) = woken {
                self.maybe_preempt(w);
            }
            return Ok(());
        }
        let q = self.queues.get_mut(h).map_err(map_release)?;
        q.try_enqueue(item).map_err(|_| ReleaseError::Overflow)?;
        Ok(())
    }

    /// §4.G.3 `receive`.
    pub fn queue_receive(&mut self, h: Handle<Queue>, out: &mut [u8], timeout: Timeout) -> Result<(), AcquireError> {
        let q = self.queues.get_mut(h).map_err(map_acquire)?;
        if q.deleted {
            return Err(AcquireError::Deleted);
        }
        if out.len() < q.item_size {
            return Err(AcquireError::InvalidParam);
        }
        if q.try_dequeue(out).is_ok() {
            let woken = q
                .send_waiters
                .wake(&mut self.tasks, &mut self.ready, &mut self.deadlines, Ok(()));
            if let Some(w) = woken {
                self.maybe_preempt(w);
            }
            return Ok(());
        }
        if timeout.is_immediate() {
            return Err(AcquireError::Timeout);
        }
        self.check_not_in_timer_callback().map_err(map_acquire)?;
        let idx = self.current.ok_or(AcquireError::InvalidContext)?;
        let now = P::now();
        let deadline = timeout.deadline_from(now);
        let q = self.queues.get_mut(h).map_err(map_acquire)?;
        q.recv_waiters
            .add(&mut self.tasks, idx, deadline, WaitObject::Queue(h.index() as u16))
            .map_err(|_| AcquireError::InvalidParam)?;
        if let Some(d) = deadline {
            let _ = self.deadlines.schedule_wakeup(idx, d);
        }
        // A successful wake always means a sender's `queue_handoff` already
        // copied straight into `out` (the only path that wakes a
        // recv-waiter); no ring access needed on resume.
        self.tasks[idx.index()].recv_buf = Some((out.as_mut_ptr(), out.len()));
        let result = self.block_current();
        self.tasks[idx.index()].recv_buf = None;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(map_acquire(e)),
        }
    }

    // ----- event group (§4.G.4) -----------------------------------------

    pub fn create_event_group(&mut self, params: EventGroupParams) -> Result<Handle<EventGroup>, CreateObjectError> {
        self.event_groups
            .register(params.name, P::now(), EventGroup::new(params.initial_bits))
            .map_err(|_| CreateObjectError::OutOfMemory)
    }

    pub fn delete_event_group(&mut self, h: Handle<EventGroup>) -> Result<(), DeleteObjectError> {
        let g = self.event_groups.get_mut(h).map_err(|_| DeleteObjectError::NotFound)?;
        g.deleted = true;
        let waiters: arrayvec::ArrayVec<TaskIdx, { crate::config::MAX_WAITERS_PER_OBJECT }> =
            g.waiters.iter().map(|w| w.task).collect();
        g.waiters.clear();
        for idx in waiters {
            self.deadlines.cancel_task(idx);
            let t = &mut self.tasks[idx.index()];
            t.wake_result = Err(ErrorKind::Deleted);
            t.state = TaskState::Ready;
            t.wait_object = None;
            let prio = t.current_priority.as_usize();
            t.ready_priority = Some(prio);
            self.ready.push_back(prio, idx);
        }
        self.event_groups.remove(h).map_err(|_| DeleteObjectError::Busy)?;
        Ok(())
    }

    /// §4.G.4 `set_bits`.
    pub fn event_group_set_bits(&mut self, h: Handle<EventGroup>, mask: u32) -> Result<u32, ReleaseError> {
        let g = self.event_groups.get_mut(h).map_err(map_release)?;
        if g.deleted {
            return Err(ReleaseError::Deleted);
        }
        let woken = g.set(mask);
        let new_bits = g.bits();
        for (w, observed) in woken {
            self.deadlines.cancel_task(w.task);
            let t = &mut self.tasks[w.task.index()];
            t.wake_result = Ok(());
            t.wake_aux = observed;
            t.state = TaskState::Ready;
            t.wait_object = None;
            let prio = t.current_priority.as_usize();
            t.ready_priority = Some(prio);
            self.ready.push_back(prio, w.task);
            self.maybe_preempt(w.task);
        }
        Ok(new_bits)
    }

    pub fn event_group_set_bits_from_isr(&mut self, h: Handle<EventGroup>, mask: u32) -> Result<u32, ReleaseError> {
        self.event_group_set_bits(h, mask)
    }

    /// §4.G.4 `clear_bits`.
    pub fn event_group_clear_bits(&mut self, h: Handle<EventGroup>, mask: u32) -> Result<u32, ReleaseError> {
        let g = self.event_groups.get_mut(h).map_err(map_release)?;
        if g.deleted {
            return Err(ReleaseError::Deleted);
        }
        g.clear(mask);
        Ok(g.bits())
    }

    /// §4.G.4 `wait_bits`.
    pub fn event_group_wait_bits(
        &mut self,
        h: Handle<EventGroup>,
        mask: u32,
        mode: EventGroupWaitMode,
        clear_on_exit: bool,
        timeout: Timeout,
    ) -> Result<u32, AcquireError> {
        let g = self.event_groups.get_mut(h).map_err(map_acquire)?;
        if g.deleted {
            return Err(AcquireError::Deleted);
        }
        if let Some(bits) = g.try_match(mask, mode, clear_on_exit) {
            return Ok(bits);
        }
        if timeout.is_immediate() {
            return Err(AcquireError::Timeout);
        }
        self.check_not_in_timer_callback().map_err(map_acquire)?;
        let idx = self.current.ok_or(AcquireError::InvalidContext)?;
        let now = P::now();
        let deadline = timeout.deadline_from(now);
        let g = self.event_groups.get_mut(h).map_err(map_acquire)?;
        g.enqueue_waiter(EventWaiter {
            task: idx,
            mask,
            mode,
            clear_on_exit,
        })
        .map_err(|_| AcquireError::InvalidParam)?;
        self.tasks[idx.index()].state = TaskState::Blocked;
        self.tasks[idx.index()].wait_object = Some(WaitObject::EventGroup(h.index() as u16));
        self.tasks[idx.index()].deadline = deadline;
        if let Some(d) = deadline {
            let _ = self.deadlines.schedule_wakeup(idx, d);
        }
        self.block_current().map_err(map_acquire)?;
        Ok(self.tasks[idx.index()].wake_aux)
    }

    // ----- fixed-block memory pool (§4.G.5) -----------------------------

    pub fn create_pool(&mut self, params: PoolParams<'static>) -> Result<Handle<MemoryPool>, CreateObjectError> {
        let pool = MemoryPool::new(params.block_size, params.block_count, params.backing)
            .map_err(|_| CreateObjectError::InvalidParam)?;
        self.pools
            .register(params.name, P::now(), pool)
            .map_err(|_| CreateObjectError::OutOfMemory)
    }

    pub fn delete_pool(&mut self, h: Handle<MemoryPool>) -> Result<(), DeleteObjectError> {
        let pool = self.pools.get_mut(h).map_err(|_| DeleteObjectError::NotFound)?;
        pool.deleted = true;
        pool.waiters
            .wake_all(&mut self.tasks, &mut self.ready, &mut self.deadlines, Err(ErrorKind::Deleted));
        self.pools.remove(h).map_err(|_| DeleteObjectError::Busy)?;
        Ok(())
    }

    /// §4.G.5 `alloc`.
    pub fn pool_alloc(&mut self, h: Handle<MemoryPool>, timeout: Timeout) -> Result<*mut u8, AcquireError> {
        let pool = self.pools.get_mut(h).map_err(map_acquire)?;
        if pool.deleted {
            return Err(AcquireError::Deleted);
        }
        if let Some(block) = pool.try_alloc() {
            return Ok(block);
        }
        if timeout.is_immediate() {
            return Err(AcquireError::Timeout);
        }
        self.check_not_in_timer_callback().map_err(map_acquire)?;
        let idx = self.current.ok_or(AcquireError::InvalidContext)?;
        let now = P::now();
        let deadline = timeout.deadline_from(now);
        let pool = self.pools.get_mut(h).map_err(map_acquire)?;
        pool.waiters
            .add(&mut self.tasks, idx, deadline, WaitObject::Pool(h.index() as u16))
            .map_err(|_| AcquireError::InvalidParam)?;
        if let Some(d) = deadline {
            let _ = self.deadlines.schedule_wakeup(idx, d);
        }
        self.block_current().map_err(map_acquire)?;
        // A successful wake always comes from `pool_free`'s direct handoff,
        // which already reserved the exact block for this waiter — reading
        // it back here, rather than calling `try_alloc` again, is what
        // keeps a same/lower-priority task from stealing it first.
        self.tasks[idx.index()]
            .handoff_block
            .take()
            .ok_or(AcquireError::InvalidParam)
    }

    /// §4.G.5 `free`.
    ///
    /// # Safety
    /// `block` must have come from a prior successful `pool_alloc` on `h`.
    pub unsafe fn pool_free(&mut self, h: Handle<MemoryPool>, block: *mut u8) -> Result<(), ReleaseError> {
        let pool = self.pools.get_mut(h).map_err(map_release)?;
        if pool.deleted {
            return Err(ReleaseError::Deleted);
        }
        if let Some(receiver) = pool.waiters.head() {
            // Direct handoff (§9 "Direct-handoff"): stash the exact block on
            // the waiter's own task record instead of the free list, so no
            // other task's `pool_alloc` can intervene and steal it before
            // the waiter actually resumes.
            self.tasks[receiver.index()].handoff_block = Some(block);
            let woken = pool.waiters.wake(&mut self.tasks, &mut self.ready, &mut self.deadlines, Ok(()));
            if let Some(w) = woken {
                self.maybe_preempt(w);
            }
            return Ok(());
        }
        if unsafe { pool.free(block) }.is_err() {
            if let Some(hook) = self.hooks.assertion_failure {
                hook(file!(), line!(), "pool_free: double-free or block not from this pool");
            }
            return Err(ReleaseError::InvalidParam);
        }
        Ok(())
    }

    // ----- software timer -------------------------------------------

    pub fn create_timer(&mut self, params: TimerParams) -> Result<Handle<Timer>, CreateObjectError> {
        if params.period <= Duration::ZERO {
            return Err(CreateObjectError::InvalidParam);
        }
        let timer = Timer::new(params.period, params.periodic, params.callback, params.arg);
        self.timers
            .register(params.name, P::now(), timer)
            .map_err(|_| CreateObjectError::OutOfMemory)
    }

    pub fn delete_timer(&mut self, h: Handle<Timer>) -> Result<(), DeleteObjectError> {
        let i = h.index() as u16;
        let timer = self.timers.get_mut(h).map_err(|_| DeleteObjectError::NotFound)?;
        timer.deleted = true;
        timer.running = false;
        self.deadlines.cancel_timer(i);
        self.timers.remove(h).map_err(|_| DeleteObjectError::Busy)?;
        Ok(())
    }

    pub fn timer_start(&mut self, h: Handle<Timer>) -> Result<(), TaskControlError> {
        let i = h.index() as u16;
        let now = P::now();
        let timer = self.timers.get_mut(h).map_err(|_| TaskControlError::NotFound)?;
        if timer.deleted {
            return Err(TaskControlError::InvalidParam);
        }
        timer.running = true;
        let period = timer.period;
        let _ = self.deadlines.schedule_timer(i, now.saturating_add(period));
        Ok(())
    }

    pub fn timer_stop(&mut self, h: Handle<Timer>) -> Result<(), TaskControlError> {
        let i = h.index() as u16;
        let timer = self.timers.get_mut(h).map_err(|_| TaskControlError::NotFound)?;
        timer.running = false;
        self.deadlines.cancel_timer(i);
        Ok(())
    }

    pub fn timer_reset(&mut self, h: Handle<Timer>) -> Result<(), TaskControlError> {
        self.timer_stop(h)?;
        self.timer_start(h)
    }

    pub fn timer_set_period(&mut self, h: Handle<Timer>, period: Duration) -> Result<(), TaskControlError> {
        if period <= Duration::ZERO {
            return Err(TaskControlError::InvalidParam);
        }
        let timer = self.timers.get_mut(h).map_err(|_| TaskControlError::NotFound)?;
        timer.period = period;
        Ok(())
    }
}

impl<
        P: Port,
        const MAX_TASKS: usize,
        const N_PRIORITIES: usize,
        const MAX_SEMS: usize,
        const MAX_MUTEXES: usize,
        const MAX_QUEUES: usize,
        const MAX_EVENT_GROUPS: usize,
        const MAX_POOLS: usize,
        const MAX_TIMERS: usize,
    > Default
    for Kernel<P, MAX_TASKS, N_PRIORITIES, MAX_SEMS, MAX_MUTEXES, MAX_QUEUES, MAX_EVENT_GROUPS, MAX_POOLS, MAX_TIMERS>
{
    fn default() -> Self {
        Self::new()
    }
}

fn task_exit_trampoline() -> ! {
    panic!("task entry function returned; tasks must not exit");
}

/// Writes `STACK_CANARY` at both ends of a freshly carved-out stack, before
/// `Port::init_task_frame` runs (§3 "Stack"). On ports whose initial frame
/// overlaps the top word (the hardware exception frame on Cortex-M), that
/// write is immediately superseded by the frame's own register values —
/// `check_canaries` then only guards the low end on those ports until the
/// first switch-out repopulates the high word with real stack contents.
fn write_stack_canaries(base: *mut u8, size: usize) {
    if size < 8 {
        return;
    }
    unsafe {
        (base as *mut u32).write_unaligned(crate::task::STACK_CANARY);
        (base.add(size - 4) as *mut u32).write_unaligned(crate::task::STACK_CANARY);
    }
}

fn map_acquire(e: ErrorKind) -> AcquireError {
    match e {
        ErrorKind::Timeout => AcquireError::Timeout,
        ErrorKind::Deleted => AcquireError::Deleted,
        ErrorKind::InvalidContext => AcquireError::InvalidContext,
        _ => AcquireError::InvalidParam,
    }
}

fn map_release(e: ErrorKind) -> ReleaseError {
    match e {
        ErrorKind::Overflow => ReleaseError::Overflow,
        ErrorKind::Deleted => ReleaseError::Deleted,
        ErrorKind::InvalidContext => ReleaseError::InvalidContext,
        _ => ReleaseError::InvalidParam,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};
    use rtk_core::params::TaskFlags;

    static CLOCK: AtomicU64 = AtomicU64::new(1);

    struct TestPort;
    impl Port for TestPort {
        type InterruptState = ();
        fn mask_interrupts() {}
        unsafe fn restore_interrupts(_prev: ()) {}
        unsafe fn init_task_frame(
            _entry: fn(usize),
            _arg: usize,
            stack_top: *mut u8,
            _exit_handler: fn() -> !,
        ) -> *mut u8 {
            stack_top
        }
        fn request_context_switch() {}
        fn set_oneshot(_nanos_from_now: u64) {}
        fn cancel_oneshot() {}
        fn now() -> Instant {
            Instant::from_nanos(CLOCK.fetch_add(1, Ordering::SeqCst))
        }
    }

    type TestKernel = Kernel<TestPort, 8, 32, 4, 4, 4, 4, 4, 4>;

    fn task_params(name: &str, priority: u8, stack: &'static mut [u8]) -> TaskParams {
        TaskParams {
            name: Some(ObjectName::from(name)),
            entry: |_| {},
            arg: 0,
            stack_bytes: stack.len(),
            stack: Some(stack),
            priority: Priority::new(priority),
            timeslice: Duration::ZERO,
            flags: TaskFlags::empty(),
        }
    }

    fn leaked_stack() -> &'static mut [u8] {
        Box::leak(vec![0u8; 256].into_boxed_slice())
    }

    #[test]
    fn creating_and_starting_a_task_makes_it_selectable() {
        let mut k = TestKernel::new();
        let h = k.create_task(task_params("t1", 5, leaked_stack())).unwrap();
        k.start_task(h).unwrap();
        assert_eq!(k.select(), Some(k.validate_task(h).unwrap()));
    }

    #[test]
    fn semaphore_take_and_give_fast_path_round_trips() {
        let mut k = TestKernel::new();
        let h = k
            .create_semaphore(SemaphoreParams {
                name: None,
                initial_count: 1,
                max_count: 1,
            })
            .unwrap();
        k.semaphore_try_take(h).unwrap();
        assert_eq!(k.semaphore_try_take(h), Err(AcquireError::Timeout));
        k.semaphore_give(h).unwrap();
        k.semaphore_try_take(h).unwrap();
    }

    #[test]
    fn mutex_recursive_lock_increments_nest_count() {
        let mut k = TestKernel::new();
        let th = k.create_task(task_params("owner", 5, leaked_stack())).unwrap();
        k.start_task(th).unwrap();
        k.current = Some(k.validate_task(th).unwrap());

        let mh = k.create_mutex(MutexParams { name: None }).unwrap();
        k.mutex_try_lock(mh).unwrap();
        k.mutex_try_lock(mh).unwrap();
        assert_eq!(k.mutexes.get(mh).unwrap().nest_count(), 2);
        k.mutex_unlock(mh).unwrap();
        assert_eq!(k.mutexes.get(mh).unwrap().nest_count(), 1);
        k.mutex_unlock(mh).unwrap();
        assert!(k.mutexes.get(mh).unwrap().owner().is_none());
    }

    #[test]
    fn queue_send_then_receive_round_trips_the_item() {
        let mut k = TestKernel::new();
        let backing = Box::leak(vec![0u8; 16].into_boxed_slice());
        let qh = k
            .create_queue(QueueParams {
                name: None,
                item_size: 8,
                max_items: 2,
                backing,
            })
            .unwrap();
        k.queue_send_from_isr(qh, &1u64.to_le_bytes()).unwrap();
        let mut out = [0u8; 8];
        k.current = Some(TaskIdx(0)); // placeholder; fast path doesn't need it
        k.queue_receive(qh, &mut out, Timeout::None).unwrap();
        assert_eq!(u64::from_le_bytes(out), 1);
    }

    // The remaining tests drive the scenarios from §8's end-to-end list
    // directly against the kernel's bookkeeping. `TestPort` never executes a
    // real instruction stream (`request_context_switch` is a no-op and
    // `init_task_frame` hands back the unmodified stack top), so "H runs
    // before L resumes" can't be observed as wall-clock interleaving the way
    // it would on a real port — instead each test manually drives `select`/
    // `on_pend_sv` the way the hardware trampoline would, and asserts on the
    // resulting ready-queue membership, priority, and wake outcome, which is
    // the part of §8 actually owned by this crate.

    #[test]
    fn s1_higher_priority_task_is_selected_over_lower_after_give() {
        let mut k = TestKernel::new();
        let lo = k.create_task(task_params("L", 20, leaked_stack())).unwrap();
        let hi = k.create_task(task_params("H", 10, leaked_stack())).unwrap();
        k.start_task(lo).unwrap();
        k.start_task(hi).unwrap();

        let sh = k
            .create_semaphore(SemaphoreParams { name: None, initial_count: 0, max_count: 1 })
            .unwrap();

        // L blocks on the empty semaphore.
        k.current = Some(k.validate_task(lo).unwrap());
        assert_eq!(k.semaphore_take(sh, Timeout::Forever), Ok(()));
        assert_eq!(k.task_info(lo).unwrap().state, TaskState::Blocked);

        // H gives it; the wake must land L back in the ready set at its own
        // priority, and since H is higher priority than L, select() must
        // still pick H over the now-ready L.
        k.current = Some(k.validate_task(hi).unwrap());
        k.semaphore_give(sh).unwrap();
        assert_eq!(k.task_info(lo).unwrap().state, TaskState::Ready);
        assert_eq!(k.select(), Some(k.validate_task(hi).unwrap()));
    }

    #[test]
    fn s3_priority_inheritance_raises_and_restores_owner_priority() {
        let mut k = TestKernel::new();
        let l = k.create_task(task_params("L", 25, leaked_stack())).unwrap();
        let h = k.create_task(task_params("H", 10, leaked_stack())).unwrap();
        k.start_task(l).unwrap();
        k.start_task(h).unwrap();

        let mh = k.create_mutex(MutexParams { name: None }).unwrap();
        k.current = Some(k.validate_task(l).unwrap());
        k.mutex_try_lock(mh).unwrap();
        assert_eq!(k.task_info(l).unwrap().current_priority, Priority::new(25));

        // H's lock attempt blocks and must promote L to H's priority.
        k.current = Some(k.validate_task(h).unwrap());
        assert_eq!(k.mutex_lock(mh, Timeout::Forever), Ok(()));
        assert_eq!(k.task_info(l).unwrap().current_priority, Priority::new(10));

        // L unlocking hands the mutex straight to H and restores L's own
        // base priority (no other ceilings left).
        k.current = Some(k.validate_task(l).unwrap());
        k.mutex_unlock(mh).unwrap();
        assert_eq!(k.task_info(l).unwrap().current_priority, Priority::new(25));
        assert_eq!(k.mutexes.get(mh).unwrap().owner(), Some(k.validate_task(h).unwrap().idx()));
        assert_eq!(k.task_info(h).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn s4_queue_handoff_delivers_the_exact_bytes() {
        let mut k = TestKernel::new();
        let r = k.create_task(task_params("R", 10, leaked_stack())).unwrap();
        let s = k.create_task(task_params("S", 20, leaked_stack())).unwrap();
        k.start_task(r).unwrap();
        k.start_task(s).unwrap();

        let backing = Box::leak(vec![0u8; 16].into_boxed_slice());
        let qh = k
            .create_queue(QueueParams { name: None, item_size: 8, max_items: 2, backing })
            .unwrap();

        // R's receive call finds the queue empty and blocks, stashing its
        // output buffer for a direct-handoff sender to copy straight into.
        k.current = Some(k.validate_task(r).unwrap());
        let mut out = [0u8; 8];
        let _ = k.queue_receive(qh, &mut out, Timeout::Forever);
        assert_eq!(k.task_info(r).unwrap().state, TaskState::Blocked);

        // S's send finds R already waiting: the bytes land in R's buffer
        // directly, bypassing the ring entirely, and R wakes without
        // competing for a slot.
        k.current = Some(k.validate_task(s).unwrap());
        k.queue_send(qh, &0xDEAD_BEEF_1234_5678u64.to_le_bytes(), Timeout::None).unwrap();
        assert_eq!(k.task_info(r).unwrap().state, TaskState::Ready);
        assert_eq!(u64::from_le_bytes(out), 0xDEAD_BEEF_1234_5678);
        assert_eq!(k.queues.get(qh).unwrap().len(), 0);
    }

    #[test]
    fn s5_deleting_a_semaphore_wakes_every_waiter_with_deleted() {
        let mut k = TestKernel::new();
        let sh = k
            .create_semaphore(SemaphoreParams { name: None, initial_count: 0, max_count: 1 })
            .unwrap();
        let mut waiters = [TaskHandle { idx: TaskIdx(0), generation: 0 }; 5];
        let names = ["w0", "w1", "w2", "w3", "w4"];
        for (i, slot) in waiters.iter_mut().enumerate() {
            let th = k.create_task(task_params(names[i], 10, leaked_stack())).unwrap();
            k.start_task(th).unwrap();
            k.current = Some(k.validate_task(th).unwrap());
            assert_eq!(k.semaphore_take(sh, Timeout::Forever), Ok(()));
            *slot = th;
        }

        k.delete_semaphore(sh).unwrap();
        for th in waiters {
            assert_eq!(k.task_info(th).unwrap().state, TaskState::Ready);
        }
        assert_eq!(k.semaphore_give(sh), Err(ReleaseError::Deleted));
    }

    #[test]
    fn s6_one_advance_past_a_burst_wakes_every_delayed_task() {
        let mut k = TestKernel::new();
        let mut tasks = [TaskHandle { idx: TaskIdx(0), generation: 0 }; 8];
        for (i, slot) in tasks.iter_mut().enumerate() {
            let name = ["d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7"][i];
            let th = k.create_task(task_params(name, 10, leaked_stack())).unwrap();
            k.start_task(th).unwrap();
            k.current = Some(k.validate_task(th).unwrap());
            // Spacing far exceeds the handful of nanoseconds `now()` itself
            // advances per call in this fake clock, so deadline order here
            // is governed by `(i + 1) * 10_000`, not incidental clock noise.
            k.delay(Duration::from_nanos((i as i64 + 1) * 10_000)).ok();
            assert_eq!(k.task_info(th).unwrap().state, TaskState::Blocked);
            *slot = th;
        }
        assert!(k.deadlines.earliest().is_some());

        // Jump the clock past every deadline and advance once, as the
        // one-shot ISR would after a burst of near-simultaneous timers.
        CLOCK.store(1_000_000, Ordering::SeqCst);
        k.advance_clock();

        for th in tasks {
            let info = k.task_info(th).unwrap();
            assert_eq!(info.state, TaskState::Ready);
        }
        assert_eq!(k.deadlines.earliest(), None);
    }

    #[test]
    fn mutex_unlock_by_non_owner_is_rejected() {
        let mut k = TestKernel::new();
        let owner = k.create_task(task_params("owner", 10, leaked_stack())).unwrap();
        let other = k.create_task(task_params("other", 10, leaked_stack())).unwrap();
        k.start_task(owner).unwrap();
        k.start_task(other).unwrap();

        let mh = k.create_mutex(MutexParams { name: None }).unwrap();
        k.current = Some(k.validate_task(owner).unwrap());
        k.mutex_try_lock(mh).unwrap();

        k.current = Some(k.validate_task(other).unwrap());
        assert_eq!(k.mutex_unlock(mh), Err(UnlockError::InvalidParam));
        assert_eq!(k.mutexes.get(mh).unwrap().owner(), Some(k.validate_task(owner).unwrap().idx()));
    }

    #[test]
    fn blocking_call_from_a_timer_callback_is_rejected() {
        let mut k = TestKernel::new();
        let th = k.create_task(task_params("t", 10, leaked_stack())).unwrap();
        k.start_task(th).unwrap();
        k.current = Some(k.validate_task(th).unwrap());

        // A real timer callback is a bare `fn(usize)` with no kernel access;
        // `in_timer_callback` is what every blocking entry point actually
        // consults, so setting it directly is the faithful way to exercise
        // the guard without inventing a global kernel handle just for this.
        k.in_timer_callback = true;
        assert_eq!(k.delay(Duration::from_millis(1)), Err(DelayError::InvalidContext));

        let sh = k
            .create_semaphore(SemaphoreParams { name: None, initial_count: 0, max_count: 1 })
            .unwrap();
        assert_eq!(k.semaphore_take(sh, Timeout::Forever), Err(AcquireError::InvalidContext));
    }

    #[test]
    fn timeslice_exhaustion_rotates_the_ready_queue() {
        let _ = env_logger::try_init();
        let mut k = TestKernel::new();
        let slice = Duration::from_nanos(1_000);
        let mut params = |name| TaskParams {
            timeslice: slice,
            ..task_params(name, 10, leaked_stack())
        };
        let t1 = k.create_task(params("t1")).unwrap();
        let t2 = k.create_task(params("t2")).unwrap();
        let t3 = k.create_task(params("t3")).unwrap();
        k.start_task(t1).unwrap();
        k.start_task(t2).unwrap();
        k.start_task(t3).unwrap();

        // Simulate the port's first dispatch: t1 is FIFO head, so it's
        // picked and a timeslice deadline is armed for it.
        k.on_pend_sv(core::ptr::null_mut());
        let t1_idx = k.validate_task(t1).unwrap();
        assert_eq!(k.current, Some(t1_idx));
        assert!(k.deadlines.earliest().is_some());

        // Fast-forward the fake clock well past the armed deadline.
        CLOCK.store(1_000_000, Ordering::SeqCst);
        k.advance_clock();

        // t1 is still running, so its timeslice resets and t2 is rotated
        // behind t3 at their shared priority.
        assert_eq!(k.current, Some(t1_idx));
        assert_eq!(k.tasks[t1_idx.index()].remaining_timeslice, slice);
        assert_eq!(k.ready.head(10), Some(k.validate_task(t3).unwrap().idx()));
        assert_eq!(k.deadlines.earliest(), None);
    }
}
