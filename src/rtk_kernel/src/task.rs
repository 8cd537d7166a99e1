//! Task lifecycle (§4.F) and the task control block (§3 "Task (TCB)").
use rtk_core::{
    error::ErrorKind,
    name::ObjectName,
    params::{TaskFlags, TaskParams},
    priority::Priority,
    time::{Duration, Instant},
};

use crate::{config::MAX_MUTEX_DEPTH_PER_TASK, port::Port};

/// Stack canary value written at both ends of every task stack (§3 "Stack").
pub const STACK_CANARY: u32 = 0xDEAD_BEEF;

/// A raw, unvalidated index into a kernel's task table. Used for intrusive
/// linkage (ready/wait/deadline lists); the kernel never exposes this type,
/// only the generation-checked [`crate::registry::Handle`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct TaskIdx(pub u16);

impl TaskIdx {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A validated, public-facing reference to a task (§4.F `create` returns
/// this). Unlike [`crate::registry::Handle`], which backs the `Table`-based
/// object kinds, a task's slot is also addressed directly by [`TaskIdx`] from
/// the ready/wait/deadline queues, so the generation check lives here instead
/// of behind `Table`'s private constructor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TaskHandle {
    pub(crate) idx: TaskIdx,
    pub(crate) generation: u32,
}

impl TaskHandle {
    #[inline]
    pub fn idx(self) -> TaskIdx {
        self.idx
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TaskState {
    #[default]
    Init,
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
}

/// What a `Blocked` task is waiting on, kept only for diagnostics
/// (`get_info`) — the actual wake path is driven by the object's own wait
/// queue, not by this tag (§3 "Blocking context").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitObject {
    Delay,
    Semaphore(u16),
    Mutex(u16),
    Queue(u16),
    EventGroup(u16),
    Pool(u16),
}

/// Backing storage for a task's stack: either borrowed from the caller
/// ("static form") or obtained through the allocator contract ("dynamic
/// form") and owed back to it on delete (§3 "Ownership", §6.4).
#[derive(Clone, Copy)]
pub(crate) enum StackStorage {
    Static { base: *mut u8, size: usize },
    Dynamic { base: *mut u8, size: usize },
    Unallocated,
}

/// The task control block (§3 "Task (TCB)").
pub struct Task {
    pub(crate) live: bool,
    pub(crate) generation: u32,
    pub(crate) name: Option<ObjectName>,
    pub(crate) dynamic: bool,
    pub(crate) refcount: u32,

    pub(crate) entry: fn(usize),
    pub(crate) arg: usize,
    pub(crate) stack: StackStorage,
    pub(crate) sp: *mut u8,

    pub(crate) state: TaskState,
    pub(crate) base_priority: Priority,
    pub(crate) current_priority: Priority,
    pub(crate) timeslice: Duration,
    pub(crate) remaining_timeslice: Duration,
    pub(crate) suspend_count: u32,

    // Ready-queue linkage (§3 "Ready set"); meaningful only while `state ==
    // Ready`. The FIFO itself is owned by `ReadyQueue` (§4.E); a task only
    // remembers which priority level it's threaded into.
    pub(crate) ready_priority: Option<usize>,

    // Wait-queue / deadline-queue context (§3 "Blocking context").
    pub(crate) wait_object: Option<WaitObject>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) wake_result: Result<(), ErrorKind>,
    /// Side channel for a wake outcome that isn't just `()` — currently
    /// only event-group `wait_bits` uses it, to carry the bit pattern
    /// observed at the moment this waiter's condition was satisfied.
    pub(crate) wake_aux: u32,

    /// While blocked in `queue_receive`: `(out.as_mut_ptr(), out.len())` of
    /// the caller's buffer, so a direct-handoff sender can copy straight
    /// into it (§4.G.3 "Direct-handoff"). `None` whenever not blocked on a
    /// queue receive.
    pub(crate) recv_buf: Option<(*mut u8, usize)>,
    /// While blocked in `pool_alloc`: the exact block a direct-handoff
    /// `pool_free` reserved for this waiter (§4.G.5 "Direct-handoff"), read
    /// back instead of re-deriving it from the free list on resume.
    pub(crate) handoff_block: Option<*mut u8>,

    /// `(mutex table index, current ceiling)` for every PI mutex currently
    /// held by this task, most-recently-acquired last. A mutex's ceiling
    /// starts at the owner's priority on acquisition and is raised in place
    /// as higher-priority waiters arrive on that specific mutex; the held
    /// entry is dropped on that mutex's unlock (§4.G.2, §9 open question,
    /// resolved in DESIGN.md as the max-ceiling restore rule).
    pub(crate) held_mutex_ceilings: arrayvec::ArrayVec<(u16, Priority), MAX_MUTEX_DEPTH_PER_TASK>,

    pub(crate) stack_overflow: bool,

    // Stats (§3 "Stats").
    pub(crate) switch_count: u64,
    pub(crate) cumulative_runtime_ns: u64,
    pub(crate) max_stack_watermark: usize,
    pub(crate) last_start: Instant,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            live: false,
            generation: 0,
            name: None,
            dynamic: false,
            refcount: 0,
            entry: |_| {},
            arg: 0,
            stack: StackStorage::Unallocated,
            sp: core::ptr::null_mut(),
            state: TaskState::Init,
            base_priority: Priority::new(0),
            current_priority: Priority::new(0),
            timeslice: Duration::ZERO,
            remaining_timeslice: Duration::ZERO,
            suspend_count: 0,
            ready_priority: None,
            wait_object: None,
            deadline: None,
            wake_result: Ok(()),
            wake_aux: 0,
            recv_buf: None,
            handoff_block: None,
            held_mutex_ceilings: arrayvec::ArrayVec::new(),
            stack_overflow: false,
            switch_count: 0,
            cumulative_runtime_ns: 0,
            max_stack_watermark: 0,
            last_start: Instant::ZERO,
        }
    }
}

impl Task {
    /// The priority this task should run at right now: the highest
    /// (numerically lowest) of its base priority and every ceiling it holds
    /// (§4.G.2 "restore ... to the highest ceiling of any mutex self still
    /// owns, whichever is greater").
    pub(crate) fn recompute_current_priority(&mut self) {
        let mut best = self.base_priority;
        for &(_, ceiling) in &self.held_mutex_ceilings {
            if ceiling < best {
                best = ceiling;
            }
        }
        self.current_priority = best;
    }

    #[inline]
    pub fn name(&self) -> Option<&ObjectName> {
        self.name.as_ref()
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    #[inline]
    pub fn current_priority(&self) -> Priority {
        self.current_priority
    }

    #[inline]
    pub fn stack_overflowed(&self) -> bool {
        self.stack_overflow
    }

    /// Checks both canaries (§3 "Stack": "magic value = 0xDEADBEEF", §4.F
    /// "Stack hygiene"). Cheap enough to call on every context switch.
    pub(crate) fn check_canaries(&self) -> bool {
        let (base, size) = match self.stack {
            StackStorage::Static { base, size } | StackStorage::Dynamic { base, size } => {
                (base, size)
            }
            StackStorage::Unallocated => return true,
        };
        if size < 8 {
            return true;
        }
        // Safety: `base` points to a region of `size` bytes that outlives
        // the task (§3 "Lifetimes"); `create_task` writes both canary words
        // before the port builds the initial frame, and user code that
        // respects its declared stack bounds never touches either end.
        unsafe {
            let low = (base as *const u32).read_unaligned();
            let high = (base.add(size - 4) as *const u32).read_unaligned();
            low == STACK_CANARY && high == STACK_CANARY
        }
    }
}

/// Validated parameters, checked before any state is mutated (§4.F
/// `create`: "Validates: priority < N_LEVELS, stack_bytes >= MIN_STACK,
/// entry non-nil").
pub(crate) struct ValidatedTaskParams {
    pub name: Option<ObjectName>,
    pub entry: fn(usize),
    pub arg: usize,
    pub stack_bytes: usize,
    pub stack: Option<&'static mut [u8]>,
    pub priority: Priority,
    pub timeslice: Duration,
    pub autostart: bool,
}

pub(crate) fn validate_params<P: Port>(
    params: TaskParams,
    n_priorities: usize,
    min_stack_bytes: usize,
) -> Result<ValidatedTaskParams, ErrorKind> {
    params.priority.validate(n_priorities)?;
    if params.stack_bytes < min_stack_bytes {
        return Err(ErrorKind::InvalidParam);
    }
    if let Some(s) = params.stack.as_deref() {
        if s.len() < params.stack_bytes {
            return Err(ErrorKind::InvalidParam);
        }
    }
    let _ = P::now(); // ports must be initialized before any task is created
    Ok(ValidatedTaskParams {
        name: params.name,
        entry: params.entry,
        arg: params.arg,
        stack_bytes: params.stack_bytes,
        stack: params.stack,
        priority: params.priority,
        timeslice: params.timeslice,
        autostart: params.flags.contains(TaskFlags::AUTOSTART),
    })
}
