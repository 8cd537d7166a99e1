//! Build-time constants (§6.5).
//!
//! The per-object-kind *capacities* (`MAX_TASKS`, `MAX_SEMS`, ...) are
//! `const` generic parameters on [`crate::kernel::Kernel`] rather than
//! values in this module, since they size that type's storage directly —
//! see its doc comment for the full list and defaults. The constants below
//! are the handful of limits that are not per-object-table capacities and
//! so don't need to vary per kernel instantiation.

/// Default per-task timeslice when a task doesn't request one explicitly.
pub const DEFAULT_TIMESLICE_NS: u64 = 10_000_000; // 10 ms

/// Minimum stack a task may be created with (§4.F validation).
pub const MIN_STACK_BYTES: usize = 256;

/// Bound on a priority-inheritance promotion chain (§4.G.2, §9
/// "Priority-inheritance chain"): the number of mutexes a single task may
/// hold at once, and thus the deepest a `lock` can walk "owner of the mutex
/// I'm blocked on is itself blocked on another mutex ...".
pub const MAX_MUTEX_DEPTH_PER_TASK: usize = 4;

/// Upper bound on simultaneous waiters on any one blocking primitive. Not
/// named in §6.5 because, unlike the object-table capacities, it does not
/// change the kernel's identity (two kernels differing only in this value
/// are interchangeable from an application's point of view) — it is sized
/// generously relative to `MAX_TASKS`'s default and is the one knob in this
/// file worth raising if a kernel is configured with many more tasks than
/// the default.
pub const MAX_WAITERS_PER_OBJECT: usize = 16;

/// Upper bound on outstanding deadline-queue entries — at most one per live
/// task (a delay or a timed wait) plus one per live, started timer.
pub const MAX_DEADLINES: usize = 64;
