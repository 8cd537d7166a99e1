//! Creation parameters for kernel objects (§4.F, §6.1).
use crate::{name::ObjectName, priority::Priority, time::Duration};

bitflags::bitflags! {
    /// Task creation flags (§6.1 `params.flags`).
    #[derive(Default)]
    pub struct TaskFlags: u8 {
        /// Start the task in the `Ready` state immediately instead of `Init`.
        const AUTOSTART = 1 << 0;
    }
}

/// Parameters for `Task::create` (§4.F).
///
/// `stack` is `'static` because a task's stack must outlive any call that
/// may block it (§3 "Lifetimes"), and a task started now may simply never
/// exit.
pub struct TaskParams {
    pub name: Option<ObjectName>,
    pub entry: fn(usize),
    pub arg: usize,
    pub stack_bytes: usize,
    /// Caller-provided stack storage for the static form; `None` selects the
    /// dynamic (kernel-allocated) form (§3 "Ownership").
    pub stack: Option<&'static mut [u8]>,
    pub priority: Priority,
    pub timeslice: Duration,
    pub flags: TaskFlags,
}

/// Parameters for `Semaphore::create` (§6.1).
#[derive(Clone, Copy, Debug)]
pub struct SemaphoreParams {
    pub name: Option<ObjectName>,
    pub initial_count: u32,
    pub max_count: u32,
}

/// Parameters for `Mutex::create` (§6.1).
#[derive(Clone, Copy, Debug, Default)]
pub struct MutexParams {
    pub name: Option<ObjectName>,
}

/// Parameters for `Queue::create` (§6.1, §3 "Message queue").
///
/// `backing` must be at least `item_size * max_items` bytes; like
/// [`PoolParams::backing`], it is caller-provided storage rather than
/// something the kernel allocates, so a queue can be declared `static` with
/// no dynamic allocation at all.
pub struct QueueParams {
    pub name: Option<ObjectName>,
    pub item_size: usize,
    pub max_items: usize,
    pub backing: &'static mut [u8],
}

/// Parameters for `EventGroup::create` (§6.1).
#[derive(Clone, Copy, Debug)]
pub struct EventGroupParams {
    pub name: Option<ObjectName>,
    pub initial_bits: u32,
}

/// Wait mode for `EventGroup::wait_bits` (§3 "Event group").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventGroupWaitMode {
    Any,
    All,
}

/// Parameters for `MemPool::create` (§6.1, §3 "Fixed-block pool").
pub struct PoolParams<'a> {
    pub name: Option<ObjectName>,
    pub block_size: usize,
    pub block_count: usize,
    pub backing: &'a mut [u8],
}

/// Parameters for `Timer::create` (§6.1).
#[derive(Clone, Copy)]
pub struct TimerParams {
    pub name: Option<ObjectName>,
    pub period: Duration,
    pub periodic: bool,
    pub callback: fn(usize),
    pub arg: usize,
}
