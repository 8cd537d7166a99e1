//! Recursive mutex with priority inheritance (§3 "Mutex", §4.G.2).
//!
//! The chain walk needed to propagate a promotion through
//! "I'm blocked on a mutex owned by a task that's itself blocked on another
//! mutex" lives in [`crate::kernel`], since it must cross-reference the
//! mutex table and the task table together and is bounded by
//! [`crate::config::MAX_MUTEX_DEPTH_PER_TASK`] (§4.G.2, §9
//! "Priority-inheritance chain"). This module only holds the per-mutex
//! state and the single-mutex transitions.
use rtk_core::priority::Priority;

use crate::{task::TaskIdx, wait::WaitQueue};

pub struct Mutex {
    pub(crate) owner: Option<TaskIdx>,
    pub(crate) nest_count: u32,
    /// The owner's priority at the moment of the *first* (non-recursive)
    /// acquisition — the ceiling this mutex contributes to its owner's
    /// `held_mutex_ceilings` for as long as it's held (§3 "Mutex").
    pub(crate) ceiling_base_priority: Priority,
    pub(crate) waiters: WaitQueue,
    pub(crate) deleted: bool,
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            owner: None,
            nest_count: 0,
            ceiling_base_priority: Priority::new(0),
            waiters: WaitQueue::new(),
            deleted: false,
        }
    }

    #[inline]
    pub fn owner(&self) -> Option<TaskIdx> {
        self.owner
    }

    #[inline]
    pub fn nest_count(&self) -> u32 {
        self.nest_count
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
