//! Narrow, per-operation error types (§4.J): each kernel entry point
//! returns only the subset of [`rtk_core::error::ErrorKind`] it can
//! actually produce, so call sites that `match` exhaustively aren't
//! forced to handle outcomes that can't happen for that call.
use rtk_core::narrow_error;

narrow_error! {
    /// `Kernel::create_task`.
    pub enum CreateTaskError {
        InvalidParam,
        OutOfMemory,
    }
}

narrow_error! {
    /// `Kernel::start_task`, `suspend_task`, `resume_task`, `delete_task`,
    /// `set_priority`.
    pub enum TaskControlError {
        NotFound,
        Deleted,
        InvalidParam,
        InvalidContext,
    }
}

narrow_error! {
    /// `Kernel::delay`.
    pub enum DelayError {
        InvalidContext,
    }
}

narrow_error! {
    /// `Semaphore::take` / `Mutex::lock` / `Queue::receive` / `EventGroup::wait`
    /// / `MemoryPool::alloc`, the blocking-acquire family (§4.G).
    pub enum AcquireError {
        Timeout,
        Deleted,
        InvalidContext,
        InvalidParam,
    }
}

narrow_error! {
    /// `Semaphore::give` / `Queue::send`.
    pub enum ReleaseError {
        Overflow,
        Deleted,
        InvalidParam,
        InvalidContext,
    }
}

narrow_error! {
    /// `Mutex::unlock`.
    pub enum UnlockError {
        Deleted,
        InvalidContext,
        /// Unlocking a mutex the caller doesn't own, or unlocking in the
        /// wrong nesting order (§4.G.2: "unlock must match the most
        /// recent matching lock") — a programming error (§7), also routed
        /// through `Hooks::assertion_failure`.
        InvalidParam,
    }
}

narrow_error! {
    /// Object-creation calls for semaphore/mutex/queue/event group/pool/timer.
    pub enum CreateObjectError {
        InvalidParam,
        OutOfMemory,
    }
}

narrow_error! {
    /// `delete` for any kernel object.
    pub enum DeleteObjectError {
        NotFound,
        Deleted,
        Busy,
        InvalidContext,
    }
}
