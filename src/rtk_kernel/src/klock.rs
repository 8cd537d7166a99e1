//! Nestable, interrupt-masked critical sections (§4.H).
//!
//! All shared kernel state is mutated only inside a [`CriticalSection`] or
//! from the single pending-switch exception (§4.H). The guard borrows the
//! kernel exclusively, so the borrow checker — not a runtime flag — proves
//! no other critical section is concurrently open from safe code; the
//! `depth` counter below exists purely to implement the *nesting* rule of
//! §4.H (only the outermost `enter` masks hardware interrupts, only the
//! outermost `exit` restores them), which is needed because the same task
//! may call into the kernel re-entrantly (e.g. a `give` called while already
//! holding a critical section entered by an enclosing syscall).
use crate::port::Port;

/// Per-kernel bookkeeping for the critical-section nesting discipline.
/// Embedded in [`crate::kernel::Kernel`] and threaded through via
/// [`HasCriticalSectionState`] so this module stays generic over the
/// kernel's capacity parameters.
pub struct CriticalSectionState<P: Port> {
    depth: u32,
    saved: Option<P::InterruptState>,
}

impl<P: Port> Default for CriticalSectionState<P> {
    fn default() -> Self {
        Self {
            depth: 0,
            saved: None,
        }
    }
}

pub trait HasCriticalSectionState<P: Port> {
    fn cs_state_mut(&mut self) -> &mut CriticalSectionState<P>;
}

impl<P: Port> CriticalSectionState<P> {
    /// Raw enter for call sites that need a matched free-function pair
    /// rather than an RAII guard (§6.1 `enter_critical`/`exit_critical`).
    #[inline]
    pub(crate) fn enter_raw(&mut self) {
        if self.depth == 0 {
            self.saved = Some(P::mask_interrupts());
        }
        self.depth += 1;
    }

    /// Must be matched 1:1 with a prior `enter_raw` call with no other
    /// exit in between.
    #[inline]
    pub(crate) fn exit_raw(&mut self) {
        debug_assert!(self.depth > 0, "exit_critical without matching enter_critical");
        self.depth -= 1;
        if self.depth == 0 {
            if let Some(prev) = self.saved.take() {
                // Safety: matches the `mask_interrupts` call made when
                // `depth` went 0 -> 1 above.
                unsafe { P::restore_interrupts(prev) };
            }
        }
    }

    #[inline]
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }
}

/// A held critical section. Derefs to the kernel it was entered from.
///
/// Dropping the guard calls [`exit`] for you; prefer letting it go out of
/// scope over calling `exit` explicitly.
pub struct CriticalSection<'a, P: Port, K: HasCriticalSectionState<P>> {
    kernel: &'a mut K,
    _port: core::marker::PhantomData<P>,
}

impl<'a, P: Port, K: HasCriticalSectionState<P>> CriticalSection<'a, P, K> {
    /// Enter a critical section, masking interrupts if this is the
    /// outermost entry (§4.H `enter()`).
    #[inline]
    pub fn enter(kernel: &'a mut K) -> Self {
        let state = kernel.cs_state_mut();
        if state.depth == 0 {
            state.saved = Some(P::mask_interrupts());
        }
        state.depth += 1;
        Self {
            kernel,
            _port: core::marker::PhantomData,
        }
    }

    #[inline]
    pub fn kernel(&self) -> &K {
        self.kernel
    }

    #[inline]
    pub fn kernel_mut(&mut self) -> &mut K {
        self.kernel
    }

    /// Temporarily re-borrow the guard with a shorter lifetime, so a
    /// function can pass the critical section down without consuming it.
    #[inline]
    pub fn borrow_mut(&mut self) -> CriticalSection<'_, P, K> {
        CriticalSection {
            kernel: self.kernel,
            _port: core::marker::PhantomData,
        }
    }
}

impl<P: Port, K: HasCriticalSectionState<P>> core::ops::Deref for CriticalSection<'_, P, K> {
    type Target = K;
    #[inline]
    fn deref(&self) -> &K {
        self.kernel
    }
}

impl<P: Port, K: HasCriticalSectionState<P>> core::ops::DerefMut for CriticalSection<'_, P, K> {
    #[inline]
    fn deref_mut(&mut self) -> &mut K {
        self.kernel
    }
}

impl<P: Port, K: HasCriticalSectionState<P>> Drop for CriticalSection<'_, P, K> {
    #[inline]
    fn drop(&mut self) {
        let state = self.kernel.cs_state_mut();
        debug_assert!(state.depth > 0, "critical section depth underflow");
        state.depth -= 1;
        if state.depth == 0 {
            // Safety: this is the matching restore for the `mask_interrupts`
            // call made when `depth` went 0 -> 1.
            if let Some(prev) = state.saved.take() {
                unsafe { P::restore_interrupts(prev) };
            }
        }
    }
}
