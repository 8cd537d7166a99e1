//! Typed handle tables with name lookup and liveness accounting (§4.B).
//!
//! Every kernel object — task, semaphore, mutex, queue, event group, pool,
//! timer — lives in one of these fixed-capacity tables, addressed by index
//! rather than pointer (§9 "Ownership of TCBs and objects": "wait lists and
//! ready lists store stable references ... by index into a fixed table").
//! A [`Handle`] pairs the slot index with the generation the slot had when
//! the handle was issued, so a handle outliving its object's deletion is
//! detected instead of silently addressing whatever was created in the
//! freed slot afterwards (§3 "Lifetimes": "An operation on a deleted handle
//! returns `Deleted`").
use rtk_core::{error::ErrorKind, name::ObjectName, time::Instant};

/// A validated reference into a [`Table`].
#[derive(Debug)]
pub struct Handle<T> {
    index: u16,
    generation: u32,
    _marker: core::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}
impl<T> Eq for Handle<T> {}

impl<T> Handle<T> {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

struct Slot<T> {
    live: bool,
    generation: u32,
    refcount: u32,
    name: Option<ObjectName>,
    created_at: Instant,
    data: Option<T>,
}

impl<T> Slot<T> {
    const fn empty() -> Self {
        Self {
            live: false,
            generation: 0,
            refcount: 0,
            name: None,
            created_at: Instant::ZERO,
            data: None,
        }
    }
}

/// A fixed-capacity, name-searchable table of live objects of kind `T`
/// (§4.B, §6.5 `MAX_*` capacities).
pub struct Table<T, const N: usize> {
    slots: [Slot<T>; N],
}

impl<T, const N: usize> Table<T, N> {
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::empty()),
        }
    }

    /// §4.B `register`: insert `data` into the first free slot.
    ///
    /// Returns `CapacityExhausted` (mapped to `ErrorKind::OutOfMemory`, the
    /// table being a fixed pool) when every slot is live.
    pub fn register(
        &mut self,
        name: Option<ObjectName>,
        now: Instant,
        data: T,
    ) -> Result<Handle<T>, ErrorKind> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.live {
                slot.live = true;
                slot.refcount = 0;
                slot.name = name;
                slot.created_at = now;
                slot.data = Some(data);
                return Ok(Handle {
                    index: i as u16,
                    generation: slot.generation,
                    _marker: core::marker::PhantomData,
                });
            }
        }
        Err(ErrorKind::OutOfMemory)
    }

    #[inline]
    fn slot(&self, h: Handle<T>) -> Result<&Slot<T>, ErrorKind> {
        let slot = self.slots.get(h.index()).ok_or(ErrorKind::NotFound)?;
        if !slot.live || slot.generation != h.generation {
            return Err(ErrorKind::Deleted);
        }
        Ok(slot)
    }

    #[inline]
    fn slot_mut(&mut self, h: Handle<T>) -> Result<&mut Slot<T>, ErrorKind> {
        let slot = self.slots.get_mut(h.index()).ok_or(ErrorKind::NotFound)?;
        if !slot.live || slot.generation != h.generation {
            return Err(ErrorKind::Deleted);
        }
        Ok(slot)
    }

    #[inline]
    pub fn get(&self, h: Handle<T>) -> Result<&T, ErrorKind> {
        Ok(self.slot(h)?.data.as_ref().unwrap())
    }

    #[inline]
    pub fn get_mut(&mut self, h: Handle<T>) -> Result<&mut T, ErrorKind> {
        Ok(self.slot_mut(h)?.data.as_mut().unwrap())
    }

    /// Raw, generation-unchecked access by table index, for the same reason
    /// [`crate::task::TaskIdx`] bypasses `Handle`'s generation check: a
    /// priority-inheritance chain walk holds only the raw index recorded in
    /// a task's `wait_object` tag, and the object it names cannot have been
    /// deleted out from under it (mutex/queue/etc. deletion is refused while
    /// it has an owner or a waiter, so the slot is guaranteed live for as
    /// long as some task's `wait_object` still points at it).
    #[inline]
    pub(crate) fn get_by_index_mut(&mut self, index: u16) -> Option<&mut T> {
        self.slots.get_mut(index as usize)?.data.as_mut()
    }

    /// §4.B `unregister`/delete: frees the slot, bumping its generation so
    /// stale handles are rejected. Refuses with `Busy` unless `count == 0`
    /// (§4.B: "delete is permitted only when count == 0").
    pub fn remove(&mut self, h: Handle<T>) -> Result<T, ErrorKind> {
        let slot = self.slot_mut(h)?;
        if slot.refcount != 0 {
            return Err(ErrorKind::Busy);
        }
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.name = None;
        Ok(slot.data.take().unwrap())
    }

    #[inline]
    pub fn ref_inc(&mut self, h: Handle<T>) {
        if let Ok(slot) = self.slot_mut(h) {
            slot.refcount += 1;
        }
    }

    #[inline]
    pub fn ref_dec(&mut self, h: Handle<T>) {
        if let Ok(slot) = self.slot_mut(h) {
            slot.refcount = slot.refcount.saturating_sub(1);
        }
    }

    /// §4.B `find`: the only name-keyed lookup the kernel performs; never
    /// called from a fast path.
    pub fn find(&self, name: &ObjectName) -> Option<Handle<T>> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            if slot.live && slot.name.as_ref() == Some(name) {
                Some(Handle {
                    index: i as u16,
                    generation: slot.generation,
                    _marker: core::marker::PhantomData,
                })
            } else {
                None
            }
        })
    }

    /// §4.B `iter`.
    pub fn for_each_live(&self, mut f: impl FnMut(Handle<T>, &T)) {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.live {
                f(
                    Handle {
                        index: i as u16,
                        generation: slot.generation,
                        _marker: core::marker::PhantomData,
                    },
                    slot.data.as_ref().unwrap(),
                );
            }
        }
    }

    /// §4.B `count`.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }
}

impl<T, const N: usize> Default for Table<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
