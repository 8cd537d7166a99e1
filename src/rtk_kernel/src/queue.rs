//! Bounded message queue (§3 "Message queue", §4.G.3).
//!
//! Items are opaque, runtime-sized byte records rather than a generic `T`:
//! §4.G.3 requires a *runtime* `item_size` check returning `InvalidParam`
//! on mismatch, which only makes sense for a type-erased queue — a
//! monomorphized `Queue<T, N>` would make that check a compile-time
//! certainty instead of a runtime one, and would also prevent queues of
//! different item types from sharing one object table (§4.B). So this
//! stays close to the source design, with the unsafety of the raw copies
//! confined to this module (§9 "Inline assembly" principle, applied to
//! byte-copying instead of asm).
use rtk_core::error::ErrorKind;

use crate::wait::WaitQueue;

pub struct Queue {
    pub(crate) item_size: usize,
    pub(crate) max_items: usize,
    backing: &'static mut [u8],
    head: usize,
    tail: usize,
    count: usize,
    pub(crate) send_waiters: WaitQueue,
    pub(crate) recv_waiters: WaitQueue,
    pub(crate) deleted: bool,
}

impl Queue {
    pub fn new(
        item_size: usize,
        max_items: usize,
        backing: &'static mut [u8],
    ) -> Result<Self, ErrorKind> {
        if item_size == 0 || max_items == 0 || backing.len() < item_size * max_items {
            return Err(ErrorKind::InvalidParam);
        }
        Ok(Self {
            item_size,
            max_items,
            backing,
            head: 0,
            tail: 0,
            count: 0,
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
            deleted: false,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.max_items
    }

    fn slot(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.item_size;
        &mut self.backing[start..start + self.item_size]
    }

    /// §4.G.3 `send` fast path: copies into the tail slot if there's room.
    pub fn try_enqueue(&mut self, item: &[u8]) -> Result<(), ErrorKind> {
        if item.len() != self.item_size {
            return Err(ErrorKind::InvalidParam);
        }
        if self.is_full() {
            return Err(ErrorKind::Overflow);
        }
        let tail = self.tail;
        self.slot(tail).copy_from_slice(item);
        self.tail = (self.tail + 1) % self.max_items;
        self.count += 1;
        Ok(())
    }

    /// §4.G.3 `receive` fast path: copies from the head slot if non-empty.
    pub fn try_dequeue(&mut self, out: &mut [u8]) -> Result<(), ErrorKind> {
        if out.len() < self.item_size {
            return Err(ErrorKind::InvalidParam);
        }
        if self.is_empty() {
            return Err(ErrorKind::Timeout);
        }
        let head = self.head;
        out[..self.item_size].copy_from_slice(self.slot(head));
        self.head = (self.head + 1) % self.max_items;
        self.count -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_round_trip_preserves_order() {
        let mut backing = vec![0u8; 8 * 2];
        let mut q = Queue::new(8, 2, unsafe {
            core::slice::from_raw_parts_mut(backing.as_mut_ptr(), backing.len())
        })
        .unwrap();
        q.try_enqueue(&0xDEAD_BEEF_1234_5678u64.to_le_bytes()).unwrap();
        q.try_enqueue(&0x0011_2233_4455_6677u64.to_le_bytes()).unwrap();
        assert!(q.is_full());

        let mut out = [0u8; 8];
        q.try_dequeue(&mut out).unwrap();
        assert_eq!(u64::from_le_bytes(out), 0xDEAD_BEEF_1234_5678);
        q.try_dequeue(&mut out).unwrap();
        assert_eq!(u64::from_le_bytes(out), 0x0011_2233_4455_6677);
        assert!(q.is_empty());
    }

    #[test]
    fn item_size_mismatch_is_invalid_param() {
        let mut backing = vec![0u8; 8];
        let mut q = Queue::new(8, 1, unsafe {
            core::slice::from_raw_parts_mut(backing.as_mut_ptr(), backing.len())
        })
        .unwrap();
        assert_eq!(q.try_enqueue(&[0u8; 4]), Err(ErrorKind::InvalidParam));
    }
}
