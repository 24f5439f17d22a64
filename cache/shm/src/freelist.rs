//! Free-slot allocator.
//!
//! Slots above the watermark have never been handed out since the arena was
//! created or cleared. Released slots go on a stack, except the topmost
//! allocated slot, which lowers the watermark instead.

use crate::slot::SlotIndex;

#[derive(Debug)]
pub(crate) struct FreeList {
    stack: Vec<SlotIndex>,
    /// Next never-used slot index.
    watermark: u64,
    max_items: u64,
}

impl FreeList {
    pub fn new(max_items: u64) -> Self {
        Self {
            stack: Vec::new(),
            watermark: 1,
            max_items,
        }
    }

    /// Take a free slot, or `None` if every slot is occupied.
    pub fn allocate(&mut self) -> Option<SlotIndex> {
        if let Some(idx) = self.stack.pop() {
            return Some(idx);
        }
        if self.watermark <= self.max_items {
            let idx = SlotIndex::new(self.watermark);
            self.watermark += 1;
            return idx;
        }
        None
    }

    /// Return a slot to the allocator.
    pub fn release(&mut self, idx: SlotIndex) {
        if idx.get() + 1 == self.watermark {
            self.watermark -= 1;
        } else {
            self.stack.push(idx);
        }
    }

    /// Replace the allocator state with an explicit set of free slots,
    /// handing them out in ascending order.
    pub fn rebuild(&mut self, mut free: Vec<SlotIndex>) {
        free.sort_unstable_by(|a, b| b.cmp(a));
        self.stack = free;
        self.watermark = self.max_items + 1;
    }

    /// Forget every allocation.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.watermark = 1;
    }

    /// Number of slots available for allocation.
    #[cfg(test)]
    pub fn available(&self) -> u64 {
        self.stack.len() as u64 + (self.max_items + 1 - self.watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(raw: u64) -> SlotIndex {
        SlotIndex::new(raw).unwrap()
    }

    #[test]
    fn test_allocates_in_order_until_full() {
        let mut free = FreeList::new(3);
        assert_eq!(free.available(), 3);
        assert_eq!(free.allocate(), Some(idx(1)));
        assert_eq!(free.allocate(), Some(idx(2)));
        assert_eq!(free.allocate(), Some(idx(3)));
        assert_eq!(free.allocate(), None);
        assert_eq!(free.available(), 0);
    }

    #[test]
    fn test_release_reuses_slots() {
        let mut free = FreeList::new(3);
        for _ in 0..3 {
            free.allocate();
        }

        free.release(idx(2));
        assert_eq!(free.available(), 1);
        assert_eq!(free.allocate(), Some(idx(2)));

        // releasing the top slot lowers the watermark
        free.release(idx(3));
        assert_eq!(free.watermark, 3);
        assert_eq!(free.allocate(), Some(idx(3)));
    }

    #[test]
    fn test_rebuild() {
        let mut free = FreeList::new(5);
        free.rebuild(vec![idx(4), idx(2)]);
        assert_eq!(free.available(), 2);
        assert_eq!(free.allocate(), Some(idx(2)));
        assert_eq!(free.allocate(), Some(idx(4)));
        assert_eq!(free.allocate(), None);

        free.reset();
        assert_eq!(free.available(), 5);
    }
}
