//! Bit-per-page allocation map at the head of each extent.
//!
//! Layout: `allocated_count: u32 | next_free_hint: u32 | bits`, where bit
//! `i` of the tail is set iff data page `i` of the extent is allocated.

use bytes::{Buf, BufMut};
use common::{BITMAP_CAPACITY, PAGE_SIZE};

const HEADER_BYTES: usize = 8;

/// Mutable view over the raw bytes of one bitmap page.
pub struct Bitmap<'a> {
    data: &'a mut [u8],
}

impl<'a> Bitmap<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn allocated_count(&self) -> u32 {
        (&self.data[0..4]).get_u32_le()
    }

    fn next_free_hint(&self) -> u32 {
        (&self.data[4..8]).get_u32_le()
    }

    fn set_allocated_count(&mut self, count: u32) {
        (&mut self.data[0..4]).put_u32_le(count);
    }

    fn set_next_free_hint(&mut self, hint: u32) {
        (&mut self.data[4..8]).put_u32_le(hint);
    }

    pub fn is_full(&self) -> bool {
        self.allocated_count() >= BITMAP_CAPACITY
    }

    pub fn is_free(&self, offset: u32) -> bool {
        debug_assert!(offset < BITMAP_CAPACITY);
        let byte = self.data[HEADER_BYTES + (offset / 8) as usize];
        byte & (1 << (offset % 8)) == 0
    }

    fn set_bit(&mut self, offset: u32, on: bool) {
        let idx = HEADER_BYTES + (offset / 8) as usize;
        let mask = 1u8 << (offset % 8);
        if on {
            self.data[idx] |= mask;
        } else {
            self.data[idx] &= !mask;
        }
    }

    /// Claims the first free page offset, maintaining the scan hint.
    pub fn allocate(&mut self) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        let start = self.next_free_hint();
        let offset = (start..BITMAP_CAPACITY)
            .chain(0..start)
            .find(|&o| self.is_free(o))?;
        self.set_bit(offset, true);
        self.set_allocated_count(self.allocated_count() + 1);
        let next = (offset + 1..BITMAP_CAPACITY)
            .chain(0..offset)
            .find(|&o| self.is_free(o))
            .unwrap_or(0);
        self.set_next_free_hint(next);
        Some(offset)
    }

    /// Releases a page offset; returns false if it was already free.
    pub fn deallocate(&mut self, offset: u32) -> bool {
        if self.is_free(offset) {
            return false;
        }
        self.set_bit(offset, false);
        self.set_allocated_count(self.allocated_count() - 1);
        if offset < self.next_free_hint() {
            self.set_next_free_hint(offset);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_first_free_offsets_in_order() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut bm = Bitmap::new(&mut buf);
        assert_eq!(bm.allocate(), Some(0));
        assert_eq!(bm.allocate(), Some(1));
        assert_eq!(bm.allocate(), Some(2));
        assert_eq!(bm.allocated_count(), 3);
    }

    #[test]
    fn deallocation_reopens_the_lowest_hole() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut bm = Bitmap::new(&mut buf);
        for _ in 0..4 {
            bm.allocate();
        }
        assert!(bm.deallocate(1));
        assert!(!bm.deallocate(1));
        assert!(bm.is_free(1));
        assert_eq!(bm.allocate(), Some(1));
    }

    #[test]
    fn fills_to_capacity() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut bm = Bitmap::new(&mut buf);
        for expect in 0..BITMAP_CAPACITY {
            assert_eq!(bm.allocate(), Some(expect));
        }
        assert!(bm.is_full());
        assert_eq!(bm.allocate(), None);
    }
}
