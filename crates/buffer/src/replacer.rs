//! LRU victim policy over unpinned frames.

use std::num::NonZeroUsize;

use common::FrameId;
use lru::LruCache;

/// Tracks the frames whose pin count has dropped to zero, in unpin order.
///
/// `unpin` enters a frame at the most-recent end only if it is absent;
/// unpinning a frame that is already tracked does NOT refresh its position,
/// so a page that repeatedly drops to pin count zero without an
/// intervening eviction keeps its original place in line.
#[derive(Debug)]
pub struct LruReplacer {
    entries: LruCache<FrameId, ()>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Makes a frame eligible for eviction.
    pub fn unpin(&mut self, frame: FrameId) {
        if !self.entries.contains(&frame) {
            self.entries.push(frame, ());
        }
    }

    /// Withdraws a frame from eviction candidacy.
    pub fn pin(&mut self, frame: FrameId) {
        self.entries.pop(&frame);
    }

    /// Evicts and returns the least recently unpinned frame.
    pub fn victim(&mut self) -> Option<FrameId> {
        self.entries.pop_lru().map(|(frame, ())| frame)
    }

    /// Number of frames currently eligible for eviction.
    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victims_come_out_in_unpin_order() {
        let mut replacer = LruReplacer::new(4);
        replacer.unpin(2);
        replacer.unpin(0);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(0));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn pin_removes_a_candidate() {
        let mut replacer = LruReplacer::new(4);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(2));
    }

    #[test]
    fn repeated_unpin_does_not_refresh_position() {
        let mut replacer = LruReplacer::new(4);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(1);
        assert_eq!(replacer.victim(), Some(1));
    }
}
