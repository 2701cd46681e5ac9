//! Page replacement policies for the page pool.

use crate::frame::FrameId;

/// Trait for page replacement algorithms.
pub trait Replacer {
    /// Records that the given frame was accessed, making it most recently used.
    fn record_access(&mut self, frame_id: FrameId);

    /// Selects and removes a victim frame for eviction.
    ///
    /// Returns None if no frames are tracked.
    fn evict(&mut self) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    fn remove(&mut self, frame_id: FrameId);

    /// Returns the number of tracked frames.
    fn size(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<FrameId>,
    next: Option<FrameId>,
    linked: bool,
}

/// Strict least-recently-used replacement.
///
/// Frames form a doubly linked list threaded through a fixed array, from the
/// LRU end (next victim) to the MRU end. Access, eviction and removal are O(1).
pub struct LruReplacer {
    /// Per-frame list links, indexed by frame.
    links: Vec<Link>,
    /// Least recently used frame.
    lru: Option<FrameId>,
    /// Most recently used frame.
    mru: Option<FrameId>,
    /// Number of linked frames.
    len: usize,
}

impl LruReplacer {
    /// Creates a new LRU replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            links: vec![Link::default(); num_frames],
            lru: None,
            mru: None,
            len: 0,
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.links.len()
    }

    /// Returns tracked frames from least to most recently used.
    pub fn lru_order(&self) -> Vec<FrameId> {
        let mut order = Vec::with_capacity(self.len);
        let mut cursor = self.lru;
        while let Some(frame_id) = cursor {
            order.push(frame_id);
            cursor = self.links[frame_id.index()].next;
        }
        order
    }

    fn unlink(&mut self, frame_id: FrameId) {
        let link = self.links[frame_id.index()];
        if !link.linked {
            return;
        }
        match link.prev {
            Some(prev) => self.links[prev.index()].next = link.next,
            None => self.lru = link.next,
        }
        match link.next {
            Some(next) => self.links[next.index()].prev = link.prev,
            None => self.mru = link.prev,
        }
        self.links[frame_id.index()] = Link::default();
        self.len -= 1;
    }

    fn push_mru(&mut self, frame_id: FrameId) {
        self.links[frame_id.index()] = Link {
            prev: self.mru,
            next: None,
            linked: true,
        };
        match self.mru {
            Some(mru) => self.links[mru.index()].next = Some(frame_id),
            None => self.lru = Some(frame_id),
        }
        self.mru = Some(frame_id);
        self.len += 1;
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        if frame_id.index() >= self.links.len() {
            return;
        }
        if self.mru == Some(frame_id) {
            return;
        }
        self.unlink(frame_id);
        self.push_mru(frame_id);
    }

    fn evict(&mut self) -> Option<FrameId> {
        let victim = self.lru?;
        self.unlink(victim);
        Some(victim)
    }

    fn remove(&mut self, frame_id: FrameId) {
        if frame_id.index() < self.links.len() {
            self.unlink(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
        assert!(replacer.lru_order().is_empty());
    }

    #[test]
    fn test_lru_replacer_evict_empty() {
        let mut replacer = LruReplacer::new(10);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_replacer_evicts_in_access_order() {
        let mut replacer = LruReplacer::new(5);
        for i in 0..5 {
            replacer.record_access(FrameId(i));
        }

        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.size(), 3);
    }

    #[test]
    fn test_lru_replacer_access_moves_to_mru() {
        let mut replacer = LruReplacer::new(4);
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));

        // Touch the oldest frame; it must now be the last victim
        replacer.record_access(FrameId(0));
        assert_eq!(
            replacer.lru_order(),
            vec![FrameId(1), FrameId(2), FrameId(0)]
        );

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_replacer_repeated_access_is_idempotent() {
        let mut replacer = LruReplacer::new(3);
        replacer.record_access(FrameId(2));
        replacer.record_access(FrameId(2));
        replacer.record_access(FrameId(2));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.lru_order(), vec![FrameId(2)]);
    }

    #[test]
    fn test_lru_replacer_remove_middle() {
        let mut replacer = LruReplacer::new(5);
        for i in 0..3 {
            replacer.record_access(FrameId(i));
        }

        replacer.remove(FrameId(1));
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.lru_order(), vec![FrameId(0), FrameId(2)]);

        // Removing an untracked frame is a no-op
        replacer.remove(FrameId(1));
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_lru_replacer_remove_ends() {
        let mut replacer = LruReplacer::new(3);
        for i in 0..3 {
            replacer.record_access(FrameId(i));
        }

        replacer.remove(FrameId(0));
        replacer.remove(FrameId(2));
        assert_eq!(replacer.lru_order(), vec![FrameId(1)]);
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_out_of_bounds() {
        let mut replacer = LruReplacer::new(2);

        // These should not panic
        replacer.record_access(FrameId(100));
        replacer.remove(FrameId(100));

        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_reuse_after_evict() {
        let mut replacer = LruReplacer::new(2);
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));

        let victim = replacer.evict().unwrap();
        assert_eq!(victim, FrameId(0));

        // A reused frame re-enters at the MRU end
        replacer.record_access(victim);
        assert_eq!(replacer.lru_order(), vec![FrameId(1), FrameId(0)]);
    }
}
