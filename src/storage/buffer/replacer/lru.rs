use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU replacement policy over eviction-eligible frames
///
/// Membership tracks frames whose pin count has dropped to zero. Insertion
/// order doubles as recency: the front of the map is the frame that was
/// unpinned longest ago. All operations are O(1) under a single lock.
pub struct LruReplacer {
    frames: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            frames: Mutex::new(LinkedHashMap::with_capacity(pool_size)),
        }
    }

    /// Evict the frame that was unpinned longest ago
    pub fn victim(&self) -> Option<FrameId> {
        self.frames.lock().pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Remove a frame from the eligible set; no-op if it is not a member
    pub fn pin(&self, frame_id: FrameId) {
        self.frames.lock().remove(&frame_id);
    }

    /// Mark a frame eviction-eligible. Unpinning a frame that is already a
    /// member does not refresh its position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut frames = self.frames.lock();
        if !frames.contains_key(&frame_id) {
            frames.insert(frame_id, ());
        }
    }

    /// Number of frames currently eligible for eviction
    pub fn size(&self) -> usize {
        self.frames.lock().len()
    }
}
