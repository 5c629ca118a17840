//! LRU (Least Recently Used) replacement policy.

use std::collections::{BTreeMap, HashMap};

use crate::buffer::FrameId;

/// Orders frames by last access.
///
/// Each access stamps the frame with a monotonically increasing tick; the
/// `BTreeMap` keyed by tick yields frames from least to most recently used.
/// Unlike a classic replacer this one does not pick the victim itself: the
/// pool walks [`lru_order`](Self::lru_order) and evicts the first frame whose
/// page is clean, [`record_access`](Self::record_access)-ing the dirty ones it
/// passes over.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Next tick to hand out.
    clock: u64,

    /// Tick → frame, oldest first.
    by_tick: BTreeMap<u64, FrameId>,

    /// Frame → its current tick.
    ticks: HashMap<FrameId, u64>,
}

impl LruReplacer {
    /// Create a new LRU replacer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a frame was accessed, making it most recently used.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if let Some(old) = self.ticks.insert(frame_id, self.clock) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.clock, frame_id);
        self.clock += 1;
    }

    /// Stop tracking a frame.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(tick) = self.ticks.remove(&frame_id) {
            self.by_tick.remove(&tick);
        }
    }

    /// Tracked frames, least recently used first.
    pub fn lru_order(&self) -> Vec<FrameId> {
        self.by_tick.values().copied().collect()
    }

    /// Number of tracked frames.
    pub fn size(&self) -> usize {
        self.ticks.len()
    }
}
