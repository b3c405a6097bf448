use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Access history for a single frame. The history holds at most the K most
/// recent logical timestamps, oldest at the front.
#[derive(Debug)]
struct FrameRecord {
    history: VecDeque<u64>,
    evictable: bool,
}

struct ReplacerInner {
    records: HashMap<FrameId, FrameRecord>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// LRU-K page replacement policy.
///
/// The victim is the evictable frame with the largest backward K-distance:
/// current timestamp minus the timestamp of the frame's Kth most recent
/// access. A frame with fewer than K recorded accesses has distance +inf;
/// ties among +inf frames break toward the earliest recorded access.
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k > 0");
        Self {
            inner: Mutex::new(ReplacerInner {
                records: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                evictable_count: 0,
            }),
            replacer_size: num_frames,
            k,
        }
    }

    /// Record an access to the given frame at the current logical timestamp.
    /// An unknown frame gets a fresh record (non-evictable).
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id < self.replacer_size,
            "frame id {} out of range for replacer of size {}",
            frame_id,
            self.replacer_size
        );

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;
        let k = self.k;

        let record = inner.records.entry(frame_id).or_insert_with(|| FrameRecord {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        record.history.push_back(timestamp);
        if record.history.len() > k {
            record.history.pop_front();
        }
    }

    /// Toggle whether a frame may be chosen as a victim. No-op if the state
    /// is unchanged or the frame is unknown.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(&frame_id) {
            if record.evictable != evictable {
                record.evictable = evictable;
                if evictable {
                    inner.evictable_count += 1;
                } else {
                    inner.evictable_count -= 1;
                }
            }
        }
    }

    /// Evict the frame with the largest backward K-distance, removing its
    /// record. Returns None when no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        // (has fewer than k accesses, earliest retained timestamp); +inf
        // distances beat finite ones, then the smaller timestamp wins.
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, record) in inner.records.iter() {
            if !record.evictable {
                continue;
            }
            let Some(&earliest) = record.history.front() else {
                continue;
            };
            let infinite = record.history.len() < self.k;

            let better = match victim {
                None => true,
                Some((_, best_inf, best_ts)) => {
                    (infinite && !best_inf) || (infinite == best_inf && earliest < best_ts)
                }
            };
            if better {
                victim = Some((frame_id, infinite, earliest));
            }
        }

        let (frame_id, _, _) = victim?;
        inner.records.remove(&frame_id);
        inner.evictable_count -= 1;
        Some(frame_id)
    }

    /// Forcibly remove a frame's record, e.g. on page deletion. Silent for
    /// unknown frames; removing a non-evictable frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get(&frame_id) else {
            return;
        };
        assert!(
            record.evictable,
            "cannot remove non-evictable frame {}",
            frame_id
        );
        inner.records.remove(&frame_id);
        inner.evictable_count -= 1;
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
