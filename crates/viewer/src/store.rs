//! Single-slot store for the latest encoded frame.
//!
//! One producer replaces the slot wholesale; any number of streaming
//! sessions poll the version counter and clone the snapshot only when it
//! changed. No history, no queue, no backpressure; a consumer that misses a
//! version simply never sees that frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;

#[derive(Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub version: u64,
    pub timestamp_ms: i64,
}

pub struct FrameStore {
    slot: Mutex<Option<EncodedFrame>>,
    // Updated after the slot so a version peek never runs ahead of `latest`.
    version: AtomicU64,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Replace the slot with a freshly encoded frame and return its version.
    pub fn publish(&self, jpeg: Vec<u8>) -> u64 {
        let mut guard = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let version = self.version.load(Ordering::Acquire) + 1;
        *guard = Some(EncodedFrame {
            jpeg,
            version,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        self.version.store(version, Ordering::Release);
        version
    }

    /// Clone the current snapshot, if any frame has been published yet.
    pub fn latest(&self) -> Option<EncodedFrame> {
        match self.slot.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Lock-free peek at the latest published version (0 before the first
    /// frame), cheap enough for per-poll novelty checks.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_first_publish() {
        let store = FrameStore::new();
        assert_eq!(store.version(), 0);
        assert!(store.latest().is_none());
    }

    #[test]
    fn versions_strictly_increase() {
        let store = FrameStore::new();
        let mut previous = 0;
        for i in 0..10u8 {
            let version = store.publish(vec![i]);
            assert!(version > previous);
            previous = version;
        }
        assert_eq!(store.version(), previous);
    }

    #[test]
    fn latest_never_regresses_below_an_observed_version() {
        let store = FrameStore::new();
        store.publish(vec![1]);
        let observed = store.version();
        store.publish(vec![2]);
        let snapshot = store.latest().expect("published");
        assert!(snapshot.version >= observed);
        assert_eq!(snapshot.jpeg, vec![2]);
    }

    #[test]
    fn slot_holds_only_the_most_recent_frame() {
        let store = FrameStore::new();
        store.publish(vec![1, 1]);
        store.publish(vec![2, 2]);
        store.publish(vec![3, 3]);
        assert_eq!(store.latest().expect("published").jpeg, vec![3, 3]);
    }
}
