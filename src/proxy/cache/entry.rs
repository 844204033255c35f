use std::time::SystemTime;

/// Index record: which cell holds the payload and when it was last written or revalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct CacheEntry {
    pub slot: usize,
    pub timestamp: SystemTime,
}

impl CacheEntry {
    pub(super) fn new(slot: usize) -> Self {
        Self {
            slot,
            timestamp: SystemTime::now(),
        }
    }

    pub(super) fn touch(&mut self) {
        self.timestamp = SystemTime::now();
    }
}
