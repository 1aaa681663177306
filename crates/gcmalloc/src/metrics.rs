//! Collection metrics.

use std::time::Duration;

/// Statistics from the most recent collection of one allocator.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Duration of the last collection.
    pub duration: Duration,
    /// Bytes returned to the free lists or unmapped.
    pub bytes_reclaimed: usize,
    /// Managed blocks plus large mappings freed.
    pub blocks_reclaimed: usize,
    /// Allocated blocks remaining after the sweep.
    pub blocks_surviving: usize,
    /// Collections performed by this allocator since init.
    pub total_collections: usize,
}

impl GcMetrics {
    /// Metrics before any collection has run.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            bytes_reclaimed: 0,
            blocks_reclaimed: 0,
            blocks_surviving: 0,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}
