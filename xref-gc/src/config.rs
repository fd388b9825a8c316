/// Tuning knobs of a heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Number of allocations after which the next allocation triggers a collection. `0` disables
    /// automatic collections: only explicit `Heap::collect` calls, or MMTk running out of space, collect.
    pub collection_threshold: usize,
    /// Size of the MMTk heap in bytes. All heaps share one MMTk instance: only the first heap's
    /// setting counts.
    pub heap_size: usize,
    /// Number of GC worker threads. `0` lets MMTk pick.
    pub gc_threads: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            collection_threshold: 10_000,
            heap_size: 64 << 20,
            gc_threads: 0,
        }
    }
}

impl GcConfig {
    /// A configuration that never collects on its own.
    pub fn manual() -> Self {
        Self {
            collection_threshold: 0,
            ..Self::default()
        }
    }

    pub fn with_collection_threshold(mut self, collection_threshold: usize) -> Self {
        self.collection_threshold = collection_threshold;
        self
    }
}
