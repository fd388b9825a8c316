use std::fmt::{Display, Formatter};

/// A snapshot of a heap's counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Collections since the heap was created, whichever heap asked for them.
    pub collections: usize,
    /// Objects of the heap that survived the last collection, plus the ones allocated since.
    pub live_objects: usize,
    /// Objects allocated since the heap was created.
    pub total_allocations: usize,
    /// Objects freed since the heap was created.
    pub freed: usize,
    /// Threads attached to the heap.
    pub attached_threads: usize,
    /// Bytes in use in the MMTk heap, all heaps included.
    pub used_bytes: usize,
}

impl Display for GcStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} collections, {} objects ({} allocated, {} freed), {} threads, {} bytes used",
            self.collections, self.live_objects, self.total_allocations, self.freed, self.attached_threads, self.used_bytes
        )
    }
}
