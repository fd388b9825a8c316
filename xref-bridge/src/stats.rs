use std::fmt::{Display, Formatter};

use xref_gc::GcStats;

/// A snapshot of a runtime's counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Entries in the external reference table, weak ones included.
    pub live_external_refs: usize,
    pub live_wrappers: usize,
    pub wrappers_created: usize,
    /// Wrapper requests served by an existing canonical wrapper.
    pub wrapper_cache_hits: usize,
    pub singletons: usize,
    pub gc: GcStats,
}

impl Display for BridgeStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} external refs, {} wrappers ({} created, {} cache hits), {} singletons; gc: {}",
            self.live_external_refs,
            self.live_wrappers,
            self.wrappers_created,
            self.wrapper_cache_hits,
            self.singletons,
            self.gc
        )
    }
}
