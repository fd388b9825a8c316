use std::sync::Arc;

use log::info;
use once_cell::sync::Lazy;
use xref_core::{core_types, TypeInfo};
use xref_gc::{GlobalRoot, Heap, ObjRef, Payload, ThreadState};

use crate::boxing::BoxCache;
use crate::config::BridgeConfig;
use crate::external_rc::ExternalRCTable;
use crate::fatal;
use crate::singleton::Singletons;
use crate::stats::BridgeStats;
use crate::thread_state::{BridgeCall, ThreadStateGuard};
use crate::wrapper_cache::WrapperCache;

static GLOBAL_RUNTIME: Lazy<Arc<Runtime>> = Lazy::new(|| {
    let config = BridgeConfig::from_env();
    info!("initializing the process-wide runtime with {config:?}");
    Runtime::new(config)
});

/// Everything the bridge needs: the heap, the external reference table, the wrapper cache, and the
/// permanent objects.
///
/// The Rust API takes a runtime explicitly. The C ABI uses the process-wide one, `Runtime::global()`.
pub struct Runtime {
    config: BridgeConfig,
    heap: Arc<Heap>,
    external_refs: ExternalRCTable,
    pub(crate) box_cache: BoxCache,
    unit: GlobalRoot,
    pub(crate) wrappers: WrapperCache,
    pub(crate) singletons: Singletons,
}

impl Runtime {
    pub fn new(config: BridgeConfig) -> Arc<Runtime> {
        let heap = Heap::new(config.gc.clone());
        let external_refs = ExternalRCTable::new(Arc::clone(&heap));

        let (unit, box_cache) = {
            let _runnable = ThreadStateGuard::new(&heap, ThreadState::Runnable);
            let unit = heap.add_global_root(heap.alloc(core_types().unit, Payload::Empty));
            let box_cache = if config.box_cache {
                BoxCache::populate(&heap)
            } else {
                BoxCache::default()
            };
            (unit, box_cache)
        };

        info!("runtime ready, {} preallocated boxes", box_cache.len());
        Arc::new(Runtime {
            config,
            heap,
            external_refs,
            box_cache,
            unit,
            wrappers: WrapperCache::default(),
            singletons: Singletons::default(),
        })
    }

    /// The process-wide runtime, initialized on first use from `BridgeConfig::from_env()`.
    pub fn global() -> &'static Arc<Runtime> {
        &GLOBAL_RUNTIME
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn external_refs(&self) -> &ExternalRCTable {
        &self.external_refs
    }

    /// Makes the current thread runnable until the returned guard is dropped. May block while a
    /// collection is in progress.
    pub fn enter_bridge(&self) -> BridgeCall<'_> {
        BridgeCall::new(self)
    }

    /// The `Unit` singleton.
    pub fn unit(&self, _call: &BridgeCall) -> ObjRef {
        match self.heap.global_root(self.unit) {
            Some(unit) => unit,
            None => fatal!("the Unit singleton is gone"),
        }
    }

    /// A fresh instance of `type_info`, its reference fields all null.
    pub fn alloc_instance(&self, _call: &BridgeCall, type_info: &'static TypeInfo) -> ObjRef {
        if type_info.is_interface() {
            fatal!("can't instantiate interface `{}`", type_info.name());
        }
        self.heap.alloc_instance(type_info)
    }

    /// Stops the world and collects.
    pub fn collect(&self) {
        self.heap.collect()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            live_external_refs: self.external_refs.live_count(),
            live_wrappers: self.wrappers.live_count(),
            wrappers_created: self.wrappers.created_count(),
            wrapper_cache_hits: self.wrappers.hit_count(),
            singletons: self.singletons.len(),
            gc: self.heap.stats(),
        }
    }
}
