use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;
use xref_gc::{GlobalRoot, ObjRef};

use crate::external_rc::RawExternalRCRef;
use crate::runtime::Runtime;
use crate::thread_state::BridgeCall;

/// Singletons, by factory. Each one stays alive for as long as the runtime.
#[derive(Default)]
pub(crate) struct Singletons {
    instances: Mutex<HashMap<usize, GlobalRoot>>,
}

impl Singletons {
    pub(crate) fn len(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Runtime {
    /// A new handle on the singleton `factory` creates. The first call creates it: when threads race,
    /// they all run the factory, one instance wins and the others are garbage.
    pub fn create_singleton(&self, factory: fn(&BridgeCall) -> ObjRef) -> RawExternalRCRef {
        self.singleton_with(factory as usize, |call| Some(factory(call)))
    }

    /// Singleton keyed by `key`. The factory may return null, in which case nothing is recorded.
    pub(crate) fn singleton_with(
        &self,
        key: usize,
        factory: impl FnOnce(&BridgeCall) -> Option<ObjRef>,
    ) -> RawExternalRCRef {
        let call = self.enter_bridge();
        let heap = call.heap();

        let existing = self.singletons.instances.lock().get(&key).copied();
        let obj = match existing {
            Some(root) => heap.global_root(root),
            None => {
                // may allocate, so no lock held
                let Some(created) = factory(&call) else {
                    return RawExternalRCRef::NULL;
                };
                let mut instances = self.singletons.instances.lock();
                let root = *instances.entry(key).or_insert_with(|| {
                    debug!("new singleton for factory {key:#x}");
                    heap.add_global_root(created)
                });
                drop(instances);
                heap.global_root(root)
            }
        };
        self.external_refs().create_retained(obj)
    }
}
