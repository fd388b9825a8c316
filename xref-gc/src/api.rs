// The parts of MMTk's `memory_manager` the heap uses.
// https://docs.mmtk.io/api/mmtk/memory_manager/index.html

use std::sync::Once;

use log::{debug, info};
use mmtk::scheduler::GCWorker;
use mmtk::util::opaque_pointer::*;
use mmtk::util::{Address, ObjectReference};
use mmtk::{memory_manager, AllocationSemantics, MMTKBuilder, Mutator, MMTK};

use crate::config::GcConfig;
use crate::{mmtk, XrefVM, MMTK_SINGLETON};

#[cfg(feature = "marksweep")]
const PLAN: &str = "MarkSweep";
#[cfg(not(feature = "marksweep"))]
const PLAN: &str = "SemiSpace";

pub fn mmtk_create_builder(config: &GcConfig) -> MMTKBuilder {
    let mut builder = MMTKBuilder::new();

    let plan_success = builder.set_option("plan", PLAN);
    assert!(plan_success, "Couldn't set GC plan");

    let heap_success = mmtk_set_fixed_heap_size(&mut builder, config.heap_size);
    assert!(heap_success, "Couldn't set MMTk fixed heap size");

    if config.gc_threads > 0 {
        let threads_success = builder.set_option("threads", &config.gc_threads.to_string());
        assert!(threads_success, "Couldn't set the number of GC threads");
    }

    builder
}

pub fn mmtk_set_fixed_heap_size(builder: &mut MMTKBuilder, heap_size: usize) -> bool {
    builder
        .options
        .gc_trigger
        .set(mmtk::util::options::GCTriggerSelector::FixedHeapSize(heap_size))
}

/// The process-wide MMTk instance. The first call creates it from `config` and starts the GC
/// workers; later configurations are ignored.
pub fn mmtk_init(config: &GcConfig) -> &'static MMTK<XrefVM> {
    static COLLECTION: Once = Once::new();

    let mmtk = MMTK_SINGLETON.get_or_init(|| {
        info!(
            "initializing MMTk: {PLAN}, {} bytes, {} GC threads",
            config.heap_size,
            match config.gc_threads {
                0 => "default".to_string(),
                threads => threads.to_string(),
            }
        );
        memory_manager::mmtk_init::<XrefVM>(&mmtk_create_builder(config))
    });

    COLLECTION.call_once(|| {
        memory_manager::initialize_collection(mmtk, VMThread(OpaquePointer::UNINITIALIZED));
        debug!("MMTk collection enabled");
    });
    mmtk
}

pub fn mmtk_bind_mutator(tls: VMMutatorThread) -> Box<Mutator<XrefVM>> {
    memory_manager::bind_mutator(mmtk(), tls)
}

pub fn mmtk_destroy_mutator(mutator: &mut Mutator<XrefVM>) {
    memory_manager::destroy_mutator(mutator);
}

/// Large objects go to the large object space whatever `semantics` says.
pub fn mmtk_alloc(
    mutator: &mut Mutator<XrefVM>,
    size: usize,
    align: usize,
    offset: usize,
    semantics: AllocationSemantics,
) -> Address {
    memory_manager::alloc::<XrefVM>(mutator, size, align, offset, los_if_large(size, semantics))
}

pub fn mmtk_post_alloc(
    mutator: &mut Mutator<XrefVM>,
    refer: ObjectReference,
    bytes: usize,
    semantics: AllocationSemantics,
) {
    memory_manager::post_alloc::<XrefVM>(mutator, refer, bytes, los_if_large(bytes, semantics))
}

fn los_if_large(size: usize, semantics: AllocationSemantics) -> AllocationSemantics {
    if size >= mmtk().get_plan().constraints().max_non_los_default_alloc_bytes {
        AllocationSemantics::Los
    } else {
        semantics
    }
}

pub fn mmtk_start_worker(tls: VMWorkerThread, worker: Box<GCWorker<XrefVM>>) {
    memory_manager::start_worker::<XrefVM>(mmtk(), tls, worker)
}

/// Requests a collection, and blocks the calling mutator until it is done.
pub fn mmtk_handle_user_collection_request(tls: VMMutatorThread) {
    memory_manager::handle_user_collection_request::<XrefVM>(mmtk(), tls);
}

pub fn mmtk_used_bytes() -> usize {
    memory_manager::used_bytes(mmtk())
}
