use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, trace};
use mmtk::AllocationSemantics;
use parking_lot::{const_rwlock, RwLock};
use xref_core::TypeInfo;
use xref_value::Primitive;

use crate::active_plan::{with_mutator, Frame, ThreadData, ThreadRegistry, ThreadState};
use crate::collection::{self, enter_runnable, leave_runnable, with_world_shared};
use crate::config::GcConfig;
use crate::debug_assert_valid_ref;
use crate::gcref::ObjRef;
use crate::object_model::{load_slot, store_slot, ObjectHeader, ObjectId, Payload, ALIGN};
use crate::scanning::{Forwarding, GlobalRoot, GlobalRoots, RootScanner};
use crate::stats::GcStats;
use crate::{api, XrefVM};

/// Per-heap object counts. Objects don't know their heap's `Arc`, only its index in `HEAPS`.
#[derive(Default)]
struct HeapCounters {
    live: AtomicUsize,
    /// Objects scanned by the collection in progress.
    survivors: AtomicUsize,
    freed: AtomicUsize,
    allocated: AtomicUsize,
}

struct HeapEntry {
    heap: Weak<Heap>,
    counters: Arc<HeapCounters>,
}

/// Every heap ever created, by id. Entries of dropped heaps stay: their objects may still be around.
static HEAPS: RwLock<Vec<HeapEntry>> = const_rwlock(Vec::new());

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

/// The heaps that are still alive.
pub(crate) fn live_heaps() -> Vec<Arc<Heap>> {
    HEAPS.read().iter().filter_map(|entry| entry.heap.upgrade()).collect()
}

pub(crate) fn count_survivor(heap: u32) {
    if let Some(entry) = HEAPS.read().get(heap as usize) {
        entry.counters.survivors.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn reset_survivors() {
    for entry in HEAPS.read().iter() {
        entry.counters.survivors.store(0, Ordering::Relaxed);
    }
}

/// Makes the survivors of the collection that just ended the live objects. Returns the totals of
/// survivors and freed objects, all heaps included.
pub(crate) fn account_survivors() -> (usize, usize) {
    let (mut live, mut freed) = (0, 0);
    for entry in HEAPS.read().iter() {
        let counters = &entry.counters;
        let survivors = counters.survivors.load(Ordering::Relaxed);
        let before = counters.live.swap(survivors, Ordering::Relaxed);
        let dead = before.saturating_sub(survivors);
        counters.freed.fetch_add(dead, Ordering::Relaxed);
        live += survivors;
        freed += dead;
    }
    (live, freed)
}

/// A managed object store.
///
/// Threads get attached to a heap the first time they use it, in the `Native` state. Touching
/// managed objects requires being `Runnable`: runnable threads share the "world" lock, that a
/// collection takes exclusively. Hence a collection only happens while every other thread is
/// either native or parked at a safepoint.
///
/// All heaps allocate from the same MMTk instance, and a collection collects all of them. Each
/// heap has its own roots and counters.
pub struct Heap {
    id: HeapId,
    self_ref: Weak<Heap>,
    config: GcConfig,
    counters: Arc<HeapCounters>,

    pub(crate) threads: ThreadRegistry,
    pub(crate) global_roots: GlobalRoots,
    pub(crate) root_scanners: RwLock<Vec<Arc<dyn RootScanner>>>,

    allocations_since_collection: AtomicUsize,
    /// The epoch the heap was created in.
    first_epoch: u64,
}

impl Heap {
    pub fn new(config: GcConfig) -> Arc<Heap> {
        api::mmtk_init(&config);

        let mut heaps = HEAPS.write();
        let Ok(index) = u32::try_from(heaps.len()) else {
            panic!("too many heaps");
        };
        let id = HeapId(index);
        debug!("creating heap {id:?} with {config:?}");

        let counters = Arc::new(HeapCounters::default());
        let heap = Arc::new_cyclic(|self_ref| Heap {
            id,
            self_ref: self_ref.clone(),
            config,
            counters: Arc::clone(&counters),
            threads: ThreadRegistry::default(),
            global_roots: GlobalRoots::default(),
            root_scanners: RwLock::new(vec![]),
            allocations_since_collection: AtomicUsize::new(0),
            first_epoch: collection::epoch(),
        });
        heaps.push(HeapEntry {
            heap: Arc::downgrade(&heap),
            counters,
        });
        heap
    }

    pub fn id(&self) -> HeapId {
        self.id
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub(crate) fn weak_self(&self) -> Weak<Heap> {
        self.self_ref.clone()
    }

    fn current_thread(&self) -> Arc<ThreadData> {
        self.threads.current(self)
    }

    /// Whether `obj` was handed out since the last collection.
    pub fn is_current(&self, obj: ObjRef) -> bool {
        obj.is_from(collection::epoch())
    }

    // ----- thread states -----

    pub fn thread_state(&self) -> ThreadState {
        self.current_thread().state()
    }

    /// Switches the current thread to `new_state`, and returns the state it was in.
    ///
    /// Becoming runnable may block while a collection is in progress. Switching to the state the
    /// thread is already in does nothing, so nested switches are fine.
    pub fn switch_thread_state(&self, new_state: ThreadState) -> ThreadState {
        let thread = self.current_thread();
        let old_state = thread.state();
        if old_state == new_state {
            return old_state;
        }

        match new_state {
            ThreadState::Runnable => {
                enter_runnable();
                thread.set_state(ThreadState::Runnable);
            }
            ThreadState::Native => {
                thread.set_state(ThreadState::Native);
                leave_runnable();
            }
        }
        trace!("thread `{}`: {old_state:?} -> {new_state:?}", thread.name);
        old_state
    }

    /// Checks the current thread's state. Mismatches are programming errors: only checked in debug builds.
    pub fn assert_thread_state(&self, expected: ThreadState) {
        if cfg!(debug_assertions) {
            let actual = self.thread_state();
            assert_eq!(actual, expected, "unexpected thread state");
        }
    }

    /// Yields to a pending collection, if any. Runnable threads have to call it regularly.
    pub fn safepoint(&self) {
        collection::safepoint()
    }

    pub(crate) fn detach_thread(&self, thread: &Arc<ThreadData>) {
        self.threads.remove(thread);
    }

    // ----- allocation -----

    /// Allocates an object. May collect first, in which case references in `payload` are updated.
    pub fn alloc(&self, type_info: &'static TypeInfo, mut payload: Payload) -> ObjRef {
        self.assert_thread_state(ThreadState::Runnable);
        let slots = payload.slots();
        for obj in slots.iter().flatten() {
            debug_assert_valid_ref!(self, *obj);
        }

        // MMTk may collect too, when it runs out of space
        let thread = self.current_thread();
        let rooted = slots.iter().any(Option::is_some);
        if rooted {
            thread.frames.lock().push(Frame { slots });
        }

        if self.should_collect() {
            self.collect();
        }

        let size = ObjectHeader::allocation_size(&payload);
        let object = with_mutator(|mutator| {
            let start = api::mmtk_alloc(mutator, size, ALIGN, 0, AllocationSemantics::Default);
            if start.is_zero() {
                error!("MMTk could not allocate {size} bytes");
                panic!("out of memory: could not allocate an instance of `{}`", type_info.name());
            }
            let object = XrefVM::object_start_to_ref(start);
            api::mmtk_post_alloc(mutator, object, size, AllocationSemantics::Default);
            object
        });

        if rooted {
            let frame = thread.frames.lock().pop().unwrap_or_default();
            let mut forwarded = frame.slots.into_iter();
            payload.for_each_slot_mut(|slot| *slot = forwarded.next().flatten());
        }

        let id = ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed));
        // SAFETY: fresh allocation of the right size, that no collection can see before it's written.
        unsafe { ObjectHeader::init(object, type_info, id, self.id.0, &payload) };
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        self.counters.live.fetch_add(1, Ordering::Relaxed);

        ObjRef::current(object)
    }

    /// Allocates an instance of `type_info` with all its reference fields set to null.
    pub fn alloc_instance(&self, type_info: &'static TypeInfo) -> ObjRef {
        self.alloc(type_info, Payload::Fields(vec![None; type_info.field_count()]))
    }

    fn should_collect(&self) -> bool {
        if cfg!(feature = "stress_test") {
            return true;
        }
        let threshold = self.config.collection_threshold;
        if threshold > 0 && self.allocations_since_collection.fetch_add(1, Ordering::Relaxed) + 1 >= threshold {
            self.allocations_since_collection.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    // ----- object accessors -----

    /// Native threads get the world for the duration of `f`.
    fn with_object<R>(&self, obj: ObjRef, f: impl FnOnce(&ObjectHeader) -> R) -> R {
        with_world_shared(|| {
            debug_assert_valid_ref!(self, obj);
            // SAFETY: current references point to live objects, and the world can't be stopped.
            f(unsafe { ObjectHeader::of(obj.object()) })
        })
    }

    pub fn type_info(&self, obj: ObjRef) -> &'static TypeInfo {
        self.with_object(obj, |object| object.type_info)
    }

    /// Identity of the object, stable across collections.
    pub fn object_id(&self, obj: ObjRef) -> ObjectId {
        self.with_object(obj, |object| object.id)
    }

    pub fn payload(&self, obj: ObjRef) -> Payload {
        self.with_object(obj, ObjectHeader::payload)
    }

    /// The value of a boxed primitive.
    pub fn primitive(&self, obj: ObjRef) -> Option<Primitive> {
        self.with_object(obj, ObjectHeader::primitive)
    }

    pub fn string(&self, obj: ObjRef) -> Option<String> {
        self.with_object(obj, |object| object.string().map(str::to_string))
    }

    pub fn field(&self, obj: ObjRef, index: usize) -> Option<ObjRef> {
        self.with_object(obj, |object| match object.fields() {
            Some(fields) => load_slot(&fields[index]),
            None => panic!("object {obj:?} has no fields: {:?}", object.payload()),
        })
    }

    pub fn set_field(&self, obj: ObjRef, index: usize, value: Option<ObjRef>) {
        if let Some(value) = value {
            debug_assert_valid_ref!(self, value);
        }
        self.with_object(obj, |object| match object.fields() {
            Some(fields) => store_slot(&fields[index], value),
            None => panic!("object {obj:?} has no fields: {:?}", object.payload()),
        })
    }

    pub fn throwable_message(&self, obj: ObjRef) -> Option<String> {
        self.with_object(obj, |object| object.message().map(str::to_string))
    }

    pub fn throwable_cause(&self, obj: ObjRef) -> Option<ObjRef> {
        self.with_object(obj, ObjectHeader::cause)
    }

    // ----- associated objects -----

    pub fn get_associated_object(&self, obj: ObjRef) -> usize {
        self.with_object(obj, |object| object.get_associated_object())
    }

    pub fn set_associated_object(&self, obj: ObjRef, value: usize) {
        self.with_object(obj, |object| object.set_associated_object(value))
    }

    /// Sets the associated object to `new` if it is `expected`. Returns the value found: `expected`
    /// when the swap happened.
    pub fn compare_and_swap_associated_object(&self, obj: ObjRef, expected: usize, new: usize) -> usize {
        self.with_object(obj, |object| object.compare_and_swap_associated_object(expected, new))
    }

    // ----- shadow stack -----

    /// Pushes an empty frame on the current thread's shadow stack. Returns the new depth.
    pub fn push_frame(&self) -> usize {
        let thread = self.current_thread();
        let mut frames = thread.frames.lock();
        frames.push(Frame::default());
        frames.len()
    }

    pub fn pop_frame(&self) {
        let thread = self.current_thread();
        let popped = thread.frames.lock().pop();
        debug_assert!(popped.is_some(), "popping a frame off an empty shadow stack");
    }

    pub fn frame_depth(&self) -> usize {
        self.current_thread().frames.lock().len()
    }

    /// Stores into a slot of the top frame, growing it as needed.
    pub fn frame_store(&self, slot: usize, value: Option<ObjRef>) {
        if let Some(value) = value {
            debug_assert_valid_ref!(self, value);
        }
        let thread = self.current_thread();
        let mut frames = thread.frames.lock();
        let Some(frame) = frames.last_mut() else {
            panic!("storing into slot {slot} without a frame");
        };
        if frame.slots.len() <= slot {
            frame.slots.resize(slot + 1, None);
        }
        frame.slots[slot] = value;
    }

    pub fn frame_load(&self, slot: usize) -> Option<ObjRef> {
        let thread = self.current_thread();
        let frames = thread.frames.lock();
        frames.last().and_then(|frame| frame.slots.get(slot).copied().flatten())
    }

    /// Adds a variable to the top frame. Returns its slot.
    pub fn frame_push(&self, value: ObjRef) -> usize {
        debug_assert_valid_ref!(self, value);
        let thread = self.current_thread();
        let mut frames = thread.frames.lock();
        let Some(frame) = frames.last_mut() else {
            panic!("adding a variable without a frame");
        };
        frame.slots.push(Some(value));
        frame.slots.len() - 1
    }

    // ----- pending exceptions -----

    pub fn pending_exception(&self) -> Option<ObjRef> {
        *self.current_thread().pending_exception.lock()
    }

    pub fn set_pending_exception(&self, exception: Option<ObjRef>) {
        *self.current_thread().pending_exception.lock() = exception;
    }

    pub fn take_pending_exception(&self) -> Option<ObjRef> {
        self.current_thread().pending_exception.lock().take()
    }

    // ----- other roots -----

    pub fn add_global_root(&self, obj: ObjRef) -> GlobalRoot {
        debug_assert_valid_ref!(self, obj);
        self.global_roots.add(obj)
    }

    pub fn global_root(&self, root: GlobalRoot) -> Option<ObjRef> {
        self.global_roots.get(root)
    }

    pub fn remove_global_root(&self, root: GlobalRoot) {
        self.global_roots.remove(root)
    }

    pub fn register_root_scanner(&self, scanner: Arc<dyn RootScanner>) {
        self.root_scanners.write().push(scanner);
    }

    /// Reports every root of this heap. Called with the world stopped.
    pub(crate) fn scan_roots(&self, visitor: &mut dyn FnMut(ObjRef)) {
        for thread in self.threads.threads() {
            thread.for_each_root(&mut *visitor);
        }
        self.global_roots.scan_roots(visitor);
        for scanner in self.root_scanners.read().iter() {
            scanner.scan_roots(visitor);
        }
    }

    /// Points every root of this heap to where its object went, and clears the dead weak ones.
    pub(crate) fn forward_roots(&self, forwarding: &Forwarding) {
        for thread in self.threads.threads() {
            thread.for_each_root_slot_mut(|slot| forwarding.forward_slot(slot));
        }
        self.global_roots.forward_roots(forwarding);
        for scanner in self.root_scanners.read().iter() {
            scanner.forward_roots(forwarding);
        }
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            collections: (collection::epoch() - self.first_epoch) as usize,
            live_objects: self.counters.live.load(Ordering::Relaxed),
            total_allocations: self.counters.allocated.load(Ordering::Relaxed),
            freed: self.counters.freed.load(Ordering::Relaxed),
            attached_threads: self.threads.len(),
            used_bytes: api::mmtk_used_bytes(),
        }
    }

    pub fn global_root_count(&self) -> usize {
        self.global_roots.len()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.threads.leave_dropped_heap(self);
        debug!("dropping heap {:?}: {}", self.id, self.stats());
    }
}
