use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, info, trace};
use mmtk::util::opaque_pointer::*;
use mmtk::vm::{ActivePlan, Collection, GCThreadContext};
use mmtk::Mutator;
use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{const_mutex, Condvar, Mutex, RawRwLock};

use crate::active_plan::{current_mutator_tls, ThreadState, VMActivePlan};
use crate::gc_interface::{account_survivors, reset_survivors, Heap};
use crate::scanning::release_root_buffers;
use crate::{api, XrefVM};

/// Held shared by runnable threads, exclusively while the world is stopped.
static WORLD: RawRwLock = RawRwLock::INIT;
/// Collections waiting for the world. Runnable threads yield at their next safepoint while it's non-zero.
static PENDING: AtomicUsize = AtomicUsize::new(0);
/// Collection cycle. References from previous cycles are stale. Never 0.
static EPOCH: AtomicU64 = AtomicU64::new(1);

static DONE: Mutex<()> = const_mutex(());
static DONE_CONDVAR: Condvar = Condvar::new();
static STARTED: Mutex<Option<Instant>> = const_mutex(None);

thread_local! {
    /// How many heaps the current thread is runnable on. It holds the world lock while it's non-zero.
    static RUNNABLE: Cell<usize> = const { Cell::new(0) };
}

pub(crate) fn epoch() -> u64 {
    EPOCH.load(Ordering::Acquire)
}

fn runnable_count() -> usize {
    RUNNABLE.try_with(Cell::get).unwrap_or(0)
}

pub(crate) fn enter_runnable() {
    let count = runnable_count();
    if count == 0 {
        WORLD.lock_shared();
    }
    RUNNABLE.with(|it| it.set(count + 1));
}

pub(crate) fn leave_runnable() {
    let count = runnable_count();
    debug_assert!(count > 0, "leaving a runnable state that wasn't entered");
    RUNNABLE.with(|it| it.set(count - 1));
    if count == 1 {
        // SAFETY: runnable threads hold the world lock shared.
        unsafe { WORLD.unlock_shared() };
    }
}

/// Yields to a pending collection, if the current thread is runnable.
pub(crate) fn safepoint() {
    if PENDING.load(Ordering::Acquire) == 0 || runnable_count() == 0 {
        return;
    }
    trace!("parked at a safepoint");
    // SAFETY: runnable threads hold the world lock shared. The collector already waits for the lock
    // exclusively, so taking it again blocks until the world is resumed.
    unsafe { WORLD.unlock_shared() };
    WORLD.lock_shared();
}

/// Runs `f` while the world can't be stopped.
pub(crate) fn with_world_shared<R>(f: impl FnOnce() -> R) -> R {
    if runnable_count() > 0 {
        return f();
    }
    WORLD.lock_shared();
    let result = f();
    // SAFETY: taken just above.
    unsafe { WORLD.unlock_shared() };
    result
}

pub struct VMCollection {}

// Documentation: https://docs.mmtk.io/api/mmtk/vm/collection/trait.Collection.html
impl Collection<XrefVM> for VMCollection {
    fn stop_all_mutators<F>(_tls: VMWorkerThread, mut mutator_visitor: F)
    where
        F: FnMut(&'static mut Mutator<XrefVM>),
    {
        PENDING.fetch_add(1, Ordering::AcqRel);
        WORLD.lock_exclusive();
        PENDING.fetch_sub(1, Ordering::AcqRel);

        *STARTED.lock() = Some(Instant::now());
        debug!("world stopped for collection #{}", epoch());
        reset_survivors();

        for mutator in VMActivePlan::mutators() {
            mutator_visitor(mutator);
        }
    }

    fn resume_mutators(_tls: VMWorkerThread) {
        let (live, freed) = account_survivors();
        release_root_buffers();

        let collection = {
            let _done = DONE.lock();
            let collection = EPOCH.fetch_add(1, Ordering::AcqRel);
            DONE_CONDVAR.notify_all();
            collection
        };

        let elapsed = STARTED.lock().take().map(|start| start.elapsed()).unwrap_or_default();
        info!("collection #{collection} done in {elapsed:?}: {live} objects survived, {freed} freed");

        // SAFETY: taken in `stop_all_mutators`.
        unsafe { WORLD.unlock_exclusive() };
    }

    fn block_for_gc(_tls: VMMutatorThread) {
        let seen = epoch();
        let runnable = runnable_count() > 0;
        if runnable {
            // SAFETY: runnable threads hold the world lock shared.
            unsafe { WORLD.unlock_shared() };
        }

        {
            let mut done = DONE.lock();
            while epoch() == seen {
                DONE_CONDVAR.wait(&mut done);
            }
        }

        if runnable {
            WORLD.lock_shared();
        }
    }

    fn spawn_gc_thread(_tls: VMThread, ctx: GCThreadContext<XrefVM>) {
        // The thread runs until the process quits.
        let spawned = std::thread::Builder::new()
            .name("xref-gc-worker".to_string())
            .spawn(move || {
                let worker_tls = VMWorkerThread(VMThread(OpaquePointer::UNINITIALIZED));
                match ctx {
                    GCThreadContext::Worker(w) => api::mmtk_start_worker(worker_tls, w),
                }
            });
        if let Err(err) = spawned {
            panic!("could not spawn a GC worker: {err}");
        }
    }
}

impl Heap {
    /// Stops the world and collects.
    ///
    /// Can be called in any state. When several threads ask at the same time, they may share a
    /// collection: each returns once one completed after its request.
    pub fn collect(&self) {
        let old_state = self.switch_thread_state(ThreadState::Runnable);
        debug!("heap {:?}: collection requested", self.id());
        api::mmtk_handle_user_collection_request(current_mutator_tls());
        self.switch_thread_state(old_state);
    }
}
