use std::cell::{RefCell, UnsafeCell};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, trace, warn};
use mmtk::util::opaque_pointer::*;
use mmtk::util::Address;
use mmtk::vm::ActivePlan;
use mmtk::Mutator;
use parking_lot::{const_mutex, Mutex};

use crate::collection::{leave_runnable, with_world_shared};
use crate::gc_interface::{Heap, HeapId};
use crate::gcref::ObjRef;
use crate::{api, XrefVM};

/// What a thread is allowed to do with a heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Running native code: may not touch managed objects, never delays a collection.
    Native = 0,
    /// Running managed code: may touch managed objects, must reach safepoints.
    Runnable = 1,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ThreadState::Native,
            _ => ThreadState::Runnable,
        }
    }
}

/// A shadow stack frame: slots the collector treats as roots, and fixes up when objects move.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub(crate) slots: Vec<Option<ObjRef>>,
}

/// A thread attached to a heap.
#[derive(Debug)]
pub(crate) struct ThreadData {
    pub(crate) name: String,
    state: AtomicU8,
    pub(crate) frames: Mutex<Vec<Frame>>,
    pub(crate) pending_exception: Mutex<Option<ObjRef>>,
}

impl ThreadData {
    fn new() -> Self {
        let current = std::thread::current();
        Self {
            name: current.name().map_or_else(|| format!("{:?}", current.id()), str::to_string),
            state: AtomicU8::new(ThreadState::Native as u8),
            frames: Mutex::new(vec![]),
            pending_exception: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release)
    }

    /// Switches to `Native`, releasing the world. Must be called on the thread itself.
    fn leave_if_runnable(&self) {
        if self.state() == ThreadState::Runnable {
            self.set_state(ThreadState::Native);
            leave_runnable();
        }
    }

    /// Calls `visitor` on every root this thread holds.
    pub(crate) fn for_each_root(&self, mut visitor: impl FnMut(ObjRef)) {
        for frame in self.frames.lock().iter() {
            frame.slots.iter().flatten().for_each(|obj| visitor(*obj));
        }
        if let Some(exception) = *self.pending_exception.lock() {
            visitor(exception)
        }
    }

    pub(crate) fn for_each_root_slot_mut(&self, mut visitor: impl FnMut(&mut Option<ObjRef>)) {
        for frame in self.frames.lock().iter_mut() {
            frame.slots.iter_mut().for_each(&mut visitor);
        }
        visitor(&mut *self.pending_exception.lock())
    }
}

/// The MMTk mutator of an OS thread, bound on first use. Its address is the thread's `VMMutatorThread`.
struct MutatorCell(UnsafeCell<Option<Box<Mutator<XrefVM>>>>);

struct LocalMutator(Box<MutatorCell>);

impl LocalMutator {
    fn tls(&self) -> VMMutatorThread {
        let cell: *const MutatorCell = &*self.0;
        VMMutatorThread(VMThread(OpaquePointer::from_address(Address::from_ptr(cell))))
    }
}

impl Drop for LocalMutator {
    fn drop(&mut self) {
        let cell = Address::from_ptr::<MutatorCell>(&*self.0).as_usize();
        if let Some(mut mutator) = self.0 .0.get_mut().take() {
            with_world_shared(|| {
                MUTATORS.lock().retain(|it| it.cell != cell);
                api::mmtk_destroy_mutator(&mut mutator);
            });
            trace!("mutator {cell:#x} destroyed");
        }
    }
}

/// A bound mutator. Only dereferenced by its own thread, or by the collector while the world is stopped.
struct MutatorPtr {
    cell: usize,
    mutator: *mut Mutator<XrefVM>,
}

// SAFETY: see above.
unsafe impl Send for MutatorPtr {}

/// Every bound mutator. Only changes while the world can't be stopped.
static MUTATORS: Mutex<Vec<MutatorPtr>> = const_mutex(Vec::new());

thread_local! {
    static MUTATOR: LocalMutator = LocalMutator(Box::new(MutatorCell(UnsafeCell::new(None))));
}

/// Runs `f` on the current thread's mutator. The thread has to be runnable.
pub(crate) fn with_mutator<R>(f: impl FnOnce(&mut Mutator<XrefVM>) -> R) -> R {
    MUTATOR.with(|local| {
        let tls = local.tls();
        // SAFETY: a runnable thread is the only one touching its mutator.
        let slot = unsafe { &mut *local.0 .0.get() };
        let mutator = slot.get_or_insert_with(|| {
            let mut mutator = api::mmtk_bind_mutator(tls);
            MUTATORS.lock().push(MutatorPtr {
                cell: tls.0 .0.to_address().as_usize(),
                mutator: &mut *mutator,
            });
            debug!("mutator bound for thread {:?}", std::thread::current().id());
            mutator
        });
        f(mutator)
    })
}

/// The current thread's `VMMutatorThread`, binding its mutator if needed. The thread has to be runnable.
pub(crate) fn current_mutator_tls() -> VMMutatorThread {
    with_mutator(|_| MUTATOR.with(LocalMutator::tls))
}

pub struct VMActivePlan {}

// Documentation: https://docs.mmtk.io/api/mmtk/vm/active_plan/trait.ActivePlan.html
impl ActivePlan<XrefVM> for VMActivePlan {
    fn is_mutator(tls: VMThread) -> bool {
        let cell = tls.0.to_address().as_usize();
        MUTATORS.lock().iter().any(|it| it.cell == cell)
    }

    /// Return a Mutator reference for the thread.
    fn mutator(tls: VMMutatorThread) -> &'static mut Mutator<XrefVM> {
        // SAFETY: mutator threads are identified by the address of their cell, which lives as long
        // as the thread does.
        let cell = unsafe { &*tls.0 .0.to_address().to_ptr::<MutatorCell>() };
        match unsafe { (*cell.0.get()).as_deref_mut() } {
            Some(mutator) => mutator,
            None => panic!("thread {tls:?} has no mutator bound"),
        }
    }

    /// Return an iterator that includes all the mutators at the point of invocation.
    fn mutators<'a>() -> Box<dyn Iterator<Item = &'a mut Mutator<XrefVM>> + 'a> {
        let mutators: Vec<*mut Mutator<XrefVM>> = MUTATORS.lock().iter().map(|it| it.mutator).collect();
        // SAFETY: called with the world stopped, so no mutator thread is using its mutator.
        Box::new(mutators.into_iter().map(|mutator| unsafe { &mut *mutator }))
    }

    fn number_of_mutators() -> usize {
        MUTATORS.lock().len()
    }
}

struct Attachment {
    heap_id: HeapId,
    heap: Weak<Heap>,
    thread: Arc<ThreadData>,
}

/// The heaps the current thread is attached to. Detaches from all of them on thread exit.
#[derive(Default)]
struct Attachments(Vec<Attachment>);

impl Drop for Attachments {
    fn drop(&mut self) {
        for attachment in self.0.drain(..) {
            match attachment.heap.upgrade() {
                Some(heap) => heap.detach_thread(&attachment.thread),
                None => attachment.thread.leave_if_runnable(),
            }
        }
    }
}

thread_local! {
    static ATTACHMENTS: RefCell<Attachments> = RefCell::new(Attachments::default());
}

/// The registry of the threads attached to one heap.
#[derive(Default)]
pub(crate) struct ThreadRegistry {
    threads: Mutex<Vec<Arc<ThreadData>>>,
}

impl ThreadRegistry {
    /// The current thread's data for `heap`, attaching it on first use.
    pub(crate) fn current(&self, heap: &Heap) -> Arc<ThreadData> {
        ATTACHMENTS.with(|attachments| {
            let mut attachments = attachments.borrow_mut();
            if let Some(attachment) = attachments.0.iter().find(|it| it.heap_id == heap.id()) {
                return Arc::clone(&attachment.thread);
            }

            attachments.0.retain(|it| {
                let alive = it.heap.strong_count() > 0;
                if !alive {
                    it.thread.leave_if_runnable();
                }
                alive
            });

            let thread = Arc::new(ThreadData::new());
            debug!("attaching thread `{}` to heap {:?}", thread.name, heap.id());
            self.threads.lock().push(Arc::clone(&thread));
            attachments.0.push(Attachment {
                heap_id: heap.id(),
                heap: heap.weak_self(),
                thread: Arc::clone(&thread),
            });
            thread
        })
    }

    /// Releases the world if the current thread is still runnable on `heap`, which is going away.
    pub(crate) fn leave_dropped_heap(&self, heap: &Heap) {
        let _ = ATTACHMENTS.try_with(|attachments| {
            let Ok(attachments) = attachments.try_borrow() else {
                return;
            };
            if let Some(attachment) = attachments.0.iter().find(|it| it.heap_id == heap.id()) {
                attachment.thread.leave_if_runnable();
            }
        });
    }

    pub(crate) fn remove(&self, thread: &Arc<ThreadData>) {
        if thread.state() == ThreadState::Runnable {
            warn!("thread `{}` exited while runnable", thread.name);
            thread.leave_if_runnable();
        }
        self.threads.lock().retain(|it| !Arc::ptr_eq(it, thread));
    }

    /// Snapshot of the attached threads.
    pub(crate) fn threads(&self) -> Vec<Arc<ThreadData>> {
        self.threads.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.threads.lock().len()
    }
}
