use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use mmtk::scheduler::GCWorker;
use mmtk::util::opaque_pointer::*;
use mmtk::util::{Address, ObjectReference};
use mmtk::vm::{ObjectTracerContext, RootsWorkFactory, Scanning, SlotVisitor};
use mmtk::Mutator;
use parking_lot::{const_mutex, Mutex};

use crate::collection::epoch;
use crate::gc_interface::{count_survivor, live_heaps};
use crate::gcref::ObjRef;
use crate::object_model::ObjectHeader;
use crate::{XrefSlot, XrefVM};

/// Roots the heap doesn't know about by itself, held by whoever embeds it.
///
/// A collection calls `scan_roots` before tracing, and `forward_roots` once every surviving object
/// has been given its new reference. Entries that weren't reported by `scan_roots` may point to dead
/// objects by then: `Forwarding::get` tells which.
pub trait RootScanner: Send + Sync {
    fn scan_roots(&self, visitor: &mut dyn FnMut(ObjRef));

    fn forward_roots(&self, forwarding: &Forwarding);
}

/// Where the objects of the epoch being collected went.
#[derive(Debug)]
pub struct Forwarding {
    old_epoch: u64,
}

impl Forwarding {
    pub(crate) fn new(old_epoch: u64) -> Self {
        Self { old_epoch }
    }

    /// The new reference of a surviving object; `None` if it was collected.
    pub fn get(&self, obj: ObjRef) -> Option<ObjRef> {
        let object = obj.object();
        if !object.is_reachable() {
            return None;
        }
        let moved = object.get_forwarded_object().unwrap_or(object);
        Some(ObjRef::new(moved, self.new_epoch()))
    }

    /// Updates a slot in place. Slots pointing to dead objects are cleared.
    pub fn forward_slot(&self, slot: &mut Option<ObjRef>) {
        if let Some(obj) = *slot {
            *slot = self.get(obj);
        }
    }

    pub fn new_epoch(&self) -> u64 {
        self.old_epoch + 1
    }
}

/// Handle to a global root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GlobalRoot(pub(crate) usize);

/// Roots that live as long as they're not removed, independently of any thread.
#[derive(Default)]
pub(crate) struct GlobalRoots {
    slots: Mutex<GlobalRootSlots>,
}

#[derive(Default)]
struct GlobalRootSlots {
    roots: Vec<Option<ObjRef>>,
    free: Vec<usize>,
}

impl GlobalRoots {
    pub(crate) fn add(&self, obj: ObjRef) -> GlobalRoot {
        let mut slots = self.slots.lock();
        match slots.free.pop() {
            Some(index) => {
                slots.roots[index] = Some(obj);
                GlobalRoot(index)
            }
            None => {
                slots.roots.push(Some(obj));
                GlobalRoot(slots.roots.len() - 1)
            }
        }
    }

    pub(crate) fn get(&self, root: GlobalRoot) -> Option<ObjRef> {
        self.slots.lock().roots.get(root.0).copied().flatten()
    }

    pub(crate) fn remove(&self, root: GlobalRoot) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.roots.get_mut(root.0) {
            if slot.take().is_some() {
                slots.free.push(root.0);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        let slots = self.slots.lock();
        slots.roots.len() - slots.free.len()
    }
}

impl RootScanner for GlobalRoots {
    fn scan_roots(&self, visitor: &mut dyn FnMut(ObjRef)) {
        self.slots.lock().roots.iter().flatten().for_each(|obj| visitor(*obj));
    }

    fn forward_roots(&self, forwarding: &Forwarding) {
        self.slots
            .lock()
            .roots
            .iter_mut()
            .for_each(|slot| forwarding.forward_slot(slot));
    }
}

/// Words MMTk updates in place during a collection: copies of the roots, which get written back by
/// `forward_roots` afterwards. Freed when the world resumes.
static ROOT_BUFFERS: Mutex<Vec<Box<[usize]>>> = const_mutex(Vec::new());

fn hold(roots: Vec<ObjRef>) -> Vec<XrefSlot> {
    let buffer: Box<[usize]> = roots.iter().map(|obj| obj.address().as_usize()).collect();
    let slots = buffer
        .iter()
        .map(|word| XrefSlot::from_address(Address::from_ptr(word)))
        .collect();
    ROOT_BUFFERS.lock().push(buffer);
    slots
}

pub(crate) fn release_root_buffers() {
    ROOT_BUFFERS.lock().clear();
}

pub struct VMScanning {}

// Documentation: https://docs.mmtk.io/api/mmtk/vm/scanning/trait.Scanning.html
impl Scanning<XrefVM> for VMScanning {
    fn scan_object<SV: SlotVisitor<XrefSlot>>(_tls: VMWorkerThread, object: ObjectReference, slot_visitor: &mut SV) {
        // SAFETY: MMTk only scans live objects, with the world stopped.
        let header = unsafe { ObjectHeader::of(object) };
        count_survivor(header.heap);
        for slot in header.slots() {
            if slot.load(Ordering::Relaxed) != 0 {
                slot_visitor.visit_slot(XrefSlot::from_address(Address::from_ptr::<AtomicUsize>(slot)));
            }
        }
    }

    fn notify_initial_thread_scan_complete(_partial_scan: bool, _tls: VMWorkerThread) {
        // do nothing.
    }

    fn scan_roots_in_mutator_thread(
        _tls: VMWorkerThread,
        _mutator: &'static mut Mutator<XrefVM>,
        _factory: impl RootsWorkFactory<XrefSlot>,
    ) {
        // shadow stacks belong to heaps, not to mutators: they get scanned with the other heap roots
    }

    /// Every heap's roots: shadow stacks, pending exceptions, global roots, and whatever its root
    /// scanners (the external reference tables) report.
    fn scan_vm_specific_roots(_tls: VMWorkerThread, mut factory: impl RootsWorkFactory<XrefSlot>) {
        for heap in live_heaps() {
            let mut roots = vec![];
            heap.scan_roots(&mut |obj| roots.push(obj));
            trace!("heap {:?}: {} roots", heap.id(), roots.len());
            if !roots.is_empty() {
                factory.create_process_roots_work(hold(roots));
            }
        }
    }

    fn supports_return_barrier() -> bool {
        false
    }

    fn prepare_for_roots_re_scanning() {
        unimplemented!()
    }

    /// Writes the new references back into the roots, and clears the weak ones whose object died.
    fn process_weak_refs(_worker: &mut GCWorker<XrefVM>, _tracer_context: impl ObjectTracerContext<XrefVM>) -> bool {
        let forwarding = Forwarding::new(epoch());
        for heap in live_heaps() {
            heap.forward_roots(&forwarding);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcref::object_at;

    #[test]
    fn global_root_slots_are_reused() {
        let roots = GlobalRoots::default();
        let a = roots.add(ObjRef::new(object_at(0x1000), 1));
        let b = roots.add(ObjRef::new(object_at(0x2000), 1));
        roots.remove(a);
        // removing twice is harmless
        roots.remove(a);
        assert_eq!(roots.len(), 1);

        let c = roots.add(ObjRef::new(object_at(0x3000), 1));
        assert_eq!(c, a);
        assert_eq!(roots.get(b), Some(ObjRef::new(object_at(0x2000), 1)));
        assert_eq!(roots.get(c), Some(ObjRef::new(object_at(0x3000), 1)));
    }

    #[test]
    fn held_roots_point_at_their_copies() {
        let slots = hold(vec![ObjRef::new(object_at(0x1000), 1), ObjRef::new(object_at(0x2000), 1)]);
        let loaded: Vec<_> = slots.iter().map(|slot| mmtk::vm::slot::Slot::load(slot)).collect();
        assert_eq!(loaded, vec![Some(object_at(0x1000)), Some(object_at(0x2000))]);
    }
}
