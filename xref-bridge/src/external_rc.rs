use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::RwLock;
use static_assertions::const_assert_eq;
use xref_core::TypeInfo;
use xref_gc::gcref::opt_to_bits;
use xref_gc::{Forwarding, Heap, ObjRef, RootScanner, ThreadState};

/// Low half of a handle: the slot index. High half: the slot's generation.
const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (usize::MAX >> INDEX_BITS) as u32;

/// An opaque handle on a managed object, for native code to hold.
///
/// It's a generation-checked index into the `ExternalRCTable`, not an address: objects move, the
/// handle doesn't. Zero is the null handle.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RawExternalRCRef(usize);

const_assert_eq!(std::mem::size_of::<RawExternalRCRef>(), std::mem::size_of::<*mut libc::c_void>());

impl RawExternalRCRef {
    pub const NULL: RawExternalRCRef = RawExternalRCRef(0);

    fn new(index: u32, generation: u32) -> Self {
        debug_assert_ne!(generation, 0);
        debug_assert!((index as usize) <= INDEX_MASK);
        Self(((generation as usize) << INDEX_BITS) | index as usize)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_raw(self) -> usize {
        self.0
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    fn index(self) -> usize {
        self.0 & INDEX_MASK
    }

    fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }
}

impl Debug for RawExternalRCRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return f.write_str("RawExternalRCRef(null)");
        }
        write!(f, "RawExternalRCRef({}#{})", self.index(), self.generation())
    }
}

struct Entry {
    /// `ObjRef` bits. 0 once a weak entry's object died.
    obj: AtomicU64,
    /// Strong count. 0 makes the entry weak.
    rc: AtomicU32,
}

impl Entry {
    fn object(&self) -> Option<ObjRef> {
        ObjRef::from_bits(self.obj.load(Ordering::Acquire))
    }

    /// Decrements the count, stopping at zero. Returns the previous count.
    fn decrement(&self) -> u32 {
        match self
            .rc
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rc| Some(rc.saturating_sub(1)))
        {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn get(&self, handle: RawExternalRCRef) -> Option<&Entry> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn insert(&mut self, obj: ObjRef) -> RawExternalRCRef {
        let entry = Entry {
            obj: AtomicU64::new(obj.to_bits().get()),
            rc: AtomicU32::new(1),
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return RawExternalRCRef::new(index, slot.generation);
        }

        let index = self.slots.len();
        if index > INDEX_MASK {
            crate::fatal!("external reference table is full ({index} entries)");
        }
        self.slots.push(Slot {
            generation: 1,
            entry: Some(entry),
        });
        RawExternalRCRef::new(index as u32, 1)
    }

    fn remove(&mut self, handle: RawExternalRCRef) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if slot.generation != handle.generation() || slot.entry.take().is_none() {
            return false;
        }
        // stale handles to this slot won't match anymore
        slot.generation = match slot.generation.wrapping_add(1) & GENERATION_MASK {
            0 => 1,
            generation => generation,
        };
        self.free.push(handle.index() as u32);
        self.live -= 1;
        true
    }
}

/// The table's storage, shared with the heap as a root scanner.
#[derive(Default)]
struct SharedSlots(RwLock<Slots>);

impl RootScanner for SharedSlots {
    fn scan_roots(&self, visitor: &mut dyn FnMut(ObjRef)) {
        let slots = self.0.read();
        for entry in slots.slots.iter().filter_map(|slot| slot.entry.as_ref()) {
            if entry.rc.load(Ordering::Acquire) > 0 {
                if let Some(obj) = entry.object() {
                    visitor(obj);
                }
            }
        }
    }

    fn forward_roots(&self, forwarding: &Forwarding) {
        let slots = self.0.read();
        for entry in slots.slots.iter().filter_map(|slot| slot.entry.as_ref()) {
            if let Some(obj) = entry.object() {
                // dead weak entries get cleared
                let forwarded = forwarding.get(obj);
                entry.obj.store(opt_to_bits(forwarded), Ordering::Release);
            }
        }
    }
}

/// Maps external handles to managed objects, with a reference count per handle.
///
/// While its count is positive, a handle keeps its object alive. At zero, the handle becomes weak:
/// it still resolves for as long as the object lives, and `try_retain` can make it strong again.
/// Entries go away on `release_and_dispose` (when the count drops to zero) or `dispose`.
///
/// Counting operations can be called from native threads. The ones that touch managed objects
/// require the calling thread to be runnable.
pub struct ExternalRCTable {
    heap: Arc<Heap>,
    slots: Arc<SharedSlots>,
}

impl ExternalRCTable {
    pub fn new(heap: Arc<Heap>) -> Self {
        let slots = Arc::new(SharedSlots::default());
        heap.register_root_scanner(slots.clone());
        Self { heap, slots }
    }

    /// Reports a handle that doesn't match any entry. That's a caller bug: disposed already, or
    /// never created by this table.
    fn unknown_handle(&self, handle: RawExternalRCRef, operation: &str) {
        debug_assert!(false, "{operation} on unknown handle {handle:?}");
        warn!("{operation} on unknown handle {handle:?}, ignored");
    }

    /// Creates a handle on `obj`, with a count of 1. A null object gets the null handle.
    pub fn create_retained(&self, obj: Option<ObjRef>) -> RawExternalRCRef {
        let Some(obj) = obj else {
            return RawExternalRCRef::NULL;
        };
        self.heap.assert_thread_state(ThreadState::Runnable);
        debug_assert!(self.heap.is_current(obj), "stale reference {obj:?}");

        let handle = self.slots.0.write().insert(obj);
        trace!("created {handle:?} for {obj:?}");
        handle
    }

    /// Decrements the count, and removes the entry when it gets to zero. Disposing the null handle
    /// does nothing.
    pub fn release_and_dispose(&self, handle: RawExternalRCRef) {
        if handle.is_null() {
            return;
        }

        let previous = self.slots.0.read().get(handle).map(Entry::decrement);
        let Some(previous) = previous else {
            return self.unknown_handle(handle, "release_and_dispose");
        };
        debug_assert!(previous > 0, "release_and_dispose on {handle:?} with a zero count");

        if previous <= 1 {
            let mut slots = self.slots.0.write();
            // revived by `try_retain` in the meantime
            if slots.get(handle).is_some_and(|entry| entry.rc.load(Ordering::Acquire) > 0) {
                return;
            }
            slots.remove(handle);
            trace!("disposed {handle:?}");
        }
    }

    /// The object the handle refers to. `None` for the null handle, and for weak handles whose
    /// object died.
    pub fn dereference(&self, handle: RawExternalRCRef) -> Option<ObjRef> {
        if handle.is_null() {
            return None;
        }
        self.heap.assert_thread_state(ThreadState::Runnable);

        let found = self.slots.0.read().get(handle).map(Entry::object);
        found.unwrap_or_else(|| {
            self.unknown_handle(handle, "dereference");
            None
        })
    }

    /// Whether the handle's object is an instance of `type_info` (or of a subtype).
    pub fn is_instance(&self, handle: RawExternalRCRef, type_info: &TypeInfo) -> bool {
        self.dereference(handle)
            .is_some_and(|obj| self.heap.type_info(obj).is_subtype_of(type_info))
    }

    /// Increments the count of a strong handle. Weak handles need `try_retain`.
    pub fn retain(&self, handle: RawExternalRCRef) {
        if handle.is_null() {
            return;
        }
        let previous = self.slots.0.read().get(handle).map(|entry| entry.rc.fetch_add(1, Ordering::AcqRel));
        match previous {
            Some(previous) => debug_assert!(previous > 0, "retain on weak {handle:?}"),
            None => self.unknown_handle(handle, "retain"),
        }
    }

    /// Decrements the count, without ever disposing: at zero the handle is weak.
    pub fn release(&self, handle: RawExternalRCRef) {
        if handle.is_null() {
            return;
        }
        let previous = self.slots.0.read().get(handle).map(Entry::decrement);
        match previous {
            Some(previous) => debug_assert!(previous > 0, "release on {handle:?} with a zero count"),
            None => self.unknown_handle(handle, "release"),
        }
    }

    /// Increments the count if the object is still alive. Fails on weak handles whose object died.
    pub fn try_retain(&self, handle: RawExternalRCRef) -> bool {
        if handle.is_null() {
            return false;
        }
        // no collection can clear the entry while we're runnable
        self.heap.assert_thread_state(ThreadState::Runnable);

        let retained = self.slots.0.read().get(handle).map(|entry| {
            if entry.object().is_none() {
                return false;
            }
            entry.rc.fetch_add(1, Ordering::AcqRel);
            true
        });
        retained.unwrap_or_else(|| {
            self.unknown_handle(handle, "try_retain");
            false
        })
    }

    /// Removes the entry, whatever its count.
    pub fn dispose(&self, handle: RawExternalRCRef) {
        if handle.is_null() {
            return;
        }
        if self.slots.0.write().remove(handle) {
            trace!("disposed {handle:?}");
        } else {
            self.unknown_handle(handle, "dispose");
        }
    }

    /// Takes over the handle: returns its object, and releases-and-disposes the handle.
    pub fn adopt(&self, handle: RawExternalRCRef) -> Option<ObjRef> {
        let obj = self.dereference(handle);
        self.release_and_dispose(handle);
        obj
    }

    /// Current count of a handle; `None` if the handle is unknown.
    pub fn ref_count(&self, handle: RawExternalRCRef) -> Option<u32> {
        self.slots.0.read().get(handle).map(|entry| entry.rc.load(Ordering::Acquire))
    }

    /// Number of entries, weak ones included.
    pub fn live_count(&self) -> usize {
        self.slots.0.read().live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_pack_index_and_generation() {
        let handle = RawExternalRCRef::new(12, 3);
        assert_eq!(handle.index(), 12);
        assert_eq!(handle.generation(), 3);
        assert!(!handle.is_null());
        assert_eq!(RawExternalRCRef::from_raw(handle.as_raw()), handle);
        assert!(RawExternalRCRef::default().is_null());
    }

    #[test]
    fn reused_slots_get_a_new_generation() {
        let mut slots = Slots::default();
        let obj = ObjRef::from_bits(1 << 32).unwrap();

        let first = slots.insert(obj);
        assert!(slots.remove(first));
        assert!(!slots.remove(first));

        let second = slots.insert(obj);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(slots.get(first).is_none());
        assert!(slots.get(second).is_some());
        assert_eq!(slots.live, 1);
    }
}
