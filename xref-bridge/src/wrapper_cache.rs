use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, trace};
use parking_lot::Mutex;
use xref_core::objc_adapter::{native_class_for, NativeClass};
use xref_gc::ObjRef;

use crate::error::BridgeError;
use crate::external_rc::RawExternalRCRef;
use crate::runtime::Runtime;
use crate::thread_state::BridgeCall;

/// How `init_with_external_rc_ref_unsafe` binds a handle.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WrapperOptions {
    /// Reuse the object's canonical wrapper when it fits, otherwise make the new one canonical.
    AsBestFittingWrapper = 0,
    /// Always bind a new wrapper of exactly the requested class.
    AsBoundBridge = 1,
    /// Bind a wrapper whose only contract is exposing the handle.
    AsExistentialWrapper = 2,
}

impl TryFrom<u32> for WrapperOptions {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WrapperOptions::AsBestFittingWrapper),
            1 => Ok(WrapperOptions::AsBoundBridge),
            2 => Ok(WrapperOptions::AsExistentialWrapper),
            _ => Err(value),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WrapperId(NonZeroUsize);

impl WrapperId {
    pub fn get(self) -> usize {
        self.0.get()
    }
}

/// A native object bridging one managed object, through the one handle it owns.
///
/// Dropping the last `Arc` releases-and-disposes the handle.
pub struct ForeignWrapper {
    id: WrapperId,
    class: &'static NativeClass,
    options: WrapperOptions,
    external_rc_ref: RawExternalRCRef,
    /// The wrapper set of the object, if this wrapper is canonical for its class.
    set: Option<usize>,
    runtime: Arc<Runtime>,
}

impl ForeignWrapper {
    pub fn id(&self) -> WrapperId {
        self.id
    }

    pub fn class(&self) -> &'static NativeClass {
        self.class
    }

    pub fn options(&self) -> WrapperOptions {
        self.options
    }

    pub fn external_rc_ref(&self) -> RawExternalRCRef {
        self.external_rc_ref
    }

    pub fn is_canonical(&self) -> bool {
        self.set.is_some()
    }
}

impl Debug for ForeignWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignWrapper")
            .field("id", &self.id)
            .field("class", &self.class.name())
            .field("options", &self.options)
            .field("external_rc_ref", &self.external_rc_ref)
            .field("set", &self.set)
            .finish()
    }
}

impl Drop for ForeignWrapper {
    fn drop(&mut self) {
        self.runtime.wrappers.unregister(self.id, self.set);
        trace!("wrapper {:?} released, disposing {:?}", self.id, self.external_rc_ref);
        self.runtime.external_refs().release_and_dispose(self.external_rc_ref);
    }
}

#[derive(Default)]
struct Registry {
    wrappers: HashMap<WrapperId, Weak<ForeignWrapper>>,
    /// The canonical wrappers of each object, oldest first, at most one live wrapper per class.
    /// Objects refer to their set by id through their associated-object slot.
    sets: HashMap<usize, Vec<Weak<ForeignWrapper>>>,
}

impl Registry {
    /// The live members of `set`, or `None` if there's no such set.
    fn live_members(&self, set: usize) -> Option<Vec<Arc<ForeignWrapper>>> {
        self.sets
            .get(&set)
            .map(|members| members.iter().filter_map(Weak::upgrade).collect())
    }
}

/// The live wrappers, by id, and the wrapper sets of objects.
///
/// Set ids are never reused, so a stale id in a slot never resolves. A set goes away with its last
/// live member. Wrappers never get dropped with the lock held: their `Drop` takes it.
pub(crate) struct WrapperCache {
    registry: Mutex<Registry>,
    next_id: AtomicUsize,
    next_set: AtomicUsize,
    created: AtomicUsize,
    hits: AtomicUsize,
}

impl Default for WrapperCache {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicUsize::new(1),
            next_set: AtomicUsize::new(1),
            created: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }
}

impl WrapperCache {
    fn next_id(&self) -> WrapperId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match NonZeroUsize::new(id) {
            Some(id) => WrapperId(id),
            None => crate::fatal!("ran out of wrapper ids"),
        }
    }

    /// A new empty set, for an object that has none.
    fn new_set(&self) -> usize {
        let set = self.next_set.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().sets.insert(set, vec![]);
        set
    }

    /// Drops a set that didn't make it into its object's slot.
    fn discard_set(&self, set: usize) {
        let mut registry = self.registry.lock();
        if registry.sets.get(&set).is_some_and(Vec::is_empty) {
            registry.sets.remove(&set);
        }
    }

    fn unregister(&self, id: WrapperId, set: Option<usize>) {
        let mut registry = self.registry.lock();
        registry.wrappers.remove(&id);
        let Some(set) = set else {
            return;
        };
        if let Some(members) = registry.sets.get_mut(&set) {
            members.retain(|member| member.strong_count() > 0);
            if members.is_empty() {
                registry.sets.remove(&set);
            }
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.registry.lock().wrappers.len()
    }

    pub(crate) fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn hit_count(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

/// What a lookup ended with.
enum Binding {
    /// An existing wrapper: the handle passed in isn't needed.
    Existing(Arc<ForeignWrapper>),
    /// A new wrapper owning the handle passed in.
    Created(Arc<ForeignWrapper>),
}

/// The class wrappers of an object get when nobody asks for a particular one.
fn best_fitting_class(call: &BridgeCall, obj: ObjRef) -> &'static NativeClass {
    native_class_for(call.heap().type_info(obj))
}

fn incompatible(class: &NativeClass, expected: &NativeClass) -> BridgeError {
    BridgeError::IncompatibleWrapperClass {
        class: class.name().to_string(),
        expected: expected.name().to_string(),
    }
}

impl Runtime {
    /// Creates a registered wrapper owning `handle`, a member of `set` if any.
    fn new_wrapper(
        self: &Arc<Self>,
        registry: &mut Registry,
        class: &'static NativeClass,
        handle: RawExternalRCRef,
        options: WrapperOptions,
        set: Option<usize>,
    ) -> Arc<ForeignWrapper> {
        let wrapper = Arc::new(ForeignWrapper {
            id: self.wrappers.next_id(),
            class,
            options,
            external_rc_ref: handle,
            set,
            runtime: Arc::clone(self),
        });
        registry.wrappers.insert(wrapper.id, Arc::downgrade(&wrapper));
        if let Some(set) = set {
            registry.sets.entry(set).or_default().push(Arc::downgrade(&wrapper));
        }
        self.wrappers.created.fetch_add(1, Ordering::Relaxed);
        trace!("new {wrapper:?}");
        wrapper
    }

    /// Runs `f` under the cache lock, with the set of `obj` and its live members, oldest first.
    ///
    /// `f` gets `None` while `obj` has no set, and returns `None` if it needs one. A new set is then
    /// installed in the object's slot, and `f` runs again. Racing threads install at most one set:
    /// only one CAS on the slot wins, and losers discard theirs before retrying.
    fn with_wrapper_set<R>(
        self: &Arc<Self>,
        call: &BridgeCall,
        obj: ObjRef,
        mut f: impl FnMut(&mut Registry, Option<usize>, &[Arc<ForeignWrapper>]) -> Option<R>,
    ) -> R {
        let heap = call.heap();
        loop {
            let current = heap.get_associated_object(obj);
            let (result, members) = {
                let mut registry = self.wrappers.registry.lock();
                match registry.live_members(current) {
                    Some(members) => (f(&mut registry, Some(current), &members), members),
                    None => (f(&mut registry, None, &[]), vec![]),
                }
            };
            drop(members);
            if let Some(result) = result {
                return result;
            }

            let set = self.wrappers.new_set();
            let found = heap.compare_and_swap_associated_object(obj, current, set);
            if found == current {
                debug!("{:?} has wrapper set {set}", heap.object_id(obj));
            } else {
                trace!("lost the race for {:?}, retrying", heap.object_id(obj));
                self.wrappers.discard_set(set);
            }
        }
    }

    /// The first member of the object's set that `accepts` the request, or a new member of `class`
    /// owning `handle`.
    fn canonical_or_bind(
        self: &Arc<Self>,
        call: &BridgeCall,
        obj: ObjRef,
        handle: RawExternalRCRef,
        class: &'static NativeClass,
        options: WrapperOptions,
        accepts: impl Fn(&ForeignWrapper) -> bool,
    ) -> Arc<ForeignWrapper> {
        let binding = self.with_wrapper_set(call, obj, |registry, set, members| {
            if let Some(existing) = members.iter().find(|member| accepts(member)) {
                return Some(Binding::Existing(Arc::clone(existing)));
            }
            set.map(|set| Binding::Created(self.new_wrapper(registry, class, handle, options, Some(set))))
        });
        self.finish_binding(binding, handle)
    }

    /// Releases `handle` if an existing wrapper was picked instead.
    fn finish_binding(&self, binding: Binding, handle: RawExternalRCRef) -> Arc<ForeignWrapper> {
        match binding {
            Binding::Existing(existing) => {
                self.wrappers.hits.fetch_add(1, Ordering::Relaxed);
                self.external_refs().release_and_dispose(handle);
                existing
            }
            Binding::Created(wrapper) => wrapper,
        }
    }

    /// A new wrapper on a new handle for `obj`. It also becomes canonical if `obj` has no live
    /// canonical wrapper of the same class.
    pub fn create_retained_wrapper(self: &Arc<Self>, call: &BridgeCall, obj: ObjRef) -> Arc<ForeignWrapper> {
        let class = best_fitting_class(call, obj);
        let handle = self.external_refs().create_retained(Some(obj));
        self.with_wrapper_set(call, obj, |registry, set, members| {
            let set = set?;
            let vacant = !members.iter().any(|member| std::ptr::eq(member.class, class));
            let options = WrapperOptions::AsBestFittingWrapper;
            Some(self.new_wrapper(registry, class, handle, options, vacant.then_some(set)))
        })
    }

    /// A canonical wrapper for the handle's object that is an instance of `expected`; else a new one
    /// of the object's best-fitting class. Consumes `handle`.
    ///
    /// Fails if there is no such wrapper yet, and the object's best-fitting class isn't a subclass of
    /// `expected`.
    pub fn create_class_wrapper_for_external_rc_ref(
        self: &Arc<Self>,
        handle: RawExternalRCRef,
        expected: &'static NativeClass,
    ) -> Result<Arc<ForeignWrapper>, BridgeError> {
        let call = self.enter_bridge();
        let obj = self.external_refs().dereference(handle).ok_or(BridgeError::NullReference)?;
        let best = best_fitting_class(&call, obj);

        let binding = self.with_wrapper_set(&call, obj, |registry, set, members| {
            if let Some(existing) = members.iter().find(|member| member.class.is_subclass_of(expected)) {
                return Some(Ok(Binding::Existing(Arc::clone(existing))));
            }
            if !best.is_subclass_of(expected) {
                return Some(Err(incompatible(best, expected)));
            }
            set.map(|set| {
                let options = WrapperOptions::AsBestFittingWrapper;
                Ok(Binding::Created(self.new_wrapper(registry, best, handle, options, Some(set))))
            })
        });

        match binding {
            Ok(binding) => Ok(self.finish_binding(binding, handle)),
            Err(err) => {
                self.external_refs().release_and_dispose(handle);
                Err(err)
            }
        }
    }

    /// The canonical wrapper for the handle's object, whatever its class; else a new existential
    /// wrapper. Consumes `handle`.
    pub fn create_protocol_wrapper_for_external_rc_ref(
        self: &Arc<Self>,
        handle: RawExternalRCRef,
    ) -> Result<Arc<ForeignWrapper>, BridgeError> {
        self.init_with_external_rc_ref_unsafe(
            NativeClass::kotlin_existential(),
            handle,
            WrapperOptions::AsExistentialWrapper,
        )
    }

    /// Binds `handle` to a wrapper, as `[[class alloc] initWithExternalRCRefUnsafe:options:]` would.
    /// Consumes `handle`.
    ///
    /// Bound bridges are always new, and never canonical: no lookup ever returns them.
    pub fn init_with_external_rc_ref_unsafe(
        self: &Arc<Self>,
        class: &'static NativeClass,
        handle: RawExternalRCRef,
        options: WrapperOptions,
    ) -> Result<Arc<ForeignWrapper>, BridgeError> {
        let call = self.enter_bridge();
        let obj = self.external_refs().dereference(handle).ok_or(BridgeError::NullReference)?;
        let best = best_fitting_class(&call, obj);

        // the most specific of the two, as long as they're related
        let specific = if best.is_subclass_of(class) {
            Some(best)
        } else if class.is_subclass_of(best) {
            Some(class)
        } else {
            None
        };

        let wrapper = match options {
            WrapperOptions::AsBoundBridge => {
                if specific.is_none() {
                    self.external_refs().release_and_dispose(handle);
                    return Err(incompatible(best, class));
                }
                self.new_wrapper(&mut self.wrappers.registry.lock(), class, handle, options, None)
            }
            WrapperOptions::AsBestFittingWrapper => {
                let Some(class) = specific else {
                    self.external_refs().release_and_dispose(handle);
                    return Err(incompatible(best, class));
                };
                self.canonical_or_bind(&call, obj, handle, class, options, |existing| {
                    existing.class.is_subclass_of(class)
                })
            }
            WrapperOptions::AsExistentialWrapper => {
                let class = if std::ptr::eq(best, NativeClass::kotlin_base()) {
                    NativeClass::kotlin_existential()
                } else {
                    best
                };
                self.canonical_or_bind(&call, obj, handle, class, options, |_| true)
            }
        };
        Ok(wrapper)
    }

    /// The oldest live canonical wrapper of `obj`.
    pub fn canonical_wrapper(&self, call: &BridgeCall, obj: ObjRef) -> Option<Arc<ForeignWrapper>> {
        let set = call.heap().get_associated_object(obj);
        let registry = self.wrappers.registry.lock();
        registry.sets.get(&set)?.iter().find_map(Weak::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_raw() {
        assert_eq!(WrapperOptions::try_from(0), Ok(WrapperOptions::AsBestFittingWrapper));
        assert_eq!(WrapperOptions::try_from(2), Ok(WrapperOptions::AsExistentialWrapper));
        assert_eq!(WrapperOptions::try_from(3), Err(3));
        assert_eq!(WrapperOptions::try_from(7), Err(7));
    }
}
