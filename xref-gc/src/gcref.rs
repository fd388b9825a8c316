use std::fmt::{Debug, Formatter};
use std::num::NonZeroU64;

use mmtk::util::{Address, ObjectReference};

use crate::collection;

/// Asserts that a reference was handed out since the last collection. Only checked in debug builds.
#[macro_export]
macro_rules! debug_assert_valid_ref {
    ($heap:expr, $obj:expr) => {
        #[cfg(debug_assertions)]
        assert!($heap.is_current($obj), "stale reference {:?}: it predates the last collection", $obj);
    };
}

/// A reference to a managed object.
///
/// Objects move on every collection, so a reference is only valid until the next one: the epoch
/// it carries is the collection cycle it was handed out in. References that must survive a
/// collection have to be stored somewhere the collector knows about (a frame, a global root, an
/// external reference table...), and read back afterwards.
///
/// Epochs are 64 bits wide, so they don't wrap around.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjRef {
    object: ObjectReference,
    epoch: u64,
}

impl ObjRef {
    pub(crate) fn new(object: ObjectReference, epoch: u64) -> Self {
        debug_assert_ne!(epoch, 0, "epoch 0 is never current");
        Self { object, epoch }
    }

    /// A reference to `object` for the current epoch.
    pub(crate) fn current(object: ObjectReference) -> Self {
        Self::new(object, collection::epoch())
    }

    pub(crate) fn object(self) -> ObjectReference {
        self.object
    }

    pub(crate) fn address(self) -> Address {
        self.object.to_raw_address()
    }

    pub fn epoch(self) -> u64 {
        self.epoch
    }

    pub(crate) fn is_from(self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// The object's address, for crossing the foreign boundary or storing in a slot. It's never 0.
    pub fn to_bits(self) -> NonZeroU64 {
        // object references are never null
        NonZeroU64::new(self.address().as_usize() as u64).unwrap_or_else(|| unreachable!())
    }

    /// The inverse of `to_bits`, for the current epoch. Zero is the null reference.
    pub fn from_bits(bits: u64) -> Option<Self> {
        // SAFETY: only turned into a reference if non-null; dereferencing it is up to the caller.
        let address = unsafe { Address::from_usize(bits as usize) };
        ObjectReference::from_raw_address(address).map(Self::current)
    }
}

impl Debug for ObjRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjRef({:#x}@{})", self.address().as_usize(), self.epoch)
    }
}

/// Packs an optional reference; `None` is `0`.
pub fn opt_to_bits(obj: Option<ObjRef>) -> u64 {
    obj.map_or(0, |obj| obj.to_bits().get())
}

#[cfg(test)]
pub(crate) fn object_at(address: usize) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(address) }).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_the_address() {
        let obj = ObjRef::current(object_at(0x10_0000));
        assert_eq!(obj.to_bits().get(), 0x10_0000);
        assert_eq!(ObjRef::from_bits(obj.to_bits().get()), Some(obj));
        assert_eq!(ObjRef::from_bits(0), None);
        assert_eq!(opt_to_bits(None), 0);
    }

    #[test]
    fn epochs_past_u32_stay_distinct() {
        let object = object_at(0x10_0000);
        let old = ObjRef::new(object, 1);
        let much_later = ObjRef::new(object, 1 + (1 << 32));

        assert_ne!(old, much_later);
        assert!(!old.is_from(much_later.epoch()));
        assert!(much_later.is_from(u32::MAX as u64 + 2));
    }
}
