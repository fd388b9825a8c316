use std::collections::HashMap;
use std::ops::RangeInclusive;

use log::debug;
use xref_core::core_types;
use xref_gc::{GlobalRoot, Heap, ObjRef, Payload};
use xref_value::{Boxable, Primitive, PrimitiveKind};

use crate::error::BridgeError;
use crate::external_rc::RawExternalRCRef;
use crate::fatal;
use crate::runtime::Runtime;
use crate::thread_state::BridgeCall;

/// Values whose boxes are preallocated, by kind.
fn cached_range(kind: PrimitiveKind) -> Option<RangeInclusive<i64>> {
    match kind {
        PrimitiveKind::Boolean => Some(0..=1),
        PrimitiveKind::Byte => Some(i8::MIN as i64..=i8::MAX as i64),
        PrimitiveKind::Char => Some(0..=255),
        PrimitiveKind::Short | PrimitiveKind::Int | PrimitiveKind::Long => Some(-128..=127),
        _ => None,
    }
}

fn cache_key(value: Primitive) -> Option<i64> {
    match value {
        Primitive::Boolean(value) => Some(value as i64),
        _ => value.as_integral(),
    }
}

/// Permanent boxes for the most common small values, so boxing them doesn't allocate.
#[derive(Default)]
pub(crate) struct BoxCache {
    boxes: HashMap<Primitive, GlobalRoot>,
}

impl BoxCache {
    /// Allocates every cached box. The thread must be runnable.
    pub(crate) fn populate(heap: &Heap) -> Self {
        let mut boxes = HashMap::new();
        for kind in PrimitiveKind::ALL {
            let Some(range) = cached_range(kind) else {
                continue;
            };
            for value in range {
                let value = Primitive::from_bits(kind, value as u64);
                let obj = heap.alloc(core_types().box_type(kind), Payload::Primitive(value));
                boxes.insert(value, heap.add_global_root(obj));
            }
        }
        debug!("preallocated {} boxes", boxes.len());
        Self { boxes }
    }

    pub(crate) fn get(&self, heap: &Heap, value: Primitive) -> Option<ObjRef> {
        let range = cached_range(value.kind())?;
        if !range.contains(&cache_key(value)?) {
            return None;
        }
        heap.global_root(*self.boxes.get(&value)?)
    }

    pub(crate) fn len(&self) -> usize {
        self.boxes.len()
    }
}

impl Runtime {
    /// Boxes `value` into a managed object. Small values may come from the box cache.
    pub fn box_object(&self, call: &BridgeCall, value: Primitive) -> ObjRef {
        let heap = call.heap();
        if let Some(cached) = self.box_cache.get(heap, value) {
            return cached;
        }
        heap.alloc(core_types().box_type(value.kind()), Payload::Primitive(value))
    }

    /// Boxes `value`, and returns a new handle on the box.
    pub fn box_value<T: Boxable>(&self, value: T) -> RawExternalRCRef {
        let call = self.enter_bridge();
        let obj = self.box_object(&call, value.into());
        self.external_refs().create_retained(Some(obj))
    }

    /// A new handle on the `Unit` singleton.
    pub fn box_unit(&self) -> RawExternalRCRef {
        let call = self.enter_bridge();
        let unit = self.unit(&call);
        self.external_refs().create_retained(Some(unit))
    }

    /// Reads the primitive out of a boxed object.
    pub fn unbox_object<T: Boxable>(&self, call: &BridgeCall, obj: ObjRef) -> Result<T, BridgeError> {
        let heap = call.heap();
        let mismatch = || BridgeError::TypeMismatch {
            expected: T::KIND,
            found: heap.type_info(obj).name().to_string(),
        };

        let value = heap.primitive(obj).ok_or_else(mismatch)?;
        T::try_from(value).map_err(|_| mismatch())
    }

    /// Reads the primitive out of the box a handle refers to. The handle stays valid.
    pub fn unbox<T: Boxable>(&self, handle: RawExternalRCRef) -> Result<T, BridgeError> {
        let call = self.enter_bridge();
        let obj = self
            .external_refs()
            .dereference(handle)
            .ok_or(BridgeError::NullReference)?;
        self.unbox_object(&call, obj)
    }

    /// `unbox`, for callers that have no way to report an error.
    pub fn unbox_or_abort<T: Boxable>(&self, handle: RawExternalRCRef) -> T {
        match self.unbox(handle) {
            Ok(value) => value,
            Err(err) => fatal!("could not unbox {handle:?}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xref_value::KChar;

    #[test]
    fn cached_values() {
        let in_cache = |value: Primitive| {
            cached_range(value.kind()).is_some_and(|range| cache_key(value).is_some_and(|key| range.contains(&key)))
        };

        assert!(in_cache(Primitive::Boolean(true)));
        assert!(in_cache(Primitive::Byte(i8::MIN)));
        assert!(in_cache(Primitive::Char(KChar(b'a' as u16))));
        assert!(in_cache(Primitive::Int(-128)));
        assert!(in_cache(Primitive::Long(127)));
        assert!(!in_cache(Primitive::Int(128)));
        assert!(!in_cache(Primitive::Char(KChar(0x3b1))));
        assert!(!in_cache(Primitive::UByte(0)));
        assert!(!in_cache(Primitive::Double(0.0)));
    }
}
