use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace};
use mmtk::util::copy::{CopySemantics, GCWorkerCopyContext};
use mmtk::util::{Address, ObjectReference};
use mmtk::vm::*;
use xref_core::TypeInfo;
use xref_value::Primitive;

use crate::gcref::{opt_to_bits, ObjRef};
use crate::XrefVM;

pub struct VMObjectModel {}

/// This is the offset from the allocation result to the object reference for the object.
/// The word in between is the header MMTk keeps its forwarding pointer in.
pub const OBJECT_REF_OFFSET: usize = 8;

// This is the offset from the object reference to the object header.
// This value is used in `ref_to_header` where MMTk loads header metadata from.
pub const OBJECT_HEADER_OFFSET: usize = 8;

pub const ALIGN: usize = 8;

/// Identity of an object. Unlike its `ObjRef`, it doesn't change when the object moves.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// What an object holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    /// A boxed primitive.
    Primitive(Primitive),
    String(String),
    /// Reference fields, as many as the type declares.
    Fields(Vec<Option<ObjRef>>),
    Throwable {
        message: Option<String>,
        cause: Option<ObjRef>,
    },
}

impl Payload {
    /// Mutable access to every reference slot (`None` slots included).
    pub(crate) fn for_each_slot_mut(&mut self, mut visitor: impl FnMut(&mut Option<ObjRef>)) {
        match self {
            Payload::Fields(fields) => fields.iter_mut().for_each(visitor),
            Payload::Throwable { cause, .. } => visitor(cause),
            _ => {}
        }
    }

    /// The references this payload holds, `None` slots included.
    pub(crate) fn slots(&self) -> Vec<Option<ObjRef>> {
        match self {
            Payload::Fields(fields) => fields.clone(),
            Payload::Throwable { cause, .. } => vec![*cause],
            _ => vec![],
        }
    }

    fn kind(&self) -> PayloadKind {
        match self {
            Payload::Empty => PayloadKind::Empty,
            Payload::Primitive(_) => PayloadKind::Primitive,
            Payload::String(_) => PayloadKind::String,
            Payload::Fields(_) => PayloadKind::Fields,
            Payload::Throwable { .. } => PayloadKind::Throwable,
        }
    }

    /// Bytes for strings and messages, slots for fields.
    fn len(&self) -> usize {
        match self {
            Payload::Empty | Payload::Primitive(_) => 0,
            Payload::String(value) => value.len(),
            Payload::Fields(fields) => fields.len(),
            Payload::Throwable { message, .. } => message.as_ref().map_or(0, String::len),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PayloadKind {
    Empty = 0,
    Primitive = 1,
    String = 2,
    Fields = 3,
    /// The cause slot, then the message bytes.
    Throwable = 4,
}

impl PayloadKind {
    fn size(self, len: usize) -> usize {
        let bytes = match self {
            PayloadKind::Empty => 0,
            PayloadKind::Primitive => size_of::<Primitive>(),
            PayloadKind::String => len,
            PayloadKind::Fields => len * size_of::<usize>(),
            PayloadKind::Throwable => size_of::<usize>() + len,
        };
        bytes.next_multiple_of(ALIGN)
    }
}

/// The start of every object, at its object reference. The payload follows it.
///
/// Reference slots hold raw object addresses, `0` for null, and are updated in place by MMTk.
#[repr(C)]
pub(crate) struct ObjectHeader {
    pub(crate) type_info: &'static TypeInfo,
    pub(crate) id: ObjectId,
    /// One word of native-side data attached to the object. `0` means nothing.
    associated_object: AtomicUsize,
    /// The index of the heap that allocated the object.
    pub(crate) heap: u32,
    len: u32,
    kind: PayloadKind,
    has_message: bool,
}

impl ObjectHeader {
    /// Bytes to allocate for an object with `payload`, the MMTk header word included.
    pub(crate) fn allocation_size(payload: &Payload) -> usize {
        OBJECT_REF_OFFSET + size_of::<ObjectHeader>() + payload.kind().size(payload.len())
    }

    /// # Safety
    /// `object` must be a live object, and stay one for `'a`: the thread is runnable and holds a
    /// reference of the current epoch, or the world is stopped.
    pub(crate) unsafe fn of<'a>(object: ObjectReference) -> &'a ObjectHeader {
        &*object.to_raw_address().to_ptr::<ObjectHeader>()
    }

    /// Writes an object.
    ///
    /// # Safety
    /// `object` must be the reference of a fresh allocation of `allocation_size(payload)` bytes.
    pub(crate) unsafe fn init(
        object: ObjectReference,
        type_info: &'static TypeInfo,
        id: ObjectId,
        heap: u32,
        payload: &Payload,
    ) {
        let len = u32::try_from(payload.len())
            .unwrap_or_else(|_| panic!("payload of {} items is too large for `{}`", payload.len(), type_info.name()));
        let header = object.to_raw_address().to_mut_ptr::<ObjectHeader>();
        header.write(ObjectHeader {
            type_info,
            id,
            associated_object: AtomicUsize::new(0),
            heap,
            len,
            kind: payload.kind(),
            has_message: matches!(payload, Payload::Throwable { message: Some(_), .. }),
        });

        let body = header.add(1).cast::<u8>();
        let slots = body.cast::<AtomicUsize>();
        match payload {
            Payload::Empty => {}
            Payload::Primitive(value) => body.cast::<Primitive>().write(*value),
            Payload::String(value) => std::ptr::copy_nonoverlapping(value.as_ptr(), body, value.len()),
            Payload::Fields(fields) => {
                for (index, field) in fields.iter().enumerate() {
                    slots.add(index).write(AtomicUsize::new(opt_to_bits(*field) as usize));
                }
            }
            Payload::Throwable { message, cause } => {
                slots.write(AtomicUsize::new(opt_to_bits(*cause) as usize));
                if let Some(message) = message {
                    std::ptr::copy_nonoverlapping(message.as_ptr(), slots.add(1).cast::<u8>(), message.len());
                }
            }
        }
    }

    /// Object size without the MMTk header word.
    pub(crate) fn size(&self) -> usize {
        size_of::<ObjectHeader>() + self.kind.size(self.len as usize)
    }

    fn body(&self) -> *const u8 {
        // SAFETY: the payload directly follows the header.
        unsafe { (self as *const ObjectHeader).add(1).cast::<u8>() }
    }

    /// The reference slots: every field, or a throwable's cause.
    pub(crate) fn slots(&self) -> &[AtomicUsize] {
        let count = match self.kind {
            PayloadKind::Fields => self.len as usize,
            PayloadKind::Throwable => 1,
            _ => 0,
        };
        // SAFETY: the payload of fields and throwables starts with `count` slots.
        unsafe { std::slice::from_raw_parts(self.body().cast::<AtomicUsize>(), count) }
    }

    pub(crate) fn fields(&self) -> Option<&[AtomicUsize]> {
        (self.kind == PayloadKind::Fields).then(|| self.slots())
    }

    fn bytes(&self) -> &[u8] {
        let start = match self.kind {
            PayloadKind::String => self.body(),
            // SAFETY: the message follows the cause slot.
            PayloadKind::Throwable => unsafe { self.body().add(size_of::<usize>()) },
            _ => return &[],
        };
        // SAFETY: `len` bytes were written at init.
        unsafe { std::slice::from_raw_parts(start, self.len as usize) }
    }

    pub(crate) fn primitive(&self) -> Option<Primitive> {
        // SAFETY: boxes hold one primitive.
        (self.kind == PayloadKind::Primitive).then(|| unsafe { self.body().cast::<Primitive>().read() })
    }

    pub(crate) fn string(&self) -> Option<&str> {
        match self.kind {
            PayloadKind::String => std::str::from_utf8(self.bytes()).ok(),
            _ => None,
        }
    }

    pub(crate) fn message(&self) -> Option<&str> {
        match self.kind {
            PayloadKind::Throwable if self.has_message => std::str::from_utf8(self.bytes()).ok(),
            _ => None,
        }
    }

    pub(crate) fn cause(&self) -> Option<ObjRef> {
        match self.kind {
            PayloadKind::Throwable => load_slot(&self.slots()[0]),
            _ => None,
        }
    }

    pub(crate) fn payload(&self) -> Payload {
        match self.kind {
            PayloadKind::Empty => Payload::Empty,
            PayloadKind::Primitive => self.primitive().map_or(Payload::Empty, Payload::Primitive),
            PayloadKind::String => Payload::String(self.string().unwrap_or_default().to_string()),
            PayloadKind::Fields => Payload::Fields(self.slots().iter().map(load_slot).collect()),
            PayloadKind::Throwable => Payload::Throwable {
                message: self.message().map(str::to_string),
                cause: self.cause(),
            },
        }
    }

    pub(crate) fn get_associated_object(&self) -> usize {
        self.associated_object.load(Ordering::Acquire)
    }

    pub(crate) fn set_associated_object(&self, value: usize) {
        self.associated_object.store(value, Ordering::Release)
    }

    /// Returns the value found in the slot: `expected` on success.
    pub(crate) fn compare_and_swap_associated_object(&self, expected: usize, new: usize) -> usize {
        match self
            .associated_object
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

pub(crate) fn load_slot(slot: &AtomicUsize) -> Option<ObjRef> {
    ObjRef::from_bits(slot.load(Ordering::Acquire) as u64)
}

pub(crate) fn store_slot(slot: &AtomicUsize, value: Option<ObjRef>) {
    slot.store(opt_to_bits(value) as usize, Ordering::Release)
}

// Documentation: https://docs.mmtk.io/api/mmtk/vm/object_model/trait.ObjectModel.html
impl ObjectModel<XrefVM> for VMObjectModel {
    // Global metadata

    const GLOBAL_LOG_BIT_SPEC: VMGlobalLogBitSpec = VMGlobalLogBitSpec::side_first();

    // Local metadata

    // Forwarding pointers go in the header word, the other metadata on the side.
    const LOCAL_FORWARDING_POINTER_SPEC: VMLocalForwardingPointerSpec = VMLocalForwardingPointerSpec::in_header(0);
    const LOCAL_FORWARDING_BITS_SPEC: VMLocalForwardingBitsSpec = VMLocalForwardingBitsSpec::side_first();
    const LOCAL_MARK_BIT_SPEC: VMLocalMarkBitSpec = VMLocalMarkBitSpec::side_after(Self::LOCAL_FORWARDING_BITS_SPEC.as_spec());
    const LOCAL_LOS_MARK_NURSERY_SPEC: VMLocalLOSMarkNurserySpec =
        VMLocalLOSMarkNurserySpec::side_after(Self::LOCAL_MARK_BIT_SPEC.as_spec());

    const OBJECT_REF_OFFSET_LOWER_BOUND: isize = OBJECT_REF_OFFSET as isize;

    fn copy(from: ObjectReference, semantics: CopySemantics, copy_context: &mut GCWorkerCopyContext<XrefVM>) -> ObjectReference {
        let bytes = Self::get_current_size(from);
        let from_start = Self::ref_to_object_start(from);

        let to_start = copy_context.alloc_copy(from, bytes, ALIGN, 0, semantics);
        debug_assert!(!to_start.is_zero());

        unsafe {
            std::ptr::copy_nonoverlapping::<u8>(from_start.to_ptr(), to_start.to_mut_ptr(), bytes);
        }

        let to = XrefVM::object_start_to_ref(to_start);
        copy_context.post_copy(to, bytes, semantics);

        trace!("copied object {from:?} into {to:?}");
        to
    }

    fn copy_to(from: ObjectReference, to: ObjectReference, _region: Address) -> Address {
        let bytes = Self::get_current_size(from);
        let from_start = Self::ref_to_object_start(from);
        let to_start = Self::ref_to_object_start(to);
        if from_start != to_start {
            // the two may overlap when sliding
            unsafe { std::ptr::copy::<u8>(from_start.to_ptr(), to_start.to_mut_ptr(), bytes) };
        }
        to_start.add(bytes)
    }

    fn get_current_size(object: ObjectReference) -> usize {
        OBJECT_REF_OFFSET + unsafe { ObjectHeader::of(object) }.size()
    }

    fn get_size_when_copied(object: ObjectReference) -> usize {
        Self::get_current_size(object)
    }

    fn get_align_when_copied(_object: ObjectReference) -> usize {
        ALIGN
    }

    fn get_align_offset_when_copied(_object: ObjectReference) -> usize {
        0
    }

    fn get_reference_when_copied_to(_from: ObjectReference, to: Address) -> ObjectReference {
        XrefVM::object_start_to_ref(to)
    }

    fn get_type_descriptor(_reference: ObjectReference) -> &'static [i8] {
        &[]
    }

    fn ref_to_object_start(object: ObjectReference) -> Address {
        object.to_raw_address().sub(OBJECT_REF_OFFSET)
    }

    fn ref_to_header(object: ObjectReference) -> Address {
        object.to_raw_address().sub(OBJECT_HEADER_OFFSET)
    }

    fn dump_object(object: ObjectReference) {
        let header = unsafe { ObjectHeader::of(object) };
        debug!(
            "{object:?}: {:?} of `{}`, heap {}, {:?}",
            header.id,
            header.type_info.name(),
            header.heap,
            header.payload()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcref::object_at;
    use xref_core::core_types;

    /// Lays `payload` out in a plain buffer, as an allocation would.
    fn write_object(buffer: &mut Vec<u64>, payload: &Payload) -> &'static ObjectHeader {
        buffer.resize(ObjectHeader::allocation_size(payload) / size_of::<u64>(), 0);
        let object = object_at(buffer.as_mut_ptr() as usize + OBJECT_REF_OFFSET);
        unsafe {
            ObjectHeader::init(object, core_types().runtime_exception, ObjectId(7), 0, payload);
            ObjectHeader::of(object)
        }
    }

    #[test]
    fn cas_reports_the_previous_value() {
        let mut buffer = vec![];
        let object = write_object(&mut buffer, &Payload::Empty);

        assert_eq!(object.compare_and_swap_associated_object(0, 7), 0);
        assert_eq!(object.compare_and_swap_associated_object(0, 9), 7);
        assert_eq!(object.get_associated_object(), 7);
    }

    #[test]
    fn payloads_read_back_as_written() {
        let cause = ObjRef::current(object_at(0x10_0000));
        let payloads = [
            Payload::Primitive(Primitive::Double(-0.5)),
            Payload::String("héllo".to_string()),
            Payload::Fields(vec![Some(cause), None, Some(cause)]),
            Payload::Throwable {
                message: Some("odd length".to_string()),
                cause: Some(cause),
            },
            Payload::Throwable {
                message: None,
                cause: None,
            },
        ];

        for payload in payloads {
            let mut buffer = vec![];
            let object = write_object(&mut buffer, &payload);
            assert_eq!(object.payload(), payload);
            assert_eq!(object.id, ObjectId(7));
            assert_eq!(OBJECT_REF_OFFSET + object.size(), ObjectHeader::allocation_size(&payload));
            assert_eq!(object.size() % ALIGN, 0);
        }
    }

    #[test]
    fn only_fields_and_causes_are_slots() {
        let mut buffer = vec![];
        assert_eq!(write_object(&mut buffer, &Payload::String("12345678".to_string())).slots().len(), 0);
        assert_eq!(write_object(&mut buffer, &Payload::Fields(vec![None; 3])).slots().len(), 3);
        let throwable = write_object(
            &mut buffer,
            &Payload::Throwable {
                message: Some("m".to_string()),
                cause: None,
            },
        );
        assert_eq!(throwable.slots().len(), 1);
        assert!(throwable.fields().is_none());
    }
}
