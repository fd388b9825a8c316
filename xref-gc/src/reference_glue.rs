use mmtk::util::opaque_pointer::VMWorkerThread;
use mmtk::util::ObjectReference;
use mmtk::vm::ReferenceGlue;

use crate::XrefVM;

/// There are no reference objects: weak handles live in root scanners, and get cleared in
/// `Scanning::process_weak_refs`.
pub struct VMReferenceGlue {}

// Documentation: https://docs.mmtk.io/api/mmtk/vm/reference_glue/trait.ReferenceGlue.html
impl ReferenceGlue<XrefVM> for VMReferenceGlue {
    type FinalizableType = ObjectReference;

    fn set_referent(_reference: ObjectReference, _referent: ObjectReference) {
        unreachable!("no reference objects")
    }
    fn get_referent(_object: ObjectReference) -> Option<ObjectReference> {
        None
    }
    fn clear_referent(_object: ObjectReference) {
        unreachable!("no reference objects")
    }
    fn enqueue_references(_references: &[ObjectReference], _tls: VMWorkerThread) {}
}
