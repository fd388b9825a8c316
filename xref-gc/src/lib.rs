//!
//! The managed object store: an MMTk binding.
//!
//! Objects are referred to by `ObjRef`s, which only stay valid until the next collection: anything
//! that has to survive one must be reachable from a root (a shadow stack frame, a global root, a
//! pending exception, or a registered `RootScanner`).
//!
//! There is a single MMTk instance per process, created by the first `Heap`. Every heap allocates
//! from it, and a collection stops the runnable threads of all of them.
//!

extern crate mmtk;

use std::sync::OnceLock;

use mmtk::util::{Address, ObjectReference};
use mmtk::vm::VMBinding;
use mmtk::MMTK;

/// Mutator threads: their states, their shadow stacks, their MMTk mutators.
pub mod active_plan;
pub mod api;
/// Stopping and resuming the world.
pub mod collection;
pub mod config;
/// The heap and everything mutators can do with it.
pub mod gc_interface;
/// References to managed objects.
pub mod gcref;
/// How objects are laid out.
pub mod object_model;
pub mod reference_glue;
/// Roots, and how they get fixed up after objects move.
pub mod scanning;
pub mod stats;

pub use active_plan::ThreadState;
pub use config::GcConfig;
pub use gc_interface::{Heap, HeapId};
pub use gcref::ObjRef;
pub use object_model::{ObjectId, Payload};
pub use scanning::{Forwarding, GlobalRoot, RootScanner};
pub use stats::GcStats;

pub type XrefSlot = mmtk::vm::slot::SimpleSlot;

#[derive(Default)]
pub struct XrefVM;

// Documentation: https://docs.mmtk.io/api/mmtk/vm/trait.VMBinding.html
impl VMBinding for XrefVM {
    type VMObjectModel = object_model::VMObjectModel;
    type VMScanning = scanning::VMScanning;
    type VMCollection = collection::VMCollection;
    type VMActivePlan = active_plan::VMActivePlan;
    type VMReferenceGlue = reference_glue::VMReferenceGlue;
    type VMSlot = XrefSlot;
    type VMMemorySlice = mmtk::vm::slot::UnimplementedMemorySlice;

    /// Allowed minimal alignment in bytes.
    const MIN_ALIGNMENT: usize = 1 << 3;
    /// Allowed maximum alignment in bytes.
    const MAX_ALIGNMENT: usize = 1 << 3;
}

impl XrefVM {
    pub fn object_start_to_ref(start: Address) -> ObjectReference {
        // Safety: start is the allocation result, and it should not be zero with an offset.
        unsafe { ObjectReference::from_raw_address_unchecked(start.add(object_model::OBJECT_REF_OFFSET)) }
    }
}

pub(crate) static MMTK_SINGLETON: OnceLock<Box<MMTK<XrefVM>>> = OnceLock::new();

pub(crate) fn mmtk() -> &'static MMTK<XrefVM> {
    match MMTK_SINGLETON.get() {
        Some(mmtk) => mmtk,
        None => panic!("MMTk is used before any heap was created"),
    }
}
