//!
//! This crate contains the runtime type information shared by the managed heap and the bridge:
//! what a managed object *is*, and how its type maps onto the native side.
//!

/// Runtime type descriptors.
pub mod type_info;
/// The process-wide table of registered types.
pub mod registry;
/// The core types every runtime knows about (`Any`, boxes, `String`, `Throwable`...).
pub mod core_classes;
/// Static tables describing how managed types are exported to Objective-C.
pub mod objc_adapter;

pub use core_classes::{core_types, CoreTypes};
pub use registry::TypeRegistry;
pub use type_info::{TypeId, TypeInfo, TypeInfoBuilder, TypeKind};
