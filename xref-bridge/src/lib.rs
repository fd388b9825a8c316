//!
//! The bridge between native code and the managed heap.
//!
//! Native code never sees managed objects directly: it holds `RawExternalRCRef` handles, counted
//! and stable across collections, and `ForeignWrapper`s built on them. Managed code is entered
//! through a `BridgeCall`, which keeps the thread runnable for as long as it lives.
//!
//! The `cexport` and `objcexport` modules expose all of it as a C ABI, on the process-wide runtime.
//!

pub mod config;
/// Errors, and how the bridge aborts.
pub mod error;
/// The external reference table.
pub mod external_rc;
pub mod runtime;
/// Thread state transitions and shadow stack frames.
pub mod thread_state;
/// Managed exceptions crossing into native code.
pub mod exceptions;
/// Boxing and unboxing primitives.
pub mod boxing;
/// Native wrappers, and the canonical wrapper of each object.
pub mod wrapper_cache;
pub mod strings;
pub mod singleton;
pub mod stats;

/// The C ABI for handles, boxes, strings and bridge calls.
pub mod cexport;
/// The C ABI for native wrappers.
pub mod objcexport;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use exceptions::ExceptionPolicy;
pub use external_rc::{ExternalRCTable, RawExternalRCRef};
pub use runtime::Runtime;
pub use stats::BridgeStats;
pub use thread_state::{BridgeCall, StackFrame, ThreadStateGuard};
pub use wrapper_cache::{ForeignWrapper, WrapperId, WrapperOptions};
