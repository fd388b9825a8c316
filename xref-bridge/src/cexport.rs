//! The C ABI generated interop glue links against. Everything goes through `Runtime::global()`.
//!
//! Managed references cross as `KRef`s, only valid while the calling thread is runnable and no
//! collection happens: anything that has to outlive that is held as a `RawExternalRCRef`.

#![allow(non_snake_case)]

use std::cell::RefCell;

use libc::c_char;
use log::warn;
use xref_core::{TypeInfo, TypeRegistry};
use xref_gc::gcref::opt_to_bits;
use xref_gc::{ObjRef, ThreadState};
use xref_value::KChar;

use crate::exceptions::ExceptionPolicy;
use crate::external_rc::RawExternalRCRef;
use crate::fatal;
use crate::runtime::Runtime;
use crate::strings;

/// A managed reference on the C side: `ObjRef` bits, 0 for null.
pub type KRef = u64;

fn runtime() -> &'static Runtime {
    Runtime::global()
}

fn to_obj(obj: KRef) -> Option<ObjRef> {
    ObjRef::from_bits(obj)
}

fn from_obj(obj: Option<ObjRef>) -> KRef {
    opt_to_bits(obj)
}

/// # Safety
/// `type_info` must be null or come from `Kotlin_CExport_lookupTypeInfo`.
unsafe fn to_type_info(type_info: *const TypeInfo) -> &'static TypeInfo {
    match type_info.as_ref() {
        Some(type_info) => type_info,
        None => fatal!("null TypeInfo"),
    }
}

// ----- types -----

/// The registered type named `name`, or null.
///
/// # Safety
/// `name` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_lookupTypeInfo(name: *const c_char) -> *const TypeInfo {
    strings::from_c_string(name)
        .and_then(|name| TypeRegistry::global().get(&name))
        .map_or(std::ptr::null(), |type_info| type_info as *const TypeInfo)
}

// ----- stable pointers -----

#[no_mangle]
pub extern "C" fn Kotlin_CExport_createStablePointer(obj: KRef) -> RawExternalRCRef {
    runtime().external_refs().create_retained(to_obj(obj))
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_disposeStablePointer(handle: RawExternalRCRef) {
    runtime().external_refs().release_and_dispose(handle)
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_derefStablePointer(handle: RawExternalRCRef) -> KRef {
    from_obj(runtime().external_refs().dereference(handle))
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_adoptStablePointer(handle: RawExternalRCRef) -> KRef {
    from_obj(runtime().external_refs().adopt(handle))
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_retainStablePointer(handle: RawExternalRCRef) {
    runtime().external_refs().retain(handle)
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_releaseStablePointer(handle: RawExternalRCRef) {
    runtime().external_refs().release(handle)
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_tryRetainStablePointer(handle: RawExternalRCRef) -> bool {
    runtime().external_refs().try_retain(handle)
}

/// # Safety
/// `type_info` must come from `Kotlin_CExport_lookupTypeInfo`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_isInstance(handle: RawExternalRCRef, type_info: *const TypeInfo) -> bool {
    let type_info = to_type_info(type_info);
    let _call = runtime().enter_bridge();
    runtime().external_refs().is_instance(handle, type_info)
}

/// # Safety
/// `type_info` must come from `Kotlin_CExport_lookupTypeInfo`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_allocInstance(type_info: *const TypeInfo) -> KRef {
    let type_info = to_type_info(type_info);
    let call = runtime().enter_bridge();
    from_obj(Some(runtime().alloc_instance(&call, type_info)))
}

// ----- boxes -----

macro_rules! box_functions {
    ($($box_fn:ident, $unbox_fn:ident: $native:ty => $value:ty, $to_value:expr, $to_native:expr;)*) => {
        $(
            #[no_mangle]
            pub extern "C" fn $box_fn(value: $native) -> RawExternalRCRef {
                runtime().box_value::<$value>($to_value(value))
            }

            #[no_mangle]
            pub extern "C" fn $unbox_fn(handle: RawExternalRCRef) -> $native {
                $to_native(runtime().unbox_or_abort::<$value>(handle))
            }
        )*
    };
}

fn same<T>(value: T) -> T {
    value
}

box_functions! {
    Kotlin_CExport_boxBoolean, Kotlin_CExport_unboxBoolean: bool => bool, same, same;
    Kotlin_CExport_boxChar, Kotlin_CExport_unboxChar: u16 => KChar, KChar, u16::from;
    Kotlin_CExport_boxByte, Kotlin_CExport_unboxByte: i8 => i8, same, same;
    Kotlin_CExport_boxShort, Kotlin_CExport_unboxShort: i16 => i16, same, same;
    Kotlin_CExport_boxInt, Kotlin_CExport_unboxInt: i32 => i32, same, same;
    Kotlin_CExport_boxLong, Kotlin_CExport_unboxLong: i64 => i64, same, same;
    Kotlin_CExport_boxUByte, Kotlin_CExport_unboxUByte: u8 => u8, same, same;
    Kotlin_CExport_boxUShort, Kotlin_CExport_unboxUShort: u16 => u16, same, same;
    Kotlin_CExport_boxUInt, Kotlin_CExport_unboxUInt: u32 => u32, same, same;
    Kotlin_CExport_boxULong, Kotlin_CExport_unboxULong: u64 => u64, same, same;
    Kotlin_CExport_boxFloat, Kotlin_CExport_unboxFloat: f32 => f32, same, same;
    Kotlin_CExport_boxDouble, Kotlin_CExport_unboxDouble: f64 => f64, same, same;
}

#[no_mangle]
pub extern "C" fn Kotlin_CExport_boxUnit() -> RawExternalRCRef {
    runtime().box_unit()
}

// ----- singletons and strings -----

/// A new handle on the singleton `factory` creates. The factory runs while runnable.
#[no_mangle]
pub extern "C" fn Kotlin_CExport_createSingleton(factory: extern "C" fn() -> KRef) -> RawExternalRCRef {
    runtime().singleton_with(factory as usize, |_call| to_obj(factory()))
}

/// Must be called while runnable. Null gives null.
///
/// # Safety
/// `cstr` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_createKotlinStringFromCString(cstr: *const c_char) -> KRef {
    let Some(value) = strings::from_c_string(cstr) else {
        return 0;
    };
    let call = runtime().enter_bridge();
    from_obj(Some(runtime().create_string(&call, &value)))
}

/// The string, allocated with `malloc`; release it with `Kotlin_CExport_disposeCString`. Null for
/// null, or for anything that isn't a string.
#[no_mangle]
pub extern "C" fn Kotlin_CExport_createCStringFromKotlinString(obj: KRef) -> *mut c_char {
    let Some(obj) = to_obj(obj) else {
        return std::ptr::null_mut();
    };
    let call = runtime().enter_bridge();
    match runtime().string_value(&call, obj) {
        Some(value) => strings::to_c_string(&value),
        None => {
            warn!("createCStringFromKotlinString on an instance of `{}`", call.heap().type_info(obj).name());
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `cstr` must be null or come from `Kotlin_CExport_createCStringFromKotlinString`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_disposeCString(cstr: *mut c_char) {
    strings::dispose_c_string(cstr)
}

// ----- bridge calls -----

/// The bookkeeping of one C-side bridge call.
#[repr(C)]
#[derive(Debug)]
pub struct FrameOverlay {
    previous_state: ThreadState,
    /// Shadow stack frames pushed through this overlay and not popped yet.
    frames: usize,
}

thread_local! {
    /// Bridge calls in progress on this thread, innermost last. Boxed so that pointers stay put.
    static OVERLAYS: RefCell<Vec<Box<FrameOverlay>>> = const { RefCell::new(Vec::new()) };
}

/// Makes the thread runnable (initializing the runtime on first use). Must be paired with
/// `Kotlin_CExport_exitBridge`.
#[no_mangle]
pub extern "C" fn Kotlin_CExport_enterBridge() -> *mut FrameOverlay {
    let previous_state = runtime().heap().switch_thread_state(ThreadState::Runnable);
    let mut overlay = Box::new(FrameOverlay {
        previous_state,
        frames: 0,
    });
    let ptr = &mut *overlay as *mut FrameOverlay;
    OVERLAYS.with(|overlays| overlays.borrow_mut().push(overlay));
    ptr
}

/// Ends the innermost bridge call: pops what it left on the shadow stack, and restores the thread
/// state it started from.
#[no_mangle]
pub extern "C" fn Kotlin_CExport_exitBridge() {
    let Some(overlay) = OVERLAYS.with(|overlays| overlays.borrow_mut().pop()) else {
        fatal!("exitBridge without a matching enterBridge");
    };
    let heap = runtime().heap();
    if overlay.frames > 0 {
        warn!("exitBridge with {} stack frames still pushed", overlay.frames);
        (0..overlay.frames).for_each(|_| heap.pop_frame());
    }
    heap.switch_thread_state(overlay.previous_state);
}

/// # Safety
/// `frame` must come from `Kotlin_CExport_enterBridge`, and its call must not have exited.
unsafe fn overlay<'a>(frame: *mut FrameOverlay) -> &'a mut FrameOverlay {
    match frame.as_mut() {
        Some(overlay) => overlay,
        None => fatal!("null FrameOverlay"),
    }
}

/// # Safety
/// See `overlay`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_bridgeAddStackVariable(frame: *mut FrameOverlay) {
    let overlay = overlay(frame);
    runtime().heap().assert_thread_state(ThreadState::Runnable);
    runtime().heap().push_frame();
    overlay.frames += 1;
}

/// # Safety
/// See `overlay`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_bridgeRemoveStackVariable(frame: *mut FrameOverlay) {
    let overlay = overlay(frame);
    if overlay.frames == 0 {
        fatal!("bridgeRemoveStackVariable without a matching bridgeAddStackVariable");
    }
    runtime().heap().pop_frame();
    overlay.frames -= 1;
}

/// Stores `obj` into a slot of the innermost stack frame.
///
/// # Safety
/// See `overlay`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_bridgeStoreStackVariable(frame: *mut FrameOverlay, slot: usize, obj: KRef) {
    if overlay(frame).frames == 0 {
        fatal!("storing a stack variable without a stack frame");
    }
    runtime().heap().frame_store(slot, to_obj(obj))
}

/// # Safety
/// See `overlay`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_bridgeLoadStackVariable(frame: *mut FrameOverlay, slot: usize) -> KRef {
    if overlay(frame).frames == 0 {
        fatal!("loading a stack variable without a stack frame");
    }
    from_obj(runtime().heap().frame_load(slot))
}

/// `ExceptionPolicy` values on the C side.
pub const POLICY_CONVERT_ALL: u32 = 0;
pub const POLICY_CONVERT_ONLY: u32 = 1;
pub const POLICY_NO_THROW: u32 = 2;

/// Handles the exception a managed call left pending, if any. Convertible exceptions are written to
/// `exception_out` as a new handle, and `true` is returned; the others abort the process.
///
/// # Safety
/// See `overlay`. `convertible` must come from `Kotlin_CExport_lookupTypeInfo` when the policy is
/// `ConvertOnly`. `exception_out` must be valid for writes, or null.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_CExport_handleBridgeException(
    frame: *mut FrameOverlay,
    policy: u32,
    convertible: *const TypeInfo,
    exception_out: *mut RawExternalRCRef,
) -> bool {
    overlay(frame);
    let policy = match policy {
        POLICY_CONVERT_ALL => ExceptionPolicy::ConvertAll,
        POLICY_CONVERT_ONLY => ExceptionPolicy::ConvertOnly(to_type_info(convertible)),
        POLICY_NO_THROW => ExceptionPolicy::NoThrow,
        other => fatal!("unknown exception policy {other}"),
    };

    let call = runtime().enter_bridge();
    let Some(exception) = call.catch(policy) else {
        return false;
    };
    let handle = runtime().external_refs().create_retained(Some(exception));
    match exception_out.as_mut() {
        Some(out) => *out = handle,
        None => runtime().external_refs().release_and_dispose(handle),
    }
    true
}
