//! The C ABI of native wrappers. A wrapper crosses as a pointer from `Arc::into_raw`, which owns
//! one strong count.

#![allow(non_snake_case)]

use std::sync::Arc;

use libc::c_char;
use xref_core::objc_adapter::NativeClass;

use crate::cexport::KRef;
use crate::error::BridgeError;
use crate::external_rc::RawExternalRCRef;
use crate::fatal;
use crate::runtime::Runtime;
use crate::strings;
use crate::wrapper_cache::{ForeignWrapper, WrapperOptions};

fn into_raw(wrapper: Arc<ForeignWrapper>) -> *const ForeignWrapper {
    Arc::into_raw(wrapper)
}

/// Null for a null handle. Any other error is fatal, an incompatible wrapper class included.
fn into_raw_or_null(wrapper: Result<Arc<ForeignWrapper>, BridgeError>) -> *const ForeignWrapper {
    match wrapper {
        Ok(wrapper) => into_raw(wrapper),
        Err(BridgeError::NullReference) => std::ptr::null(),
        Err(err) => fatal!("{err}"),
    }
}

/// # Safety
/// `class` must be null or come from `Kotlin_ObjCExport_lookupClass`.
unsafe fn to_class(class: *const NativeClass) -> &'static NativeClass {
    match class.as_ref() {
        Some(class) => class,
        None => fatal!("null native class"),
    }
}

/// The native class named `name`, or null.
///
/// # Safety
/// `name` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_ObjCExport_lookupClass(name: *const c_char) -> *const NativeClass {
    strings::from_c_string(name)
        .and_then(|name| NativeClass::lookup(&name))
        .map_or(std::ptr::null(), |class| class as *const NativeClass)
}

/// A new wrapper on a new handle for `obj`. Null gives null. Must be called while runnable.
#[no_mangle]
pub extern "C" fn Kotlin_ObjCExport_createRetainedWrapper(obj: KRef) -> *const ForeignWrapper {
    let Some(obj) = xref_gc::ObjRef::from_bits(obj) else {
        return std::ptr::null();
    };
    let runtime = Runtime::global();
    let call = runtime.enter_bridge();
    into_raw(runtime.create_retained_wrapper(&call, obj))
}

/// Consumes `handle`. Null for a null handle; fatal if the object can't have a wrapper of `expected`.
///
/// # Safety
/// `expected` must come from `Kotlin_ObjCExport_lookupClass`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_ObjCExport_createClassWrapperForExternalRCRef(
    handle: RawExternalRCRef,
    expected: *const NativeClass,
) -> *const ForeignWrapper {
    let expected = to_class(expected);
    into_raw_or_null(Runtime::global().create_class_wrapper_for_external_rc_ref(handle, expected))
}

/// Consumes `handle`.
#[no_mangle]
pub extern "C" fn Kotlin_ObjCExport_createProtocolWrapperForExternalRCRef(
    handle: RawExternalRCRef,
) -> *const ForeignWrapper {
    into_raw_or_null(Runtime::global().create_protocol_wrapper_for_external_rc_ref(handle))
}

/// Consumes `handle`. `options` is a `WrapperOptions` value.
///
/// # Safety
/// `class` must come from `Kotlin_ObjCExport_lookupClass`.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_ObjCExport_initWithExternalRCRefUnsafe(
    class: *const NativeClass,
    handle: RawExternalRCRef,
    options: u32,
) -> *const ForeignWrapper {
    let class = to_class(class);
    let options = match WrapperOptions::try_from(options) {
        Ok(options) => options,
        Err(raw) => fatal!("unknown wrapper options {raw}"),
    };
    into_raw_or_null(Runtime::global().init_with_external_rc_ref_unsafe(class, handle, options))
}

/// The handle a wrapper owns. It stays owned by the wrapper.
///
/// # Safety
/// `wrapper` must be a live wrapper pointer.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_ObjCExport_externalRCRef(wrapper: *const ForeignWrapper) -> RawExternalRCRef {
    match wrapper.as_ref() {
        Some(wrapper) => wrapper.external_rc_ref(),
        None => RawExternalRCRef::NULL,
    }
}

/// # Safety
/// `wrapper` must be a live wrapper pointer.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_ObjCExport_retainWrapper(wrapper: *const ForeignWrapper) {
    if !wrapper.is_null() {
        Arc::increment_strong_count(wrapper);
    }
}

/// Gives up one strong count. The last one releases-and-disposes the wrapper's handle.
///
/// # Safety
/// `wrapper` must be a live wrapper pointer, and its count must not be used again.
#[no_mangle]
pub unsafe extern "C" fn Kotlin_ObjCExport_releaseWrapper(wrapper: *const ForeignWrapper) {
    if !wrapper.is_null() {
        Arc::decrement_strong_count(wrapper);
    }
}
