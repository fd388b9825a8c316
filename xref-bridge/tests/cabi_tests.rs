//! The C ABI, called the way generated glue does. Everything here shares the process-wide runtime.

use std::ffi::{CStr, CString};

use rstest::rstest;
use xref_bridge::cexport::*;
use xref_bridge::objcexport::*;
use xref_bridge::RawExternalRCRef;
use xref_core::TypeInfo;

fn type_info(name: &str) -> *const TypeInfo {
    let name = CString::new(name).unwrap();
    let type_info = unsafe { Kotlin_CExport_lookupTypeInfo(name.as_ptr()) };
    assert!(!type_info.is_null(), "no type named {name:?}");
    type_info
}

#[test]
fn stable_pointers() {
    let any = type_info("kotlin.Any");

    Kotlin_CExport_enterBridge();
    let obj = unsafe { Kotlin_CExport_allocInstance(any) };
    let handle = Kotlin_CExport_createStablePointer(obj);
    Kotlin_CExport_exitBridge();

    assert!(!handle.is_null());
    assert_eq!(Kotlin_CExport_createStablePointer(0), RawExternalRCRef::NULL);

    Kotlin_CExport_enterBridge();
    assert_ne!(Kotlin_CExport_derefStablePointer(handle), 0);
    assert!(unsafe { Kotlin_CExport_isInstance(handle, any) });
    assert!(!unsafe { Kotlin_CExport_isInstance(handle, type_info("kotlin.String")) });

    Kotlin_CExport_retainStablePointer(handle);
    Kotlin_CExport_releaseStablePointer(handle);
    assert!(Kotlin_CExport_tryRetainStablePointer(handle));
    Kotlin_CExport_disposeStablePointer(handle);

    assert_ne!(Kotlin_CExport_adoptStablePointer(handle), 0);
    Kotlin_CExport_exitBridge();
}

#[test]
fn boxes() {
    let handle = Kotlin_CExport_boxInt(42);
    assert_eq!(Kotlin_CExport_unboxInt(handle), 42);
    Kotlin_CExport_enterBridge();
    assert!(unsafe { Kotlin_CExport_isInstance(handle, type_info("kotlin.Number")) });
    assert!(unsafe { Kotlin_CExport_isInstance(handle, type_info("kotlin.Int")) });
    Kotlin_CExport_exitBridge();
    Kotlin_CExport_disposeStablePointer(handle);

    assert_eq!(Kotlin_CExport_unboxChar(Kotlin_CExport_boxChar(0x3b1)), 0x3b1);
    assert!(Kotlin_CExport_unboxBoolean(Kotlin_CExport_boxBoolean(true)));
    assert_eq!(Kotlin_CExport_unboxULong(Kotlin_CExport_boxULong(u64::MAX)), u64::MAX);
    assert_eq!(Kotlin_CExport_unboxDouble(Kotlin_CExport_boxDouble(-1.5)), -1.5);
    assert!(!Kotlin_CExport_boxUnit().is_null());
}

#[test]
fn strings() {
    let source = CString::new("héllo, world").unwrap();

    Kotlin_CExport_enterBridge();
    let string = unsafe { Kotlin_CExport_createKotlinStringFromCString(source.as_ptr()) };
    assert_ne!(string, 0);
    let copy = Kotlin_CExport_createCStringFromKotlinString(string);
    Kotlin_CExport_exitBridge();

    assert_eq!(unsafe { CStr::from_ptr(copy) }, source.as_c_str());
    unsafe { Kotlin_CExport_disposeCString(copy) };

    assert_eq!(unsafe { Kotlin_CExport_createKotlinStringFromCString(std::ptr::null()) }, 0);
    assert!(Kotlin_CExport_createCStringFromKotlinString(0).is_null());
    unsafe { Kotlin_CExport_disposeCString(std::ptr::null_mut()) };
}

extern "C" fn new_any() -> KRef {
    let name = CString::new("kotlin.Any").unwrap();
    unsafe { Kotlin_CExport_allocInstance(Kotlin_CExport_lookupTypeInfo(name.as_ptr())) }
}

#[test]
fn singletons() {
    let first = Kotlin_CExport_createSingleton(new_any);
    let second = Kotlin_CExport_createSingleton(new_any);
    assert_ne!(first, second);

    Kotlin_CExport_enterBridge();
    assert_eq!(Kotlin_CExport_derefStablePointer(first), Kotlin_CExport_derefStablePointer(second));
    Kotlin_CExport_exitBridge();
}

#[test]
fn stack_variables_and_exceptions() {
    let frame = Kotlin_CExport_enterBridge();
    unsafe {
        Kotlin_CExport_bridgeAddStackVariable(frame);
        let obj = Kotlin_CExport_allocInstance(type_info("kotlin.Any"));
        Kotlin_CExport_bridgeStoreStackVariable(frame, 0, obj);
        assert_ne!(Kotlin_CExport_bridgeLoadStackVariable(frame, 0), 0);
        Kotlin_CExport_bridgeRemoveStackVariable(frame);

        assert!(!Kotlin_CExport_handleBridgeException(
            frame,
            POLICY_NO_THROW,
            std::ptr::null(),
            std::ptr::null_mut()
        ));

        let runtime = xref_bridge::Runtime::global();
        runtime
            .enter_bridge()
            .throw_new(xref_core::core_types().illegal_state_exception, "from managed code");

        let mut exception = RawExternalRCRef::NULL;
        assert!(Kotlin_CExport_handleBridgeException(
            frame,
            POLICY_CONVERT_ONLY,
            type_info("kotlin.RuntimeException"),
            &mut exception
        ));
        assert!(Kotlin_CExport_isInstance(exception, type_info("kotlin.Throwable")));
        Kotlin_CExport_disposeStablePointer(exception);
    }
    Kotlin_CExport_exitBridge();
}

fn lookup_class(name: &str) -> *const xref_core::objc_adapter::NativeClass {
    let name = CString::new(name).unwrap();
    unsafe { Kotlin_ObjCExport_lookupClass(name.as_ptr()) }
}

/// A new handle on a new `kotlin.Any`.
fn new_any_handle() -> RawExternalRCRef {
    Kotlin_CExport_enterBridge();
    let obj = unsafe { Kotlin_CExport_allocInstance(type_info("kotlin.Any")) };
    let handle = Kotlin_CExport_createStablePointer(obj);
    Kotlin_CExport_exitBridge();
    handle
}

#[test]
fn wrappers() {
    let base = lookup_class("KotlinBase");
    assert!(!base.is_null());
    assert!(lookup_class("NoSuchClass").is_null());

    Kotlin_CExport_enterBridge();
    let obj = unsafe { Kotlin_CExport_allocInstance(type_info("kotlin.Any")) };
    let wrapper = Kotlin_ObjCExport_createRetainedWrapper(obj);
    let handle = Kotlin_CExport_createStablePointer(obj);
    Kotlin_CExport_exitBridge();

    let same = unsafe { Kotlin_ObjCExport_createClassWrapperForExternalRCRef(handle, base) };
    assert_eq!(same, wrapper);
    unsafe {
        let owned = Kotlin_ObjCExport_externalRCRef(wrapper);
        assert!(!owned.is_null());

        // `same` carries its own count
        Kotlin_ObjCExport_releaseWrapper(same);
        Kotlin_ObjCExport_retainWrapper(wrapper);
        Kotlin_ObjCExport_releaseWrapper(wrapper);
        Kotlin_ObjCExport_releaseWrapper(wrapper);
    }
    assert!(Kotlin_ObjCExport_createProtocolWrapperForExternalRCRef(RawExternalRCRef::NULL).is_null());
}

#[test]
#[should_panic(expected = "is not a subclass of")]
fn incompatible_class_wrappers_are_fatal() {
    // `kotlin.Any` instances get `KotlinBase` wrappers
    let existential = lookup_class("KotlinExistential");
    unsafe { Kotlin_ObjCExport_createClassWrapperForExternalRCRef(new_any_handle(), existential) };
}

#[test]
#[should_panic(expected = "could not unbox")]
fn unboxing_the_wrong_primitive_is_fatal() {
    Kotlin_CExport_unboxInt(Kotlin_CExport_boxLong(1 << 40));
}

#[test]
#[should_panic(expected = "exitBridge without a matching enterBridge")]
fn unbalanced_exit_bridge_is_fatal() {
    Kotlin_CExport_exitBridge();
}

#[rstest]
#[case(3)]
#[case(7)]
#[should_panic(expected = "unknown wrapper options")]
fn unknown_wrapper_options_are_fatal(#[case] options: u32) {
    let base = lookup_class("KotlinBase");
    unsafe { Kotlin_ObjCExport_initWithExternalRCRefUnsafe(base, new_any_handle(), options) };
}
