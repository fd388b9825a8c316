use std::ffi::CStr;

use libc::c_char;
use xref_core::core_types;
use xref_gc::{ObjRef, Payload};

use crate::fatal;
use crate::runtime::Runtime;
use crate::thread_state::BridgeCall;

impl Runtime {
    pub fn create_string(&self, call: &BridgeCall, value: &str) -> ObjRef {
        call.heap().alloc(core_types().string, Payload::String(value.to_string()))
    }

    /// The contents of a managed string; `None` if `obj` isn't one.
    pub fn string_value(&self, call: &BridgeCall, obj: ObjRef) -> Option<String> {
        call.heap().string(obj)
    }
}

/// Copies `value` into a NUL-terminated string allocated with the C allocator. Release it with
/// `dispose_c_string`.
pub fn to_c_string(value: &str) -> *mut c_char {
    let bytes = value.as_bytes();
    // SAFETY: plain allocation, checked for null below.
    let ptr = unsafe { libc::malloc(bytes.len() + 1) } as *mut c_char;
    if ptr.is_null() {
        fatal!("out of memory: could not allocate a C string of {} bytes", bytes.len() + 1);
    }
    // SAFETY: `ptr` has room for the bytes and the terminator.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, ptr, bytes.len());
        *ptr.add(bytes.len()) = 0;
    }
    ptr
}

/// Reads a NUL-terminated string. Invalid UTF-8 is replaced, as managed strings can't hold it.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// # Safety
/// `ptr` must be null or come from `to_c_string`, and not have been disposed already.
pub unsafe fn dispose_c_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        libc::free(ptr as *mut libc::c_void);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_strings_round_trip() {
        for value in ["", "hello", "héllo wörld ✓"] {
            let ptr = to_c_string(value);
            assert_eq!(unsafe { from_c_string(ptr) }.as_deref(), Some(value));
            unsafe { dispose_c_string(ptr) };
        }
        assert_eq!(unsafe { from_c_string(std::ptr::null()) }, None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let bytes = b"ab\xffc\0";
        let value = unsafe { from_c_string(bytes.as_ptr() as *const c_char) }.unwrap();
        assert_eq!(value, "ab\u{fffd}c");
    }
}
