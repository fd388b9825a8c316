use log::debug;
use xref_core::{core_types, TypeInfo};
use xref_gc::{ObjRef, Payload};

use crate::error::BridgeError;
use crate::fatal;
use crate::runtime::Runtime;
use crate::thread_state::{BridgeCall, StackFrame};

/// What a native entry point declared about the managed exceptions that can reach it.
#[derive(Debug, Copy, Clone)]
pub enum ExceptionPolicy {
    /// Every exception becomes an error.
    ConvertAll,
    /// Exceptions of this type (or a subtype) become errors. Anything else is fatal.
    ConvertOnly(&'static TypeInfo),
    /// The callee declared it doesn't throw: any exception is fatal.
    NoThrow,
}

impl ExceptionPolicy {
    pub fn converts(&self, exception_type: &TypeInfo) -> bool {
        match self {
            ExceptionPolicy::ConvertAll => true,
            ExceptionPolicy::ConvertOnly(convertible) => exception_type.is_subtype_of(convertible),
            ExceptionPolicy::NoThrow => false,
        }
    }
}

impl BridgeCall<'_> {
    /// Makes `exception` the thread's pending exception.
    pub fn throw(&self, exception: ObjRef) {
        let heap = self.heap();
        debug_assert!(
            heap.type_info(exception).is_subtype_of(core_types().throwable),
            "throwing an instance of `{}`, which isn't a Throwable",
            heap.type_info(exception).name()
        );
        heap.set_pending_exception(Some(exception));
    }

    /// Allocates an exception of `type_info` and throws it.
    pub fn throw_new(&self, type_info: &'static TypeInfo, message: impl Into<String>) {
        let exception = self.heap().alloc(
            type_info,
            Payload::Throwable {
                message: Some(message.into()),
                cause: None,
            },
        );
        self.throw(exception)
    }

    pub fn pending_exception(&self) -> Option<ObjRef> {
        self.heap().pending_exception()
    }

    /// Takes the pending exception, if any, and checks it against `policy`. Exceptions the policy
    /// doesn't convert are fatal.
    pub fn catch(&self, policy: ExceptionPolicy) -> Option<ObjRef> {
        let heap = self.heap();
        let exception = heap.take_pending_exception()?;
        let exception_type = heap.type_info(exception);

        if !policy.converts(exception_type) {
            fatal!(
                "uncaught exception crossed the bridge ({policy:?}): {}",
                describe_exception(self, exception)
            );
        }
        debug!("converting exception `{}`", exception_type.name());
        Some(exception)
    }

    /// `catch`, as an error.
    pub fn handle_exception(&self, policy: ExceptionPolicy) -> Result<(), BridgeError> {
        match self.catch(policy) {
            Some(exception) => Err(describe_exception(self, exception)),
            None => Ok(()),
        }
    }
}

/// The error a managed exception converts into.
pub fn describe_exception(call: &BridgeCall, exception: ObjRef) -> BridgeError {
    let heap = call.heap();
    BridgeError::Exception {
        type_name: heap.type_info(exception).name().to_string(),
        message: heap.throwable_message(exception),
    }
}

impl Runtime {
    /// A whole native-to-managed call: enters the bridge, pushes a frame, calls `f`, surfaces the
    /// exception `f` may have thrown according to `policy`, then pops the frame and gets back to
    /// native.
    pub fn call_managed<T>(
        &self,
        policy: ExceptionPolicy,
        f: impl FnOnce(&BridgeCall<'_>, &StackFrame<'_>) -> T,
    ) -> Result<T, BridgeError> {
        let call = self.enter_bridge();
        let result = {
            let frame = call.push_frame();
            f(&call, &frame)
        };
        call.handle_exception(policy)?;
        Ok(result)
    }
}
