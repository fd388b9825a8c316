use std::marker::PhantomData;

use xref_gc::{Heap, ObjRef, ThreadState};

use crate::runtime::Runtime;

/// Switches the current thread's state for a scope, and switches it back on every exit path.
///
/// Not `Send`: thread states are per-thread.
pub struct ThreadStateGuard<'h> {
    heap: &'h Heap,
    previous: ThreadState,
    _not_send: PhantomData<*const ()>,
}

impl<'h> ThreadStateGuard<'h> {
    pub fn new(heap: &'h Heap, state: ThreadState) -> Self {
        let previous = heap.switch_thread_state(state);
        Self {
            heap,
            previous,
            _not_send: PhantomData,
        }
    }

    /// The state the thread will be switched back to.
    pub fn previous(&self) -> ThreadState {
        self.previous
    }
}

impl Drop for ThreadStateGuard<'_> {
    fn drop(&mut self) {
        self.heap.switch_thread_state(self.previous);
    }
}

/// Checks the current thread's state in debug builds.
pub fn assert_thread_state(heap: &Heap, expected: ThreadState) {
    heap.assert_thread_state(expected)
}

/// A call from native code into the managed world, for as long as it lives.
///
/// Created by `Runtime::enter_bridge`: the thread is runnable until it is dropped, then gets
/// back to its previous state. Calls nest: entering while already runnable changes nothing.
pub struct BridgeCall<'rt> {
    runtime: &'rt Runtime,
    state: ThreadStateGuard<'rt>,
}

impl<'rt> BridgeCall<'rt> {
    pub(crate) fn new(runtime: &'rt Runtime) -> Self {
        let state = ThreadStateGuard::new(runtime.heap(), ThreadState::Runnable);
        Self { runtime, state }
    }

    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    pub fn heap(&self) -> &'rt Heap {
        self.runtime.heap()
    }

    /// Whether this call made the thread runnable, as opposed to being nested in another one.
    pub fn is_outermost(&self) -> bool {
        self.state.previous() == ThreadState::Native
    }

    /// Pushes a shadow stack frame for the references this call holds.
    pub fn push_frame(&self) -> StackFrame<'_> {
        let depth = self.heap().push_frame();
        StackFrame {
            heap: self.heap(),
            depth,
            _not_send: PhantomData,
        }
    }
}

/// A shadow stack frame: the references added to it survive collections, and are updated when
/// their objects move. Popped when dropped, so frames are strictly LIFO.
pub struct StackFrame<'c> {
    heap: &'c Heap,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl StackFrame<'_> {
    /// Roots `obj` in this frame. Returns the slot to read it back from.
    pub fn add(&self, obj: ObjRef) -> usize {
        self.debug_assert_on_top();
        self.heap.frame_push(obj)
    }

    /// The current reference in a slot.
    pub fn get(&self, slot: usize) -> Option<ObjRef> {
        self.debug_assert_on_top();
        self.heap.frame_load(slot)
    }

    pub fn set(&self, slot: usize, obj: Option<ObjRef>) {
        self.debug_assert_on_top();
        self.heap.frame_store(slot, obj)
    }

    fn debug_assert_on_top(&self) {
        debug_assert_eq!(self.heap.frame_depth(), self.depth, "stack frame used while not on top");
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(self.heap.frame_depth(), self.depth, "unbalanced stack frames");
        self.heap.pop_frame();
    }
}
