use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rand::Rng;
use rstest::{fixture, rstest};
use xref_core::{core_types, TypeInfo};
use xref_gc::{Forwarding, GcConfig, Heap, ObjRef, Payload, RootScanner, ThreadState};
use xref_value::{Primitive, PrimitiveKind};

/// A heap that only collects when asked to, with the current thread runnable.
#[fixture]
fn heap() -> Arc<Heap> {
    let heap = Heap::new(GcConfig::manual());
    heap.switch_thread_state(ThreadState::Runnable);
    heap
}

fn pair_type() -> &'static TypeInfo {
    static PAIR: OnceLock<&'static TypeInfo> = OnceLock::new();
    PAIR.get_or_init(|| TypeInfo::builder("heap_tests.Pair").fields(2).register().unwrap())
}

fn new_int(heap: &Heap, value: i32) -> ObjRef {
    heap.alloc(core_types().box_type(PrimitiveKind::Int), Payload::Primitive(Primitive::Int(value)))
}

#[rstest]
fn frame_roots_keep_objects_alive(heap: Arc<Heap>) {
    heap.push_frame();
    let obj = new_int(&heap, 42);
    let id = heap.object_id(obj);
    let slot = heap.frame_push(obj);
    new_int(&heap, 7); // garbage

    heap.collect();
    assert_eq!(heap.stats().live_objects, 1);
    assert_eq!(heap.stats().freed, 1);

    let obj = heap.frame_load(slot).unwrap();
    assert_eq!(heap.object_id(obj), id);
    assert_eq!(heap.primitive(obj), Some(Primitive::Int(42)));

    heap.pop_frame();
    heap.collect();
    assert_eq!(heap.stats().live_objects, 0);
    assert_eq!(heap.stats().freed, 2);
    // other heaps collect too
    assert!(heap.stats().collections >= 2);
}

#[rstest]
fn fields_are_fixed_up_when_objects_move(heap: Arc<Heap>) {
    heap.push_frame();
    new_int(&heap, 0); // garbage, so that everything after it moves
    let pair = heap.alloc_instance(pair_type());
    let slot = heap.frame_push(pair);
    let first = new_int(&heap, 1);
    heap.set_field(pair, 0, Some(first));
    let first_id = heap.object_id(first);

    heap.collect();

    let pair = heap.frame_load(slot).unwrap();
    let first = heap.field(pair, 0).unwrap();
    assert_eq!(heap.object_id(first), first_id);
    assert_eq!(heap.primitive(first), Some(Primitive::Int(1)));
    assert_eq!(heap.field(pair, 1), None);
    assert_eq!(heap.stats().live_objects, 2);
    heap.pop_frame();
}

#[rstest]
fn global_roots_and_pending_exceptions_are_roots(heap: Arc<Heap>) {
    let root = heap.add_global_root(new_int(&heap, 1));
    let exception = heap.alloc(
        core_types().illegal_state_exception,
        Payload::Throwable {
            message: Some("boom".to_string()),
            cause: None,
        },
    );
    heap.set_pending_exception(Some(exception));

    heap.collect();
    assert_eq!(heap.stats().live_objects, 2);
    assert_eq!(heap.primitive(heap.global_root(root).unwrap()), Some(Primitive::Int(1)));
    let exception = heap.take_pending_exception().unwrap();
    assert_eq!(heap.throwable_message(exception).as_deref(), Some("boom"));

    heap.remove_global_root(root);
    heap.collect();
    assert_eq!(heap.stats().live_objects, 0);
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(16)]
fn automatic_collections_keep_payload_references(#[case] threshold: usize) {
    let heap = Heap::new(GcConfig::manual().with_collection_threshold(threshold));
    heap.switch_thread_state(ThreadState::Runnable);

    heap.push_frame();
    let mut cause = heap.alloc(
        core_types().runtime_exception,
        Payload::Throwable {
            message: Some("cause".to_string()),
            cause: None,
        },
    );
    for i in 0..50 {
        // the only reference to the cause is the payload of the new exception
        let exception = heap.alloc(
            core_types().runtime_exception,
            Payload::Throwable {
                message: Some(format!("exception {i}")),
                cause: Some(cause),
            },
        );
        heap.frame_store(0, Some(exception));
        cause = exception;
    }

    let mut depth = 0;
    let mut current = heap.frame_load(0);
    while let Some(exception) = current {
        depth += 1;
        current = heap.throwable_cause(exception);
    }
    assert_eq!(depth, 51);
    assert!(heap.stats().collections > 0);
    heap.pop_frame();
}

/// Weak slots: never reported as roots, cleared when their object dies.
#[derive(Default)]
struct WeakSlots(Mutex<Vec<Option<ObjRef>>>);

impl RootScanner for WeakSlots {
    fn scan_roots(&self, _visitor: &mut dyn FnMut(ObjRef)) {}

    fn forward_roots(&self, forwarding: &Forwarding) {
        self.0.lock().iter_mut().for_each(|slot| forwarding.forward_slot(slot));
    }
}

#[rstest]
fn root_scanners_see_dead_objects_cleared(heap: Arc<Heap>) {
    let weak = Arc::new(WeakSlots::default());
    heap.register_root_scanner(weak.clone());

    let alive = new_int(&heap, 1);
    let root = heap.add_global_root(alive);
    let dead = new_int(&heap, 2);
    weak.0.lock().extend([Some(alive), Some(dead)]);

    heap.collect();

    let slots = weak.0.lock().clone();
    assert_eq!(slots, vec![heap.global_root(root), None]);
}

#[rstest]
fn associated_objects_move_with_their_object(heap: Arc<Heap>) {
    new_int(&heap, 0);
    let obj = new_int(&heap, 1);
    let root = heap.add_global_root(obj);
    assert_eq!(heap.compare_and_swap_associated_object(obj, 0, 99), 0);

    heap.collect();

    let obj = heap.global_root(root).unwrap();
    assert_eq!(heap.get_associated_object(obj), 99);
    assert_eq!(heap.compare_and_swap_associated_object(obj, 0, 100), 99);
}

#[rstest]
fn nested_state_switches_are_no_ops(heap: Arc<Heap>) {
    assert_eq!(heap.switch_thread_state(ThreadState::Runnable), ThreadState::Runnable);
    assert_eq!(heap.switch_thread_state(ThreadState::Native), ThreadState::Runnable);
    assert_eq!(heap.switch_thread_state(ThreadState::Native), ThreadState::Native);
    // a native thread can collect too
    heap.collect();
    assert_eq!(heap.thread_state(), ThreadState::Native);
}

#[cfg(debug_assertions)]
#[rstest]
#[should_panic(expected = "stale reference")]
fn stale_references_are_caught(heap: Arc<Heap>) {
    let obj = new_int(&heap, 1);
    heap.add_global_root(obj);
    heap.collect();
    heap.primitive(obj);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "unexpected thread state")]
fn allocating_while_native_is_caught() {
    let heap = Heap::new(GcConfig::manual());
    new_int(&heap, 1);
}

#[test]
fn mutators_are_stopped_at_safepoints() {
    const THREADS: usize = 4;

    let heap = Heap::new(GcConfig::manual());
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let heap = &heap;
            let done = &done;
            scope.spawn(move || {
                let mut rng = rand::thread_rng();
                heap.switch_thread_state(ThreadState::Runnable);
                heap.push_frame();
                let mine = new_int(heap, t as i32);
                let slot = heap.frame_push(mine);

                let mut iterations = 0;
                while !done.load(Ordering::Acquire) || iterations < 100 {
                    for _ in 0..rng.gen_range(0..8) {
                        new_int(heap, -1); // garbage
                    }
                    if rng.gen_ratio(1, 32) {
                        heap.collect();
                    }
                    let mine = heap.frame_load(slot).unwrap();
                    assert_eq!(heap.primitive(mine), Some(Primitive::Int(t as i32)));
                    heap.safepoint();
                    iterations += 1;
                }

                heap.pop_frame();
                heap.switch_thread_state(ThreadState::Native);
            });
        }

        for _ in 0..20 {
            heap.collect();
        }
        done.store(true, Ordering::Release);
    });

    heap.collect();
    let stats = heap.stats();
    assert_eq!(stats.live_objects, 0);
    assert_eq!(stats.freed, stats.total_allocations);
    assert!(stats.collections >= 21);
}

#[rstest]
fn large_objects_survive_collections(heap: Arc<Heap>) {
    let text = "x".repeat(64 << 10);
    let root = heap.add_global_root(heap.alloc(core_types().string, Payload::String(text.clone())));

    heap.collect();

    assert_eq!(heap.string(heap.global_root(root).unwrap()), Some(text));
    heap.remove_global_root(root);
}
