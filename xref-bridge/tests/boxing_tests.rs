use std::fmt::Debug;
use std::sync::Arc;

use rand::Rng;
use rstest::{fixture, rstest};
use xref_bridge::{BridgeConfig, BridgeError, RawExternalRCRef, Runtime};
use xref_core::core_types;
use xref_gc::{GcConfig, ObjectId};
use xref_value::{Boxable, KChar, PrimitiveKind};

#[fixture]
fn runtime() -> Arc<Runtime> {
    Runtime::new(BridgeConfig {
        gc: GcConfig::manual(),
        box_cache: true,
    })
}

fn round_trip<T: Boxable + PartialEq + Debug>(runtime: &Runtime, value: T) -> T {
    let handle = runtime.box_value(value);
    let unboxed = runtime.unbox::<T>(handle).unwrap();
    runtime.external_refs().release_and_dispose(handle);
    unboxed
}

fn boxed_id(runtime: &Runtime, handle: RawExternalRCRef) -> ObjectId {
    let call = runtime.enter_bridge();
    let obj = runtime.external_refs().dereference(handle).unwrap();
    call.heap().object_id(obj)
}

#[rstest]
#[case(i32::MIN)]
#[case(-129)]
#[case(-128)]
#[case(0)]
#[case(127)]
#[case(128)]
#[case(i32::MAX)]
fn ints_round_trip(runtime: Arc<Runtime>, #[case] value: i32) {
    assert_eq!(round_trip(&runtime, value), value);
}

#[rstest]
fn every_kind_round_trips(runtime: Arc<Runtime>) {
    assert!(round_trip(&runtime, true));
    assert!(!round_trip(&runtime, false));
    assert_eq!(round_trip(&runtime, KChar(0x3b1)), KChar(0x3b1));
    assert_eq!(round_trip(&runtime, KChar(b'z' as u16)), KChar(b'z' as u16));
    assert_eq!(round_trip(&runtime, i8::MIN), i8::MIN);
    assert_eq!(round_trip(&runtime, i16::MAX), i16::MAX);
    assert_eq!(round_trip(&runtime, i64::MIN), i64::MIN);
    assert_eq!(round_trip(&runtime, u8::MAX), u8::MAX);
    assert_eq!(round_trip(&runtime, u16::MAX), u16::MAX);
    assert_eq!(round_trip(&runtime, u32::MAX), u32::MAX);
    assert_eq!(round_trip(&runtime, u64::MAX), u64::MAX);
    assert_eq!(round_trip(&runtime, -0.0f32).to_bits(), (-0.0f32).to_bits());
    assert_eq!(round_trip(&runtime, f64::INFINITY), f64::INFINITY);
}

#[rstest]
#[case(f64::NAN.to_bits())]
#[case(0x7ff8_0000_0000_0001)]
#[case(0xfff0_0000_0000_0001)]
#[case(f64::NEG_INFINITY.to_bits())]
fn doubles_keep_their_bits(runtime: Arc<Runtime>, #[case] bits: u64) {
    let value = f64::from_bits(bits);
    assert_eq!(round_trip(&runtime, value).to_bits(), bits);
}

#[rstest]
fn random_longs_round_trip(runtime: Arc<Runtime>) {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let long: i64 = rng.gen();
        assert_eq!(round_trip(&runtime, long), long);
        let ulong: u64 = rng.gen();
        assert_eq!(round_trip(&runtime, ulong), ulong);
        let float = f32::from_bits(rng.gen());
        assert_eq!(round_trip(&runtime, float).to_bits(), float.to_bits());
    }
}

#[rstest]
fn boxing_int_42(runtime: Arc<Runtime>) {
    let handle = runtime.box_value(42i32);
    {
        let _call = runtime.enter_bridge();
        let int_type = core_types().box_type(PrimitiveKind::Int);
        assert!(runtime.external_refs().is_instance(handle, int_type));
        assert!(!runtime
            .external_refs()
            .is_instance(handle, core_types().box_type(PrimitiveKind::Long)));
    }

    assert_eq!(runtime.unbox::<i32>(handle), Ok(42));
    assert_eq!(
        runtime.unbox::<i64>(handle),
        Err(BridgeError::TypeMismatch {
            expected: PrimitiveKind::Long,
            found: "kotlin.Int".to_string(),
        })
    );
    assert_eq!(runtime.unbox_or_abort::<i32>(handle), 42);
    // unboxing leaves the handle alone
    assert_eq!(runtime.external_refs().ref_count(handle), Some(1));
}

#[rstest]
fn unboxing_non_boxes_fails(runtime: Arc<Runtime>) {
    assert_eq!(runtime.unbox::<i32>(RawExternalRCRef::NULL), Err(BridgeError::NullReference));

    let handle = runtime.box_unit();
    assert!(matches!(
        runtime.unbox::<bool>(handle),
        Err(BridgeError::TypeMismatch { expected: PrimitiveKind::Boolean, .. })
    ));
}

#[rstest]
#[case(42i32, true)]
#[case(-128i32, true)]
#[case(127i32, true)]
#[case(128i32, false)]
#[case(1000i32, false)]
fn small_values_share_boxes(runtime: Arc<Runtime>, #[case] value: i32, #[case] shared: bool) {
    let first = runtime.box_value(value);
    let second = runtime.box_value(value);
    assert_ne!(first, second);
    assert_eq!(boxed_id(&runtime, first) == boxed_id(&runtime, second), shared);
}

#[rstest]
fn cached_boxes_survive_collections(runtime: Arc<Runtime>) {
    let before = runtime.box_value(b'a' as i8);
    let id = boxed_id(&runtime, before);
    runtime.external_refs().release_and_dispose(before);

    runtime.collect();

    let after = runtime.box_value(b'a' as i8);
    assert_eq!(boxed_id(&runtime, after), id);
}

#[rstest]
fn box_cache_can_be_disabled() {
    let runtime = Runtime::new(BridgeConfig {
        gc: GcConfig::manual(),
        box_cache: false,
    });
    let first = runtime.box_value(1i32);
    let second = runtime.box_value(1i32);
    assert_ne!(boxed_id(&runtime, first), boxed_id(&runtime, second));
    assert!(round_trip(&runtime, true));
}
