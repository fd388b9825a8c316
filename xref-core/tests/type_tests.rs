use rstest::{fixture, rstest};
use xref_core::objc_adapter::{native_class_for, NativeClass, ObjCTypeAdapter};
use xref_core::{core_types, TypeInfo, TypeRegistry};
use xref_value::PrimitiveKind;

/// A small hierarchy: `Shape <- Circle`, `Shape` implementing `Drawable`.
struct Shapes {
    drawable: &'static TypeInfo,
    shape: &'static TypeInfo,
    circle: &'static TypeInfo,
}

#[fixture]
#[once]
fn shapes() -> Shapes {
    let drawable = TypeInfo::builder("shapes.Drawable")
        .interface()
        .method("draw")
        .register()
        .expect("could not register Drawable");
    let shape = TypeInfo::builder("shapes.Shape")
        .implements(drawable)
        .fields(1)
        .method("draw")
        .method("area")
        .register()
        .expect("could not register Shape");
    let circle = TypeInfo::builder("shapes.Circle")
        .super_type(shape)
        .fields(2)
        .method("area")
        .method("radius")
        .register()
        .expect("could not register Circle");

    Shapes { drawable, shape, circle }
}

#[rstest]
fn subtyping(shapes: &Shapes) {
    let any = core_types().any;

    assert!(shapes.circle.is_subtype_of(shapes.shape));
    assert!(shapes.circle.is_subtype_of(shapes.drawable));
    assert!(shapes.circle.is_subtype_of(any));
    assert!(!shapes.shape.is_subtype_of(shapes.circle));
    assert!(!core_types().string.is_subtype_of(shapes.drawable));
}

#[rstest]
fn fields_are_inherited(shapes: &Shapes) {
    assert_eq!(shapes.shape.field_count(), 1);
    assert_eq!(shapes.circle.field_count(), 3);
}

#[rstest]
fn overriding_reuses_the_slot(shapes: &Shapes) {
    let area = shapes.shape.vtable_index("area").unwrap();
    assert_eq!(shapes.circle.vtable_index("area"), Some(area));
    assert!(shapes.circle.vtable_index("radius").unwrap() > area);
    assert_eq!(shapes.shape.vtable_index("radius"), None);
}

#[rstest]
#[case(PrimitiveKind::Int, true)]
#[case(PrimitiveKind::Double, true)]
#[case(PrimitiveKind::Boolean, false)]
#[case(PrimitiveKind::Char, false)]
#[case(PrimitiveKind::UInt, false)]
fn box_types_extend_number_when_signed_numbers(#[case] kind: PrimitiveKind, #[case] is_number: bool) {
    let core = core_types();
    let box_type = core.box_type(kind);

    assert_eq!(box_type.is_subtype_of(core.number), is_number);
    assert!(box_type.is_subtype_of(core.comparable));
}

#[test]
fn class_cannot_extend_interface() {
    let interface = TypeInfo::builder("errors.AnInterface").interface().register().unwrap();
    let err = TypeInfo::builder("errors.BadClass").super_type(interface).register().unwrap_err();
    assert!(err.to_string().contains("can't extend interface"));
    assert!(TypeRegistry::global().get("errors.BadClass").is_none());
}

#[rstest]
fn native_class_resolution_walks_super_types(shapes: &Shapes) {
    let shape_class = NativeClass::define("NativeShape", None).unwrap();
    let adapter = ObjCTypeAdapter::builder(shapes.shape, "NativeShape")
        .expose("area", "area")
        .overridable("draw", "drawInContext:")
        .attach(shape_class)
        .unwrap();

    assert!(std::ptr::eq(native_class_for(shapes.shape), shape_class));
    // `Circle` isn't exported itself: its wrappers use the nearest exported super class.
    assert!(std::ptr::eq(native_class_for(shapes.circle), shape_class));
    assert!(std::ptr::eq(native_class_for(core_types().string), NativeClass::kotlin_base()));

    assert_eq!(adapter.vtable_index_for_selector("area"), shapes.shape.vtable_index("area"));
    assert_eq!(
        adapter.selector_for_vtable_index(shapes.shape.vtable_index("draw").unwrap()),
        Some("drawInContext:")
    );
    assert!(shape_class.is_subclass_of(NativeClass::kotlin_base()));

    let again = ObjCTypeAdapter::builder(shapes.shape, "NativeShape2").attach(shape_class);
    assert!(again.is_err());
}

#[test]
fn native_classes_are_unique_by_name() {
    NativeClass::define("Unique", None).unwrap();
    assert!(NativeClass::define("Unique", None).is_err());
    assert_eq!(NativeClass::lookup("Unique").map(|class| class.name()), Some("Unique"));
}
