use once_cell::sync::Lazy;
use xref_value::PrimitiveKind;

use crate::registry::{TypeRegistry, ANY_TYPE_NAME};
use crate::type_info::{TypeInfo, TypeInfoBuilder};

static CORE_TYPES: Lazy<CoreTypes> = Lazy::new(|| {
    let registry = TypeRegistry::global();
    let get = |name: &str| {
        registry
            .get(name)
            .unwrap_or_else(|| panic!("core type `{name}` is missing from the registry"))
    };

    CoreTypes {
        any: get(ANY_TYPE_NAME),
        comparable: get("kotlin.Comparable"),
        number: get("kotlin.Number"),
        unit: get("kotlin.Unit"),
        string: get("kotlin.String"),
        throwable: get("kotlin.Throwable"),
        exception: get("kotlin.Exception"),
        runtime_exception: get("kotlin.RuntimeException"),
        illegal_state_exception: get("kotlin.IllegalStateException"),
        illegal_argument_exception: get("kotlin.IllegalArgumentException"),
        boxes: PrimitiveKind::ALL.map(|kind| get(&box_type_name(kind))),
    }
});

/// The core types of the runtime.
///
/// This struct allows to always keep a reference to the types the bridge itself needs to know about
/// (box types, `String`, `Throwable`...), without going through a lookup by name every time.
#[derive(Debug)]
pub struct CoreTypes {
    /// The **Any** class: root of the class hierarchy.
    pub any: &'static TypeInfo,
    /// The **Comparable** interface.
    pub comparable: &'static TypeInfo,
    /// The **Number** class.
    pub number: &'static TypeInfo,
    /// The **Unit** class. It has a single instance.
    pub unit: &'static TypeInfo,
    /// The **String** class.
    pub string: &'static TypeInfo,

    /// The **Throwable** class: what can be thrown as an exception.
    pub throwable: &'static TypeInfo,
    /// The **Exception** class.
    pub exception: &'static TypeInfo,
    /// The **RuntimeException** class.
    pub runtime_exception: &'static TypeInfo,
    /// The **IllegalStateException** class.
    pub illegal_state_exception: &'static TypeInfo,
    /// The **IllegalArgumentException** class.
    pub illegal_argument_exception: &'static TypeInfo,

    /// Box types, indexed by `PrimitiveKind`.
    boxes: [&'static TypeInfo; 12],
}

impl CoreTypes {
    /// The type of the managed object a primitive of this kind gets boxed into.
    pub fn box_type(&self, kind: PrimitiveKind) -> &'static TypeInfo {
        self.boxes[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static TypeInfo> + '_ {
        [
            self.any,
            self.comparable,
            self.number,
            self.unit,
            self.string,
            self.throwable,
            self.exception,
            self.runtime_exception,
            self.illegal_state_exception,
            self.illegal_argument_exception,
        ]
        .into_iter()
        .chain(self.boxes.iter().copied())
    }
}

/// The core types. Initializes the global registry if needed.
pub fn core_types() -> &'static CoreTypes {
    &CORE_TYPES
}

pub fn box_type_name(kind: PrimitiveKind) -> String {
    format!("kotlin.{}", kind.name())
}

/// Registers the core types into a fresh registry. Order matters: `Any` first, since it's the
/// default super type of everything that comes after.
pub(crate) fn bootstrap(registry: &TypeRegistry) -> anyhow::Result<()> {
    let any = registry.register(
        TypeInfoBuilder::new(ANY_TYPE_NAME)
            .method("equals")
            .method("hashCode")
            .method("toString"),
    )?;
    let comparable = registry.register(TypeInfoBuilder::new("kotlin.Comparable").interface().method("compareTo"))?;
    let number = registry.register(
        TypeInfoBuilder::new("kotlin.Number")
            .method("toInt")
            .method("toLong")
            .method("toDouble"),
    )?;
    registry.register(TypeInfoBuilder::new("kotlin.Unit"))?;
    registry.register(
        TypeInfoBuilder::new("kotlin.String")
            .implements(comparable)
            .method("compareTo")
            .method("length"),
    )?;

    let throwable = registry.register(
        TypeInfoBuilder::new("kotlin.Throwable")
            .super_type(any)
            .fields(1) // cause
            .method("getMessage"),
    )?;
    let exception = registry.register(TypeInfoBuilder::new("kotlin.Exception").super_type(throwable))?;
    let runtime_exception =
        registry.register(TypeInfoBuilder::new("kotlin.RuntimeException").super_type(exception))?;
    registry.register(TypeInfoBuilder::new("kotlin.IllegalStateException").super_type(runtime_exception))?;
    registry.register(TypeInfoBuilder::new("kotlin.IllegalArgumentException").super_type(runtime_exception))?;

    for kind in PrimitiveKind::ALL {
        let mut builder = TypeInfoBuilder::new(box_type_name(kind))
            .primitive(kind)
            .implements(comparable)
            .method("compareTo");
        if kind.is_number() && !kind.is_unsigned() {
            builder = builder.super_type(number);
        }
        registry.register(builder)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_are_indexed_by_kind() {
        for kind in PrimitiveKind::ALL {
            let box_type = core_types().box_type(kind);
            assert_eq!(box_type.primitive_kind(), Some(kind));
            assert_eq!(box_type.name(), box_type_name(kind));
        }
    }

    #[test]
    fn exceptions_are_throwables() {
        let core = core_types();
        assert!(core.illegal_state_exception.is_subtype_of(core.throwable));
        assert!(core.illegal_argument_exception.is_subtype_of(core.runtime_exception));
        assert!(!core.illegal_state_exception.is_subtype_of(core.illegal_argument_exception));
    }
}
