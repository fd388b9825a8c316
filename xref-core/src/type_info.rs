use std::fmt::{Debug, Formatter};

use once_cell::sync::OnceCell;
use xref_value::PrimitiveKind;

use crate::objc_adapter::TypeInfoObjCExportAddition;
use crate::registry::TypeRegistry;

/// Identifier of a registered type. It's the registration order, so it's dense and stable
/// for the lifetime of the process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
}

/// The runtime descriptor of a managed type.
///
/// One per managed class, shared by all its instances. Only the registry creates them, and it
/// leaks them: a `TypeInfo` is never destroyed, so `&'static TypeInfo` is the way to hold one.
pub struct TypeInfo {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) super_type: Option<&'static TypeInfo>,
    pub(crate) interfaces: Vec<&'static TypeInfo>,
    /// Number of reference fields in an instance, inherited ones included.
    pub(crate) field_count: usize,
    /// Method names, by virtual table slot. Starts with the super type's slots.
    pub(crate) vtable: Vec<String>,
    /// Set for the box types of primitives.
    pub(crate) primitive: Option<PrimitiveKind>,
    pub(crate) objc_export: OnceCell<TypeInfoObjCExportAddition>,
}

impl TypeInfo {
    pub fn builder(name: impl Into<String>) -> TypeInfoBuilder {
        TypeInfoBuilder::new(name)
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn super_type(&self) -> Option<&'static TypeInfo> {
        self.super_type
    }

    pub fn interfaces(&self) -> &[&'static TypeInfo] {
        &self.interfaces
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub fn vtable(&self) -> &[String] {
        &self.vtable
    }

    /// Slot of a method in the virtual table, if this type has it.
    pub fn vtable_index(&self, method_name: &str) -> Option<usize> {
        self.vtable.iter().position(|name| name == method_name)
    }

    /// The primitive kind, if this is the box type of a primitive.
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        self.primitive
    }

    /// Is `self` the same type as `other`, or does it extend/implement it, directly or not?
    pub fn is_subtype_of(&self, other: &TypeInfo) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }

        if let Some(super_type) = self.super_type {
            if super_type.is_subtype_of(other) {
                return true;
            }
        }

        self.interfaces.iter().any(|interface| interface.is_subtype_of(other))
    }

    /// The chain of super classes, starting with `self`.
    pub fn super_chain(&'static self) -> impl Iterator<Item = &'static TypeInfo> {
        std::iter::successors(Some(self), |ty| ty.super_type)
    }

    pub fn objc_export(&self) -> Option<&TypeInfoObjCExportAddition> {
        self.objc_export.get()
    }

    /// Attaches the ObjC export data. Write-once: a type is exported at most once.
    pub(crate) fn attach_objc_export(&self, addition: TypeInfoObjCExportAddition) -> anyhow::Result<()> {
        self.objc_export
            .set(addition)
            .map_err(|_| anyhow::anyhow!("type `{}` already has an ObjC export addition", self.name))
    }
}

impl Debug for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("super_type", &self.super_type.map(|ty| ty.name()))
            .field("field_count", &self.field_count)
            .finish()
    }
}

/// Describes a type to be registered. Nothing is shared until `register` is called.
pub struct TypeInfoBuilder {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) super_type: Option<&'static TypeInfo>,
    pub(crate) interfaces: Vec<&'static TypeInfo>,
    pub(crate) own_fields: usize,
    pub(crate) own_methods: Vec<String>,
    pub(crate) primitive: Option<PrimitiveKind>,
}

impl TypeInfoBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Class,
            super_type: None,
            interfaces: vec![],
            own_fields: 0,
            own_methods: vec![],
            primitive: None,
        }
    }

    /// Make it an interface instead of a class.
    pub fn interface(mut self) -> Self {
        self.kind = TypeKind::Interface;
        self
    }

    /// When not given, classes extend `kotlin.Any`.
    pub fn super_type(mut self, super_type: &'static TypeInfo) -> Self {
        self.super_type = Some(super_type);
        self
    }

    pub fn implements(mut self, interface: &'static TypeInfo) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Reference fields declared by this type (on top of the inherited ones).
    pub fn fields(mut self, count: usize) -> Self {
        self.own_fields = count;
        self
    }

    /// Declares a virtual method. Overriding an inherited one reuses its slot.
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.own_methods.push(name.into());
        self
    }

    pub(crate) fn primitive(mut self, kind: PrimitiveKind) -> Self {
        self.primitive = Some(kind);
        self
    }

    /// Registers the type in the process-wide registry.
    pub fn register(self) -> anyhow::Result<&'static TypeInfo> {
        TypeRegistry::global().register(self)
    }

    /// Builds the final descriptor. The registry assigns ids, nobody else.
    pub(crate) fn build(self, id: TypeId, default_super_type: Option<&'static TypeInfo>) -> anyhow::Result<TypeInfo> {
        let super_type = match self.kind {
            TypeKind::Class => self.super_type.or(default_super_type),
            TypeKind::Interface => self.super_type,
        };

        if let Some(super_type) = super_type {
            anyhow::ensure!(
                !super_type.is_interface(),
                "type `{}` can't extend interface `{}`",
                self.name,
                super_type.name()
            );
        }

        if let Some(not_an_interface) = self.interfaces.iter().find(|ty| !ty.is_interface()) {
            anyhow::bail!("type `{}` can't implement class `{}`", self.name, not_an_interface.name());
        }

        let mut vtable = super_type.map(|ty| ty.vtable.clone()).unwrap_or_default();
        for method in self.own_methods {
            if !vtable.contains(&method) {
                vtable.push(method);
            }
        }

        Ok(TypeInfo {
            id,
            name: self.name,
            kind: self.kind,
            field_count: super_type.map_or(0, |ty| ty.field_count) + self.own_fields,
            super_type,
            interfaces: self.interfaces,
            vtable,
            primitive: self.primitive,
            objc_export: OnceCell::new(),
        })
    }
}
