use indexmap::IndexMap;
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::core_classes;
use crate::type_info::{TypeId, TypeInfo, TypeInfoBuilder};

/// Name of the root of the class hierarchy.
pub const ANY_TYPE_NAME: &str = "kotlin.Any";

static GLOBAL_REGISTRY: Lazy<TypeRegistry> = Lazy::new(|| {
    let registry = TypeRegistry::empty();
    core_classes::bootstrap(&registry).unwrap_or_else(|err| panic!("could not register the core types: {err:#}"));
    registry
});

/// All the types known to the process, by name, in registration order.
///
/// Entries are never removed: a registered `TypeInfo` lives until the process exits.
pub struct TypeRegistry {
    types: RwLock<IndexMap<String, &'static TypeInfo>>,
}

impl TypeRegistry {
    fn empty() -> Self {
        Self {
            types: RwLock::new(IndexMap::new()),
        }
    }

    /// The process-wide registry. The core types are registered on first access.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn register(&self, builder: TypeInfoBuilder) -> anyhow::Result<&'static TypeInfo> {
        let mut types = self.types.write();

        if types.contains_key(&builder.name) {
            anyhow::bail!("type `{}` is already registered", builder.name);
        }

        let id = TypeId(u32::try_from(types.len())?);
        let default_super_type = types.get(ANY_TYPE_NAME).copied();
        let type_info: &'static TypeInfo = Box::leak(Box::new(builder.build(id, default_super_type)?));

        debug!("registered type `{}` as {:?}", type_info.name(), id);
        types.insert(type_info.name().to_string(), type_info);
        Ok(type_info)
    }

    pub fn get(&self, name: &str) -> Option<&'static TypeInfo> {
        self.types.read().get(name).copied()
    }

    pub fn get_by_id(&self, id: TypeId) -> Option<&'static TypeInfo> {
        self.types.read().get_index(id.0 as usize).map(|(_, ty)| *ty)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Snapshot of the registered types, in registration order.
    pub fn types(&self) -> Vec<&'static TypeInfo> {
        self.types.read().values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        TypeInfo::builder("registry.tests.Duplicate").register().unwrap();
        let err = TypeInfo::builder("registry.tests.Duplicate").register().unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn ids_resolve_back_to_their_type() {
        let ty = TypeInfo::builder("registry.tests.ById").register().unwrap();
        let registry = TypeRegistry::global();
        assert!(std::ptr::eq(registry.get_by_id(ty.id()).unwrap(), ty));
        assert!(std::ptr::eq(registry.get("registry.tests.ById").unwrap(), ty));
    }

    #[test]
    fn classes_default_to_any() {
        let ty = TypeInfo::builder("registry.tests.Plain").register().unwrap();
        assert_eq!(ty.super_type().map(|ty| ty.name()), Some(ANY_TYPE_NAME));
    }
}
