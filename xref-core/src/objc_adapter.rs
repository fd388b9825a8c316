use std::fmt::{Debug, Formatter};

use indexmap::IndexMap;
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::type_info::TypeInfo;

/// Name of the root native class of every wrapper.
pub const KOTLIN_BASE_CLASS_NAME: &str = "KotlinBase";
/// Name of the native class used for wrappers whose static type is only known as an interface.
pub const KOTLIN_EXISTENTIAL_CLASS_NAME: &str = "KotlinExistential";

static NATIVE_CLASSES: Lazy<RwLock<IndexMap<String, &'static NativeClass>>> = Lazy::new(|| {
    let mut classes = IndexMap::new();
    let base: &'static NativeClass = Box::leak(Box::new(NativeClass {
        name: KOTLIN_BASE_CLASS_NAME.to_string(),
        superclass: None,
    }));
    let existential: &'static NativeClass = Box::leak(Box::new(NativeClass {
        name: KOTLIN_EXISTENTIAL_CLASS_NAME.to_string(),
        superclass: Some(base),
    }));
    classes.insert(base.name.clone(), base);
    classes.insert(existential.name.clone(), existential);
    RwLock::new(classes)
});

/// A class on the native side of the bridge.
///
/// Like `TypeInfo`, native classes are defined once and never destroyed.
pub struct NativeClass {
    name: String,
    superclass: Option<&'static NativeClass>,
}

impl NativeClass {
    /// Defines a new native class. Classes without an explicit superclass extend `KotlinBase`.
    pub fn define(name: impl Into<String>, superclass: Option<&'static NativeClass>) -> anyhow::Result<&'static NativeClass> {
        let name = name.into();
        let superclass = superclass.unwrap_or_else(NativeClass::kotlin_base);

        let mut classes = NATIVE_CLASSES.write();
        if classes.contains_key(&name) {
            anyhow::bail!("native class `{name}` is already defined");
        }

        let class: &'static NativeClass = Box::leak(Box::new(NativeClass {
            name: name.clone(),
            superclass: Some(superclass),
        }));
        debug!("defined native class `{name}` (superclass `{}`)", superclass.name);
        classes.insert(name, class);
        Ok(class)
    }

    pub fn lookup(name: &str) -> Option<&'static NativeClass> {
        NATIVE_CLASSES.read().get(name).copied()
    }

    pub fn kotlin_base() -> &'static NativeClass {
        NATIVE_CLASSES.read()[KOTLIN_BASE_CLASS_NAME]
    }

    pub fn kotlin_existential() -> &'static NativeClass {
        NATIVE_CLASSES.read()[KOTLIN_EXISTENTIAL_CLASS_NAME]
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<&'static NativeClass> {
        self.superclass
    }

    pub fn is_subclass_of(&self, other: &NativeClass) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.superclass.is_some_and(|superclass| superclass.is_subclass_of(other))
    }
}

impl Debug for NativeClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeClass")
            .field("name", &self.name)
            .field("superclass", &self.superclass.map(|class| class.name()))
            .finish()
    }
}

/// A native selector implemented by calling a managed virtual method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjCToKotlinMethodAdapter {
    pub selector: String,
    pub method_name: String,
    pub vtable_index: usize,
}

/// A managed virtual method whose slot is filled by a native selector, for native subclasses
/// overriding managed methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KotlinToObjCMethodAdapter {
    pub method_name: String,
    pub vtable_index: usize,
    pub selector: String,
}

/// How one managed type is exported: its native name and its method tables in both directions.
#[derive(Debug)]
pub struct ObjCTypeAdapter {
    type_info: &'static TypeInfo,
    objc_name: String,
    direct_adapters: Vec<ObjCToKotlinMethodAdapter>,
    reverse_adapters: Vec<KotlinToObjCMethodAdapter>,
}

impl ObjCTypeAdapter {
    pub fn builder(type_info: &'static TypeInfo, objc_name: impl Into<String>) -> ObjCTypeAdapterBuilder {
        ObjCTypeAdapterBuilder {
            type_info,
            objc_name: objc_name.into(),
            exposed: vec![],
            overridable: vec![],
        }
    }

    pub fn type_info(&self) -> &'static TypeInfo {
        self.type_info
    }

    pub fn objc_name(&self) -> &str {
        &self.objc_name
    }

    pub fn direct_adapters(&self) -> &[ObjCToKotlinMethodAdapter] {
        &self.direct_adapters
    }

    pub fn reverse_adapters(&self) -> &[KotlinToObjCMethodAdapter] {
        &self.reverse_adapters
    }

    /// The managed slot a native selector dispatches to.
    pub fn vtable_index_for_selector(&self, selector: &str) -> Option<usize> {
        self.direct_adapters
            .iter()
            .find(|adapter| adapter.selector == selector)
            .map(|adapter| adapter.vtable_index)
    }

    /// The native selector that overrides a managed slot.
    pub fn selector_for_vtable_index(&self, vtable_index: usize) -> Option<&str> {
        self.reverse_adapters
            .iter()
            .find(|adapter| adapter.vtable_index == vtable_index)
            .map(|adapter| adapter.selector.as_str())
    }
}

pub struct ObjCTypeAdapterBuilder {
    type_info: &'static TypeInfo,
    objc_name: String,
    /// (selector, method)
    exposed: Vec<(String, String)>,
    /// (method, selector)
    overridable: Vec<(String, String)>,
}

impl ObjCTypeAdapterBuilder {
    /// Makes a managed method callable from native code through `selector`.
    pub fn expose(mut self, selector: impl Into<String>, method_name: impl Into<String>) -> Self {
        self.exposed.push((selector.into(), method_name.into()));
        self
    }

    /// Lets native subclasses override a managed method by implementing `selector`.
    pub fn overridable(mut self, method_name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.overridable.push((method_name.into(), selector.into()));
        self
    }

    pub fn build(self) -> anyhow::Result<ObjCTypeAdapter> {
        let type_info = self.type_info;
        let resolve = |method_name: &str| {
            type_info.vtable_index(method_name).ok_or_else(|| {
                anyhow::anyhow!("type `{}` has no method `{method_name}` to adapt", type_info.name())
            })
        };

        let mut direct_adapters = Vec::with_capacity(self.exposed.len());
        for (selector, method_name) in self.exposed {
            anyhow::ensure!(
                direct_adapters.iter().all(|it: &ObjCToKotlinMethodAdapter| it.selector != selector),
                "selector `{selector}` is exposed twice on `{}`",
                self.objc_name
            );
            let vtable_index = resolve(&method_name)?;
            direct_adapters.push(ObjCToKotlinMethodAdapter {
                selector,
                method_name,
                vtable_index,
            });
        }

        let mut reverse_adapters = Vec::with_capacity(self.overridable.len());
        for (method_name, selector) in self.overridable {
            let vtable_index = resolve(&method_name)?;
            reverse_adapters.push(KotlinToObjCMethodAdapter {
                method_name,
                vtable_index,
                selector,
            });
        }

        Ok(ObjCTypeAdapter {
            type_info,
            objc_name: self.objc_name,
            direct_adapters,
            reverse_adapters,
        })
    }

    /// Builds the adapter and binds its type to `native_class`. A type is exported at most once.
    pub fn attach(self, native_class: &'static NativeClass) -> anyhow::Result<&'static ObjCTypeAdapter> {
        let type_info = self.type_info;
        let adapter: &'static ObjCTypeAdapter = Box::leak(Box::new(self.build()?));
        type_info.attach_objc_export(TypeInfoObjCExportAddition {
            type_adapter: adapter,
            native_class,
        })?;
        debug!("exported `{}` as native class `{}`", type_info.name(), native_class.name());
        Ok(adapter)
    }
}

/// What a `TypeInfo` knows about its export to the native side.
#[derive(Debug, Copy, Clone)]
pub struct TypeInfoObjCExportAddition {
    pub type_adapter: &'static ObjCTypeAdapter,
    pub native_class: &'static NativeClass,
}

/// The native class wrappers of instances of `type_info` are made of: the one attached to the
/// nearest exported super class, or `KotlinBase`.
pub fn native_class_for(type_info: &'static TypeInfo) -> &'static NativeClass {
    type_info
        .super_chain()
        .find_map(|ty| ty.objc_export().map(|addition| addition.native_class))
        .unwrap_or_else(NativeClass::kotlin_base)
}
