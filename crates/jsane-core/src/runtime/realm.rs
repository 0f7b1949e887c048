//! The host environment an instrumented program runs in: its global object
//! and the reflection primitives the program sees.

use std::sync::Arc;

use parking_lot::RwLock;

use super::value::{Object, ObjectRef};

/// Own-property reflection as exposed to program code
/// (`hasOwnProperty`, `Object.getOwnPropertyNames`). Swappable so the
/// runtime can hide its bookkeeping properties and restore the original.
pub trait Reflection: Send + Sync {
    fn is_own_visible_property(&self, object: &ObjectRef, name: &str) -> bool;

    fn list_visible_own_property_names(&self, object: &ObjectRef) -> Vec<String>;
}

/// Unfiltered reflection over the object model.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeReflection;

impl Reflection for NativeReflection {
    fn is_own_visible_property(&self, object: &ObjectRef, name: &str) -> bool {
        object.read().has_own(name)
    }

    fn list_visible_own_property_names(&self, object: &ObjectRef) -> Vec<String> {
        object.read().own_keys()
    }
}

pub struct Realm {
    global: ObjectRef,
    reflection: RwLock<Arc<dyn Reflection>>,
}

impl Realm {
    pub fn new() -> Self {
        Self {
            global: ObjectRef::new(Object::ordinary()),
            reflection: RwLock::new(Arc::new(NativeReflection)),
        }
    }

    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    pub fn is_global(&self, object: &ObjectRef) -> bool {
        self.global.ptr_eq(object)
    }

    pub fn reflection(&self) -> Arc<dyn Reflection> {
        self.reflection.read().clone()
    }

    /// Install `reflection`, returning the one it replaces.
    pub fn swap_reflection(&self, reflection: Arc<dyn Reflection>) -> Arc<dyn Reflection> {
        std::mem::replace(&mut *self.reflection.write(), reflection)
    }

    /// `object.hasOwnProperty(name)` as the program sees it.
    pub fn has_own_property(&self, object: &ObjectRef, name: &str) -> bool {
        self.reflection().is_own_visible_property(object, name)
    }

    /// `Object.getOwnPropertyNames(object)` as the program sees it.
    pub fn own_property_names(&self, object: &ObjectRef) -> Vec<String> {
        self.reflection().list_visible_own_property_names(object)
    }

    /// `Object.keys(object)`, also the `for..in` order for own keys.
    pub fn keys(&self, object: &ObjectRef) -> Vec<String> {
        object.read().enumerable_keys()
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm").field("global", &self.global).finish_non_exhaustive()
    }
}
