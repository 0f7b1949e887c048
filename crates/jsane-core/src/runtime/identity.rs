//! Stable object identities for trace keys.
//!
//! An object that appears as a trace scope gets a numeric id stored in a
//! hidden own property. The property is non-enumerable, so `for..in` and
//! `Object.keys` never see it; [`ObjectHooks`] wraps the realm's reflection
//! so ownership tests and property listings skip it too, and `in` goes
//! through [`ObjectHooks::proxy_in_operator`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::errors::RuntimeError;
use super::realm::{Realm, Reflection};
use super::value::{Object, ObjectRef, Property, Value};

/// Hidden property holding an object's trace id.
pub const TRACE_ID_PROPERTY: &str = "___jsane_trace_id";

/// Fixed trace id of the global object.
pub const GLOBAL_OBJECT_TRACE_ID: u64 = 1;

/// Source of trace ids, shared by object identities and call frames.
#[derive(Debug)]
pub struct TraceIds(AtomicU64);

impl TraceIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(GLOBAL_OBJECT_TRACE_ID + 1))
    }

    pub fn allocate(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TraceIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Object standing in for call frame `id` wherever a trace scope is passed
/// as a value. [`ObjectHooks::object_trace_id`] resolves it to `id`.
pub fn scope_token(id: u64) -> Value {
    let mut token = Object::ordinary();
    token.define(TRACE_ID_PROPERTY, Property::sealed(Value::Number(id as f64)));
    Value::object(token)
}

struct HidingReflection {
    inner: Arc<dyn Reflection>,
}

impl Reflection for HidingReflection {
    fn is_own_visible_property(&self, object: &ObjectRef, name: &str) -> bool {
        name != TRACE_ID_PROPERTY && self.inner.is_own_visible_property(object, name)
    }

    fn list_visible_own_property_names(&self, object: &ObjectRef) -> Vec<String> {
        let mut names = self.inner.list_visible_own_property_names(object);
        names.retain(|name| name != TRACE_ID_PROPERTY);
        names
    }
}

/// Reversible patch of the realm's reflection plus the identity table.
pub struct ObjectHooks {
    realm: Arc<Realm>,
    ids: Arc<TraceIds>,
    saved: Mutex<Option<Arc<dyn Reflection>>>,
}

impl ObjectHooks {
    /// Hide [`TRACE_ID_PROPERTY`] from the realm's reflection.
    pub fn install(realm: Arc<Realm>, ids: Arc<TraceIds>) -> Self {
        let inner = realm.reflection();
        let previous = realm.swap_reflection(Arc::new(HidingReflection { inner }));
        tracing::debug!("object hooks installed");
        Self {
            realm,
            ids,
            saved: Mutex::new(Some(previous)),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.saved.lock().is_some()
    }

    /// Restore the reflection that was active before [`Self::install`].
    /// Calling it twice is harmless.
    pub fn clear(&self) {
        if let Some(previous) = self.saved.lock().take() {
            self.realm.swap_reflection(previous);
            tracing::debug!("object hooks cleared");
        }
    }

    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    /// Trace id of `object`, assigned on first use.
    pub fn object_trace_id(&self, object: &ObjectRef) -> u64 {
        if self.realm.is_global(object) {
            return GLOBAL_OBJECT_TRACE_ID;
        }
        // Only an own property counts; one inherited from a tagged
        // prototype belongs to the prototype.
        let existing = object
            .read()
            .property(TRACE_ID_PROPERTY)
            .and_then(|property| property.value.as_number());
        if let Some(id) = existing {
            return id as u64;
        }

        let id = self.ids.allocate();
        if !object.write().define(TRACE_ID_PROPERTY, Property::sealed(Value::Number(id as f64))) {
            tracing::debug!(id, "object refused its trace id; identity will not be stable");
        }
        id
    }

    /// `key in object`, pretending the trace id property does not exist.
    pub fn proxy_in_operator(&self, key: &Value, object: &Value) -> Result<bool, RuntimeError> {
        let Some(target) = object.as_object() else {
            return Err(RuntimeError::TypeError(format!(
                "Cannot use 'in' operator to search for '{key}' in {object}"
            )));
        };
        let name = super::coerce::to_js_string(key)?;
        if name == TRACE_ID_PROPERTY {
            return Ok(false);
        }
        Ok(target.has_property(&name))
    }
}

impl Drop for ObjectHooks {
    fn drop(&mut self) {
        self.clear();
    }
}
