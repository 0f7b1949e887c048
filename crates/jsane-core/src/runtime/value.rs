//! Host object model the runtime checks operate on.
//!
//! Values mirror the language's types closely enough for the checks to
//! classify them: primitives, ordinary objects with a prototype chain,
//! arrays and callable functions. Objects are shared through [`ObjectRef`]
//! and compare by identity.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::coerce::number_to_string;
use super::errors::RuntimeError;

/// Signature of a callable's body: `(this, arguments) -> result`.
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
    Object(ObjectRef),
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Value::String(Arc::from(text.as_ref()))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(ObjectRef::new(object))
    }

    /// Empty ordinary object.
    pub fn plain_object() -> Self {
        Self::object(Object::ordinary())
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Self::object(Object::array(elements))
    }

    /// Function defined by program source. `source` is what
    /// `Function.prototype.toString` would return for it.
    pub fn script_function<F>(name: &str, arity: usize, source: &str, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self::object(Object::function(FunctionData {
            name: name.to_string(),
            arity,
            source: FunctionSource::Script(source.to_string()),
            call: Arc::new(body),
        }))
    }

    /// Built-in function without decompilable source.
    pub fn native_function<F>(name: &str, arity: usize, body: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Self::object(Object::function(FunctionData {
            name: name.to_string(),
            arity,
            source: FunctionSource::Native,
            call: Arc::new(body),
        }))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        self.as_object().map(ObjectRef::is_callable).unwrap_or(false)
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(object) if object.is_callable() => "function",
            Value::Object(_) => "object",
        }
    }

    /// Short human-readable rendering for trace output: strings quoted,
    /// everything else as its string conversion.
    pub fn describe(&self) -> String {
        match self {
            Value::String(s) => serde_json::to_string(&**s).unwrap_or_else(|_| format!("'{s}'")),
            other => other.to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl PartialEq for Value {
    /// Strict equality, except that `NaN` equals itself so results can be
    /// compared in tests.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(object) => write!(f, "{object:?}"),
        }
    }
}

/// String conversion that never runs program code: ordinary objects render
/// as `[object Object]` even when they define their own `toString`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Object(object) => write!(f, "{}", object.display(0)),
        }
    }
}

/// How a function's source can be recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionSource {
    Script(String),
    Native,
}

#[derive(Clone)]
pub struct FunctionData {
    pub name: String,
    /// Declared parameter count (`fn.length`).
    pub arity: usize,
    pub source: FunctionSource,
    pub call: NativeFn,
}

impl FunctionData {
    /// What `Function.prototype.toString` yields.
    pub fn source_text(&self) -> String {
        match &self.source {
            FunctionSource::Script(text) => text.clone(),
            FunctionSource::Native => format!("function {}() {{ [native code] }}", self.name),
        }
    }

    pub fn is_native(&self) -> bool {
        self.source == FunctionSource::Native
    }
}

impl fmt::Debug for FunctionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionData")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub value: Value,
    pub enumerable: bool,
    pub writable: bool,
    pub configurable: bool,
}

impl Property {
    /// Property as created by plain assignment.
    pub fn data(value: Value) -> Self {
        Self {
            value,
            enumerable: true,
            writable: true,
            configurable: true,
        }
    }

    /// Non-enumerable, non-writable, non-configurable.
    pub fn sealed(value: Value) -> Self {
        Self {
            value,
            enumerable: false,
            writable: false,
            configurable: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(FunctionData),
}

#[derive(Debug, Clone)]
pub struct Object {
    pub kind: ObjectKind,
    pub prototype: Option<ObjectRef>,
    properties: IndexMap<String, Property>,
}

impl Object {
    pub fn ordinary() -> Self {
        Self::with_kind(ObjectKind::Ordinary)
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Self::with_kind(ObjectKind::Array(elements))
    }

    pub fn function(data: FunctionData) -> Self {
        Self::with_kind(ObjectKind::Function(data))
    }

    fn with_kind(kind: ObjectKind) -> Self {
        Self {
            kind,
            prototype: None,
            properties: IndexMap::new(),
        }
    }

    pub fn with_prototype(mut self, prototype: ObjectRef) -> Self {
        self.prototype = Some(prototype);
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), Property::data(value));
        self
    }

    fn array_index(&self, key: &str) -> Option<usize> {
        match self.kind {
            ObjectKind::Array(_) => key.parse::<usize>().ok().filter(|index| index.to_string() == key),
            _ => None,
        }
    }

    /// Own property lookup, including the virtual `length`/index
    /// properties of arrays and `length`/`name` of functions.
    pub fn get_own(&self, key: &str) -> Option<Value> {
        if let Some(property) = self.properties.get(key) {
            return Some(property.value.clone());
        }
        match &self.kind {
            ObjectKind::Array(elements) => {
                if key == "length" {
                    return Some(Value::Number(elements.len() as f64));
                }
                self.array_index(key).and_then(|index| elements.get(index).cloned())
            }
            ObjectKind::Function(data) => match key {
                "length" => Some(Value::Number(data.arity as f64)),
                "name" => Some(Value::string(&data.name)),
                _ => None,
            },
            ObjectKind::Ordinary => None,
        }
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.get_own(key).is_some()
    }

    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    /// Every own key, enumerable or not, in creation order.
    pub fn own_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        match &self.kind {
            ObjectKind::Array(elements) => {
                keys.extend((0..elements.len()).map(|index| index.to_string()));
                keys.push("length".to_string());
            }
            ObjectKind::Function(_) => {
                keys.push("length".to_string());
                keys.push("name".to_string());
            }
            ObjectKind::Ordinary => {}
        }
        keys.extend(self.properties.keys().cloned());
        keys
    }

    /// Keys seen by `for..in` and `Object.keys`.
    pub fn enumerable_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let ObjectKind::Array(elements) = &self.kind {
            keys.extend((0..elements.len()).map(|index| index.to_string()));
        }
        keys.extend(
            self.properties
                .iter()
                .filter(|(_, property)| property.enumerable)
                .map(|(key, _)| key.clone()),
        );
        keys
    }

    /// Assignment semantics: returns `false` when the property is read-only.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if let Some(index) = self.array_index(key) {
            if let ObjectKind::Array(elements) = &mut self.kind {
                if index >= elements.len() {
                    elements.resize(index + 1, Value::Undefined);
                }
                elements[index] = value;
                return true;
            }
        }
        match self.properties.get_mut(key) {
            Some(property) if !property.writable => false,
            Some(property) => {
                property.value = value;
                true
            }
            None => {
                self.properties.insert(key.to_string(), Property::data(value));
                true
            }
        }
    }

    /// `Object.defineProperty`: fails on an existing non-configurable key.
    pub fn define(&mut self, key: &str, property: Property) -> bool {
        if matches!(self.properties.get(key), Some(existing) if !existing.configurable) {
            return false;
        }
        self.properties.insert(key.to_string(), property);
        true
    }

    /// The `delete` operator on an own data property.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(existing) if !existing.configurable => false,
            Some(_) => {
                self.properties.shift_remove(key);
                true
            }
            None => true,
        }
    }
}

/// Shared, identity-compared handle to an [`Object`].
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Object>>);

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        Self(Arc::new(RwLock::new(object)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.0.write()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.read().kind, ObjectKind::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.read().kind, ObjectKind::Array(_))
    }

    pub fn function_data(&self) -> Option<FunctionData> {
        match &self.read().kind {
            ObjectKind::Function(data) => Some(data.clone()),
            _ => None,
        }
    }

    /// Property lookup along the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut cursor = Some(self.clone());
        while let Some(object) = cursor {
            let guard = object.read();
            if let Some(value) = guard.get_own(key) {
                return Some(value);
            }
            cursor = guard.prototype.clone();
        }
        None
    }

    /// The `in` operator without any hiding.
    pub fn has_property(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&self, key: &str, value: Value) -> bool {
        self.write().set(key, value)
    }

    /// Invoke the object as a function. No lock is held during the call.
    pub fn call(&self, this: &Value, arguments: &[Value]) -> Result<Value, RuntimeError> {
        let body = match &self.read().kind {
            ObjectKind::Function(data) => Some(data.call.clone()),
            _ => None,
        };
        match body {
            Some(body) => body(this, arguments),
            None => Err(RuntimeError::NotCallable {
                callee: self.display(0),
            }),
        }
    }

    fn display(&self, depth: usize) -> String {
        let elements = {
            let guard = self.read();
            match &guard.kind {
                ObjectKind::Ordinary => return "[object Object]".to_string(),
                ObjectKind::Function(data) => return data.source_text(),
                ObjectKind::Array(elements) => elements.clone(),
            }
        };
        // Nested self-references render empty.
        if depth > 8 {
            return String::new();
        }
        elements
            .iter()
            .map(|element| match element {
                Value::Undefined | Value::Null => String::new(),
                Value::Object(inner) if inner.ptr_eq(self) => String::new(),
                Value::Object(inner) => inner.display(depth + 1),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.read();
        match &guard.kind {
            ObjectKind::Ordinary => write!(f, "Object({} keys)", guard.properties.len()),
            ObjectKind::Array(elements) => write!(f, "Array({})", elements.len()),
            ObjectKind::Function(data) => write!(f, "Function({})", data.name),
        }
    }
}
