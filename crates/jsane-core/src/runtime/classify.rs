//! Operand classification used by the arithmetic checks.

use super::value::{ObjectKind, ObjectRef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    FiniteNumber,
    NonFiniteNumber,
    String,
    Array,
    /// Ordinary object whose `toString` is the default one.
    PlainObject,
    /// Anything else: functions, objects with their own string conversion,
    /// booleans, `null` and `undefined`.
    Other,
}

pub fn classify(value: &Value) -> ValueClass {
    match value {
        Value::Number(n) if n.is_finite() => ValueClass::FiniteNumber,
        Value::Number(_) => ValueClass::NonFiniteNumber,
        Value::String(_) => ValueClass::String,
        Value::Object(object) if object.is_array() => ValueClass::Array,
        Value::Object(object) if has_bad_string_conversion(object) => ValueClass::PlainObject,
        _ => ValueClass::Other,
    }
}

pub fn is_finite_number(value: &Value) -> bool {
    classify(value) == ValueClass::FiniteNumber
}

pub fn is_string(value: &Value) -> bool {
    matches!(value, Value::String(_))
}

pub fn is_object(value: &Value) -> bool {
    matches!(value, Value::Object(_))
}

pub fn is_array(value: &Value) -> bool {
    value.as_object().map(ObjectRef::is_array).unwrap_or(false)
}

/// An ordinary object whose string conversion falls through to the default
/// `[object Object]`. Arrays and functions have their own conversions.
pub fn has_bad_string_conversion(object: &ObjectRef) -> bool {
    if !matches!(object.read().kind, ObjectKind::Ordinary) {
        return false;
    }
    !object.get("toString").map(|method| method.is_callable()).unwrap_or(false)
}

/// Values worth recording provenance for: everything except finite numbers
/// and objects.
pub fn should_trace(value: &Value) -> bool {
    !is_finite_number(value) && !is_object(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify(&Value::Number(1.5)), ValueClass::FiniteNumber);
        assert_eq!(classify(&Value::Number(f64::NAN)), ValueClass::NonFiniteNumber);
        assert_eq!(classify(&Value::string("x")), ValueClass::String);
        assert_eq!(classify(&Value::array(vec![])), ValueClass::Array);
        assert_eq!(classify(&Value::plain_object()), ValueClass::PlainObject);
        assert_eq!(classify(&Value::Null), ValueClass::Other);
        assert_eq!(
            classify(&Value::native_function("f", 0, |_, _| Ok(Value::Undefined))),
            ValueClass::Other
        );
    }

    #[test]
    fn test_inherited_to_string_counts_as_proper_conversion() {
        let prototype = Value::plain_object();
        let prototype = prototype.as_object().unwrap().clone();
        prototype.set(
            "toString",
            Value::script_function("toString", 0, "function () { return 'point'; }", |_, _| {
                Ok(Value::string("point"))
            }),
        );
        let instance = Value::object(crate::runtime::value::Object::ordinary().with_prototype(prototype));
        assert_eq!(classify(&instance), ValueClass::Other);
    }

    #[test]
    fn test_should_trace() {
        assert!(should_trace(&Value::Undefined));
        assert!(should_trace(&Value::Null));
        assert!(should_trace(&Value::Number(f64::INFINITY)));
        assert!(should_trace(&Value::string("3")));
        assert!(!should_trace(&Value::Number(3.0)));
        assert!(!should_trace(&Value::plain_object()));
    }
}
