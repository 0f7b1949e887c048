//! The language's implicit conversions, as far as arithmetic needs them.
//!
//! Hosts use [`binary_operation`] to compute the `result` they hand to
//! `arithmetic_check`, so the checks see exactly what the program would.

use super::errors::RuntimeError;
use super::value::Value;

/// `Number::toString` for radix 10.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let magnitude = n.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return n.to_string();
    }
    let formatted = format!("{n:e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => format!("{mantissa}e+{exponent}"),
        _ => formatted,
    }
}

/// `ToNumber` for strings.
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if unsigned.starts_with(['+', '-']) {
        return f64::NAN;
    }
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    let radix = match unsigned.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        // Signed non-decimal literals are not numbers.
        if sign < 0.0 || trimmed.starts_with('+') {
            return f64::NAN;
        }
        return u64::from_str_radix(&unsigned[2..], radix)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    let well_formed = unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !well_formed {
        return f64::NAN;
    }
    unsigned.parse::<f64>().map(|n| sign * n).unwrap_or(f64::NAN)
}

/// `ToPrimitive`. Ordinary objects call their `toString` when one is
/// reachable on the prototype chain.
pub fn to_primitive(value: &Value) -> Result<Value, RuntimeError> {
    let Value::Object(object) = value else {
        return Ok(value.clone());
    };
    if object.is_array() || object.is_callable() {
        return Ok(Value::string(value.to_string()));
    }
    match object.get("toString") {
        Some(method) if method.is_callable() => {
            let converted = method
                .as_object()
                .map(|function| function.call(value, &[]))
                .unwrap_or(Ok(Value::Undefined))?;
            if converted.as_object().is_some() {
                return Err(RuntimeError::TypeError(
                    "Cannot convert object to primitive value".to_string(),
                ));
            }
            Ok(converted)
        }
        _ => Ok(Value::string("[object Object]")),
    }
}

pub fn to_number(value: &Value) -> Result<f64, RuntimeError> {
    Ok(match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Number(n) => *n,
        Value::String(s) => string_to_number(s),
        Value::Object(_) => return to_number(&to_primitive(value)?),
    })
}

pub fn to_js_string(value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::Object(_) => Ok(to_primitive(value)?.to_string()),
        other => Ok(other.to_string()),
    }
}

/// `ToInt32`.
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    modulo as u32 as i32
}

/// Evaluate `left op right` with the language's coercions.
pub fn binary_operation(operator: &str, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    if operator == "+" {
        let left = to_primitive(left)?;
        let right = to_primitive(right)?;
        if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
            return Ok(Value::string(format!("{}{}", to_js_string(&left)?, to_js_string(&right)?)));
        }
        return Ok(Value::Number(to_number(&left)? + to_number(&right)?));
    }

    let l = to_number(left)?;
    let r = to_number(right)?;
    let result = match operator {
        "-" => l - r,
        "*" => l * r,
        "/" => l / r,
        "%" => l % r,
        "**" => l.powf(r),
        "|" => f64::from(to_int32(l) | to_int32(r)),
        "&" => f64::from(to_int32(l) & to_int32(r)),
        "^" => f64::from(to_int32(l) ^ to_int32(r)),
        "<<" => f64::from(to_int32(l).wrapping_shl(to_int32(r) as u32 & 31)),
        ">>" => f64::from(to_int32(l).wrapping_shr(to_int32(r) as u32 & 31)),
        ">>>" => f64::from((to_int32(l) as u32).wrapping_shr(to_int32(r) as u32 & 31)),
        other => {
            return Err(RuntimeError::TypeError(format!("unsupported operator '{other}'")));
        }
    };
    Ok(Value::Number(result))
}
