//! Runtime value representation and numeric semantics.
//!
//! Values carry their WebAssembly type. Host-numeric input is normalised on
//! entry: integer coercion truncates and wraps two's-complement (an `i32`
//! holds `floor(x) mod 2^32`), floats pass through at the declared width.
//! The binary operator table follows IEEE 754 for floats (including the
//! zero-sign rules for `min`/`max` and NaN propagation) and wrapping
//! arithmetic for integers.

use super::Trap;
use crate::ast::{NumberValue, Valtype};
use fhex::ToHex;
use std::fmt;

/// Runtime representation of a typed value.
///
/// `Label` is the non-numeric member: block labels pushed on a frame's
/// label stack share this representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Label(String),
}

impl Value {
    /// The valtype of this value; `None` for labels.
    #[must_use]
    pub fn valtype(&self) -> Option<Valtype> {
        match self {
            Value::I32(_) => Some(Valtype::I32),
            Value::I64(_) => Some(Valtype::I64),
            Value::F32(_) => Some(Valtype::F32),
            Value::F64(_) => Some(Valtype::F64),
            Value::Label(_) => None,
        }
    }

    /// The type's name, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Label(_) => "label",
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
            Value::Label(l) => write!(f, "label:{l}"),
        }
    }
}

// ============================================================================
// Coercion
// ============================================================================

/// Normalise a host float into a value of the given type.
///
/// Integer targets truncate with `floor` and wrap modulo 2^N; floats pass
/// through at the declared width. Non-finite input coerced to an integer
/// becomes zero.
pub fn create_value(ty: Valtype, x: f64) -> Value {
    match ty {
        Valtype::I32 => {
            if x.is_finite() {
                // floor(x) mod 2^32, then reinterpreted as signed
                Value::I32(x.floor().rem_euclid(4294967296.0) as u32 as i32)
            } else {
                Value::I32(0)
            }
        }
        Valtype::I64 => {
            if x.is_finite() {
                Value::I64(x.floor().rem_euclid(18446744073709551616.0) as u64 as i64)
            } else {
                Value::I64(0)
            }
        }
        Valtype::F32 => Value::F32(x as f32),
        Valtype::F64 => Value::F64(x),
    }
}

/// Coerce a decoded literal into a stack value of the given type.
///
/// Same-width integers pass bits through; an integer landing in a wider
/// slot sign-extends; floats feeding an integer slot go through
/// [`create_value`] truncation.
pub fn cast_into_value(ty: Valtype, n: &NumberValue) -> Value {
    match (ty, n) {
        (Valtype::I32, NumberValue::I32(v)) => Value::I32(*v),
        (Valtype::I32, NumberValue::I64(v)) => Value::I32(*v as i32),
        (Valtype::I32, NumberValue::F32(v)) => create_value(ty, *v as f64),
        (Valtype::I32, NumberValue::F64(v)) => create_value(ty, *v),
        (Valtype::I64, NumberValue::I32(v)) => Value::I64(*v as i64),
        (Valtype::I64, NumberValue::I64(v)) => Value::I64(*v),
        (Valtype::I64, NumberValue::F32(v)) => create_value(ty, *v as f64),
        (Valtype::I64, NumberValue::F64(v)) => create_value(ty, *v),
        (Valtype::F32, NumberValue::I32(v)) => Value::F32(*v as f32),
        (Valtype::F32, NumberValue::I64(v)) => Value::F32(*v as f32),
        (Valtype::F32, NumberValue::F32(v)) => Value::F32(*v),
        (Valtype::F32, NumberValue::F64(v)) => Value::F32(*v as f32),
        (Valtype::F64, NumberValue::I32(v)) => Value::F64(*v as f64),
        (Valtype::F64, NumberValue::I64(v)) => Value::F64(*v as f64),
        (Valtype::F64, NumberValue::F32(v)) => Value::F64(*v as f64),
        (Valtype::F64, NumberValue::F64(v)) => Value::F64(*v),
    }
}

/// The zero value of a valtype, used for declared locals.
pub fn default_value(ty: Valtype) -> Value {
    match ty {
        Valtype::I32 => Value::I32(0),
        Valtype::I64 => Value::I64(0),
        Valtype::F32 => Value::F32(0.0),
        Valtype::F64 => Value::F64(0.0),
    }
}

// ============================================================================
// Binary operators
// ============================================================================

/// Apply a binary operator at the given type. `c1` is the deeper operand.
///
/// Integer division by zero traps; an unsupported `(type, op)` pair traps.
/// Operands of the wrong type also trap (callers normally pre-check via
/// the frame's typed pop).
pub fn binop(object: Valtype, op: &str, c1: &Value, c2: &Value) -> Result<Value, Trap> {
    match object {
        Valtype::I32 => {
            let (a, b) = match (c1.as_i32(), c2.as_i32()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(type_trap("i32", c1, c2)),
            };
            i32_binop(op, a, b)
        }
        Valtype::I64 => {
            let (a, b) = match (c1.as_i64(), c2.as_i64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(type_trap("i64", c1, c2)),
            };
            i64_binop(op, a, b)
        }
        Valtype::F32 => {
            let (a, b) = match (c1.as_f32(), c2.as_f32()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(type_trap("f32", c1, c2)),
            };
            Ok(Value::F32(f32_binop(op, a, b).ok_or_else(|| unsupported("f32", op))?))
        }
        Valtype::F64 => {
            let (a, b) = match (c1.as_f64(), c2.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(type_trap("f64", c1, c2)),
            };
            Ok(Value::F64(f64_binop(op, a, b).ok_or_else(|| unsupported("f64", op))?))
        }
    }
}

fn type_trap(expected: &str, c1: &Value, c2: &Value) -> Trap {
    Trap::new(format!(
        "expected two {} operands, got {} and {}",
        expected,
        c1.type_name(),
        c2.type_name()
    ))
}

fn unsupported(object: &str, op: &str) -> Trap {
    Trap::new(format!("unsupported operation: {}.{}", object, op))
}

fn i32_binop(op: &str, a: i32, b: i32) -> Result<Value, Trap> {
    let result = match op {
        "add" => a.wrapping_add(b),
        "sub" => a.wrapping_sub(b),
        "mul" => a.wrapping_mul(b),
        "div" => {
            if b == 0 {
                return Err(Trap::new("integer divide by zero"));
            }
            a.wrapping_div(b)
        }
        "min" => a.min(b),
        "max" => a.max(b),
        _ => return Err(unsupported("i32", op)),
    };
    Ok(Value::I32(result))
}

fn i64_binop(op: &str, a: i64, b: i64) -> Result<Value, Trap> {
    let result = match op {
        "add" => a.wrapping_add(b),
        "sub" => a.wrapping_sub(b),
        "mul" => a.wrapping_mul(b),
        "div" => {
            if b == 0 {
                return Err(Trap::new("integer divide by zero"));
            }
            a.wrapping_div(b)
        }
        "min" => a.min(b),
        "max" => a.max(b),
        _ => return Err(unsupported("i64", op)),
    };
    Ok(Value::I64(result))
}

fn f32_binop(op: &str, a: f32, b: f32) -> Option<f32> {
    Some(match op {
        "add" => a + b,
        "sub" => a - b,
        "mul" => a * b,
        "div" => a / b,
        "min" => float_min_f32(a, b),
        "max" => float_max_f32(a, b),
        "copysign" => a.copysign(b),
        _ => return None,
    })
}

fn f64_binop(op: &str, a: f64, b: f64) -> Option<f64> {
    Some(match op {
        "add" => a + b,
        "sub" => a - b,
        "mul" => a * b,
        "div" => a / b,
        "min" => float_min_f64(a, b),
        "max" => float_max_f64(a, b),
        "copysign" => a.copysign(b),
        _ => return None,
    })
}

// min/max need the zero-sign and NaN rules from the execution spec:
// min(+0, -0) = -0, max(+0, -0) = +0, and any NaN operand wins.

fn float_min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == 0.0 && b == 0.0 && a.is_sign_negative() != b.is_sign_negative() {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else {
        a.min(b)
    }
}

fn float_max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::NAN
    } else if a == 0.0 && b == 0.0 && a.is_sign_negative() != b.is_sign_negative() {
        if a.is_sign_negative() {
            b
        } else {
            a
        }
    } else {
        a.max(b)
    }
}

fn float_min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == 0.0 && b == 0.0 && a.is_sign_negative() != b.is_sign_negative() {
        if a.is_sign_negative() {
            a
        } else {
            b
        }
    } else {
        a.min(b)
    }
}

fn float_max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == 0.0 && b == 0.0 && a.is_sign_negative() != b.is_sign_negative() {
        if a.is_sign_negative() {
            b
        } else {
            a
        }
    } else {
        a.max(b)
    }
}
