//! Numeric literal decoding.
//!
//! This is the sole place source-text numbers become runtime values. The
//! lexer delivers literals raw; the parser asks for a decode at the valtype
//! the consuming instruction demands (or `f64` when no opcode signature is
//! known).
//!
//! The grammar follows the text format: decimal and hexadecimal integers,
//! decimal and hexadecimal floats (`.`-fraction, `e`/`p` exponents),
//! `inf`, `nan`, and `nan:0x...` payloads. Underscores are permitted
//! between digits. Integer decoding wraps into the fixed-width target;
//! [`parse32i`] is the entry used for memory indices and offsets.

use crate::ast::{NumberValue, Valtype};
use std::fmt;

/// An error produced while decoding a numeric literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberError {
    pub message: String,
}

impl NumberError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for NumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for NumberError {}

/// Decode a raw literal at the given valtype.
pub fn decode(ty: Valtype, raw: &str) -> Result<NumberValue, NumberError> {
    match ty {
        Valtype::I32 => parse_i32(raw).map(NumberValue::I32),
        Valtype::I64 => parse_i64(raw).map(NumberValue::I64),
        Valtype::F32 => parse_f32(raw).map(NumberValue::F32),
        Valtype::F64 => parse_f64(raw).map(NumberValue::F64),
    }
}

/// Decode an integer literal with signed 32-bit semantics.
///
/// The value is decoded at 64 bits and wrapped into `i32`, so both `-1` and
/// `4294967295` denote the same bit pattern. This is the decode used for
/// memory indices and offsets.
pub fn parse32i(raw: &str) -> Result<i32, NumberError> {
    parse_i32(raw)
}

/// Decode an i32 literal (sign-extending/wrapping from the 64-bit decode).
pub fn parse_i32(raw: &str) -> Result<i32, NumberError> {
    parse_i64(raw).map(|v| v as i32)
}

/// Decode an i64 literal.
pub fn parse_i64(raw: &str) -> Result<i64, NumberError> {
    let (negative, body) = split_sign(raw);
    let magnitude = parse_magnitude(body, raw)?;
    if negative {
        Ok((magnitude as i64).wrapping_neg())
    } else {
        Ok(magnitude as i64)
    }
}

/// Decode an f32 literal.
pub fn parse_f32(raw: &str) -> Result<f32, NumberError> {
    let (negative, body) = split_sign(raw);

    if body == "inf" {
        return Ok(signed_f32(f32::INFINITY, negative));
    }
    if body == "nan" {
        return Ok(signed_f32(f32::NAN, negative));
    }
    if let Some(payload) = body.strip_prefix("nan:0x") {
        let payload = parse_nan_payload(payload, raw, 23)?;
        let bits = (if negative { 1u32 << 31 } else { 0 }) | 0x7F80_0000 | payload as u32;
        return Ok(f32::from_bits(bits));
    }

    // f32 rounds from the f64 decode; the dialect's literals stay well
    // within the range where this is exact enough.
    parse_finite_float(body, raw).map(|v| signed_f32(v as f32, negative))
}

/// Decode an f64 literal.
pub fn parse_f64(raw: &str) -> Result<f64, NumberError> {
    let (negative, body) = split_sign(raw);

    if body == "inf" {
        return Ok(signed_f64(f64::INFINITY, negative));
    }
    if body == "nan" {
        return Ok(signed_f64(f64::NAN, negative));
    }
    if let Some(payload) = body.strip_prefix("nan:0x") {
        let payload = parse_nan_payload(payload, raw, 52)?;
        let bits = (if negative { 1u64 << 63 } else { 0 }) | 0x7FF0_0000_0000_0000 | payload;
        return Ok(f64::from_bits(bits));
    }

    parse_finite_float(body, raw).map(|v| signed_f64(v, negative))
}

// ============================================================================
// Helpers
// ============================================================================

fn split_sign(raw: &str) -> (bool, &str) {
    if let Some(rest) = raw.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = raw.strip_prefix('+') {
        (false, rest)
    } else {
        (false, raw)
    }
}

fn signed_f32(v: f32, negative: bool) -> f32 {
    if negative {
        -v
    } else {
        v
    }
}

fn signed_f64(v: f64, negative: bool) -> f64 {
    if negative {
        -v
    } else {
        v
    }
}

fn strip_underscores(body: &str) -> String {
    body.chars().filter(|&c| c != '_').collect()
}

/// Parse the unsigned magnitude of an integer literal (decimal or `0x` hex).
fn parse_magnitude(body: &str, raw: &str) -> Result<u64, NumberError> {
    let clean = strip_underscores(body);
    let result = if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        if hex.is_empty() {
            return Err(NumberError::new(format!("expected hex digits: {}", raw)));
        }
        u64::from_str_radix(hex, 16)
    } else {
        if clean.is_empty() {
            return Err(NumberError::new(format!("expected digits: {}", raw)));
        }
        clean.parse::<u64>()
    };

    result.map_err(|_| NumberError::new(format!("integer constant out of range: {}", raw)))
}

/// Parse a NaN payload, rejecting zero and out-of-range significands.
fn parse_nan_payload(payload: &str, raw: &str, significand_bits: u32) -> Result<u64, NumberError> {
    let clean = strip_underscores(payload);
    let value = u64::from_str_radix(&clean, 16)
        .map_err(|_| NumberError::new(format!("invalid nan payload: {}", raw)))?;
    if value == 0 || value >= 1u64 << significand_bits {
        return Err(NumberError::new(format!("nan payload out of range: {}", raw)));
    }
    Ok(value)
}

/// Parse a finite float body (no sign, not inf/nan): decimal or hex.
fn parse_finite_float(body: &str, raw: &str) -> Result<f64, NumberError> {
    let clean = strip_underscores(body);

    if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        return parse_hex_float(hex, raw);
    }

    clean
        .parse::<f64>()
        .map_err(|_| NumberError::new(format!("invalid float literal: {}", raw)))
}

/// Parse a hex float body (after `0x`): `hexnum ['.' hexfrac] [('p'|'P') exp]`.
///
/// Accumulates the mantissa in floating point and scales by the binary
/// exponent. A plain hex integer (no `.` or `p`) is also accepted here,
/// since large hex constants are only meaningful in float contexts.
fn parse_hex_float(body: &str, raw: &str) -> Result<f64, NumberError> {
    let (mantissa_str, exponent) = match body.find(['p', 'P']) {
        Some(i) => {
            let exp_str = &body[i + 1..];
            let exp = exp_str
                .parse::<i32>()
                .map_err(|_| NumberError::new(format!("invalid hex float exponent: {}", raw)))?;
            (&body[..i], exp)
        }
        None => (body, 0),
    };

    let (int_part, frac_part) = match mantissa_str.find('.') {
        Some(i) => (&mantissa_str[..i], &mantissa_str[i + 1..]),
        None => (mantissa_str, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(NumberError::new(format!("invalid hex float: {}", raw)));
    }

    let mut value = 0.0f64;
    for c in int_part.chars() {
        let digit = c
            .to_digit(16)
            .ok_or_else(|| NumberError::new(format!("invalid hex digit in: {}", raw)))?;
        value = value * 16.0 + digit as f64;
    }

    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        let digit = c
            .to_digit(16)
            .ok_or_else(|| NumberError::new(format!("invalid hex digit in: {}", raw)))?;
        value += digit as f64 * scale;
        scale /= 16.0;
    }

    Ok(value * 2f64.powi(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NumberValue, Valtype};

    // ------------------------------------------------------------------------
    // Integers
    // ------------------------------------------------------------------------

    #[test]
    fn decimal_integers() {
        assert_eq!(parse_i32("0").unwrap(), 0);
        assert_eq!(parse_i32("42").unwrap(), 42);
        assert_eq!(parse_i32("-42").unwrap(), -42);
        assert_eq!(parse_i32("+7").unwrap(), 7);
        assert_eq!(parse_i64("9223372036854775807").unwrap(), i64::MAX);
        assert_eq!(parse_i64("-9223372036854775808").unwrap(), i64::MIN);
    }

    #[test]
    fn hex_integers() {
        assert_eq!(parse_i32("0x2a").unwrap(), 42);
        assert_eq!(parse_i32("-0x10").unwrap(), -16);
        assert_eq!(parse_i64("0xffffffffffffffff").unwrap(), -1);
    }

    #[test]
    fn underscores_between_digits() {
        assert_eq!(parse_i32("1_000_000").unwrap(), 1_000_000);
        assert_eq!(parse_i64("0xdead_beef").unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn signed_32_bit_wrap() {
        // The full unsigned range denotes the same bits as its signed twin.
        assert_eq!(parse32i("4294967295").unwrap(), -1);
        assert_eq!(parse32i("0xffffffff").unwrap(), -1);
        assert_eq!(parse32i("-2147483648").unwrap(), i32::MIN);
        assert_eq!(parse32i("2147483648").unwrap(), i32::MIN);
    }

    #[test]
    fn integer_errors() {
        assert!(parse_i32("").is_err());
        assert!(parse_i32("0x").is_err());
        assert!(parse_i32("abc").is_err());
        assert!(parse_i64("99999999999999999999999").is_err());
    }

    // ------------------------------------------------------------------------
    // Floats
    // ------------------------------------------------------------------------

    #[test]
    fn decimal_floats() {
        assert_eq!(parse_f64("1.5").unwrap(), 1.5);
        assert_eq!(parse_f64("-0.25").unwrap(), -0.25);
        assert_eq!(parse_f64("1e3").unwrap(), 1000.0);
        assert_eq!(parse_f64("2.5e-2").unwrap(), 0.025);
        assert_eq!(parse_f64("4.").unwrap(), 4.0);
        assert_eq!(parse_f32("0.5").unwrap(), 0.5);
    }

    #[test]
    fn integers_decode_as_floats_when_asked() {
        assert_eq!(parse_f64("42").unwrap(), 42.0);
        assert_eq!(parse_f64("0x10").unwrap(), 16.0);
        assert_eq!(parse_f32("-3").unwrap(), -3.0);
    }

    #[test]
    fn hex_floats() {
        assert_eq!(parse_f64("0x1p4").unwrap(), 16.0);
        assert_eq!(parse_f64("0x1.8p1").unwrap(), 3.0);
        assert_eq!(parse_f64("0x1.921fb54442d18p+1").unwrap(), std::f64::consts::PI);
        assert_eq!(parse_f64("-0x1p-1").unwrap(), -0.5);
        assert_eq!(parse_f32("0x1.8p0").unwrap(), 1.5);
    }

    #[test]
    fn infinities() {
        assert_eq!(parse_f64("inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_f64("-inf").unwrap(), f64::NEG_INFINITY);
        assert_eq!(parse_f32("-inf").unwrap(), f32::NEG_INFINITY);
    }

    #[test]
    fn nans() {
        assert!(parse_f64("nan").unwrap().is_nan());
        assert!(parse_f64("-nan").unwrap().is_nan());
        assert!(parse_f64("-nan").unwrap().is_sign_negative());

        let payload = parse_f64("nan:0x123").unwrap();
        assert!(payload.is_nan());
        assert_eq!(payload.to_bits() & 0xF_FFFF_FFFF_FFFF, 0x123);

        let payload32 = parse_f32("nan:0x200000").unwrap();
        assert!(payload32.is_nan());
        assert_eq!(payload32.to_bits() & 0x7F_FFFF, 0x200000);
    }

    #[test]
    fn negative_zero_keeps_its_sign() {
        assert!(parse_f64("-0.0").unwrap().is_sign_negative());
        assert!(parse_f32("-0").unwrap().is_sign_negative());
    }

    #[test]
    fn float_errors() {
        assert!(parse_f64("1.5.5").is_err());
        assert!(parse_f64("nan:0x0").is_err());
        assert!(parse_f32("nan:0x800000").is_err());
        assert!(parse_f64("0x.p1").is_err());
    }

    // ------------------------------------------------------------------------
    // Typed decode
    // ------------------------------------------------------------------------

    #[test]
    fn decode_follows_the_requested_valtype() {
        assert_eq!(decode(Valtype::I32, "42").unwrap(), NumberValue::I32(42));
        assert_eq!(decode(Valtype::I64, "42").unwrap(), NumberValue::I64(42));
        assert_eq!(decode(Valtype::F32, "42").unwrap(), NumberValue::F32(42.0));
        assert_eq!(decode(Valtype::F64, "42").unwrap(), NumberValue::F64(42.0));
    }
}
