//! Lenient field deserializers for catalog JSON
//!
//! The catalog is hand-maintained and the same numeric field shows up as a
//! JSON number in one record and a string in the next. These helpers accept
//! both shapes; a missing or null value becomes zero.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn parse_int_str(s: &str) -> Result<i64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .map_err(|e| format!("invalid hex number {:?}: {}", s, e));
    }
    s.parse::<i64>()
        .map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn value_to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("number {} is not an integer", n)),
        Value::String(s) => parse_int_str(s),
        other => Err(format!("expected a number, found {}", other)),
    }
}

/// Integer given as a number or a decimal/`0x` hex string
pub fn int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_i64(&value).map_err(D::Error::custom)
}

/// Like [`int`], narrowed to the field's integer type
pub fn int_as<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let n = int(deserializer)?;
    T::try_from(n).map_err(|_| D::Error::custom(format!("number {} is out of range", n)))
}

/// Bitmask given as a number or a hex string with or without `0x`
pub fn hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("bitmask {} is not an unsigned integer", n))),
        Value::String(s) => {
            let s = s.trim();
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s);
            if digits.is_empty() {
                return Ok(0);
            }
            u64::from_str_radix(digits, 16)
                .map_err(|e| D::Error::custom(format!("invalid bitmask {:?}: {}", s, e)))
        }
        other => Err(D::Error::custom(format!("expected a bitmask, found {}", other))),
    }
}

/// Flag given as "1"/"0", "true"/"false", a boolean or a number
pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => {
            let s = s.trim();
            Ok(s == "1" || s.eq_ignore_ascii_case("true"))
        }
        other => Err(D::Error::custom(format!("expected a flag, found {}", other))),
    }
}

/// Manufacturer reference given as a number or a string
///
/// Strings are hex when `0x`-prefixed or written as four zero-padded hex
/// digits ("0086", "000C"), the way device references are; other strings are
/// decimal. Unlike [`int`] a missing value is an error, since the reference is
/// part of the lookup key.
pub fn reference<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let n = match &value {
        Value::Null => return Err(D::Error::custom("empty manufacturer reference")),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(D::Error::custom("empty manufacturer reference"));
            }
            if s.len() == 4 && s.chars().all(|c| c.is_ascii_hexdigit()) {
                i64::from_str_radix(s, 16).map_err(D::Error::custom)?
            } else {
                parse_int_str(s).map_err(D::Error::custom)?
            }
        }
        other => value_to_i64(other).map_err(D::Error::custom)?,
    };
    u32::try_from(n)
        .map_err(|_| D::Error::custom(format!("manufacturer reference {} is out of range", n)))
}

/// Optional string that may also be given as a number
pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!("expected a string, found {}", other))),
    }
}
