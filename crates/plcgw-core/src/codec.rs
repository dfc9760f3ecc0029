// ── Value codec ──
//
// Pure conversions between data block bytes and typed point values.
// Multi-byte types are big-endian on the wire. Scaling applies on decode
// only; writes are always in raw controller units.

use thiserror::Error;

use crate::model::{DataType, PlcValue, PointDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("bit offset {0} is outside 0..=7")]
    BitOffset(u8),

    #[error("{found} value cannot be written to a {expected} point")]
    TypeMismatch {
        expected: DataType,
        found: &'static str,
    },

    #[error("{value} is out of range for {data_type}")]
    OutOfRange { value: String, data_type: DataType },

    #[error("string of {len} bytes exceeds the {max}-byte field")]
    StringTooLong { len: usize, max: usize },

    #[error("character {0:?} cannot be encoded as a single byte")]
    NonLatin1(char),

    #[error("controller returned a non-finite REAL")]
    NonFinite,
}

/// Bytes to send for a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePlan {
    /// Overwrite the point's bytes.
    Replace(Vec<u8>),
    /// Set or clear one bit: the caller reads the current byte, applies
    /// [`WritePlan::apply_bit`] and writes the byte back.
    Bit { bit: u8, on: bool },
}

impl WritePlan {
    /// The byte to write back for a `Bit` plan given the byte read from
    /// the controller. `Replace` plans ignore `current`.
    pub fn apply_bit(&self, current: u8) -> u8 {
        match *self {
            Self::Bit { bit, on } => set_bit(current, bit, on),
            Self::Replace(_) => current,
        }
    }
}

/// Set or clear bit `bit` of `byte`, leaving every other bit unchanged.
pub fn set_bit(byte: u8, bit: u8, on: bool) -> u8 {
    let mask = 1u8 << (bit & 0x07);
    if on { byte | mask } else { byte & !mask }
}

// ── Decode ───────────────────────────────────────────────────────────

/// Decode the bytes read for `point` into its value, applying scale and
/// precision to numeric types.
pub fn decode(buf: &[u8], point: &PointDefinition) -> Result<PlcValue, CodecError> {
    let expected = point.byte_len();
    if buf.len() != expected {
        return Err(CodecError::Length {
            expected,
            actual: buf.len(),
        });
    }

    let raw = match point.data_type {
        DataType::Bool => {
            let byte = buf[0];
            let on = match point.bit {
                Some(bit) if bit > 7 => return Err(CodecError::BitOffset(bit)),
                Some(bit) => byte & (1 << bit) != 0,
                None => byte != 0,
            };
            PlcValue::Bool(on)
        }
        DataType::Byte => PlcValue::Int(i64::from(buf[0])),
        DataType::Word => PlcValue::Int(i64::from(u16::from_be_bytes(be(buf)?))),
        DataType::Int => PlcValue::Int(i64::from(i16::from_be_bytes(be(buf)?))),
        DataType::Dword => PlcValue::Int(i64::from(u32::from_be_bytes(be(buf)?))),
        DataType::Dint => PlcValue::Int(i64::from(i32::from_be_bytes(be(buf)?))),
        DataType::Real => {
            let value = f32::from_be_bytes(be(buf)?);
            if !value.is_finite() {
                return Err(CodecError::NonFinite);
            }
            PlcValue::Float(f64::from(value))
        }
        DataType::String => {
            let end = buf.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            PlcValue::Text(buf[..end].iter().map(|b| char::from(*b)).collect())
        }
    };

    Ok(apply_scaling(raw, point))
}

/// Multiply by `scale`, then round to `precision` decimals when both are
/// set. Non-numeric values pass through unchanged.
pub fn apply_scaling(value: PlcValue, point: &PointDefinition) -> PlcValue {
    if !point.data_type.is_numeric() {
        return value;
    }
    let Some(scale) = point.scale else {
        return value;
    };
    let Some(raw) = as_f64(&value) else {
        return value;
    };

    let scaled = raw * scale;
    match point.precision {
        Some(precision) => {
            let factor = 10f64.powi(i32::from(precision));
            PlcValue::Float((scaled * factor).round() / factor)
        }
        None => PlcValue::Float(scaled),
    }
}

fn be<const N: usize>(buf: &[u8]) -> Result<[u8; N], CodecError> {
    buf.try_into().map_err(|_| CodecError::Length {
        expected: N,
        actual: buf.len(),
    })
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn as_f64(value: &PlcValue) -> Option<f64> {
    match value {
        // Decoded integers are at most 32 bits wide, exact in f64.
        PlcValue::Int(i) => Some(*i as f64),
        PlcValue::Float(x) => Some(*x),
        PlcValue::Bool(_) | PlcValue::Text(_) => None,
    }
}

// ── Encode ───────────────────────────────────────────────────────────

/// Encode `value` for a write to `point`.
///
/// Strings are written as-is: neither padded to nor truncated at the
/// field length.
pub fn encode(value: &PlcValue, point: &PointDefinition) -> Result<WritePlan, CodecError> {
    let data_type = point.data_type;
    let plan = match data_type {
        DataType::Bool => {
            let on = as_bool(value).ok_or_else(|| mismatch(data_type, value))?;
            match point.bit {
                Some(bit) if bit > 7 => return Err(CodecError::BitOffset(bit)),
                Some(bit) => WritePlan::Bit { bit, on },
                None => WritePlan::Replace(vec![u8::from(on)]),
            }
        }
        DataType::Byte => WritePlan::Replace(vec![int::<u8>(value, data_type)?]),
        DataType::Word => {
            WritePlan::Replace(int::<u16>(value, data_type)?.to_be_bytes().to_vec())
        }
        DataType::Int => {
            WritePlan::Replace(int::<i16>(value, data_type)?.to_be_bytes().to_vec())
        }
        DataType::Dword => {
            WritePlan::Replace(int::<u32>(value, data_type)?.to_be_bytes().to_vec())
        }
        DataType::Dint => {
            WritePlan::Replace(int::<i32>(value, data_type)?.to_be_bytes().to_vec())
        }
        DataType::Real => WritePlan::Replace(real(value)?.to_be_bytes().to_vec()),
        DataType::String => {
            let PlcValue::Text(text) = value else {
                return Err(mismatch(data_type, value));
            };
            let bytes = latin1(text)?;
            let max = point.byte_len();
            if bytes.len() > max {
                return Err(CodecError::StringTooLong {
                    len: bytes.len(),
                    max,
                });
            }
            WritePlan::Replace(bytes)
        }
    };
    Ok(plan)
}

fn as_bool(value: &PlcValue) -> Option<bool> {
    match value {
        PlcValue::Bool(b) => Some(*b),
        PlcValue::Int(0) => Some(false),
        PlcValue::Int(1) => Some(true),
        PlcValue::Text(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        PlcValue::Int(_) | PlcValue::Float(_) => None,
    }
}

fn int<T: TryFrom<i64>>(value: &PlcValue, data_type: DataType) -> Result<T, CodecError> {
    let wide = match value {
        PlcValue::Int(i) => *i,
        PlcValue::Float(x) if x.is_finite() && x.fract() == 0.0 => whole_f64(*x, data_type)?,
        PlcValue::Text(s) => s.trim().parse().map_err(|_| mismatch(data_type, value))?,
        PlcValue::Float(_) | PlcValue::Bool(_) => return Err(mismatch(data_type, value)),
    };
    T::try_from(wide).map_err(|_| CodecError::OutOfRange {
        value: wide.to_string(),
        data_type,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn whole_f64(x: f64, data_type: DataType) -> Result<i64, CodecError> {
    // i64 bounds as f64; anything outside cannot fit a 32-bit field either.
    if x.abs() >= 9.2e18 {
        return Err(CodecError::OutOfRange {
            value: x.to_string(),
            data_type,
        });
    }
    Ok(x as i64)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::as_conversions)]
fn real(value: &PlcValue) -> Result<f32, CodecError> {
    let wide = match value {
        PlcValue::Float(x) => *x,
        PlcValue::Int(i) => *i as f64,
        PlcValue::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| mismatch(DataType::Real, value))?,
        PlcValue::Bool(_) => return Err(mismatch(DataType::Real, value)),
    };
    if !wide.is_finite() || wide.abs() > f64::from(f32::MAX) {
        return Err(CodecError::OutOfRange {
            value: wide.to_string(),
            data_type: DataType::Real,
        });
    }
    Ok(wide as f32)
}

fn latin1(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| CodecError::NonLatin1(c)))
        .collect()
}

fn mismatch(expected: DataType, value: &PlcValue) -> CodecError {
    let found = match value {
        PlcValue::Bool(_) => "boolean",
        PlcValue::Int(_) => "integer",
        PlcValue::Float(_) => "float",
        PlcValue::Text(_) => "string",
    };
    CodecError::TypeMismatch { expected, found }
}

// ── Tests ────────────────────────────────────────────────────────────
