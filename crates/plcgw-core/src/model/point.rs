// ── Point definitions ──

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;

/// Byte length of a `STRING` point with no configured length.
pub const DEFAULT_STRING_LENGTH: u16 = 32;

const MAX_STRING_LENGTH: u16 = 254;
const MAX_PRECISION: u8 = 10;

/// Declared type of a point, named after the S7 elementary types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DataType {
    Bool,
    Byte,
    Word,
    Int,
    Dword,
    Dint,
    Real,
    String,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool | Self::String)
    }
}

/// A single named, typed location inside a data block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub db: u16,
    pub offset: u32,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Bit within the byte at `offset`; `BOOL` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit: Option<u8>,
    /// Fixed byte length; `STRING` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default)]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl PointDefinition {
    pub fn new(id: impl Into<String>, db: u16, offset: u32, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            name: None,
            db,
            offset,
            data_type,
            bit: None,
            length: None,
            scale: None,
            precision: None,
            writable: false,
            unit: None,
        }
    }

    /// Number of bytes occupied in the data block.
    pub fn byte_len(&self) -> usize {
        match self.data_type {
            DataType::Bool | DataType::Byte => 1,
            DataType::Word | DataType::Int => 2,
            DataType::Dword | DataType::Dint | DataType::Real => 4,
            DataType::String => usize::from(self.length.unwrap_or(DEFAULT_STRING_LENGTH)),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |message: String| {
            Err(CoreError::ValidationFailed {
                message: format!("point '{}': {message}", self.id),
            })
        };

        if self.id.trim().is_empty() {
            return Err(CoreError::ValidationFailed {
                message: "point id must not be empty".into(),
            });
        }
        match (self.data_type, self.bit) {
            (DataType::Bool, Some(bit)) if bit > 7 => {
                return fail(format!("bit {bit} is outside 0..=7"));
            }
            (DataType::Bool, _) | (_, None) => {}
            (other, Some(_)) => return fail(format!("bit is only valid on BOOL, not {other}")),
        }
        match (self.data_type, self.length) {
            (DataType::String, Some(len)) if len == 0 || len > MAX_STRING_LENGTH => {
                return fail(format!("length {len} is outside 1..={MAX_STRING_LENGTH}"));
            }
            (DataType::String, _) | (_, None) => {}
            (other, Some(_)) => return fail(format!("length is only valid on STRING, not {other}")),
        }
        if let Some(precision) = self.precision {
            if precision > MAX_PRECISION {
                return fail(format!("precision {precision} exceeds {MAX_PRECISION}"));
            }
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale == 0.0 {
                return fail(format!("scale {scale} must be finite and non-zero"));
            }
        }
        Ok(())
    }
}

/// Validate every point and reject duplicate ids.
pub fn validate_points(points: &[PointDefinition]) -> Result<(), CoreError> {
    let mut seen = HashSet::with_capacity(points.len());
    for point in points {
        point.validate()?;
        if !seen.insert(point.id.as_str()) {
            return Err(CoreError::ValidationFailed {
                message: format!("duplicate point id '{}'", point.id),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn byte_len_follows_type() {
        assert_eq!(PointDefinition::new("a", 1, 0, DataType::Bool).byte_len(), 1);
        assert_eq!(PointDefinition::new("a", 1, 0, DataType::Int).byte_len(), 2);
        assert_eq!(PointDefinition::new("a", 1, 0, DataType::Real).byte_len(), 4);
        assert_eq!(PointDefinition::new("a", 1, 0, DataType::String).byte_len(), 32);

        let mut text = PointDefinition::new("a", 1, 0, DataType::String);
        text.length = Some(10);
        assert_eq!(text.byte_len(), 10);
    }

    #[test]
    fn bit_is_rejected_outside_bool() {
        let mut point = PointDefinition::new("speed", 1, 0, DataType::Int);
        point.bit = Some(2);
        assert!(point.validate().is_err());

        let mut flag = PointDefinition::new("flag", 1, 0, DataType::Bool);
        flag.bit = Some(8);
        assert!(flag.validate().is_err());
        flag.bit = Some(7);
        assert!(flag.validate().is_ok());
    }

    #[test]
    fn zero_scale_is_rejected() {
        let mut point = PointDefinition::new("temp", 1, 0, DataType::Int);
        point.scale = Some(0.0);
        assert!(point.validate().is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let points = vec![
            PointDefinition::new("temp", 1, 0, DataType::Int),
            PointDefinition::new("temp", 1, 2, DataType::Int),
        ];
        let err = validate_points(&points).unwrap_err();
        assert!(err.to_string().contains("duplicate point id 'temp'"));
    }

    #[test]
    fn deserializes_config_shape() {
        let point: PointDefinition = serde_json::from_str(
            r#"{"id":"level","db":10,"offset":4,"type":"REAL","scale":0.5,"writable":true}"#,
        )
        .unwrap();
        assert_eq!(point.data_type, DataType::Real);
        assert_eq!(point.scale, Some(0.5));
        assert!(point.writable);
        assert_eq!("dint".parse::<DataType>().unwrap(), DataType::Dint);
    }
}
