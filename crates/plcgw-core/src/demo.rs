// ── Demo value source ──
//
// Stands in for a live controller: produces plausible values for every
// configured point without any I/O.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::codec::{self, WritePlan};
use crate::error::CoreError;
use crate::model::{DataType, PlcIdentity, PlcValue, PointDefinition};

const BOOL_PERIOD_SECS: u64 = 5;
const DEMO_TEXT: &str = "DEMO";

/// Synchronous value provider used in demo mode.
pub trait DemoSource: Send + Sync {
    /// Current value of every point in `points`.
    fn values(&self, points: &[PointDefinition]) -> Vec<(String, PlcValue)>;

    /// Accept a write; subsequent `values` calls reflect it.
    fn write(&self, point: &PointDefinition, value: &PlcValue) -> Result<(), CoreError>;

    fn identity(&self) -> PlcIdentity {
        PlcIdentity {
            model: Some("Demo CPU".into()),
            serial: Some("DEMO-0000".into()),
            firmware: Some("V0.0.0".into()),
        }
    }
}

/// Deterministic function of elapsed time: sine for `REAL`, ramps for
/// integers, a toggling `BOOL`, fixed text for `STRING`. Written values
/// override the generated ones.
pub struct SyntheticSource {
    started: Instant,
    overrides: DashMap<String, PlcValue>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            overrides: DashMap::new(),
        }
    }

    /// Values as they would be `elapsed` after start, ignoring overrides.
    pub fn generated_at(elapsed: Duration, points: &[PointDefinition]) -> Vec<(String, PlcValue)> {
        points
            .iter()
            .zip(0u32..)
            .map(|(point, index)| (point.id.clone(), generate(elapsed, point, index)))
            .collect()
    }
}

impl DemoSource for SyntheticSource {
    fn values(&self, points: &[PointDefinition]) -> Vec<(String, PlcValue)> {
        let mut values = Self::generated_at(self.started.elapsed(), points);
        for (id, value) in &mut values {
            if let Some(written) = self.overrides.get(id.as_str()) {
                value.clone_from(&written);
            }
        }
        values
    }

    fn write(&self, point: &PointDefinition, value: &PlcValue) -> Result<(), CoreError> {
        let encode_error = |source| CoreError::Encode {
            id: point.id.clone(),
            source,
        };
        let stored = match codec::encode(value, point).map_err(encode_error)? {
            WritePlan::Bit { on, .. } => PlcValue::Bool(on),
            WritePlan::Replace(bytes) => {
                // Held in raw units, as a controller would hold them.
                let raw = PointDefinition {
                    scale: None,
                    length: (point.data_type == DataType::String)
                        .then(|| u16::try_from(bytes.len()).unwrap_or(u16::MAX))
                        .or(point.length),
                    ..point.clone()
                };
                codec::decode(&bytes, &raw).map_err(encode_error)?
            }
        };
        self.overrides.insert(point.id.clone(), stored);
        Ok(())
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::as_conversions,
    clippy::cast_precision_loss
)]
fn generate(elapsed: Duration, point: &PointDefinition, index: u32) -> PlcValue {
    let secs = elapsed.as_secs();
    let step = i64::try_from(secs).unwrap_or(i64::MAX) + i64::from(index);

    match point.data_type {
        DataType::Bool => PlcValue::Bool((secs / BOOL_PERIOD_SECS + u64::from(index)) % 2 == 0),
        DataType::Byte => PlcValue::Int(step.rem_euclid(256)),
        DataType::Word | DataType::Dword => PlcValue::Int(step.rem_euclid(1000)),
        DataType::Int | DataType::Dint => PlcValue::Int(step.rem_euclid(200) - 100),
        DataType::Real => {
            let t = elapsed.as_secs_f64() / 10.0 + f64::from(index);
            let x = 50.0 + 25.0 * t.sin();
            PlcValue::Float((x * 100.0).round() / 100.0)
        }
        DataType::String => {
            let max = point.byte_len();
            PlcValue::Text(DEMO_TEXT.chars().take(max).collect())
        }
    }
}
