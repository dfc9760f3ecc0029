// ── Point values and cache entries ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded point value.
///
/// Integers of every width share `Int`; `REAL` and any scaled numeric value
/// become `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlcValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for PlcValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Bad,
}

/// Cache entry for one point: the outcome of its most recent read.
///
/// Built only through [`PointValue::good`] and [`PointValue::bad`], so a
/// good entry always has a value and a bad entry always has a non-empty
/// error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointValue {
    value: Option<PlcValue>,
    timestamp: DateTime<Utc>,
    quality: Quality,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PointValue {
    pub fn good(value: PlcValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            timestamp,
            quality: Quality::Good,
            error: None,
        }
    }

    pub fn bad(error: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "read failed".into();
        }
        Self {
            value: None,
            timestamp,
            quality: Quality::Bad,
            error: Some(error),
        }
    }

    pub fn value(&self) -> Option<&PlcValue> {
        self.value.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
