// ── Domain model ──
//
// Point definitions are configuration input; point values and the
// connection status are what the gateway publishes.

pub mod point;
pub mod status;
pub mod value;

pub use point::{DEFAULT_STRING_LENGTH, DataType, PointDefinition, validate_points};
pub use status::{ConnectionPhase, ConnectionStatus, PlcIdentity};
pub use value::{PlcValue, PointValue, Quality};
