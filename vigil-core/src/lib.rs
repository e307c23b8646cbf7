pub mod path;

pub use path::{PathError, SensorPath};

use serde::{Deserialize, Serialize};

// We use `Box<str>` for strings that never grow after construction. This keeps
// values compact and avoids accidental cloning of large payloads.
pub type BoxStr = Box<str>;

/// A single sample reported by a collector, as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    /// Hierarchical `/`-delimited path: product/.../sensor.
    pub path: BoxStr,
    /// When the sample was taken.
    pub time: jiff::Timestamp,
    /// Optional free-form annotation from the collector.
    #[serde(default)]
    pub comment: Option<BoxStr>,
    /// The typed measurement.
    pub data: SensorPayload,
}

impl SensorValue {
    pub fn sensor_type(&self) -> SensorType {
        self.data.sensor_type()
    }
}

/// Typed measurement carried by a [`SensorValue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorPayload {
    Bool { value: bool },
    Int { value: i64 },
    Double { value: f64 },
    String { value: BoxStr },
    IntBar(BarSummary<i64>),
    DoubleBar(BarSummary<f64>),
}

impl SensorPayload {
    pub fn sensor_type(&self) -> SensorType {
        match self {
            SensorPayload::Bool { .. } => SensorType::Bool,
            SensorPayload::Int { .. } => SensorType::Int,
            SensorPayload::Double { .. } => SensorType::Double,
            SensorPayload::String { .. } => SensorType::String,
            SensorPayload::IntBar(_) => SensorType::IntBar,
            SensorPayload::DoubleBar(_) => SensorType::DoubleBar,
        }
    }
}

/// Statistical summary of one aggregation window.
///
/// `min` and `max` keep the sensor's native numeric type, `mean` is always
/// reported as a float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarSummary<T> {
    pub min: T,
    pub max: T,
    pub mean: f64,
    pub count: u64,
    /// Window open time.
    pub start: jiff::Timestamp,
    /// Window close time.
    pub end: jiff::Timestamp,
}

/// Tag shared by the wire payload, update messages and storage records.
///
/// Persisted as a stable numeric code; decoding an unknown code fails with
/// [`UnsupportedSensorType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SensorType {
    Bool,
    Int,
    Double,
    String,
    IntBar,
    DoubleBar,
}

impl SensorType {
    pub const ALL: [SensorType; 6] = [
        SensorType::Bool,
        SensorType::Int,
        SensorType::Double,
        SensorType::String,
        SensorType::IntBar,
        SensorType::DoubleBar,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported sensor type code {0}")]
pub struct UnsupportedSensorType(pub u8);

impl From<SensorType> for u8 {
    fn from(value: SensorType) -> Self {
        match value {
            SensorType::Bool => 0,
            SensorType::Int => 1,
            SensorType::Double => 2,
            SensorType::String => 3,
            SensorType::IntBar => 4,
            SensorType::DoubleBar => 5,
        }
    }
}

impl TryFrom<u8> for SensorType {
    type Error = UnsupportedSensorType;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SensorType::Bool),
            1 => Ok(SensorType::Int),
            2 => Ok(SensorType::Double),
            3 => Ok(SensorType::String),
            4 => Ok(SensorType::IntBar),
            5 => Ok(SensorType::DoubleBar),
            other => Err(UnsupportedSensorType(other)),
        }
    }
}

/// What happened to the sensor an [`UpdateMessage`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Add,
    Update,
    Remove,
}

/// The queued and displayed unit of change for one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub path: BoxStr,
    /// First segment of `path`.
    pub product: BoxStr,
    pub object_type: SensorType,
    /// Server receipt time.
    pub time: jiff::Timestamp,
    /// Human-readable rendering, computed once at conversion time.
    pub short_value: BoxStr,
    pub action: ActionType,
}

/// The persisted form of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub path: BoxStr,
    /// Sample time.
    pub time: jiff::Timestamp,
    /// Server receipt time.
    pub time_collected: jiff::Timestamp,
    /// Whole Unix seconds of `time`, rounded down. Orders history scans.
    pub timestamp: i64,
    pub data_type: SensorType,
    /// Serialized payload whose shape depends on `data_type`.
    pub typed_data: BoxStr,
}

/// Whole seconds between the Unix epoch and `time`, rounded toward negative
/// infinity.
pub fn unix_floor_seconds(time: jiff::Timestamp) -> i64 {
    let seconds = time.as_second();
    if time.subsec_nanosecond() < 0 {
        seconds - 1
    } else {
        seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;

    #[test]
    fn sensor_type_codes_are_stable() {
        for ty in SensorType::ALL {
            let code: u8 = ty.into();
            assert_eq!(SensorType::try_from(code), Ok(ty));
        }
        assert_eq!(SensorType::try_from(42), Err(UnsupportedSensorType(42)));
    }

    #[test]
    fn unknown_type_code_fails_to_deserialize() {
        let err = serde_json::from_str::<SensorType>("9");
        assert!(err.is_err());
    }

    #[test]
    fn wire_value_uses_tagged_payload() {
        let json = r#"{
            "path": "demoProduct/health",
            "time": "2024-05-01T10:00:00Z",
            "data": { "type": "bool", "value": true }
        }"#;

        let value: SensorValue = serde_json::from_str(json).unwrap();
        assert_eq!(value.sensor_type(), SensorType::Bool);
        assert_eq!(value.comment, None);
        assert_eq!(value.data, SensorPayload::Bool { value: true });
    }

    #[test]
    fn unix_seconds_round_down() {
        let t = Timestamp::new(1_700_000_000, 999_999_999).unwrap();
        assert_eq!(unix_floor_seconds(t), 1_700_000_000);

        let before_epoch = Timestamp::new(-5, -500_000_000).unwrap();
        assert_eq!(unix_floor_seconds(before_epoch), -6);

        let exact = Timestamp::from_second(-5).unwrap();
        assert_eq!(unix_floor_seconds(exact), -5);
    }
}
