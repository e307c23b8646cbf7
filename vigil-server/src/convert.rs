//! Mapping between wire values, update messages and storage records.
//!
//! Everything here is pure: no I/O and no shared state.

use std::fmt::Display;

use jiff::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vigil_core::{
    ActionType, BarSummary, BoxStr, PathError, SensorPath, SensorPayload, SensorType, SensorValue,
    StorageRecord, UnsupportedSensorType, UpdateMessage, unix_floor_seconds,
};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error(transparent)]
    UnsupportedSensorType(#[from] UnsupportedSensorType),
    #[error("sensor '{path}' reported a non-finite number")]
    NonFinite { path: BoxStr },
    #[error("malformed {data_type:?} payload: {source}")]
    Payload {
        data_type: SensorType,
        #[source]
        source: serde_json::Error,
    },
}

/// Check everything a value must satisfy before it may be queued and return
/// its parsed path.
pub fn validate(value: &SensorValue) -> Result<SensorPath, ConvertError> {
    let path = SensorPath::parse(&value.path)?;

    let finite = match &value.data {
        SensorPayload::Double { value } => value.is_finite(),
        SensorPayload::IntBar(bar) => bar.mean.is_finite(),
        SensorPayload::DoubleBar(bar) => {
            bar.min.is_finite() && bar.max.is_finite() && bar.mean.is_finite()
        }
        SensorPayload::Bool { .. } | SensorPayload::Int { .. } | SensorPayload::String { .. } => {
            true
        }
    };
    if !finite {
        return Err(ConvertError::NonFinite {
            path: value.path.clone(),
        });
    }

    Ok(path)
}

fn bar_short_value<T: Display>(bar: &BarSummary<T>) -> String {
    format!(
        "Value: Min = {}, Mean = {}, Max = {}, Count = {}",
        bar.min, bar.mean, bar.max, bar.count
    )
}

/// Human-readable rendering of a payload.
pub fn short_value(payload: &SensorPayload) -> String {
    match payload {
        SensorPayload::Bool { value: true } => "Value = True".to_owned(),
        SensorPayload::Bool { value: false } => "Value = False".to_owned(),
        SensorPayload::Int { value } => format!("Value = {value}"),
        SensorPayload::Double { value } => format!("Value = {value}"),
        SensorPayload::String { value } => format!("Value = '{value}'"),
        SensorPayload::IntBar(bar) => bar_short_value(bar),
        SensorPayload::DoubleBar(bar) => bar_short_value(bar),
    }
}

pub fn to_update_message(
    value: &SensorValue,
    product: &str,
    received_at: Timestamp,
) -> UpdateMessage {
    UpdateMessage {
        path: value.path.clone(),
        product: product.into(),
        object_type: value.sensor_type(),
        time: received_at,
        short_value: short_value(&value.data).into(),
        action: ActionType::Add,
    }
}

#[derive(Serialize, Deserialize)]
struct Scalar<T> {
    value: T,
}

/// `TypedData` layout: the payload fields plus the optional comment.
#[derive(Serialize, Deserialize)]
struct Typed<T> {
    #[serde(flatten)]
    data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<BoxStr>,
}

fn encode<T: Serialize>(
    data_type: SensorType,
    data: T,
    comment: &Option<BoxStr>,
) -> Result<String, ConvertError> {
    serde_json::to_string(&Typed {
        data,
        comment: comment.clone(),
    })
    .map_err(|source| ConvertError::Payload { data_type, source })
}

fn decode<T: DeserializeOwned>(
    data_type: SensorType,
    typed_data: &str,
) -> Result<(T, Option<BoxStr>), ConvertError> {
    let typed: Typed<T> = serde_json::from_str(typed_data)
        .map_err(|source| ConvertError::Payload { data_type, source })?;
    Ok((typed.data, typed.comment))
}

pub fn to_storage_record(
    value: &SensorValue,
    received_at: Timestamp,
) -> Result<StorageRecord, ConvertError> {
    let data_type = value.sensor_type();
    let typed_data = match &value.data {
        SensorPayload::Bool { value: v } => encode(data_type, Scalar { value: v }, &value.comment)?,
        SensorPayload::Int { value: v } => encode(data_type, Scalar { value: v }, &value.comment)?,
        SensorPayload::Double { value: v } => {
            encode(data_type, Scalar { value: v }, &value.comment)?
        }
        SensorPayload::String { value: v } => {
            encode(data_type, Scalar { value: v }, &value.comment)?
        }
        SensorPayload::IntBar(bar) => encode(data_type, bar, &value.comment)?,
        SensorPayload::DoubleBar(bar) => encode(data_type, bar, &value.comment)?,
    };

    Ok(StorageRecord {
        path: value.path.clone(),
        time: value.time,
        time_collected: received_at,
        timestamp: unix_floor_seconds(value.time),
        data_type,
        typed_data: typed_data.into(),
    })
}

/// Decode `typed_data` written for the sensor type with numeric code `code`.
pub fn decode_typed_data(
    code: u8,
    typed_data: &str,
) -> Result<(SensorPayload, Option<BoxStr>), ConvertError> {
    let data_type = SensorType::try_from(code)?;

    let decoded = match data_type {
        SensorType::Bool => {
            let (s, comment) = decode::<Scalar<bool>>(data_type, typed_data)?;
            (SensorPayload::Bool { value: s.value }, comment)
        }
        SensorType::Int => {
            let (s, comment) = decode::<Scalar<i64>>(data_type, typed_data)?;
            (SensorPayload::Int { value: s.value }, comment)
        }
        SensorType::Double => {
            let (s, comment) = decode::<Scalar<f64>>(data_type, typed_data)?;
            (SensorPayload::Double { value: s.value }, comment)
        }
        SensorType::String => {
            let (s, comment) = decode::<Scalar<BoxStr>>(data_type, typed_data)?;
            (SensorPayload::String { value: s.value }, comment)
        }
        SensorType::IntBar => {
            let (bar, comment) = decode(data_type, typed_data)?;
            (SensorPayload::IntBar(bar), comment)
        }
        SensorType::DoubleBar => {
            let (bar, comment) = decode(data_type, typed_data)?;
            (SensorPayload::DoubleBar(bar), comment)
        }
    };

    Ok(decoded)
}

/// Rebuild the wire value a record was stored from.
pub fn decode_record(record: &StorageRecord) -> Result<SensorValue, ConvertError> {
    let (data, comment) = decode_typed_data(record.data_type.into(), &record.typed_data)?;

    Ok(SensorValue {
        path: record.path.clone(),
        time: record.time,
        comment,
        data,
    })
}

pub fn record_short_value(record: &StorageRecord) -> Result<String, ConvertError> {
    decode_record(record).map(|value| short_value(&value.data))
}

/// The update message describing a stored history item. It carries the
/// record's collection time and an `Update` action.
pub fn update_from_record(
    record: &StorageRecord,
    product: &str,
) -> Result<UpdateMessage, ConvertError> {
    Ok(UpdateMessage {
        path: record.path.clone(),
        product: product.into(),
        object_type: record.data_type,
        time: record.time_collected,
        short_value: record_short_value(record)?.into(),
        action: ActionType::Update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn value(path: &str, data: SensorPayload) -> SensorValue {
        SensorValue {
            path: path.into(),
            time: Timestamp::new(1_700_000_000, 750_000_000).unwrap(),
            comment: None,
            data,
        }
    }

    fn every_type() -> Vec<SensorValue> {
        vec![
            value("demo/flag", SensorPayload::Bool { value: false }),
            value("demo/hits", SensorPayload::Int { value: -42 }),
            value("demo/load", SensorPayload::Double { value: 0.1 + 0.2 }),
            value(
                "demo/state",
                SensorPayload::String {
                    value: "it's 'quoted'".into(),
                },
            ),
            value(
                "demo/latency",
                SensorPayload::IntBar(BarSummary {
                    min: 3,
                    max: 17,
                    mean: 8.333333333333334,
                    count: 3,
                    start: at(1_699_999_940),
                    end: at(1_700_000_000),
                }),
            ),
            value(
                "demo/ratio",
                SensorPayload::DoubleBar(BarSummary {
                    min: 1e-7,
                    max: 0.25,
                    mean: 2.0 / 3.0,
                    count: 12,
                    start: at(1_699_999_940),
                    end: at(1_700_000_000),
                }),
            ),
        ]
    }

    #[test]
    fn stored_records_render_the_same_short_value() {
        for original in every_type() {
            let update = to_update_message(&original, "demo", at(1_700_000_001));
            let record = to_storage_record(&original, at(1_700_000_001)).unwrap();

            assert_eq!(record.data_type, update.object_type);
            assert_eq!(record_short_value(&record).unwrap(), &*update.short_value);
            assert_eq!(decode_record(&record).unwrap(), original);
        }
    }

    #[test]
    fn bool_scenario() {
        let t = Timestamp::new(1_700_000_123, 900_000_000).unwrap();
        let v = SensorValue {
            path: "demoProduct/health".into(),
            time: t,
            comment: None,
            data: SensorPayload::Bool { value: true },
        };

        let path = validate(&v).unwrap();
        let update = to_update_message(&v, path.product(), at(1_700_000_200));
        assert_eq!(&*update.short_value, "Value = True");
        assert_eq!(&*update.product, "demoProduct");
        assert_eq!(update.action, ActionType::Add);
        assert_eq!(update.time, at(1_700_000_200));

        let record = to_storage_record(&v, at(1_700_000_200)).unwrap();
        assert_eq!(record.timestamp, 1_700_000_123);
        assert_eq!(record.time_collected, at(1_700_000_200));
    }

    #[test]
    fn renderings() {
        let bar = SensorPayload::IntBar(BarSummary {
            min: 1,
            max: 9,
            mean: 4.5,
            count: 6,
            start: at(0),
            end: at(60),
        });
        assert_eq!(
            short_value(&bar),
            "Value: Min = 1, Mean = 4.5, Max = 9, Count = 6"
        );
        assert_eq!(short_value(&SensorPayload::Double { value: 3.0 }), "Value = 3");
        assert_eq!(
            short_value(&SensorPayload::String { value: "up".into() }),
            "Value = 'up'"
        );
    }

    #[test]
    fn comment_survives_storage() {
        let mut v = value("demo/hits", SensorPayload::Int { value: 7 });
        v.comment = Some("after restart".into());

        let record = to_storage_record(&v, at(0)).unwrap();
        assert_eq!(decode_record(&record).unwrap().comment, v.comment);
    }

    #[test]
    fn pre_epoch_timestamp_rounds_down() {
        let mut v = value("demo/hits", SensorPayload::Int { value: 1 });
        v.time = Timestamp::new(-10, -250_000_000).unwrap();
        assert_eq!(to_storage_record(&v, at(0)).unwrap().timestamp, -11);
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let err = decode_typed_data(17, r#"{"value":true}"#).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::UnsupportedSensorType(UnsupportedSensorType(17))
        ));
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let err = decode_typed_data(SensorType::Int.into(), r#"{"value":"seven"}"#).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Payload {
                data_type: SensorType::Int,
                ..
            }
        ));
    }

    #[test]
    fn validation() {
        let short = value("lonely", SensorPayload::Int { value: 1 });
        assert!(matches!(
            validate(&short),
            Err(ConvertError::InvalidPath(PathError::TooShort(_)))
        ));

        let nan = value("demo/load", SensorPayload::Double { value: f64::NAN });
        assert!(matches!(
            validate(&nan),
            Err(ConvertError::NonFinite { .. })
        ));

        let ok = value("demo/rack/load", SensorPayload::Double { value: 1.0 });
        assert_eq!(validate(&ok).unwrap().sensor(), "load");
    }

    #[test]
    fn history_item_update() {
        let v = value("demo/hits", SensorPayload::Int { value: 5 });
        let record = to_storage_record(&v, at(1_700_000_002)).unwrap();

        let update = update_from_record(&record, "demo").unwrap();
        assert_eq!(&*update.short_value, "Value = 5");
        assert_eq!(update.action, ActionType::Update);
        assert_eq!(update.time, at(1_700_000_002));
    }
}
