//! # Payload Codecs
//!
//! Converts [`KuraPayload`] values to and from wire bytes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  payload.encoding = kura-protobuf                                    │
//! │     KuraPayload ──► ProtobufCodec ──► [gzip if encode.gzip] ──► wire │
//! │                                                                      │
//! │  payload.encoding = simple-json                                      │
//! │     KuraPayload ──► JsonMarshaller ──► UTF-8 ──────────────────► wire │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The protobuf messages are declared with `prost` derives instead of being
//! generated from a `.proto` file. Field numbers follow the Kura payload
//! schema: timestamp=1, position=2, metric=5000, body=5001.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use edgelink_core::{KuraPayload, KuraPosition, MetricValue};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{CloudError, CloudResult};

// =============================================================================
// Traits
// =============================================================================

/// Binary encoder for application payloads.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, payload: &KuraPayload) -> CloudResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> CloudResult<KuraPayload>;
}

/// Text encoder for payloads.
pub trait Marshaller: Send + Sync {
    fn marshal(&self, payload: &KuraPayload) -> CloudResult<String>;

    fn unmarshal(&self, text: &str) -> CloudResult<KuraPayload>;
}

// =============================================================================
// Protobuf Wire Messages
// =============================================================================

mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Payload {
        #[prost(int64, optional, tag = "1")]
        pub timestamp: Option<i64>,
        #[prost(message, optional, tag = "2")]
        pub position: Option<Position>,
        #[prost(message, repeated, tag = "5000")]
        pub metric: Vec<Metric>,
        #[prost(bytes = "vec", optional, tag = "5001")]
        pub body: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Position {
        #[prost(double, required, tag = "1")]
        pub latitude: f64,
        #[prost(double, required, tag = "2")]
        pub longitude: f64,
        #[prost(double, optional, tag = "3")]
        pub altitude: Option<f64>,
        #[prost(double, optional, tag = "4")]
        pub precision: Option<f64>,
        #[prost(double, optional, tag = "5")]
        pub heading: Option<f64>,
        #[prost(double, optional, tag = "6")]
        pub speed: Option<f64>,
        #[prost(int64, optional, tag = "7")]
        pub timestamp: Option<i64>,
        #[prost(int32, optional, tag = "8")]
        pub satellites: Option<i32>,
        #[prost(int32, optional, tag = "9")]
        pub status: Option<i32>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Metric {
        #[prost(string, required, tag = "1")]
        pub name: String,
        #[prost(enumeration = "ValueType", required, tag = "2")]
        pub r#type: i32,
        #[prost(double, optional, tag = "3")]
        pub double_value: Option<f64>,
        #[prost(float, optional, tag = "4")]
        pub float_value: Option<f32>,
        #[prost(int64, optional, tag = "5")]
        pub long_value: Option<i64>,
        #[prost(int32, optional, tag = "6")]
        pub int_value: Option<i32>,
        #[prost(bool, optional, tag = "7")]
        pub bool_value: Option<bool>,
        #[prost(string, optional, tag = "8")]
        pub string_value: Option<String>,
        #[prost(bytes = "vec", optional, tag = "9")]
        pub bytes_value: Option<Vec<u8>>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum ValueType {
        Double = 0,
        Float = 1,
        Int64 = 2,
        Int32 = 3,
        Bool = 4,
        String = 5,
        Bytes = 6,
    }
}

// =============================================================================
// ProtobufCodec
// =============================================================================

/// Kura protobuf payload encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl PayloadCodec for ProtobufCodec {
    fn encode(&self, payload: &KuraPayload) -> CloudResult<Vec<u8>> {
        let message = proto::Payload {
            timestamp: payload.timestamp.map(|ts| ts.timestamp_millis()),
            position: payload.position.as_ref().map(position_to_proto),
            metric: payload
                .metrics
                .iter()
                .map(|(name, value)| metric_to_proto(name, value))
                .collect(),
            body: payload.body.clone(),
        };
        Ok(message.encode_to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> CloudResult<KuraPayload> {
        let message = proto::Payload::decode(bytes)?;

        let mut payload = KuraPayload::new();
        if let Some(ms) = message.timestamp {
            payload.timestamp = Some(
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| CloudError::Decode(format!("timestamp out of range: {ms}")))?,
            );
        }
        payload.position = message.position.map(position_from_proto);
        for metric in message.metric {
            let (name, value) = metric_from_proto(metric)?;
            payload.metrics.insert(name, value);
        }
        payload.body = message.body;
        Ok(payload)
    }
}

fn position_to_proto(position: &KuraPosition) -> proto::Position {
    proto::Position {
        latitude: position.latitude.unwrap_or_default(),
        longitude: position.longitude.unwrap_or_default(),
        altitude: position.altitude,
        precision: position.precision,
        heading: position.heading,
        speed: position.speed,
        timestamp: position.timestamp,
        satellites: position.satellites,
        status: position.status,
    }
}

fn position_from_proto(position: proto::Position) -> KuraPosition {
    KuraPosition {
        latitude: Some(position.latitude),
        longitude: Some(position.longitude),
        altitude: position.altitude,
        precision: position.precision,
        heading: position.heading,
        speed: position.speed,
        timestamp: position.timestamp,
        satellites: position.satellites,
        status: position.status,
    }
}

fn metric_to_proto(name: &str, value: &MetricValue) -> proto::Metric {
    use proto::ValueType;

    let mut metric = proto::Metric {
        name: name.to_string(),
        ..Default::default()
    };
    match value {
        MetricValue::Double(v) => {
            metric.r#type = ValueType::Double as i32;
            metric.double_value = Some(*v);
        }
        MetricValue::Float(v) => {
            metric.r#type = ValueType::Float as i32;
            metric.float_value = Some(*v);
        }
        MetricValue::Long(v) => {
            metric.r#type = ValueType::Int64 as i32;
            metric.long_value = Some(*v);
        }
        MetricValue::Int(v) => {
            metric.r#type = ValueType::Int32 as i32;
            metric.int_value = Some(*v);
        }
        MetricValue::Bool(v) => {
            metric.r#type = ValueType::Bool as i32;
            metric.bool_value = Some(*v);
        }
        MetricValue::String(v) => {
            metric.r#type = ValueType::String as i32;
            metric.string_value = Some(v.clone());
        }
        MetricValue::Bytes(v) => {
            metric.r#type = ValueType::Bytes as i32;
            metric.bytes_value = Some(v.clone());
        }
    }
    metric
}

fn metric_from_proto(metric: proto::Metric) -> CloudResult<(String, MetricValue)> {
    use proto::ValueType;

    let value_type = ValueType::try_from(metric.r#type).map_err(|_| {
        CloudError::Decode(format!(
            "metric '{}' has unknown type {}",
            metric.name, metric.r#type
        ))
    })?;

    let value = match value_type {
        ValueType::Double => metric.double_value.map(MetricValue::Double),
        ValueType::Float => metric.float_value.map(MetricValue::Float),
        ValueType::Int64 => metric.long_value.map(MetricValue::Long),
        ValueType::Int32 => metric.int_value.map(MetricValue::Int),
        ValueType::Bool => metric.bool_value.map(MetricValue::Bool),
        ValueType::String => metric.string_value.map(MetricValue::String),
        ValueType::Bytes => metric.bytes_value.map(MetricValue::Bytes),
    };

    match value {
        Some(value) => Ok((metric.name, value)),
        None => Err(CloudError::Decode(format!(
            "metric '{}' has no {:?} value",
            metric.name, value_type
        ))),
    }
}

// =============================================================================
// JsonMarshaller
// =============================================================================

/// Simple-json payload encoding.
///
/// ```json
/// { "sentOn": 1700000000000, "position": { "latitude": 45.1 },
///   "metrics": { "temperature": 21.5 }, "body": "aGVsbG8=" }
/// ```
///
/// Numbers without a fractional part decode as `Long`, other numbers as
/// `Double`. Byte metrics are written as base64 strings and read back as
/// strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<KuraPosition>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metrics: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl Marshaller for JsonMarshaller {
    fn marshal(&self, payload: &KuraPayload) -> CloudResult<String> {
        let mut metrics = Map::new();
        for (name, value) in &payload.metrics {
            metrics.insert(name.clone(), metric_to_json(name, value)?);
        }

        let json = JsonPayload {
            sent_on: payload.timestamp.map(|ts| ts.timestamp_millis()),
            position: payload.position.clone(),
            metrics,
            body: payload.body.as_ref().map(|b| BASE64.encode(b)),
        };
        serde_json::to_string(&json).map_err(|e| CloudError::Encode(e.to_string()))
    }

    fn unmarshal(&self, text: &str) -> CloudResult<KuraPayload> {
        let json: JsonPayload =
            serde_json::from_str(text).map_err(|e| CloudError::Decode(e.to_string()))?;

        let mut payload = KuraPayload::new();
        if let Some(ms) = json.sent_on {
            payload.timestamp = Utc.timestamp_millis_opt(ms).single();
        }
        payload.position = json.position;
        for (name, value) in json.metrics {
            let value = metric_from_json(&name, value)?;
            payload.metrics.insert(name, value);
        }
        if let Some(body) = json.body {
            payload.body = Some(
                BASE64
                    .decode(body)
                    .map_err(|e| CloudError::Decode(format!("body is not base64: {e}")))?,
            );
        }
        Ok(payload)
    }
}

fn metric_to_json(name: &str, value: &MetricValue) -> CloudResult<Value> {
    let value = match value {
        MetricValue::Double(v) => finite(name, *v)?,
        MetricValue::Float(v) => finite(name, f64::from(*v))?,
        MetricValue::Long(v) => Value::from(*v),
        MetricValue::Int(v) => Value::from(*v),
        MetricValue::Bool(v) => Value::Bool(*v),
        MetricValue::String(v) => Value::String(v.clone()),
        MetricValue::Bytes(v) => Value::String(BASE64.encode(v)),
    };
    Ok(value)
}

fn finite(name: &str, v: f64) -> CloudResult<Value> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| CloudError::Encode(format!("metric '{name}' is not a finite number")))
}

fn metric_from_json(name: &str, value: Value) -> CloudResult<MetricValue> {
    match value {
        Value::Bool(b) => Ok(MetricValue::Bool(b)),
        Value::String(s) => Ok(MetricValue::String(s)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(MetricValue::Long(i)),
            None => n
                .as_f64()
                .map(MetricValue::Double)
                .ok_or_else(|| CloudError::Decode(format!("metric '{name}' is out of range"))),
        },
        other => Err(CloudError::Decode(format!(
            "metric '{name}' has unsupported value {other}"
        ))),
    }
}

// =============================================================================
// Compression
// =============================================================================

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// True when `bytes` start with the gzip magic number.
pub fn is_gzipped(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

pub fn gzip(bytes: &[u8]) -> CloudResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| CloudError::Encode(format!("gzip failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CloudError::Encode(format!("gzip failed: {e}")))
}

pub fn gunzip(bytes: &[u8]) -> CloudResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CloudError::Decode(format!("gunzip failed: {e}")))?;
    Ok(out)
}
