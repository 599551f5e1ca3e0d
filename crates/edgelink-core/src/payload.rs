//! # Payload Model
//!
//! The message body exchanged between applications and the cloud:
//! an optional timestamp, an optional position, named metrics and an
//! optional opaque body.
//!
//! Encoding to bytes lives in `edgelink-cloud`; this module only holds the
//! data and the well-known metric names.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Well-known Metric Names
// =============================================================================

/// Metric names used in lifecycle (birth / disconnect / apps) payloads.
pub mod lifecycle_metrics {
    pub const UPTIME: &str = "uptime";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const MODEL_NAME: &str = "model_name";
    pub const MODEL_ID: &str = "model_id";
    pub const PART_NUMBER: &str = "part_number";
    pub const SERIAL_NUMBER: &str = "serial_number";
    pub const AVAILABLE_PROCESSORS: &str = "available_processors";
    pub const TOTAL_MEMORY: &str = "total_memory";
    pub const FIRMWARE_VERSION: &str = "firmware_version";
    pub const BIOS_VERSION: &str = "bios_version";
    pub const OS: &str = "os";
    pub const OS_VERSION: &str = "os_version";
    pub const OS_ARCH: &str = "os_arch";
    pub const APPLICATION_FRAMEWORK: &str = "application_framework";
    pub const APPLICATION_FRAMEWORK_VERSION: &str = "application_framework_version";
    pub const CONNECTION_INTERFACE: &str = "connection_interface";
    pub const CONNECTION_IP: &str = "connection_ip";
    pub const ACCEPT_ENCODING: &str = "accept_encoding";
    pub const APPLICATION_IDS: &str = "application_ids";
    pub const MODEM_IMEI: &str = "modem_imei";
    pub const MODEM_IMSI: &str = "modem_imsi";
    pub const MODEM_ICCID: &str = "modem_iccid";
    pub const MODEM_RSSI: &str = "modem_rssi";
    pub const PAYLOAD_ENCODING: &str = "payload_encoding";
}

/// Metric names used by the request/response protocol.
pub mod request_metrics {
    pub const REQUESTER_CLIENT_ID: &str = "requester.client.id";
    pub const REQUEST_ID: &str = "request.id";
    pub const RESPONSE_CODE: &str = "response.code";
    pub const RESPONSE_EXCEPTION_MESSAGE: &str = "response.exception.message";
}

// =============================================================================
// Types
// =============================================================================

/// A typed metric value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Double(f64),
    Float(f32),
    Long(i64),
    Int(i32),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl MetricValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of `Int` and `Long` values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(i) => Some(i64::from(*i)),
            MetricValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::String(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Long(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Double(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<Vec<u8>> for MetricValue {
    fn from(v: Vec<u8>) -> Self {
        MetricValue::Bytes(v)
    }
}

/// Geographic position attached to a payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KuraPosition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Dilution of precision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Fix time, milliseconds since the epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub satellites: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

/// Application payload.
///
/// ## Example
/// ```rust
/// use edgelink_core::payload::KuraPayload;
///
/// let payload = KuraPayload::new()
///     .with_metric("temperature", 21.5)
///     .with_metric("unit", "C");
///
/// assert_eq!(payload.metric("unit").and_then(|m| m.as_str()), Some("C"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KuraPayload {
    pub timestamp: Option<DateTime<Utc>>,
    pub position: Option<KuraPosition>,
    /// Sorted by name so encodings are deterministic
    pub metrics: BTreeMap<String, MetricValue>,
    pub body: Option<Vec<u8>>,
}

impl KuraPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload stamped with the current time.
    pub fn now() -> Self {
        Self {
            timestamp: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Body-only payload, used for bytes that could not be decoded.
    pub fn from_body(body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.metrics.insert(name.into(), value.into());
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.add_metric(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn remove_metric(&mut self, name: &str) -> Option<MetricValue> {
        self.metrics.remove(name)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    /// String metric lookup.
    pub fn metric_str(&self, name: &str) -> Option<&str> {
        self.metric(name).and_then(MetricValue::as_str)
    }
}
