//! # Cloud Service Options
//!
//! Immutable snapshot of the cloud service configuration, built from a flat
//! [`Properties`] map.
//!
//! ## Lifecycle of a Snapshot
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Options Snapshot Flow                              │
//! │                                                                         │
//! │  TOML file / component dictionary                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Properties (key → PropertyValue)                                      │
//! │           │  CloudServiceOptions::from_properties()                     │
//! │           │  - wrong type ⇒ default for that key                        │
//! │           │  - validate() ⇒ CoreError on unusable values                │
//! │           ▼                                                             │
//! │  CloudServiceOptions  (never mutated; replaced wholesale on update)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Keys
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `topic.control-prefix` | string | `$EDC` |
//! | `device.display-name` | string | empty name |
//! | `device.custom-name` | string | - |
//! | `encode.gzip` | bool | false |
//! | `republish.mqtt.birth.cert.on.gps.lock` | bool | false |
//! | `republish.mqtt.birth.cert.on.modem.detect` | bool | false |
//! | `republish.mqtt.birth.cert.on.tamper.event` | bool | true |
//! | `enable.default.subscriptions` | bool | true |
//! | `birth.cert.policy` | string | `birth-connect` |
//! | `payload.encoding` | string | `kura-protobuf` |
//! | `lifecycle.publish.delay.ms` | integer | 30000 |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::policy::{AnnouncementKind, PolicyFlags};
use crate::topic::{TopicNamespace, TOPIC_SEPARATOR};

// =============================================================================
// Keys & Defaults
// =============================================================================

/// Property keys understood by [`CloudServiceOptions`].
pub mod keys {
    pub const TOPIC_CONTROL_PREFIX: &str = "topic.control-prefix";
    pub const DEVICE_DISPLAY_NAME: &str = "device.display-name";
    pub const DEVICE_CUSTOM_NAME: &str = "device.custom-name";
    pub const ENCODE_GZIP: &str = "encode.gzip";
    pub const REPUB_BIRTH_ON_GPS_LOCK: &str = "republish.mqtt.birth.cert.on.gps.lock";
    pub const REPUB_BIRTH_ON_MODEM_DETECT: &str = "republish.mqtt.birth.cert.on.modem.detect";
    pub const REPUB_BIRTH_ON_TAMPER_EVENT: &str = "republish.mqtt.birth.cert.on.tamper.event";
    pub const ENABLE_DEFAULT_SUBSCRIPTIONS: &str = "enable.default.subscriptions";
    pub const BIRTH_CERT_POLICY: &str = "birth.cert.policy";
    pub const PAYLOAD_ENCODING: &str = "payload.encoding";
    pub const LIFECYCLE_PUBLISH_DELAY_MS: &str = "lifecycle.publish.delay.ms";
}

pub const DEFAULT_CONTROL_PREFIX: &str = "$EDC";

/// Debounce quiet period for scheduled lifecycle announcements.
pub const DEFAULT_LIFECYCLE_PUBLISH_DELAY_MS: u64 = 30_000;

/// Lifecycle messages are never retained.
pub const LIFECYCLE_RETAIN: bool = false;

/// Lifecycle messages jump the transport queue.
pub const LIFECYCLE_PRIORITY: u8 = 0;

// =============================================================================
// Properties
// =============================================================================

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Integer(v.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

/// Flat configuration dictionary keyed by dotted names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document.
    ///
    /// Both quoted dotted keys and nested tables are accepted; nested tables
    /// are flattened with `.`:
    ///
    /// ```rust
    /// use edgelink_core::options::Properties;
    ///
    /// let props = Properties::from_toml_str(r#"
    ///     "encode.gzip" = true
    ///
    ///     [topic]
    ///     control-prefix = "$CTRL"
    /// "#).unwrap();
    ///
    /// assert_eq!(props.get_bool("encode.gzip"), Some(true));
    /// assert_eq!(props.get_str("topic.control-prefix"), Some("$CTRL"));
    /// ```
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let table: toml::Table = toml::from_str(source)?;
        let mut props = Properties::new();
        flatten_into(&mut props, None, table)?;
        Ok(props)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`Properties::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Returns the value only if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(PropertyValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the value only if it is a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(PropertyValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value only if it is an integer.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(PropertyValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Overlays `other` on top of `self`.
    pub fn merge(&mut self, other: Properties) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Properties(iter.into_iter().collect())
    }
}

fn flatten_into(props: &mut Properties, prefix: Option<&str>, table: toml::Table) -> CoreResult<()> {
    for (key, value) in table {
        let full_key = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key,
        };
        let value = match value {
            toml::Value::Table(inner) => {
                flatten_into(props, Some(&full_key), inner)?;
                continue;
            }
            toml::Value::String(s) => PropertyValue::String(s),
            toml::Value::Integer(i) => PropertyValue::Integer(i),
            toml::Value::Float(f) => PropertyValue::Float(f),
            toml::Value::Boolean(b) => PropertyValue::Bool(b),
            toml::Value::Datetime(d) => PropertyValue::String(d.to_string()),
            toml::Value::Array(_) => {
                return Err(CoreError::PropertiesParse(format!(
                    "'{full_key}': arrays are not supported"
                )))
            }
        };
        props.insert(full_key, value);
    }
    Ok(())
}

// =============================================================================
// Enumerated Options
// =============================================================================

/// When lifecycle certificates are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BirthCertPolicy {
    /// No birth, disconnect or apps certificates at all
    Disable,
    /// Birth on the first connection only
    #[default]
    BirthConnect,
    /// Birth on every connection
    BirthConnectReconnect,
}

impl BirthCertPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BirthCertPolicy::Disable => "disable",
            BirthCertPolicy::BirthConnect => "birth-connect",
            BirthCertPolicy::BirthConnectReconnect => "birth-connect-reconnect",
        }
    }
}

impl FromStr for BirthCertPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(BirthCertPolicy::Disable),
            "birth-connect" => Ok(BirthCertPolicy::BirthConnect),
            "birth-connect-reconnect" => Ok(BirthCertPolicy::BirthConnectReconnect),
            other => Err(CoreError::invalid_option(
                keys::BIRTH_CERT_POLICY,
                format!("unknown policy '{other}'"),
            )),
        }
    }
}

impl fmt::Display for BirthCertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire encoding of application and lifecycle payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadEncoding {
    #[default]
    KuraProtobuf,
    SimpleJson,
}

impl PayloadEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadEncoding::KuraProtobuf => "kura-protobuf",
            PayloadEncoding::SimpleJson => "simple-json",
        }
    }
}

impl FromStr for PayloadEncoding {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kura-protobuf" => Ok(PayloadEncoding::KuraProtobuf),
            "simple-json" => Ok(PayloadEncoding::SimpleJson),
            other => Err(CoreError::invalid_option(
                keys::PAYLOAD_ENCODING,
                format!("unknown encoding '{other}'"),
            )),
        }
    }
}

impl fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the `display_name` metric.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DisplayNameMode {
    DeviceName,
    Hostname,
    /// Value of `device.custom-name`, or empty if it is not a string
    Custom(String),
    /// `server`, absent or unknown: empty name
    #[default]
    Unset,
}

impl DisplayNameMode {
    fn from_properties(props: &Properties) -> Self {
        match props.get_str(keys::DEVICE_DISPLAY_NAME) {
            Some("device-name") => DisplayNameMode::DeviceName,
            Some("hostname") => DisplayNameMode::Hostname,
            Some("custom") => DisplayNameMode::Custom(
                props
                    .get_str(keys::DEVICE_CUSTOM_NAME)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => DisplayNameMode::Unset,
        }
    }
}

// =============================================================================
// CloudServiceOptions
// =============================================================================

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudServiceOptions {
    control_prefix: String,
    display_name: DisplayNameMode,
    encode_gzip: bool,
    repub_on_gps_lock: bool,
    repub_on_modem_detect: bool,
    repub_on_tamper: bool,
    default_subscriptions: bool,
    birth_cert_policy: BirthCertPolicy,
    payload_encoding: PayloadEncoding,
    lifecycle_publish_delay: Duration,
}

impl Default for CloudServiceOptions {
    fn default() -> Self {
        Self {
            control_prefix: DEFAULT_CONTROL_PREFIX.to_string(),
            display_name: DisplayNameMode::Unset,
            encode_gzip: false,
            repub_on_gps_lock: false,
            repub_on_modem_detect: false,
            repub_on_tamper: true,
            default_subscriptions: true,
            birth_cert_policy: BirthCertPolicy::BirthConnect,
            payload_encoding: PayloadEncoding::KuraProtobuf,
            lifecycle_publish_delay: Duration::from_millis(DEFAULT_LIFECYCLE_PUBLISH_DELAY_MS),
        }
    }
}

impl CloudServiceOptions {
    /// Builds and validates a snapshot.
    ///
    /// A value of the wrong type is ignored in favour of the key's default;
    /// an unknown enum string behaves the same way. Only values that would
    /// break topic construction or the debounce timer are rejected.
    pub fn from_properties(props: &Properties) -> CoreResult<Self> {
        let defaults = CloudServiceOptions::default();

        let lifecycle_publish_delay = match props.get_i64(keys::LIFECYCLE_PUBLISH_DELAY_MS) {
            Some(ms) if ms < 0 => {
                return Err(CoreError::invalid_option(
                    keys::LIFECYCLE_PUBLISH_DELAY_MS,
                    "must not be negative",
                ))
            }
            Some(ms) => Duration::from_millis(ms.unsigned_abs()),
            None => defaults.lifecycle_publish_delay,
        };

        let options = Self {
            control_prefix: props
                .get_str(keys::TOPIC_CONTROL_PREFIX)
                .map(str::to_string)
                .unwrap_or(defaults.control_prefix),
            display_name: DisplayNameMode::from_properties(props),
            encode_gzip: props.get_bool(keys::ENCODE_GZIP).unwrap_or(defaults.encode_gzip),
            repub_on_gps_lock: props
                .get_bool(keys::REPUB_BIRTH_ON_GPS_LOCK)
                .unwrap_or(defaults.repub_on_gps_lock),
            repub_on_modem_detect: props
                .get_bool(keys::REPUB_BIRTH_ON_MODEM_DETECT)
                .unwrap_or(defaults.repub_on_modem_detect),
            repub_on_tamper: props
                .get_bool(keys::REPUB_BIRTH_ON_TAMPER_EVENT)
                .unwrap_or(defaults.repub_on_tamper),
            default_subscriptions: props
                .get_bool(keys::ENABLE_DEFAULT_SUBSCRIPTIONS)
                .unwrap_or(defaults.default_subscriptions),
            birth_cert_policy: props
                .get_str(keys::BIRTH_CERT_POLICY)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.birth_cert_policy),
            payload_encoding: props
                .get_str(keys::PAYLOAD_ENCODING)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.payload_encoding),
            lifecycle_publish_delay,
        };

        options.validate()?;
        Ok(options)
    }

    /// Rejects values that cannot be used.
    pub fn validate(&self) -> CoreResult<()> {
        if self.control_prefix.is_empty() {
            return Err(CoreError::invalid_option(
                keys::TOPIC_CONTROL_PREFIX,
                "must not be empty",
            ));
        }
        if self.control_prefix.contains(TOPIC_SEPARATOR) {
            return Err(CoreError::invalid_option(
                keys::TOPIC_CONTROL_PREFIX,
                format!("must not contain '{TOPIC_SEPARATOR}'"),
            ));
        }
        if self.lifecycle_publish_delay.is_zero() {
            return Err(CoreError::invalid_option(
                keys::LIFECYCLE_PUBLISH_DELAY_MS,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn control_prefix(&self) -> &str {
        &self.control_prefix
    }

    pub fn display_name_mode(&self) -> &DisplayNameMode {
        &self.display_name
    }

    /// Resolves the `display_name` metric from the device's own names.
    pub fn display_name(&self, device_name: &str, hostname: &str) -> String {
        match &self.display_name {
            DisplayNameMode::DeviceName => device_name.to_string(),
            DisplayNameMode::Hostname => hostname.to_string(),
            DisplayNameMode::Custom(name) => name.clone(),
            DisplayNameMode::Unset => String::new(),
        }
    }

    pub fn encode_gzip(&self) -> bool {
        self.encode_gzip
    }

    pub fn repub_birth_on_gps_lock(&self) -> bool {
        self.repub_on_gps_lock
    }

    pub fn repub_birth_on_modem_detect(&self) -> bool {
        self.repub_on_modem_detect
    }

    pub fn repub_birth_on_tamper(&self) -> bool {
        self.repub_on_tamper
    }

    pub fn default_subscriptions_enabled(&self) -> bool {
        self.default_subscriptions
    }

    pub fn birth_cert_policy(&self) -> BirthCertPolicy {
        self.birth_cert_policy
    }

    pub fn lifecycle_certs_disabled(&self) -> bool {
        self.birth_cert_policy == BirthCertPolicy::Disable
    }

    pub fn repub_birth_on_reconnect(&self) -> bool {
        self.birth_cert_policy == BirthCertPolicy::BirthConnectReconnect
    }

    pub fn payload_encoding(&self) -> PayloadEncoding {
        self.payload_encoding
    }

    /// Debounce quiet period.
    pub fn announcement_delay(&self) -> Duration {
        self.lifecycle_publish_delay
    }

    pub fn topic_namespace(&self) -> TopicNamespace {
        TopicNamespace::new(self.control_prefix.clone())
    }

    pub fn policy_flags(&self) -> PolicyFlags {
        PolicyFlags {
            certs_disabled: self.lifecycle_certs_disabled(),
            repub_on_reconnect: self.repub_birth_on_reconnect(),
            repub_on_gps_lock: self.repub_on_gps_lock,
            repub_on_modem_detect: self.repub_on_modem_detect,
            repub_on_tamper: self.repub_on_tamper,
        }
    }

    /// QoS for a lifecycle announcement: 1 for birth/apps, 0 for disconnect.
    pub fn lifecycle_qos(&self, kind: AnnouncementKind) -> u8 {
        match kind {
            AnnouncementKind::Birth | AnnouncementKind::Apps => 1,
            AnnouncementKind::Disconnect => 0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Properties {
        Properties::new()
            .with(keys::DEVICE_DISPLAY_NAME, "device-name")
            .with(keys::ENCODE_GZIP, true)
            .with(keys::REPUB_BIRTH_ON_GPS_LOCK, true)
            .with(keys::REPUB_BIRTH_ON_MODEM_DETECT, true)
            .with(keys::TOPIC_CONTROL_PREFIX, "newTopicControlPrefix")
            .with(keys::ENABLE_DEFAULT_SUBSCRIPTIONS, false)
            .with(keys::BIRTH_CERT_POLICY, "disable")
            .with(keys::PAYLOAD_ENCODING, "simple-json")
    }

    #[test]
    fn test_defaults_from_empty_properties() {
        let options = CloudServiceOptions::from_properties(&Properties::new()).unwrap();
        assert_eq!(options, CloudServiceOptions::default());
        assert_eq!(options.control_prefix(), "$EDC");
        assert!(!options.encode_gzip());
        assert!(!options.repub_birth_on_gps_lock());
        assert!(!options.repub_birth_on_modem_detect());
        assert!(options.repub_birth_on_tamper());
        assert!(options.default_subscriptions_enabled());
        assert!(!options.lifecycle_certs_disabled());
        assert!(!options.repub_birth_on_reconnect());
        assert_eq!(options.payload_encoding(), PayloadEncoding::KuraProtobuf);
        assert_eq!(options.announcement_delay(), Duration::from_secs(30));
        assert_eq!(options.display_name("dev", "host"), "");
    }

    #[test]
    fn test_configured_values() {
        let options = CloudServiceOptions::from_properties(&configured()).unwrap();
        assert_eq!(options.control_prefix(), "newTopicControlPrefix");
        assert!(options.encode_gzip());
        assert!(options.repub_birth_on_gps_lock());
        assert!(options.repub_birth_on_modem_detect());
        assert!(!options.default_subscriptions_enabled());
        assert!(options.lifecycle_certs_disabled());
        assert_eq!(options.payload_encoding(), PayloadEncoding::SimpleJson);
        assert_eq!(options.display_name("DeviceName", "host"), "DeviceName");
    }

    #[test]
    fn test_wrong_types_fall_back_to_defaults() {
        let props = Properties::new()
            .with(keys::TOPIC_CONTROL_PREFIX, true)
            .with(keys::ENCODE_GZIP, "invalid")
            .with(keys::REPUB_BIRTH_ON_GPS_LOCK, "invalid")
            .with(keys::ENABLE_DEFAULT_SUBSCRIPTIONS, "invalid")
            .with(keys::BIRTH_CERT_POLICY, true)
            .with(keys::PAYLOAD_ENCODING, 3);

        let options = CloudServiceOptions::from_properties(&props).unwrap();
        assert_eq!(options.control_prefix(), DEFAULT_CONTROL_PREFIX);
        assert!(!options.encode_gzip());
        assert!(!options.repub_birth_on_gps_lock());
        assert!(options.default_subscriptions_enabled());
        assert!(!options.lifecycle_certs_disabled());
        assert_eq!(options.payload_encoding(), PayloadEncoding::KuraProtobuf);
    }

    #[test]
    fn test_birth_cert_policy_flags() {
        let reconnect = CloudServiceOptions::from_properties(
            &Properties::new().with(keys::BIRTH_CERT_POLICY, "birth-connect-reconnect"),
        )
        .unwrap();
        assert!(reconnect.repub_birth_on_reconnect());
        assert!(reconnect.policy_flags().repub_on_reconnect);

        let connect = CloudServiceOptions::from_properties(
            &Properties::new().with(keys::BIRTH_CERT_POLICY, "birth-connect"),
        )
        .unwrap();
        assert!(!connect.repub_birth_on_reconnect());
        assert!(!connect.lifecycle_certs_disabled());
    }

    #[test]
    fn test_display_name_modes() {
        let resolve = |props: Properties| {
            CloudServiceOptions::from_properties(&props)
                .unwrap()
                .display_name("DeviceName", "UNKNOWN")
        };

        let base = || Properties::new();
        assert_eq!(resolve(base().with(keys::DEVICE_DISPLAY_NAME, "hostname")), "UNKNOWN");
        assert_eq!(resolve(base().with(keys::DEVICE_DISPLAY_NAME, "custom")), "");
        assert_eq!(
            resolve(
                base()
                    .with(keys::DEVICE_DISPLAY_NAME, "custom")
                    .with(keys::DEVICE_CUSTOM_NAME, 1)
            ),
            ""
        );
        assert_eq!(
            resolve(
                base()
                    .with(keys::DEVICE_DISPLAY_NAME, "custom")
                    .with(keys::DEVICE_CUSTOM_NAME, "MyDevice")
            ),
            "MyDevice"
        );
        assert_eq!(resolve(base().with(keys::DEVICE_DISPLAY_NAME, "server")), "");
        assert_eq!(resolve(base().with(keys::DEVICE_DISPLAY_NAME, "invalid")), "");
    }

    #[test]
    fn test_validation_errors() {
        let empty = Properties::new().with(keys::TOPIC_CONTROL_PREFIX, "");
        assert!(matches!(
            CloudServiceOptions::from_properties(&empty),
            Err(CoreError::InvalidOption { .. })
        ));

        let with_sep = Properties::new().with(keys::TOPIC_CONTROL_PREFIX, "$E/DC");
        assert!(CloudServiceOptions::from_properties(&with_sep).is_err());

        let zero = Properties::new().with(keys::LIFECYCLE_PUBLISH_DELAY_MS, 0);
        assert!(CloudServiceOptions::from_properties(&zero).is_err());

        let negative = Properties::new().with(keys::LIFECYCLE_PUBLISH_DELAY_MS, -5);
        assert!(CloudServiceOptions::from_properties(&negative).is_err());
    }

    #[test]
    fn test_lifecycle_qos() {
        let options = CloudServiceOptions::default();
        assert_eq!(options.lifecycle_qos(AnnouncementKind::Birth), 1);
        assert_eq!(options.lifecycle_qos(AnnouncementKind::Apps), 1);
        assert_eq!(options.lifecycle_qos(AnnouncementKind::Disconnect), 0);
    }

    #[test]
    fn test_properties_from_toml() {
        let props = Properties::from_toml_str(
            r#"
            "birth.cert.policy" = "birth-connect-reconnect"

            [lifecycle.publish.delay]
            ms = 5000

            [encode]
            gzip = true
            "#,
        )
        .unwrap();

        assert_eq!(props.get_str(keys::BIRTH_CERT_POLICY), Some("birth-connect-reconnect"));
        assert_eq!(props.get_i64(keys::LIFECYCLE_PUBLISH_DELAY_MS), Some(5000));
        assert_eq!(props.get_bool(keys::ENCODE_GZIP), Some(true));

        let options = CloudServiceOptions::from_properties(&props).unwrap();
        assert_eq!(options.announcement_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_properties_from_toml_rejects_arrays() {
        let result = Properties::from_toml_str(r#"ids = ["a", "b"]"#);
        assert!(matches!(result, Err(CoreError::PropertiesParse(_))));
    }
}
