//! # External Events
//!
//! Adapter at the system boundary: event-bus topics and their property
//! dictionaries become a closed set of typed events, so the announcement
//! policy never sees a string.
//!
//! ```text
//!   "org/eclipse/kura/net/modem/READY" + {IMEI, IMSI, ICCID, RSSI}
//!                        │
//!                        ▼  ExternalEvent::from_topic()
//!   ExternalEvent::ModemReady(ModemIdentity { .. })
//!                        │
//!                        ▼  .kind()
//!   ExternalEventKind::ModemReady  ──►  policy::decide()
//! ```

use crate::options::{Properties, PropertyValue};
use crate::policy::ExternalEventKind;

// =============================================================================
// Event Topics
// =============================================================================

pub const POSITION_LOCKED_EVENT_TOPIC: &str = "org/eclipse/kura/position/locked";
pub const MODEM_READY_EVENT_TOPIC: &str = "org/eclipse/kura/net/modem/READY";
pub const TAMPER_EVENT_TOPIC: &str = "org/eclipse/kura/security/tamper/TAMPER";
pub const DEPLOYMENT_INSTALL_EVENT_TOPIC: &str = "org/osgi/service/deployment/INSTALL";
pub const DEPLOYMENT_UNINSTALL_EVENT_TOPIC: &str = "org/osgi/service/deployment/UNINSTALL";

/// Every topic the cloud service listens to.
pub const SUBSCRIBED_EVENT_TOPICS: [&str; 5] = [
    POSITION_LOCKED_EVENT_TOPIC,
    MODEM_READY_EVENT_TOPIC,
    TAMPER_EVENT_TOPIC,
    DEPLOYMENT_INSTALL_EVENT_TOPIC,
    DEPLOYMENT_UNINSTALL_EVENT_TOPIC,
];

/// Modem-ready event property names.
pub mod modem_keys {
    pub const IMEI: &str = "IMEI";
    pub const IMSI: &str = "IMSI";
    pub const ICCID: &str = "ICCID";
    pub const RSSI: &str = "RSSI";
}

// =============================================================================
// Types
// =============================================================================

/// Identity reported by a modem when it becomes ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModemIdentity {
    pub imei: Option<String>,
    pub imsi: Option<String>,
    pub iccid: Option<String>,
    pub rssi: Option<String>,
}

/// An event from the device event bus that the cloud service reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalEvent {
    PositionLocked,
    ModemReady(ModemIdentity),
    TamperDetected,
    PackageInstalled,
    PackageUninstalled,
}

impl ExternalEvent {
    /// Maps an event-bus topic to a typed event; `None` for unrelated topics.
    pub fn from_topic(topic: &str, properties: &Properties) -> Option<Self> {
        match topic {
            POSITION_LOCKED_EVENT_TOPIC => Some(ExternalEvent::PositionLocked),
            MODEM_READY_EVENT_TOPIC => Some(ExternalEvent::ModemReady(ModemIdentity {
                imei: text(properties, modem_keys::IMEI),
                imsi: text(properties, modem_keys::IMSI),
                iccid: text(properties, modem_keys::ICCID),
                rssi: text(properties, modem_keys::RSSI),
            })),
            TAMPER_EVENT_TOPIC => Some(ExternalEvent::TamperDetected),
            DEPLOYMENT_INSTALL_EVENT_TOPIC => Some(ExternalEvent::PackageInstalled),
            DEPLOYMENT_UNINSTALL_EVENT_TOPIC => Some(ExternalEvent::PackageUninstalled),
            _ => None,
        }
    }

    pub fn kind(&self) -> ExternalEventKind {
        match self {
            ExternalEvent::PositionLocked => ExternalEventKind::PositionLocked,
            ExternalEvent::ModemReady(_) => ExternalEventKind::ModemReady,
            ExternalEvent::TamperDetected => ExternalEventKind::TamperDetected,
            ExternalEvent::PackageInstalled => ExternalEventKind::PackageInstalled,
            ExternalEvent::PackageUninstalled => ExternalEventKind::PackageUninstalled,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            ExternalEvent::PositionLocked => POSITION_LOCKED_EVENT_TOPIC,
            ExternalEvent::ModemReady(_) => MODEM_READY_EVENT_TOPIC,
            ExternalEvent::TamperDetected => TAMPER_EVENT_TOPIC,
            ExternalEvent::PackageInstalled => DEPLOYMENT_INSTALL_EVENT_TOPIC,
            ExternalEvent::PackageUninstalled => DEPLOYMENT_UNINSTALL_EVENT_TOPIC,
        }
    }
}

// Numeric properties (RSSI is often an integer) are kept as text.
fn text(properties: &Properties, key: &str) -> Option<String> {
    match properties.get(key)? {
        PropertyValue::String(s) => Some(s.clone()),
        PropertyValue::Integer(i) => Some(i.to_string()),
        PropertyValue::Float(f) => Some(f.to_string()),
        PropertyValue::Bool(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_map_to_kinds() {
        let empty = Properties::new();
        for topic in SUBSCRIBED_EVENT_TOPICS {
            let event = ExternalEvent::from_topic(topic, &empty).unwrap();
            assert_eq!(event.topic(), topic);
        }
        assert_eq!(
            ExternalEvent::from_topic(TAMPER_EVENT_TOPIC, &empty).map(|e| e.kind()),
            Some(ExternalEventKind::TamperDetected)
        );
        assert!(ExternalEvent::from_topic("org/example/OTHER", &empty).is_none());
    }

    #[test]
    fn test_modem_identity_extracted() {
        let props = Properties::new()
            .with(modem_keys::ICCID, "1234")
            .with(modem_keys::IMEI, "4321")
            .with(modem_keys::IMSI, "6789")
            .with(modem_keys::RSSI, -71);

        let event = ExternalEvent::from_topic(MODEM_READY_EVENT_TOPIC, &props).unwrap();
        assert_eq!(
            event,
            ExternalEvent::ModemReady(ModemIdentity {
                imei: Some("4321".into()),
                imsi: Some("6789".into()),
                iccid: Some("1234".into()),
                rssi: Some("-71".into()),
            })
        );
    }
}
