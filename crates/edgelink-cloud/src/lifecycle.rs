//! # Lifecycle Payloads
//!
//! Builds the birth, apps and disconnect certificates from a device profile,
//! the current options and the registered application ids.
//!
//! ```text
//! ┌──────────────────┬───────────────────────────────────────────────────┐
//! │ Certificate      │ Metrics                                           │
//! ├──────────────────┼───────────────────────────────────────────────────┤
//! │ birth / apps     │ uptime, display_name, device identity, os,        │
//! │                  │ framework, connection, accept_encoding,           │
//! │                  │ application_ids, modem_*, payload_encoding        │
//! │ disconnect       │ uptime, display_name                              │
//! └──────────────────┴───────────────────────────────────────────────────┘
//! ```

use std::time::{Duration, Instant};

use edgelink_core::payload::lifecycle_metrics as m;
use edgelink_core::{AnnouncementKind, CloudServiceOptions, KuraPayload, KuraPosition, ModemIdentity};

// =============================================================================
// Device Profile
// =============================================================================

/// Static identity of the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProfile {
    pub device_name: String,
    pub hostname: String,
    pub model_name: String,
    pub model_id: String,
    pub part_number: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub bios_version: String,
    pub os_name: String,
    pub os_version: String,
    pub os_arch: String,
    pub available_processors: u32,
    /// Kilobytes
    pub total_memory_kb: u64,
    pub framework_name: String,
    pub framework_version: String,
    pub connection_interface: Option<String>,
    pub connection_ip: Option<String>,
}

/// Source of device identity for lifecycle payloads.
pub trait SystemInfo: Send + Sync {
    fn profile(&self) -> DeviceProfile;

    /// Time since the device (or agent) started.
    fn uptime(&self) -> Duration;

    /// Last known position, attached to birth certificates.
    fn position(&self) -> Option<KuraPosition> {
        None
    }
}

/// A fixed profile; uptime counts from construction.
#[derive(Debug, Clone)]
pub struct StaticSystemInfo {
    profile: DeviceProfile,
    position: Option<KuraPosition>,
    started: Instant,
}

impl StaticSystemInfo {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            position: None,
            started: Instant::now(),
        }
    }

    /// Profile filled from what the process can see about its host.
    pub fn from_host() -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self::new(DeviceProfile {
            device_name: hostname.clone(),
            hostname,
            os_name: std::env::consts::OS.to_string(),
            os_arch: std::env::consts::ARCH.to_string(),
            available_processors: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            framework_name: env!("CARGO_PKG_NAME").to_string(),
            framework_version: env!("CARGO_PKG_VERSION").to_string(),
            ..DeviceProfile::default()
        })
    }

    pub fn with_position(mut self, position: KuraPosition) -> Self {
        self.position = Some(position);
        self
    }
}

impl Default for StaticSystemInfo {
    fn default() -> Self {
        Self::new(DeviceProfile::default())
    }
}

impl SystemInfo for StaticSystemInfo {
    fn profile(&self) -> DeviceProfile {
        self.profile.clone()
    }

    fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn position(&self) -> Option<KuraPosition> {
        self.position.clone()
    }
}

// =============================================================================
// Payload Builder
// =============================================================================

/// Assembles lifecycle payloads from one consistent set of inputs.
pub struct LifecyclePayloadBuilder<'a> {
    pub options: &'a CloudServiceOptions,
    pub system: &'a dyn SystemInfo,
    pub application_ids: &'a [String],
    pub modem: &'a ModemIdentity,
}

impl LifecyclePayloadBuilder<'_> {
    pub fn payload(&self, kind: AnnouncementKind) -> KuraPayload {
        match kind {
            AnnouncementKind::Birth | AnnouncementKind::Apps => self.birth_payload(),
            AnnouncementKind::Disconnect => self.disconnect_payload(),
        }
    }

    pub fn birth_payload(&self) -> KuraPayload {
        let profile = self.system.profile();
        let mut payload = self.base(&profile);
        payload.position = self.system.position();

        for (name, value) in [
            (m::MODEL_NAME, &profile.model_name),
            (m::MODEL_ID, &profile.model_id),
            (m::PART_NUMBER, &profile.part_number),
            (m::SERIAL_NUMBER, &profile.serial_number),
            (m::FIRMWARE_VERSION, &profile.firmware_version),
            (m::BIOS_VERSION, &profile.bios_version),
            (m::OS, &profile.os_name),
            (m::OS_VERSION, &profile.os_version),
            (m::OS_ARCH, &profile.os_arch),
            (m::APPLICATION_FRAMEWORK, &profile.framework_name),
            (m::APPLICATION_FRAMEWORK_VERSION, &profile.framework_version),
        ] {
            if !value.is_empty() {
                payload.add_metric(name, value.as_str());
            }
        }

        if profile.available_processors > 0 {
            payload.add_metric(m::AVAILABLE_PROCESSORS, profile.available_processors as i32);
        }
        if profile.total_memory_kb > 0 {
            payload.add_metric(m::TOTAL_MEMORY, profile.total_memory_kb as i64);
        }
        if let Some(interface) = profile.connection_interface {
            payload.add_metric(m::CONNECTION_INTERFACE, interface);
        }
        if let Some(ip) = profile.connection_ip {
            payload.add_metric(m::CONNECTION_IP, ip);
        }

        if self.options.encode_gzip() {
            payload.add_metric(m::ACCEPT_ENCODING, "gzip");
        }
        payload.add_metric(m::APPLICATION_IDS, self.application_ids.join(","));
        payload.add_metric(m::PAYLOAD_ENCODING, self.options.payload_encoding().as_str());

        for (name, value) in [
            (m::MODEM_IMEI, &self.modem.imei),
            (m::MODEM_IMSI, &self.modem.imsi),
            (m::MODEM_ICCID, &self.modem.iccid),
            (m::MODEM_RSSI, &self.modem.rssi),
        ] {
            if let Some(value) = value {
                payload.add_metric(name, value.as_str());
            }
        }

        payload
    }

    pub fn disconnect_payload(&self) -> KuraPayload {
        self.base(&self.system.profile())
    }

    fn base(&self, profile: &DeviceProfile) -> KuraPayload {
        let uptime_ms = i64::try_from(self.system.uptime().as_millis()).unwrap_or(i64::MAX);
        KuraPayload::now()
            .with_metric(m::UPTIME, uptime_ms)
            .with_metric(
                m::DISPLAY_NAME,
                self.options.display_name(&profile.device_name, &profile.hostname),
            )
    }
}
