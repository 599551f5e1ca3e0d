//! # Announcement Policy
//!
//! Pure decision table: given a trigger, the current connection state and the
//! policy flags derived from the options, decide whether a lifecycle
//! announcement goes out now, after the debounce delay, or not at all.
//!
//! ## Decision Table
//! ```text
//! ┌──────────────────────────────────┬──────────────┬──────────────────────┐
//! │ Trigger                          │ Disconnected │ Connected            │
//! ├──────────────────────────────────┼──────────────┼──────────────────────┤
//! │ Activate                         │ None         │ PublishNow(Birth)    │
//! │ ConfigurationUpdated             │ None         │ Schedule(Birth)      │
//! │ Deactivate                       │ None         │ PublishNow(Disconn.) │
//! │ ConnectionEstablished            │      -       │ PublishNow(Birth) *  │
//! │ Disconnecting                    │      -       │ PublishNow(Disconn.) │
//! │ AppsChanged                      │ None         │ Schedule(Apps)       │
//! │ External(kind)                   │ None         │ Schedule(Birth) **   │
//! └──────────────────────────────────┴──────────────┴──────────────────────┘
//!
//!  *  reconnects only when the birth policy republishes on reconnect
//!  ** only when the per-trigger republish flag is set; package
//!     install/uninstall are always honoured
//!
//!  With certificates disabled every row yields None.
//! ```
//!
//! Transport callbacks (connection established, disconnecting) already imply
//! the connection state, so those rows ignore the `connected` argument.

use std::fmt;

// =============================================================================
// Types
// =============================================================================

/// The three lifecycle announcements a device makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnouncementKind {
    /// Device identity and capabilities
    Birth,
    /// Intentional departure
    Disconnect,
    /// Current list of application ids
    Apps,
}

impl AnnouncementKind {
    pub const ALL: [AnnouncementKind; 3] = [
        AnnouncementKind::Birth,
        AnnouncementKind::Disconnect,
        AnnouncementKind::Apps,
    ];
}

impl fmt::Display for AnnouncementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnouncementKind::Birth => write!(f, "birth"),
            AnnouncementKind::Disconnect => write!(f, "disconnect"),
            AnnouncementKind::Apps => write!(f, "apps"),
        }
    }
}

/// External events that may cause a birth republish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalEventKind {
    PositionLocked,
    ModemReady,
    TamperDetected,
    PackageInstalled,
    PackageUninstalled,
}

impl fmt::Display for ExternalEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalEventKind::PositionLocked => "position-locked",
            ExternalEventKind::ModemReady => "modem-ready",
            ExternalEventKind::TamperDetected => "tamper-detected",
            ExternalEventKind::PackageInstalled => "package-installed",
            ExternalEventKind::PackageUninstalled => "package-uninstalled",
        };
        f.write_str(name)
    }
}

/// Everything that can lead to a lifecycle announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Activate,
    ConfigurationUpdated,
    Deactivate,
    /// `reconnect` is false for the first connection after activation.
    ConnectionEstablished { reconnect: bool },
    Disconnecting,
    /// An application entry or request handler was added or removed.
    AppsChanged,
    External(ExternalEventKind),
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    PublishNow(AnnouncementKind),
    Schedule(AnnouncementKind),
}

/// Option-derived switches consulted by [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyFlags {
    /// Birth certificate policy is `disable`
    pub certs_disabled: bool,
    pub repub_on_reconnect: bool,
    pub repub_on_gps_lock: bool,
    pub repub_on_modem_detect: bool,
    pub repub_on_tamper: bool,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            certs_disabled: false,
            repub_on_reconnect: false,
            repub_on_gps_lock: false,
            repub_on_modem_detect: false,
            repub_on_tamper: true,
        }
    }
}

impl PolicyFlags {
    fn allows(&self, event: ExternalEventKind) -> bool {
        match event {
            ExternalEventKind::PositionLocked => self.repub_on_gps_lock,
            ExternalEventKind::ModemReady => self.repub_on_modem_detect,
            ExternalEventKind::TamperDetected => self.repub_on_tamper,
            ExternalEventKind::PackageInstalled | ExternalEventKind::PackageUninstalled => true,
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Maps a trigger to an action.
///
/// ## Example
/// ```rust
/// use edgelink_core::policy::{decide, Action, AnnouncementKind, PolicyFlags, Trigger};
///
/// let flags = PolicyFlags::default();
/// assert_eq!(decide(Trigger::Activate, false, &flags), Action::None);
/// assert_eq!(
///     decide(Trigger::ConfigurationUpdated, true, &flags),
///     Action::Schedule(AnnouncementKind::Birth)
/// );
/// ```
pub fn decide(trigger: Trigger, connected: bool, flags: &PolicyFlags) -> Action {
    if flags.certs_disabled {
        return Action::None;
    }

    match trigger {
        Trigger::ConnectionEstablished { reconnect } => {
            if reconnect && !flags.repub_on_reconnect {
                Action::None
            } else {
                Action::PublishNow(AnnouncementKind::Birth)
            }
        }
        Trigger::Disconnecting => Action::PublishNow(AnnouncementKind::Disconnect),
        _ if !connected => Action::None,
        Trigger::Activate => Action::PublishNow(AnnouncementKind::Birth),
        Trigger::ConfigurationUpdated => Action::Schedule(AnnouncementKind::Birth),
        Trigger::Deactivate => Action::PublishNow(AnnouncementKind::Disconnect),
        Trigger::AppsChanged => Action::Schedule(AnnouncementKind::Apps),
        Trigger::External(event) if flags.allows(event) => {
            Action::Schedule(AnnouncementKind::Birth)
        }
        Trigger::External(_) => Action::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_EXTERNAL: [ExternalEventKind; 5] = [
        ExternalEventKind::PositionLocked,
        ExternalEventKind::ModemReady,
        ExternalEventKind::TamperDetected,
        ExternalEventKind::PackageInstalled,
        ExternalEventKind::PackageUninstalled,
    ];

    fn all_enabled() -> PolicyFlags {
        PolicyFlags {
            certs_disabled: false,
            repub_on_reconnect: true,
            repub_on_gps_lock: true,
            repub_on_modem_detect: true,
            repub_on_tamper: true,
        }
    }

    #[test]
    fn test_offline_triggers_do_nothing() {
        let flags = all_enabled();
        let mut triggers = vec![
            Trigger::Activate,
            Trigger::ConfigurationUpdated,
            Trigger::Deactivate,
            Trigger::AppsChanged,
        ];
        triggers.extend(ALL_EXTERNAL.iter().map(|e| Trigger::External(*e)));

        for trigger in triggers {
            assert_eq!(decide(trigger, false, &flags), Action::None, "{trigger:?}");
        }
    }

    #[test]
    fn test_connected_table() {
        let flags = all_enabled();
        assert_eq!(
            decide(Trigger::Activate, true, &flags),
            Action::PublishNow(AnnouncementKind::Birth)
        );
        assert_eq!(
            decide(Trigger::ConfigurationUpdated, true, &flags),
            Action::Schedule(AnnouncementKind::Birth)
        );
        assert_eq!(
            decide(Trigger::Deactivate, true, &flags),
            Action::PublishNow(AnnouncementKind::Disconnect)
        );
        assert_eq!(
            decide(Trigger::ConnectionEstablished { reconnect: false }, true, &flags),
            Action::PublishNow(AnnouncementKind::Birth)
        );
        assert_eq!(
            decide(Trigger::Disconnecting, true, &flags),
            Action::PublishNow(AnnouncementKind::Disconnect)
        );
        assert_eq!(
            decide(Trigger::AppsChanged, true, &flags),
            Action::Schedule(AnnouncementKind::Apps)
        );
        for event in ALL_EXTERNAL {
            assert_eq!(
                decide(Trigger::External(event), true, &flags),
                Action::Schedule(AnnouncementKind::Birth)
            );
        }
    }

    #[test]
    fn test_external_flags_gate_birth() {
        let flags = PolicyFlags {
            repub_on_gps_lock: false,
            repub_on_modem_detect: false,
            repub_on_tamper: false,
            ..all_enabled()
        };
        for event in [
            ExternalEventKind::PositionLocked,
            ExternalEventKind::ModemReady,
            ExternalEventKind::TamperDetected,
        ] {
            assert_eq!(decide(Trigger::External(event), true, &flags), Action::None);
        }
        assert_eq!(
            decide(Trigger::External(ExternalEventKind::PackageInstalled), true, &flags),
            Action::Schedule(AnnouncementKind::Birth)
        );
    }

    #[test]
    fn test_reconnect_policy() {
        let flags = PolicyFlags::default();
        assert_eq!(
            decide(Trigger::ConnectionEstablished { reconnect: true }, true, &flags),
            Action::None
        );

        let flags = PolicyFlags {
            repub_on_reconnect: true,
            ..flags
        };
        assert_eq!(
            decide(Trigger::ConnectionEstablished { reconnect: true }, true, &flags),
            Action::PublishNow(AnnouncementKind::Birth)
        );
    }

    #[test]
    fn test_disabled_certs_suppress_everything() {
        let flags = PolicyFlags {
            certs_disabled: true,
            ..all_enabled()
        };
        for trigger in [
            Trigger::Activate,
            Trigger::ConfigurationUpdated,
            Trigger::Deactivate,
            Trigger::ConnectionEstablished { reconnect: false },
            Trigger::Disconnecting,
            Trigger::AppsChanged,
            Trigger::External(ExternalEventKind::PackageInstalled),
        ] {
            assert_eq!(decide(trigger, true, &flags), Action::None);
        }
    }
}
