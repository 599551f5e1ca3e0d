//! # edgelink-core: Pure Logic for the Edgelink Cloud Service
//!
//! Everything the cloud service decides without touching a socket, a clock
//! or a lock lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Edgelink Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Applications (CloudClient users)                │   │
//! │  │        publish / subscribe / listeners / request handlers      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              edgelink-cloud (CloudService runtime)              │   │
//! │  │     debounce timers, registry, codecs, listener fan-out        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ edgelink-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   topic   │  │  policy   │  │  options  │  │  payload  │  │   │
//! │  │   │ namespace │  │  decide() │  │ snapshot  │  │   model   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`topic`] - Topic strings and delivery-tracking regexes
//! - [`policy`] - Trigger → announcement decision table
//! - [`options`] - Configuration properties and the options snapshot
//! - [`payload`] - Payload model and well-known metric names
//! - [`event`] - Typed external events (GPS, modem, tamper, deployment)
//! - [`error`] - Core error types
//!
//! ## Example Usage
//!
//! ```rust
//! use edgelink_core::options::{CloudServiceOptions, Properties};
//! use edgelink_core::policy::{decide, Action, AnnouncementKind, Trigger};
//!
//! let options = CloudServiceOptions::from_properties(&Properties::new()).unwrap();
//! let ns = options.topic_namespace();
//!
//! assert_eq!(ns.data_topic("heater", "status"), "#account-name/#client-id/heater/status");
//! assert_eq!(
//!     decide(Trigger::Activate, true, &options.policy_flags()),
//!     Action::PublishNow(AnnouncementKind::Birth)
//! );
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod event;
pub mod options;
pub mod payload;
pub mod policy;
pub mod topic;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use event::{ExternalEvent, ModemIdentity};
pub use options::{BirthCertPolicy, CloudServiceOptions, PayloadEncoding, Properties, PropertyValue};
pub use payload::{KuraPayload, KuraPosition, MetricValue};
pub use policy::{decide, Action, AnnouncementKind, ExternalEventKind, PolicyFlags, Trigger};
pub use topic::{ParsedTopic, TopicNamespace};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Priority used by `publish` calls that do not give one.
///
/// Lower numbers are sent first; lifecycle messages use 0.
pub const DEFAULT_PUBLISH_PRIORITY: u8 = 5;
