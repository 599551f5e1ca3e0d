//! # edgelink-cloud: Cloud Service Runtime
//!
//! The [`CloudService`] owns one transport connection on behalf of many
//! applications. Each application gets a [`CloudClient`] scoped to its own
//! topic namespace, and the service announces the device's lifecycle
//! (birth, disconnect, apps) with debouncing for bursty triggers.
//!
//! ## Data Flow
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                                                          │
//! │   CloudClient("heater")     CloudClient("pump")     RequestHandler       │
//! │          │   ▲                     │   ▲                  ▲              │
//! │  publish │   │ listeners   publish │   │ listeners        │ requests     │
//! │          ▼   │                     ▼   │                  │              │
//! │   ┌──────────┴─────────────────────────┴──────────────────┴──────────┐   │
//! │   │                         CloudService                             │   │
//! │   │   registry ─ lifecycle policy ─ DebounceScheduler ─ codecs       │   │
//! │   └───────────────────────────────┬──────────────────────────────────┘   │
//! │                                   │                                      │
//! │                      DataService (trait) ─► broker                       │
//! │                      InMemoryDataService (loopback)                      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`service`] - Lifecycle hooks, registry, transport callbacks
//! - [`client`] - Per-application publish/subscribe facade
//! - [`debounce`] - One pending timer per announcement kind
//! - [`lifecycle`] - Birth / disconnect payload construction
//! - [`listener`] - Application listener trait and fan-out
//! - [`request`] - Request/response over control topics
//! - [`codec`] - Kura protobuf and simple-json encodings
//! - [`transport`] - Data service collaborator traits
//! - [`loopback`] - In-memory data service
//! - [`config`] - Options file and environment overrides
//! - [`error`] - Runtime error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgelink_cloud::{CloudService, InMemoryDataService};
//! use edgelink_core::{KuraPayload, Properties};
//!
//! # async fn run() -> edgelink_cloud::CloudResult<()> {
//! let transport = Arc::new(InMemoryDataService::new());
//! let service = CloudService::builder(transport.clone()).build()?;
//! service.activate(&Properties::new())?;
//!
//! let heater = service.new_cloud_client("heater")?;
//! heater.publish("status", &KuraPayload::now().with_metric("temp", 21.5), 1, false)?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod debounce;
pub mod error;
pub mod lifecycle;
pub mod listener;
pub mod loopback;
pub mod request;
pub mod service;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::CloudClient;
pub use codec::{JsonMarshaller, Marshaller, PayloadCodec, ProtobufCodec};
pub use error::{CloudError, CloudResult};
pub use lifecycle::{DeviceProfile, StaticSystemInfo, SystemInfo};
pub use listener::{CloudClientListener, ListenerResult};
pub use loopback::InMemoryDataService;
pub use request::{RequestError, RequestHandler, RequestMethod};
pub use service::{CloudService, CloudServiceBuilder, CloudServiceStatus, ConnectionState};
pub use transport::{DataService, DataServiceListener, MessageId};
