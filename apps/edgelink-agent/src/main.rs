//! # Edgelink Agent
//!
//! Runs a cloud service against the in-memory data service and walks through
//! one device lifecycle:
//!
//! ```text
//!   activate (offline) ─► connect ─► BIRTH
//!   client "heater"    ─► publish / published / confirmed
//!   handler "CONF-V1"  ─► request ─► REPLY
//!   updated + events   ─► one debounced BIRTH
//!   deactivate         ─► DC
//! ```
//!
//! ## Usage
//! `edgelink-agent [path/to/cloud.toml]`. Without a path the platform config
//! directory is used. `RUST_LOG` controls the log level (default `info`).

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use edgelink_cloud::{
    config, CloudClientListener, CloudService, DataService, InMemoryDataService, ListenerResult,
    RequestError, RequestHandler, RequestMethod,
};
use edgelink_core::options::keys;
use edgelink_core::payload::request_metrics;
use edgelink_core::{CloudServiceOptions, ExternalEvent, KuraPayload, MetricValue};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Quiet period used when the options file does not set one.
const DEMO_PUBLISH_DELAY_MS: i64 = 2_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let mut props = config::load_properties(std::env::args().nth(1).map(PathBuf::from))?;
    if props.get(keys::LIFECYCLE_PUBLISH_DELAY_MS).is_none() {
        props.insert(keys::LIFECYCLE_PUBLISH_DELAY_MS, DEMO_PUBLISH_DELAY_MS);
    }
    let options = CloudServiceOptions::from_properties(&props)?;
    info!(
        control_prefix = %options.control_prefix(),
        encoding = %options.payload_encoding(),
        policy = %options.birth_cert_policy(),
        "Options loaded"
    );

    let transport = Arc::new(InMemoryDataService::new());
    let service = CloudService::builder(transport.clone()).build()?;
    service.activate(&props)?;

    // Birth goes out from the connection callback
    transport.connect()?;

    let heater = service.new_cloud_client("heater")?;
    heater.add_listener(Arc::new(LoggingListener));
    let message_id = heater.publish(
        "status",
        &KuraPayload::now().with_metric("temperature", 21.5),
        1,
        false,
    )?;
    transport.notify_published(message_id);
    transport.confirm(message_id);

    service.register_request_handler("CONF-V1", Arc::new(ConfigurationHandler))?;
    let request_id = uuid::Uuid::new_v4().to_string();
    let request = service.encode_payload(
        &KuraPayload::now()
            .with_metric(request_metrics::REQUESTER_CLIENT_ID, "console")
            .with_metric(request_metrics::REQUEST_ID, request_id.as_str()),
    )?;
    let request_topic = format!(
        "{}/acct/gw-1/CONF-V1/GET/configurations/heater",
        options.control_prefix()
    );
    transport.inject(&request_topic, &request, 1, false);

    // A burst of triggers collapses into one birth
    service.updated(&props)?;
    service.handle_event(&ExternalEvent::TamperDetected);
    service.handle_event(&ExternalEvent::PackageInstalled);
    tokio::time::sleep(options.announcement_delay() + Duration::from_millis(500)).await;

    let status = service.status();
    info!(
        state = %status.connection_state,
        applications = ?status.application_ids,
        pending = ?status.pending_announcements,
        "Service status"
    );

    heater.release();
    service.deactivate()?;
    transport.disconnect(Duration::from_secs(1));

    for message in transport.published() {
        info!(
            message_id = message.message_id,
            topic = %message.topic,
            qos = message.qos,
            priority = message.priority,
            bytes = message.payload.len(),
            "Sent"
        );
    }
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show lifecycle decisions and debounce timers
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

struct LoggingListener;

impl CloudClientListener for LoggingListener {
    fn on_message_published(&self, message_id: u32, app_topic: &str) -> ListenerResult {
        info!(message_id, app_topic = %app_topic, "Published");
        Ok(())
    }

    fn on_message_confirmed(&self, message_id: u32, app_topic: &str) -> ListenerResult {
        info!(message_id, app_topic = %app_topic, "Confirmed");
        Ok(())
    }

    fn on_connection_lost(&self) -> ListenerResult {
        warn!("Connection lost");
        Ok(())
    }
}

/// Answers `GET configurations/<pid>` with a fixed property set.
struct ConfigurationHandler;

impl RequestHandler for ConfigurationHandler {
    fn handle(
        &self,
        method: RequestMethod,
        resources: &[String],
        _request: &KuraPayload,
    ) -> Result<KuraPayload, RequestError> {
        match (method, resources) {
            (RequestMethod::Get, [section, pid]) if section == "configurations" => {
                info!(pid = %pid, "Serving configuration");
                Ok(KuraPayload::now()
                    .with_metric("pid", pid.as_str())
                    .with_metric("setpoint", MetricValue::Double(21.0)))
            }
            (RequestMethod::Get, _) => Err(RequestError::NotFound(resources.join("/"))),
            (other, _) => Err(RequestError::BadRequest(format!("{other} not supported"))),
        }
    }
}
