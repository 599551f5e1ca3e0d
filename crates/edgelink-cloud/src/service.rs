//! # Cloud Service
//!
//! Owns the connection state, the application registry and the lifecycle
//! announcements of one device.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           CloudService                                  │
//! │                                                                         │
//! │  activate / updated / deactivate        DataServiceListener callbacks   │
//! │  handle_event (GPS, modem, tamper..)    (connected, disconnecting, ..)  │
//! │             │                                       │                   │
//! │             └──────────────┬────────────────────────┘                   │
//! │                            ▼                                            │
//! │                 ┌─────────────────────┐                                 │
//! │                 │ lifecycle lock      │  decide(trigger, connected)     │
//! │                 └──────────┬──────────┘                                 │
//! │              PublishNow    │    Schedule                                │
//! │          ┌─────────────────┴──────────────┐                             │
//! │          ▼                                ▼                             │
//! │   publish_announcement            DebounceScheduler ──(delay)──┐        │
//! │          │                                                     │        │
//! │          ▼                                                     ▼        │
//! │   DataService::publish ◄──────────────────────────── fire_announcement  │
//! │                                                                         │
//! │  Registry: appId ──► { CloudClient, RequestHandler }                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lock Order
//! lifecycle ──► scheduler fire lock ──► scheduler table ──► registry / modem
//! / options. A debounced announcement runs under the fire lock and never
//! takes the lifecycle lock, so `deactivate` can wait for it safely.
//!
//! ## Error Policy
//! Errors from an immediate announcement go back to the caller of
//! `activate`, `updated` or `deactivate`. Callbacks from the transport have
//! nobody to report to, so they log. Debounced announcements that fail are
//! logged and not retried.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use edgelink_core::options::{LIFECYCLE_PRIORITY, LIFECYCLE_RETAIN};
use edgelink_core::topic::{BROKER_FEEDBACK_APP_ID, REPLY_SEGMENT, TOPIC_SEPARATOR, TOPIC_WILDCARD};
use edgelink_core::{
    decide, Action, AnnouncementKind, BirthCertPolicy, CloudServiceOptions, ExternalEvent,
    KuraPayload, ModemIdentity, ParsedTopic, PayloadEncoding, Properties, Trigger,
};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::client::CloudClient;
use crate::codec::{JsonMarshaller, Marshaller, PayloadCodec, ProtobufCodec};
use crate::context::CloudContext;
use crate::debounce::DebounceScheduler;
use crate::error::{CloudError, CloudResult};
use crate::lifecycle::{LifecyclePayloadBuilder, StaticSystemInfo, SystemInfo};
use crate::request::{self, InboundRequest, RequestError, RequestHandler};
use crate::transport::{DataService, DataServiceListener, MessageId};

// =============================================================================
// Types
// =============================================================================

/// Connection state as last reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Point-in-time view of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudServiceStatus {
    pub connection_state: ConnectionState,
    pub active: bool,
    pub application_ids: Vec<String>,
    pub pending_announcements: Vec<AnnouncementKind>,
    pub payload_encoding: PayloadEncoding,
    pub birth_cert_policy: BirthCertPolicy,
}

#[derive(Default)]
struct Application {
    client: Option<CloudClient>,
    request_handler: Option<Arc<dyn RequestHandler>>,
}

impl Application {
    fn is_empty(&self) -> bool {
        self.client.is_none() && self.request_handler.is_none()
    }
}

// =============================================================================
// CloudService
// =============================================================================

/// Lifecycle announcements and the application registry for one device.
pub struct CloudService {
    self_ref: Weak<CloudService>,
    context: Arc<CloudContext>,
    system_info: Arc<dyn SystemInfo>,
    scheduler: Arc<DebounceScheduler>,
    /// Lifecycle lock; serializes decide + publish/schedule.
    lifecycle: Mutex<ConnectionState>,
    active: AtomicBool,
    /// Set by the first connection after activation; later ones are reconnects.
    connected_since_activation: AtomicBool,
    registry: Mutex<BTreeMap<String, Application>>,
    modem: RwLock<ModemIdentity>,
}

impl CloudService {
    pub fn builder(data_service: Arc<dyn DataService>) -> CloudServiceBuilder {
        CloudServiceBuilder {
            data_service,
            system_info: None,
            codec: None,
            marshaller: None,
            runtime: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Applies `properties` and starts announcing.
    ///
    /// ## Errors
    /// Invalid options leave the previous options in place. A failed birth
    /// publish is returned after the options have been applied.
    pub fn activate(&self, properties: &Properties) -> CloudResult<()> {
        let options = CloudServiceOptions::from_properties(properties)?;

        let _lifecycle = self.lifecycle.lock();
        let previous = self.context.replace_options(options);
        self.active.store(true, Ordering::SeqCst);

        let connected = self.context.data_service().is_connected();
        self.connected_since_activation.store(connected, Ordering::SeqCst);
        info!(connected, "Activating cloud service");

        if connected {
            self.refresh_default_subscription(&previous, false);
        }
        self.apply_locked(Trigger::Activate)
    }

    /// Replaces the options and schedules a birth announcement.
    pub fn updated(&self, properties: &Properties) -> CloudResult<()> {
        let options = CloudServiceOptions::from_properties(properties).map_err(|e| {
            warn!(error = %e, "Rejected configuration update, keeping previous options");
            CloudError::from(e)
        })?;

        let _lifecycle = self.lifecycle.lock();
        let previous = self.context.replace_options(options);
        self.active.store(true, Ordering::SeqCst);
        info!("Cloud service configuration updated");

        if self.context.data_service().is_connected() {
            self.refresh_default_subscription(&previous, true);
        }
        self.apply_locked(Trigger::ConfigurationUpdated)
    }

    /// Publishes the disconnect certificate and detaches every client.
    ///
    /// Pending announcements are cancelled first; one that is already being
    /// published finishes before the disconnect certificate goes out.
    pub fn deactivate(&self) -> CloudResult<()> {
        let result = {
            let _lifecycle = self.lifecycle.lock();
            if !self.active.swap(false, Ordering::SeqCst) {
                debug!("Cloud service already inactive");
                return Ok(());
            }
            info!("Deactivating cloud service");

            self.scheduler.cancel_all();
            let result = self.apply_locked(Trigger::Deactivate);

            let options = self.context.options();
            if options.default_subscriptions_enabled() && self.context.data_service().is_connected() {
                let topic = options.topic_namespace().default_subscription_topic();
                if let Err(e) = self.context.data_service().unsubscribe(&topic) {
                    warn!(topic = %topic, error = %e, "Failed to remove default subscription");
                }
            }
            self.connected_since_activation.store(false, Ordering::SeqCst);
            result
        };

        let applications = std::mem::take(&mut *self.registry.lock());
        for client in applications.into_values().filter_map(|app| app.client) {
            client.detach();
        }
        result
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Asks the transport to connect; the birth follows from its callback.
    pub fn connect(&self) -> CloudResult<()> {
        self.context.data_service().connect()
    }

    pub fn disconnect(&self, quiesce: Duration) {
        self.context.data_service().disconnect(quiesce)
    }

    // =========================================================================
    // External Events
    // =========================================================================

    /// Reacts to a device event. A modem-ready event's identity is kept for
    /// later birth certificates even when it does not trigger one.
    pub fn handle_event(&self, event: &ExternalEvent) {
        if let ExternalEvent::ModemReady(identity) = event {
            *self.modem.write() = identity.clone();
        }
        debug!(event = %event.kind(), "External event");
        self.trigger(Trigger::External(event.kind()));
    }

    /// Event-bus entry point. Returns false for topics the service ignores.
    pub fn handle_event_topic(&self, topic: &str, properties: &Properties) -> bool {
        match ExternalEvent::from_topic(topic, properties) {
            Some(event) => {
                self.handle_event(&event);
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Application Registry
    // =========================================================================

    /// Returns the client of `app_id`, creating it if needed.
    ///
    /// While a client is attached the same instance is returned. Works while
    /// disconnected.
    pub fn new_cloud_client(&self, app_id: &str) -> CloudResult<CloudClient> {
        validate_app_id(app_id)?;

        let (client, created) = {
            let mut registry = self.registry.lock();
            let created = !registry.contains_key(app_id);
            let app = registry.entry(app_id.to_string()).or_default();
            if let Some(client) = app.client.as_ref().filter(|c| !c.is_released()) {
                return Ok(client.clone());
            }
            let client = CloudClient::new(app_id, Arc::clone(&self.context), self.self_ref.clone());
            app.client = Some(client.clone());
            (client, created)
        };

        info!(app_id = %app_id, "Created cloud client");
        if created {
            self.trigger(Trigger::AppsChanged);
        }
        Ok(client)
    }

    /// Drops `client` from the registry if it is still the registered one.
    pub(crate) fn remove_client(&self, app_id: &str, client: &CloudClient) {
        let removed = {
            let mut registry = self.registry.lock();
            let now_empty = match registry.get_mut(app_id) {
                Some(app) if app.client.as_ref().is_some_and(|c| c.ptr_eq(client)) => {
                    app.client = None;
                    app.is_empty()
                }
                _ => return,
            };
            if now_empty {
                registry.remove(app_id);
            }
            now_empty
        };

        debug!(app_id = %app_id, removed, "Cloud client detached");
        if removed {
            self.trigger(Trigger::AppsChanged);
        }
    }

    /// Routes control requests for `app_id` to `handler`, replacing any
    /// previous handler.
    pub fn register_request_handler(&self, app_id: &str, handler: Arc<dyn RequestHandler>) -> CloudResult<()> {
        validate_app_id(app_id)?;
        self.registry
            .lock()
            .entry(app_id.to_string())
            .or_default()
            .request_handler = Some(handler);

        info!(app_id = %app_id, "Registered request handler");
        self.trigger(Trigger::AppsChanged);
        Ok(())
    }

    /// Stops routing control requests for `app_id`. An apps announcement is
    /// scheduled either way; returns false if no handler was registered.
    pub fn unregister_request_handler(&self, app_id: &str) -> bool {
        let removed = {
            let mut registry = self.registry.lock();
            match registry.get_mut(app_id) {
                Some(app) => {
                    let removed = app.request_handler.take().is_some();
                    if app.is_empty() {
                        registry.remove(app_id);
                    }
                    removed
                }
                None => false,
            }
        };

        info!(app_id = %app_id, removed, "Unregistered request handler");
        self.trigger(Trigger::AppsChanged);
        removed
    }

    /// Ids with an attached client or a request handler, sorted, each once.
    pub fn cloud_application_identifiers(&self) -> Vec<String> {
        self.registry.lock().keys().cloned().collect()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn encode_payload(&self, payload: &KuraPayload) -> CloudResult<Vec<u8>> {
        self.context.encode_payload(payload)
    }

    pub fn decode_payload(&self, bytes: &[u8]) -> KuraPayload {
        self.context.decode_payload(bytes)
    }

    pub fn is_connected(&self) -> bool {
        self.context.data_service().is_connected()
    }

    pub fn options(&self) -> Arc<CloudServiceOptions> {
        self.context.options()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.lifecycle.lock()
    }

    pub fn status(&self) -> CloudServiceStatus {
        let options = self.context.options();
        CloudServiceStatus {
            connection_state: self.connection_state(),
            active: self.is_active(),
            application_ids: self.cloud_application_identifiers(),
            pending_announcements: self.scheduler.pending_kinds(),
            payload_encoding: options.payload_encoding(),
            birth_cert_policy: options.birth_cert_policy(),
        }
    }

    // =========================================================================
    // Announcements
    // =========================================================================

    /// Applies a trigger that does not come from a lifecycle hook.
    fn trigger(&self, trigger: Trigger) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_active() {
            debug!(?trigger, "Ignoring trigger while inactive");
            return;
        }
        if let Err(e) = self.apply_locked(trigger) {
            error!(?trigger, error = %e, "Lifecycle announcement failed");
        }
    }

    /// Decides and acts. Caller holds the lifecycle lock.
    fn apply_locked(&self, trigger: Trigger) -> CloudResult<()> {
        let options = self.context.options();
        let connected = self.context.data_service().is_connected();
        let action = decide(trigger, connected, &options.policy_flags());
        debug!(?trigger, ?action, connected, "Lifecycle decision");

        match action {
            Action::None => Ok(()),
            Action::PublishNow(kind) => {
                self.scheduler.cancel(kind);
                self.publish_announcement(kind, &options).map(|_| ())
            }
            Action::Schedule(kind) => {
                self.schedule_announcement(kind, options.announcement_delay());
                Ok(())
            }
        }
    }

    fn schedule_announcement(&self, kind: AnnouncementKind, delay: Duration) {
        let service = self.self_ref.clone();
        self.scheduler.schedule(kind, delay, move || {
            if let Some(service) = service.upgrade() {
                service.fire_announcement(kind);
            }
        });
    }

    /// Runs when a debounced announcement comes due.
    fn fire_announcement(&self, kind: AnnouncementKind) {
        if !self.is_active() {
            debug!(kind = %kind, "Service inactive, dropping announcement");
            return;
        }
        if !self.context.data_service().is_connected() {
            debug!(kind = %kind, "Not connected, dropping announcement");
            return;
        }
        let options = self.context.options();
        if options.lifecycle_certs_disabled() {
            return;
        }
        if let Err(e) = self.publish_announcement(kind, &options) {
            error!(kind = %kind, error = %e, "Debounced announcement failed");
        }
    }

    fn publish_announcement(&self, kind: AnnouncementKind, options: &CloudServiceOptions) -> CloudResult<MessageId> {
        let topic = options.topic_namespace().lifecycle_topic(kind);
        let application_ids = self.cloud_application_identifiers();
        let modem = self.modem.read().clone();

        let payload = LifecyclePayloadBuilder {
            options,
            system: self.system_info.as_ref(),
            application_ids: &application_ids,
            modem: &modem,
        }
        .payload(kind);

        let bytes = self.context.encode_with(options, &payload)?;
        let qos = options.lifecycle_qos(kind);
        let message_id = self.context.data_service().publish(
            &topic,
            &bytes,
            qos,
            LIFECYCLE_RETAIN,
            LIFECYCLE_PRIORITY,
        )?;

        info!(kind = %kind, topic = %topic, message_id, qos, "Published lifecycle announcement");
        Ok(message_id)
    }

    /// Keeps the `controlPrefix/account/clientId/#` subscription in line
    /// with the options. Caller holds the lifecycle lock.
    fn refresh_default_subscription(&self, previous: &CloudServiceOptions, drop_previous: bool) {
        let options = self.context.options();
        let data_service = self.context.data_service();
        let old_topic = previous.topic_namespace().default_subscription_topic();
        let new_topic = options.topic_namespace().default_subscription_topic();

        if drop_previous
            && previous.default_subscriptions_enabled()
            && (old_topic != new_topic || !options.default_subscriptions_enabled())
        {
            if let Err(e) = data_service.unsubscribe(&old_topic) {
                warn!(topic = %old_topic, error = %e, "Failed to remove default subscription");
            }
        }

        if options.default_subscriptions_enabled() {
            match data_service.subscribe(&new_topic, 1) {
                Ok(()) => debug!(topic = %new_topic, "Default subscription in place"),
                Err(e) => warn!(topic = %new_topic, error = %e, "Failed to set up default subscription"),
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn clients(&self) -> Vec<CloudClient> {
        self.registry
            .lock()
            .values()
            .filter_map(|app| app.client.clone())
            .collect()
    }

    fn client_for(&self, app_id: &str) -> Option<CloudClient> {
        self.registry.lock().get(app_id).and_then(|app| app.client.clone())
    }

    fn route(&self, topic: &str) -> Option<ParsedTopic> {
        match self.context.namespace().parse(topic) {
            Ok(parsed) if parsed.app_id == BROKER_FEEDBACK_APP_ID => None,
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(topic = %topic, error = %e, "Ignoring topic outside the namespace");
                None
            }
        }
    }

    fn serve_request(&self, topic: &ParsedTopic, payload: &KuraPayload, handler: Arc<dyn RequestHandler>) {
        let options = self.context.options();
        let namespace = options.topic_namespace();

        let Some(request) = InboundRequest::parse(&topic.app_topic, payload, namespace.separator()) else {
            warn!(app_id = %topic.app_id, app_topic = %topic.app_topic, "Request without requester metrics dropped");
            return;
        };

        let outcome = match request.method.clone() {
            Ok(method) => panic::catch_unwind(AssertUnwindSafe(|| {
                handler.handle(method, &request.resources, payload)
            }))
            .unwrap_or_else(|_| Err(RequestError::Internal("request handler panicked".into()))),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            warn!(app_id = %topic.app_id, request_id = %request.request_id, error = %e, "Request failed");
        }

        let reply_topic = request.reply_topic(&namespace, &topic.app_id);
        let response = request::response_payload(outcome);
        let sent = self.context.encode_with(&options, &response).and_then(|bytes| {
            self.context.data_service().publish(
                &reply_topic,
                &bytes,
                request::RESPONSE_QOS,
                false,
                request::RESPONSE_PRIORITY,
            )
        });

        match sent {
            Ok(message_id) => debug!(topic = %reply_topic, message_id, "Published response"),
            Err(e) => error!(topic = %reply_topic, error = %e, "Failed to publish response"),
        }
    }
}

// =============================================================================
// Transport Callbacks
// =============================================================================

impl DataServiceListener for CloudService {
    fn on_connection_established(&self) {
        {
            let mut state = self.lifecycle.lock();
            *state = ConnectionState::Connected;
            info!("Connection established");

            if self.is_active() {
                let reconnect = self.connected_since_activation.swap(true, Ordering::SeqCst);
                let options = self.context.options();
                self.refresh_default_subscription(&options, false);
                if let Err(e) = self.apply_locked(Trigger::ConnectionEstablished { reconnect }) {
                    error!(error = %e, "Birth certificate on connect failed");
                }
            }
        }

        for client in self.clients() {
            client.dispatch_connection_established();
        }
    }

    fn on_disconnecting(&self) {
        let _lifecycle = self.lifecycle.lock();
        if !self.is_active() {
            return;
        }
        // no birth or apps may follow the disconnect certificate
        self.scheduler.cancel(AnnouncementKind::Birth);
        self.scheduler.cancel(AnnouncementKind::Apps);
        if let Err(e) = self.apply_locked(Trigger::Disconnecting) {
            error!(error = %e, "Disconnect certificate failed");
        }
    }

    fn on_disconnected(&self) {
        *self.lifecycle.lock() = ConnectionState::Disconnected;
        info!("Disconnected");
    }

    fn on_connection_lost(&self, cause: &str) {
        *self.lifecycle.lock() = ConnectionState::Disconnected;
        warn!(cause = %cause, "Connection lost");

        for client in self.clients() {
            client.dispatch_connection_lost();
        }
    }

    fn on_message_arrived(&self, topic: &str, payload: &[u8], qos: u8, retained: bool) {
        let Some(parsed) = self.route(topic) else {
            return;
        };
        let payload = self.context.decode_payload(payload);

        let (client, handler) = {
            let registry = self.registry.lock();
            match registry.get(&parsed.app_id) {
                Some(app) => (app.client.clone(), app.request_handler.clone()),
                None => (None, None),
            }
        };

        if client.is_none() && handler.is_none() {
            debug!(topic = %topic, app_id = %parsed.app_id, "No application for message");
            return;
        }
        if let Some(client) = client {
            client.dispatch_message(&parsed, &payload, qos, retained);
        }
        if let Some(handler) = handler {
            let is_reply = parsed.app_topic == REPLY_SEGMENT
                || parsed.app_topic.starts_with(&format!("{REPLY_SEGMENT}{TOPIC_SEPARATOR}"));
            if parsed.control && !is_reply {
                self.serve_request(&parsed, &payload, handler);
            }
        }
    }

    fn on_message_published(&self, message_id: MessageId, topic: &str) {
        if let Some(parsed) = self.route(topic) {
            if let Some(client) = self.client_for(&parsed.app_id) {
                client.dispatch_published(message_id, &parsed.app_topic);
            }
        }
    }

    fn on_message_confirmed(&self, message_id: MessageId, topic: &str) {
        if let Some(parsed) = self.route(topic) {
            if let Some(client) = self.client_for(&parsed.app_id) {
                client.dispatch_confirmed(message_id, &parsed.app_topic);
            }
        }
    }
}

impl fmt::Debug for CloudService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudService")
            .field("active", &self.is_active())
            .field("connection_state", &self.connection_state())
            .field("applications", &self.cloud_application_identifiers())
            .finish()
    }
}

fn validate_app_id(app_id: &str) -> CloudResult<()> {
    if app_id.is_empty() || app_id.contains(TOPIC_SEPARATOR) || app_id.contains(TOPIC_WILDCARD) {
        return Err(CloudError::InvalidTopic(format!(
            "invalid application id '{app_id}'"
        )));
    }
    Ok(())
}

// =============================================================================
// Builder
// =============================================================================

/// Wires a [`CloudService`] to its collaborators.
pub struct CloudServiceBuilder {
    data_service: Arc<dyn DataService>,
    system_info: Option<Arc<dyn SystemInfo>>,
    codec: Option<Arc<dyn PayloadCodec>>,
    marshaller: Option<Arc<dyn Marshaller>>,
    runtime: Option<Handle>,
}

impl CloudServiceBuilder {
    pub fn system_info(mut self, system_info: Arc<dyn SystemInfo>) -> Self {
        self.system_info = Some(system_info);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    /// Runtime for the announcement timers; defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the service and registers it as a transport listener.
    ///
    /// ## Errors
    /// [`CloudError::ServiceUnavailable`] when no runtime was given and the
    /// caller is not inside one.
    pub fn build(self) -> CloudResult<Arc<CloudService>> {
        let scheduler = match self.runtime {
            Some(runtime) => DebounceScheduler::new(runtime),
            None => DebounceScheduler::current()?,
        };
        let context = Arc::new(CloudContext::new(
            Arc::clone(&self.data_service),
            self.codec.unwrap_or_else(|| Arc::new(ProtobufCodec)),
            self.marshaller.unwrap_or_else(|| Arc::new(JsonMarshaller)),
        ));
        let system_info = self
            .system_info
            .unwrap_or_else(|| Arc::new(StaticSystemInfo::from_host()));
        let state = if self.data_service.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };

        let service = Arc::new_cyclic(|self_ref| CloudService {
            self_ref: self_ref.clone(),
            context,
            system_info,
            scheduler: Arc::new(scheduler),
            lifecycle: Mutex::new(state),
            active: AtomicBool::new(false),
            connected_since_activation: AtomicBool::new(false),
            registry: Mutex::new(BTreeMap::new()),
            modem: RwLock::new(ModemIdentity::default()),
        });

        let listener: Weak<CloudService> = Arc::downgrade(&service);
        self.data_service.add_listener(listener);
        debug!("Cloud service built");
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{CloudClientListener, ListenerResult};
    use crate::loopback::InMemoryDataService;
    use edgelink_core::event::{modem_keys, MODEM_READY_EVENT_TOPIC};
    use edgelink_core::options::keys;
    use edgelink_core::payload::{lifecycle_metrics, request_metrics};
    use edgelink_core::{ExternalEventKind, MetricValue};

    const BIRTH: &str = "$EDC/#account-name/#client-id/MQTT/BIRTH";
    const DC: &str = "$EDC/#account-name/#client-id/MQTT/DC";
    const APPS: &str = "$EDC/#account-name/#client-id/MQTT/APPS";

    fn setup(connected: bool) -> (Arc<InMemoryDataService>, Arc<CloudService>) {
        let transport = Arc::new(InMemoryDataService::new());
        transport.set_connected(connected);
        let service = CloudService::builder(transport.clone())
            .system_info(Arc::new(StaticSystemInfo::default()))
            .build()
            .unwrap();
        (transport, service)
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl CloudClientListener for Recorder {
        fn on_control_message_arrived(
            &self,
            device_id: &str,
            app_topic: &str,
            _: &KuraPayload,
            _: u8,
            _: bool,
        ) -> ListenerResult {
            self.events.lock().push(format!("control {device_id} {app_topic}"));
            Ok(())
        }

        fn on_message_arrived(
            &self,
            device_id: &str,
            app_topic: &str,
            payload: &KuraPayload,
            _: u8,
            _: bool,
        ) -> ListenerResult {
            let value = payload.metric("v").and_then(MetricValue::as_i64).unwrap_or(-1);
            self.events.lock().push(format!("data {device_id} {app_topic} {value}"));
            Ok(())
        }

        fn on_connection_lost(&self) -> ListenerResult {
            self.events.lock().push("lost".into());
            Ok(())
        }

        fn on_connection_established(&self) -> ListenerResult {
            self.events.lock().push("established".into());
            Ok(())
        }
    }

    // =========================================================================
    // Immediate and Debounced Announcements
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_activate_publishes_birth_immediately() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();

        let births = transport.published_on(BIRTH);
        assert_eq!(births.len(), 1);
        assert_eq!(births[0].qos, 1);
        assert!(!births[0].retain);
        assert_eq!(births[0].priority, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_published_while_offline() {
        let (transport, service) = setup(false);
        let props = Properties::new()
            .with(keys::REPUB_BIRTH_ON_GPS_LOCK, true)
            .with(keys::REPUB_BIRTH_ON_MODEM_DETECT, true);

        service.activate(&props).unwrap();
        service.updated(&props).unwrap();
        service.new_cloud_client("heater").unwrap();
        service
            .register_request_handler("CONF-V1", Arc::new(EchoHandler))
            .unwrap();
        for event in [
            ExternalEvent::PositionLocked,
            ExternalEvent::TamperDetected,
            ExternalEvent::PackageInstalled,
        ] {
            service.handle_event(&event);
        }
        service.deactivate().unwrap();

        advance(120).await;
        assert!(transport.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_updated_waits_for_full_delay() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        transport.clear_published();

        service.updated(&Properties::new()).unwrap();

        advance(25).await;
        assert!(transport.published_on(BIRTH).is_empty());

        advance(10).await;
        let births = transport.published_on(BIRTH);
        assert_eq!(births.len(), 1);
        assert_eq!(births[0].qos, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_coalesce() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        transport.clear_published();

        for _ in 0..5 {
            service.updated(&Properties::new()).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        advance(29).await;
        assert!(transport.published_on(BIRTH).is_empty());

        advance(2).await;
        assert_eq!(transport.published_on(BIRTH).len(), 1);

        advance(120).await;
        assert_eq!(transport.published_on(BIRTH).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_delay_is_used() {
        let (transport, service) = setup(true);
        let props = Properties::new().with(keys::LIFECYCLE_PUBLISH_DELAY_MS, 5_000);
        service.activate(&props).unwrap();
        transport.clear_published();

        service.updated(&props).unwrap();
        advance(4).await;
        assert!(transport.published_on(BIRTH).is_empty());
        advance(2).await;
        assert_eq!(transport.published_on(BIRTH).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_publishes_disconnect_and_cancels_birth() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        let client = service.new_cloud_client("heater").unwrap();
        service.updated(&Properties::new()).unwrap();
        transport.clear_published();

        service.deactivate().unwrap();

        let dcs = transport.published_on(DC);
        assert_eq!(dcs.len(), 1);
        assert_eq!(dcs[0].qos, 0);
        assert!(service.status().pending_announcements.is_empty());
        assert!(service.cloud_application_identifiers().is_empty());
        assert!(client.is_released());

        advance(120).await;
        assert_eq!(transport.published().len(), 1);

        service.deactivate().unwrap();
        assert_eq!(transport.published_on(DC).len(), 1);
    }

    // =========================================================================
    // Transport Callbacks
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_birth_on_connect_only_once_by_default() {
        let (transport, service) = setup(false);
        service.activate(&Properties::new()).unwrap();
        assert!(transport.published().is_empty());

        transport.connect().unwrap();
        assert_eq!(transport.published_on(BIRTH).len(), 1);
        assert_eq!(service.connection_state(), ConnectionState::Connected);

        transport.simulate_connection_lost("timeout");
        assert_eq!(service.connection_state(), ConnectionState::Disconnected);
        transport.connect().unwrap();
        assert_eq!(transport.published_on(BIRTH).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_birth_on_every_connect_when_configured() {
        let (transport, service) = setup(false);
        service
            .activate(&Properties::new().with(keys::BIRTH_CERT_POLICY, "birth-connect-reconnect"))
            .unwrap();

        transport.connect().unwrap();
        transport.simulate_connection_lost("timeout");
        transport.connect().unwrap();

        assert_eq!(transport.published_on(BIRTH).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnecting_publishes_disconnect() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();

        transport.disconnect(Duration::from_secs(1));

        let dcs = transport.published_on(DC);
        assert_eq!(dcs.len(), 1);
        assert_eq!(dcs[0].qos, 0);
        assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnecting_cancels_pending_birth_and_apps() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        service.updated(&Properties::new()).unwrap();
        service
            .register_request_handler("CONF-V1", Arc::new(EchoHandler))
            .unwrap();
        assert_eq!(
            service.status().pending_announcements,
            vec![AnnouncementKind::Birth, AnnouncementKind::Apps]
        );
        transport.clear_published();

        transport.disconnect(Duration::from_secs(1));
        assert!(service.status().pending_announcements.is_empty());
        assert_eq!(transport.published_on(DC).len(), 1);

        advance(60).await;
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_events_reach_listeners() {
        let (transport, service) = setup(false);
        service.activate(&Properties::new()).unwrap();
        let client = service.new_cloud_client("heater").unwrap();
        let recorder = Arc::new(Recorder::default());
        client.add_listener(recorder.clone());

        transport.connect().unwrap();
        transport.simulate_connection_lost("timeout");
        transport.connect().unwrap();
        transport.disconnect(Duration::ZERO);

        assert_eq!(recorder.events(), vec!["established", "lost", "established"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_subscription_follows_options() {
        let (transport, service) = setup(true);
        let default_topic = ("$EDC/#account-name/#client-id/#".to_string(), 1);

        service.activate(&Properties::new()).unwrap();
        assert_eq!(transport.subscriptions(), vec![default_topic.clone()]);

        service
            .updated(&Properties::new().with(keys::TOPIC_CONTROL_PREFIX, "$ALT"))
            .unwrap();
        assert_eq!(
            transport.subscriptions(),
            vec![("$ALT/#account-name/#client-id/#".to_string(), 1)]
        );

        service
            .updated(&Properties::new().with(keys::ENABLE_DEFAULT_SUBSCRIPTIONS, false))
            .unwrap();
        assert!(transport.subscriptions().is_empty());

        service.updated(&Properties::new()).unwrap();
        service.deactivate().unwrap();
        assert!(transport.subscriptions().is_empty());
    }

    // =========================================================================
    // Registry and Apps Announcements
    // =========================================================================

    struct EchoHandler;

    impl RequestHandler for EchoHandler {
        fn handle(
            &self,
            method: request::RequestMethod,
            resources: &[String],
            _request: &KuraPayload,
        ) -> Result<KuraPayload, RequestError> {
            match resources.first().map(String::as_str) {
                Some("missing") => Err(RequestError::NotFound(resources.join("/"))),
                _ => Ok(KuraPayload::new()
                    .with_metric("method", method.as_str())
                    .with_metric("resources", resources.join("/"))),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_changes_schedule_one_apps_announcement() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        transport.clear_published();

        service
            .register_request_handler("CONF-V1", Arc::new(EchoHandler))
            .unwrap();
        service
            .register_request_handler("DEPLOY-V2", Arc::new(EchoHandler))
            .unwrap();
        assert!(service.unregister_request_handler("DEPLOY-V2"));
        assert!(!service.unregister_request_handler("DEPLOY-V2"));
        assert_eq!(
            service.status().pending_announcements,
            vec![AnnouncementKind::Apps]
        );

        advance(25).await;
        assert!(transport.published_on(APPS).is_empty());
        advance(10).await;

        let apps = transport.published_on(APPS);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].qos, 1);
        let payload = service.decode_payload(&apps[0].payload);
        assert_eq!(payload.metric_str(lifecycle_metrics::APPLICATION_IDS), Some("CONF-V1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_unknown_handler_schedules_apps() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        transport.clear_published();

        assert!(!service.unregister_request_handler("example.id"));
        assert_eq!(
            service.status().pending_announcements,
            vec![AnnouncementKind::Apps]
        );

        advance(40).await;
        let apps = transport.published_on(APPS);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].qos, 1);
        assert!(transport.published_on(BIRTH).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_cloud_client_is_idempotent() {
        let (_transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();

        let first = service.new_cloud_client("heater").unwrap();
        let again = service.new_cloud_client("heater").unwrap();
        assert!(first.ptr_eq(&again));

        service
            .register_request_handler("heater", Arc::new(EchoHandler))
            .unwrap();
        service.new_cloud_client("pump").unwrap();
        assert_eq!(service.cloud_application_identifiers(), vec!["heater", "pump"]);

        first.release();
        assert_eq!(service.cloud_application_identifiers(), vec!["heater", "pump"]);
        let fresh = service.new_cloud_client("heater").unwrap();
        assert!(!fresh.ptr_eq(&first));

        service.unregister_request_handler("heater");
        fresh.release();
        assert_eq!(service.cloud_application_identifiers(), vec!["pump"]);

        for bad in ["", "a/b", "a#"] {
            assert!(matches!(
                service.new_cloud_client(bad),
                Err(CloudError::InvalidTopic(_))
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_changes_schedule_apps() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        transport.clear_published();

        let client = service.new_cloud_client("heater").unwrap();
        advance(31).await;
        assert_eq!(transport.published_on(APPS).len(), 1);

        client.release();
        advance(31).await;
        let apps = transport.published_on(APPS);
        assert_eq!(apps.len(), 2);
        let payload = service.decode_payload(&apps[1].payload);
        assert_eq!(payload.metric_str(lifecycle_metrics::APPLICATION_IDS), Some(""));
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_invalid_update_keeps_previous_options() {
        let (_transport, service) = setup(true);
        service
            .activate(&Properties::new().with(keys::TOPIC_CONTROL_PREFIX, "$ALT"))
            .unwrap();

        let err = service
            .updated(&Properties::new().with(keys::LIFECYCLE_PUBLISH_DELAY_MS, -1))
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(service.options().control_prefix(), "$ALT");
        assert!(service.status().pending_announcements.is_empty());

        let err = service
            .activate(&Properties::new().with(keys::TOPIC_CONTROL_PREFIX, ""))
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(service.options().control_prefix(), "$ALT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_certificates_publish_nothing() {
        let (transport, service) = setup(false);
        let props = Properties::new().with(keys::BIRTH_CERT_POLICY, "disable");

        service.activate(&props).unwrap();
        transport.connect().unwrap();
        service.updated(&props).unwrap();
        service.new_cloud_client("heater").unwrap();
        service.handle_event(&ExternalEvent::TamperDetected);
        service.deactivate().unwrap();

        advance(120).await;
        assert!(transport.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefix_applies_to_lifecycle_topics() {
        let (transport, service) = setup(true);
        service
            .activate(&Properties::new().with(keys::TOPIC_CONTROL_PREFIX, "$ALT"))
            .unwrap();

        assert_eq!(
            transport
                .published_on("$ALT/#account-name/#client-id/MQTT/BIRTH")
                .len(),
            1
        );
    }

    // =========================================================================
    // External Events
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_external_events_follow_flags() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        transport.clear_published();

        service.handle_event(&ExternalEvent::PositionLocked);
        assert!(service.status().pending_announcements.is_empty());

        service.handle_event(&ExternalEvent::TamperDetected);
        assert_eq!(service.status().pending_announcements, vec![AnnouncementKind::Birth]);

        assert!(!service.handle_event_topic("org/example/OTHER", &Properties::new()));
        assert!(service.handle_event_topic(
            "org/osgi/service/deployment/UNINSTALL",
            &Properties::new()
        ));

        advance(31).await;
        assert_eq!(transport.published_on(BIRTH).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_package_events_always_honoured() {
        let (transport, service) = setup(true);
        let props = Properties::new().with(keys::REPUB_BIRTH_ON_TAMPER_EVENT, false);
        service.activate(&props).unwrap();
        transport.clear_published();

        service.handle_event(&ExternalEvent::TamperDetected);
        assert!(service.status().pending_announcements.is_empty());

        service.handle_event(&ExternalEvent::PackageInstalled);
        assert_eq!(
            ExternalEvent::PackageInstalled.kind(),
            ExternalEventKind::PackageInstalled
        );
        assert_eq!(service.status().pending_announcements, vec![AnnouncementKind::Birth]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_modem_identity_reaches_birth() {
        let (transport, service) = setup(true);
        service
            .activate(&Properties::new().with(keys::REPUB_BIRTH_ON_MODEM_DETECT, true))
            .unwrap();
        transport.clear_published();

        let props = Properties::new()
            .with(modem_keys::IMEI, "4321")
            .with(modem_keys::IMSI, "6789")
            .with(modem_keys::ICCID, "1234")
            .with(modem_keys::RSSI, "-71");
        assert!(service.handle_event_topic(MODEM_READY_EVENT_TOPIC, &props));

        advance(31).await;
        let births = transport.published_on(BIRTH);
        assert_eq!(births.len(), 1);

        let payload = service.decode_payload(&births[0].payload);
        assert_eq!(payload.metric_str(lifecycle_metrics::MODEM_IMEI), Some("4321"));
        assert_eq!(payload.metric_str(lifecycle_metrics::MODEM_IMSI), Some("6789"));
        assert_eq!(payload.metric_str(lifecycle_metrics::MODEM_ICCID), Some("1234"));
        assert_eq!(payload.metric_str(lifecycle_metrics::MODEM_RSSI), Some("-71"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_birth_dropped_after_disconnect() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        service.updated(&Properties::new()).unwrap();
        transport.clear_published();

        transport.simulate_connection_lost("timeout");
        advance(60).await;
        assert!(transport.published().is_empty());
    }

    // =========================================================================
    // Inbound Routing
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_inbound_messages_routed_by_app() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();

        let heater = service.new_cloud_client("heater").unwrap();
        let pump = service.new_cloud_client("pump").unwrap();
        let feedback = service.new_cloud_client("BA").unwrap();
        let heater_log = Arc::new(Recorder::default());
        let pump_log = Arc::new(Recorder::default());
        let feedback_log = Arc::new(Recorder::default());
        heater.add_listener(heater_log.clone());
        pump.add_listener(pump_log.clone());
        feedback.add_listener(feedback_log.clone());

        let bytes = service
            .encode_payload(&KuraPayload::new().with_metric("v", 42_i64))
            .unwrap();
        transport.inject("acct/gw-1/heater/status/temp", &bytes, 1, false);
        transport.inject("$EDC/acct/gw-1/heater/cmd", &bytes, 1, false);
        transport.inject("acct/gw-1/BA/feedback", &bytes, 0, false);
        transport.inject("too/short", &bytes, 0, false);
        transport.inject("acct/gw-1/unknown/x", &bytes, 0, false);

        assert_eq!(
            heater_log.events(),
            vec!["data gw-1 status/temp 42", "control gw-1 cmd"]
        );
        assert!(pump_log.events().is_empty());
        assert!(feedback_log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_inbound_passed_as_body() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        let client = service.new_cloud_client("heater").unwrap();
        let log = Arc::new(Recorder::default());
        client.add_listener(log.clone());

        transport.inject("acct/gw-1/heater/raw", b"not a protobuf", 0, false);

        assert_eq!(log.events(), vec!["data gw-1 raw -1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_response_round_trip() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        service
            .register_request_handler("CONF-V1", Arc::new(EchoHandler))
            .unwrap();
        transport.clear_published();

        let request = service
            .encode_payload(
                &KuraPayload::new()
                    .with_metric(request_metrics::REQUESTER_CLIENT_ID, "console")
                    .with_metric(request_metrics::REQUEST_ID, "r-1"),
            )
            .unwrap();
        transport.inject("$EDC/acct/gw-1/CONF-V1/GET/configurations/heater", &request, 1, false);

        let replies = transport.published_on("$EDC/#account-name/console/CONF-V1/REPLY/r-1");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].qos, 0);
        assert_eq!(replies[0].priority, 1);

        let response = service.decode_payload(&replies[0].payload);
        assert_eq!(
            response.metric(request_metrics::RESPONSE_CODE),
            Some(&MetricValue::Int(200))
        );
        assert_eq!(response.metric_str("method"), Some("GET"));
        assert_eq!(response.metric_str("resources"), Some("configurations/heater"));

        transport.inject("$EDC/acct/gw-1/CONF-V1/GET/missing", &request, 1, false);
        let replies = transport.published_on("$EDC/#account-name/console/CONF-V1/REPLY/r-1");
        let response = service.decode_payload(&replies[1].payload);
        assert_eq!(
            response.metric(request_metrics::RESPONSE_CODE),
            Some(&MetricValue::Int(404))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_without_requester_is_dropped() {
        let (transport, service) = setup(true);
        service.activate(&Properties::new()).unwrap();
        service
            .register_request_handler("CONF-V1", Arc::new(EchoHandler))
            .unwrap();
        transport.clear_published();

        let bytes = service.encode_payload(&KuraPayload::new()).unwrap();
        transport.inject("$EDC/acct/gw-1/CONF-V1/GET/configurations", &bytes, 1, false);
        transport.inject("acct/gw-1/CONF-V1/GET/configurations", &bytes, 1, false);

        assert!(transport.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot() {
        let (_transport, service) = setup(true);
        assert!(!service.status().active);

        service
            .activate(&Properties::new().with(keys::PAYLOAD_ENCODING, "simple-json"))
            .unwrap();
        service.new_cloud_client("heater").unwrap();

        let status = service.status();
        assert!(status.active);
        assert_eq!(status.connection_state, ConnectionState::Connected);
        assert_eq!(status.application_ids, vec!["heater"]);
        assert_eq!(status.pending_announcements, vec![AnnouncementKind::Apps]);
        assert_eq!(status.payload_encoding, PayloadEncoding::SimpleJson);
        assert_eq!(status.birth_cert_policy, BirthCertPolicy::BirthConnect);
    }
}
