//! # Cloud Client
//!
//! Per-application facade over the shared data service. Every topic an
//! application passes in is relative to its own namespace:
//!
//! ```text
//!   client("heater").publish("status", ..)
//!       └─► #account-name/#client-id/heater/status
//!
//!   client("heater").control_publish("cmd", ..)
//!       └─► $EDC/#account-name/#client-id/heater/cmd
//! ```
//!
//! Clients are cheap handles; clones share the same listeners and the same
//! registry entry. After [`CloudClient::release`] every operation fails with
//! [`CloudError::ServiceUnavailable`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use edgelink_core::{KuraPayload, ParsedTopic, DEFAULT_PUBLISH_PRIORITY};
use tracing::{debug, info};

use crate::context::CloudContext;
use crate::error::{CloudError, CloudResult};
use crate::listener::{CloudClientListener, ListenerSet};
use crate::service::CloudService;
use crate::transport::MessageId;

struct ClientInner {
    app_id: String,
    context: Arc<CloudContext>,
    service: Weak<CloudService>,
    listeners: ListenerSet,
    released: AtomicBool,
}

/// Handle through which one application publishes and subscribes.
#[derive(Clone)]
pub struct CloudClient {
    inner: Arc<ClientInner>,
}

impl CloudClient {
    pub(crate) fn new(app_id: &str, context: Arc<CloudContext>, service: Weak<CloudService>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                app_id: app_id.to_string(),
                context,
                service,
                listeners: ListenerSet::new(app_id),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    /// True when both handles refer to the same client.
    pub fn ptr_eq(&self, other: &CloudClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.context.data_service().is_connected()
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publishes on the data plane with the default priority.
    pub fn publish(
        &self,
        app_topic: &str,
        payload: &KuraPayload,
        qos: u8,
        retain: bool,
    ) -> CloudResult<MessageId> {
        self.publish_with_priority(app_topic, payload, qos, retain, DEFAULT_PUBLISH_PRIORITY)
    }

    pub fn publish_with_priority(
        &self,
        app_topic: &str,
        payload: &KuraPayload,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> CloudResult<MessageId> {
        self.ensure_attached()?;
        let topic = self.inner.context.namespace().data_topic(&self.inner.app_id, app_topic);
        let bytes = self.inner.context.encode_payload(payload)?;
        self.send(&topic, &bytes, qos, retain, priority)
    }

    /// Publishes already-encoded bytes on the data plane.
    pub fn publish_bytes(
        &self,
        app_topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> CloudResult<MessageId> {
        self.ensure_attached()?;
        let topic = self.inner.context.namespace().data_topic(&self.inner.app_id, app_topic);
        self.send(&topic, payload, qos, retain, priority)
    }

    /// Publishes on this device's control plane.
    pub fn control_publish(
        &self,
        app_topic: &str,
        payload: &KuraPayload,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> CloudResult<MessageId> {
        self.ensure_attached()?;
        let topic = self
            .inner
            .context
            .namespace()
            .control_topic(&self.inner.app_id, app_topic);
        let bytes = self.inner.context.encode_payload(payload)?;
        self.send(&topic, &bytes, qos, retain, priority)
    }

    /// Publishes on the control plane of another device under the same account.
    pub fn control_publish_to_device(
        &self,
        device_id: &str,
        app_topic: &str,
        payload: &KuraPayload,
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> CloudResult<MessageId> {
        self.ensure_attached()?;
        let topic = self
            .inner
            .context
            .namespace()
            .device_control_topic(device_id, &self.inner.app_id, app_topic);
        let bytes = self.inner.context.encode_payload(payload)?;
        self.send(&topic, &bytes, qos, retain, priority)
    }

    fn send(&self, topic: &str, bytes: &[u8], qos: u8, retain: bool, priority: u8) -> CloudResult<MessageId> {
        let message_id = self
            .inner
            .context
            .data_service()
            .publish(topic, bytes, qos, retain, priority)?;
        debug!(
            app_id = %self.inner.app_id,
            topic = %topic,
            message_id,
            qos,
            priority,
            "Published"
        );
        Ok(message_id)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn subscribe(&self, app_topic: &str, qos: u8) -> CloudResult<()> {
        self.ensure_attached()?;
        let topic = self.inner.context.namespace().data_topic(&self.inner.app_id, app_topic);
        self.inner.context.data_service().subscribe(&topic, qos)
    }

    pub fn control_subscribe(&self, app_topic: &str, qos: u8) -> CloudResult<()> {
        self.ensure_attached()?;
        let topic = self
            .inner
            .context
            .namespace()
            .control_topic(&self.inner.app_id, app_topic);
        self.inner.context.data_service().subscribe(&topic, qos)
    }

    pub fn unsubscribe(&self, app_topic: &str) -> CloudResult<()> {
        self.ensure_attached()?;
        let topic = self.inner.context.namespace().data_topic(&self.inner.app_id, app_topic);
        self.inner.context.data_service().unsubscribe(&topic)
    }

    pub fn control_unsubscribe(&self, app_topic: &str) -> CloudResult<()> {
        self.ensure_attached()?;
        let topic = self
            .inner
            .context
            .namespace()
            .control_topic(&self.inner.app_id, app_topic);
        self.inner.context.data_service().unsubscribe(&topic)
    }

    // =========================================================================
    // Delivery Tracking
    // =========================================================================

    /// Queued messages of this application, on either plane.
    pub fn unpublished_message_ids(&self) -> CloudResult<Vec<MessageId>> {
        self.inner
            .context
            .data_service()
            .unpublished_message_ids(&self.tracking_regex())
    }

    pub fn in_flight_message_ids(&self) -> CloudResult<Vec<MessageId>> {
        self.inner
            .context
            .data_service()
            .in_flight_message_ids(&self.tracking_regex())
    }

    pub fn dropped_in_flight_message_ids(&self) -> CloudResult<Vec<MessageId>> {
        self.inner
            .context
            .data_service()
            .dropped_in_flight_message_ids(&self.tracking_regex())
    }

    fn tracking_regex(&self) -> String {
        self.inner
            .context
            .namespace()
            .delivery_tracking_regex(&self.inner.app_id)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Registers a listener; adding the same listener again does nothing.
    pub fn add_listener(&self, listener: Arc<dyn CloudClientListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn CloudClientListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Detaches this client from the service. Idempotent.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(app_id = %self.inner.app_id, "Releasing cloud client");
        self.inner.listeners.clear();
        if let Some(service) = self.inner.service.upgrade() {
            service.remove_client(&self.inner.app_id, self);
        }
    }

    /// Marks the client released without touching the registry.
    pub(crate) fn detach(&self) {
        self.inner.released.store(true, Ordering::Release);
        self.inner.listeners.clear();
    }

    fn ensure_attached(&self) -> CloudResult<()> {
        if self.is_released() {
            return Err(CloudError::ServiceUnavailable(format!(
                "cloud client '{}' has been released",
                self.inner.app_id
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Dispatch (called by the service)
    // =========================================================================

    pub(crate) fn dispatch_message(&self, topic: &ParsedTopic, payload: &KuraPayload, qos: u8, retained: bool) {
        if topic.control {
            self.inner.listeners.fan_out("on_control_message_arrived", |l| {
                l.on_control_message_arrived(&topic.device_id, &topic.app_topic, payload, qos, retained)
            });
        } else {
            self.inner.listeners.fan_out("on_message_arrived", |l| {
                l.on_message_arrived(&topic.device_id, &topic.app_topic, payload, qos, retained)
            });
        }
    }

    pub(crate) fn dispatch_published(&self, message_id: MessageId, app_topic: &str) {
        self.inner
            .listeners
            .fan_out("on_message_published", |l| l.on_message_published(message_id, app_topic));
    }

    pub(crate) fn dispatch_confirmed(&self, message_id: MessageId, app_topic: &str) {
        self.inner
            .listeners
            .fan_out("on_message_confirmed", |l| l.on_message_confirmed(message_id, app_topic));
    }

    pub(crate) fn dispatch_connection_established(&self) {
        self.inner
            .listeners
            .fan_out("on_connection_established", |l| l.on_connection_established());
    }

    pub(crate) fn dispatch_connection_lost(&self) {
        self.inner
            .listeners
            .fan_out("on_connection_lost", |l| l.on_connection_lost());
    }
}

impl fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudClient")
            .field("app_id", &self.inner.app_id)
            .field("released", &self.is_released())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}
