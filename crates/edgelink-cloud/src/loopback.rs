//! # In-Memory Data Service
//!
//! A [`DataService`] that keeps every message in memory and never talks to a
//! broker. Used by the demo agent and by tests: the caller drives the
//! connection and delivery state by hand and inspects what was published.
//!
//! ```text
//!   publish ──► Unpublished ──notify_published──► InFlight ──confirm──► Confirmed
//!                                                    │
//!                                     simulate_connection_lost
//!                                                    ▼
//!                                                 Dropped
//! ```
//!
//! QoS 0 messages skip `InFlight` and go straight to `Confirmed` once
//! published. Listener callbacks always run after the internal lock has been
//! released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{CloudError, CloudResult};
use crate::transport::{DataService, DataServiceListener, MessageId};

/// Delivery state of a recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Unpublished,
    InFlight,
    Dropped,
    Confirmed,
}

/// One call to [`DataService::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub message_id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
    pub priority: u8,
    pub state: DeliveryState,
}

#[derive(Default)]
struct State {
    next_id: MessageId,
    messages: Vec<PublishedMessage>,
    subscriptions: Vec<(String, u8)>,
    listeners: Vec<Weak<dyn DataServiceListener>>,
}

/// Loopback transport.
#[derive(Default)]
pub struct InMemoryDataService {
    connected: AtomicBool,
    fail_publishes: AtomicBool,
    state: Mutex<State>,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes the connection flag without any callback.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes every following publish fail with a transport error.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Drops the connection: in-flight messages become dropped and listeners
    /// get `on_connection_lost`.
    pub fn simulate_connection_lost(&self, cause: &str) {
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            for message in state.messages.iter_mut() {
                if message.state == DeliveryState::InFlight {
                    message.state = DeliveryState::Dropped;
                }
            }
        }
        info!(cause = %cause, "Loopback connection lost");
        self.each_listener(|l| l.on_connection_lost(cause));
    }

    /// Marks a queued message as sent and reports it to the listeners.
    pub fn notify_published(&self, message_id: MessageId) -> bool {
        let topic = {
            let mut state = self.state.lock();
            let Some(message) = state
                .messages
                .iter_mut()
                .find(|m| m.message_id == message_id && m.state == DeliveryState::Unpublished)
            else {
                return false;
            };
            message.state = if message.qos == 0 {
                DeliveryState::Confirmed
            } else {
                DeliveryState::InFlight
            };
            message.topic.clone()
        };
        self.each_listener(|l| l.on_message_published(message_id, &topic));
        true
    }

    /// Marks an in-flight message as acknowledged by the broker.
    pub fn confirm(&self, message_id: MessageId) -> bool {
        let topic = {
            let mut state = self.state.lock();
            let Some(message) = state
                .messages
                .iter_mut()
                .find(|m| m.message_id == message_id && m.state == DeliveryState::InFlight)
            else {
                return false;
            };
            message.state = DeliveryState::Confirmed;
            message.topic.clone()
        };
        self.each_listener(|l| l.on_message_confirmed(message_id, &topic));
        true
    }

    /// Delivers an inbound message to the listeners.
    pub fn inject(&self, topic: &str, payload: &[u8], qos: u8, retained: bool) {
        self.each_listener(|l| l.on_message_arrived(topic, payload, qos, retained));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().messages.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear_published(&self) {
        self.state.lock().messages.clear();
    }

    pub fn subscriptions(&self) -> Vec<(String, u8)> {
        self.state.lock().subscriptions.clone()
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn each_listener(&self, mut call: impl FnMut(&dyn DataServiceListener)) {
        let listeners: Vec<Arc<dyn DataServiceListener>> = {
            let mut state = self.state.lock();
            state.listeners.retain(|l| l.strong_count() > 0);
            state.listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            call(listener.as_ref());
        }
    }

    fn ids_matching(&self, topic_regex: &str, wanted: DeliveryState) -> CloudResult<Vec<MessageId>> {
        let re = Regex::new(topic_regex)
            .map_err(|e| CloudError::Transport(format!("invalid topic regex: {e}")))?;
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .filter(|m| m.state == wanted && re.is_match(&m.topic))
            .map(|m| m.message_id)
            .collect())
    }
}

impl DataService for InMemoryDataService {
    fn connect(&self) -> CloudResult<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Loopback connected");
        self.each_listener(|l| l.on_connection_established());
        Ok(())
    }

    fn disconnect(&self, quiesce: Duration) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        self.each_listener(|l| l.on_disconnecting());
        self.connected.store(false, Ordering::SeqCst);
        info!(quiesce_ms = quiesce.as_millis() as u64, "Loopback disconnected");
        self.each_listener(|l| l.on_disconnected());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> CloudResult<MessageId> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(CloudError::Transport(format!("publish to {topic} refused")));
        }
        let mut state = self.state.lock();
        state.next_id = state.next_id.wrapping_add(1);
        let message_id = state.next_id;
        state.messages.push(PublishedMessage {
            message_id,
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
            priority,
            state: DeliveryState::Unpublished,
        });
        debug!(topic = %topic, message_id, qos, "Loopback queued message");
        Ok(message_id)
    }

    fn subscribe(&self, topic: &str, qos: u8) -> CloudResult<()> {
        let mut state = self.state.lock();
        state.subscriptions.retain(|(t, _)| t != topic);
        state.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> CloudResult<()> {
        self.state.lock().subscriptions.retain(|(t, _)| t != topic);
        Ok(())
    }

    fn unpublished_message_ids(&self, topic_regex: &str) -> CloudResult<Vec<MessageId>> {
        self.ids_matching(topic_regex, DeliveryState::Unpublished)
    }

    fn in_flight_message_ids(&self, topic_regex: &str) -> CloudResult<Vec<MessageId>> {
        self.ids_matching(topic_regex, DeliveryState::InFlight)
    }

    fn dropped_in_flight_message_ids(&self, topic_regex: &str) -> CloudResult<Vec<MessageId>> {
        self.ids_matching(topic_regex, DeliveryState::Dropped)
    }

    fn add_listener(&self, listener: Weak<dyn DataServiceListener>) {
        self.state.lock().listeners.push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl DataServiceListener for Log {
        fn on_connection_established(&self) {
            self.0.lock().push("established".into());
        }
        fn on_disconnecting(&self) {
            self.0.lock().push("disconnecting".into());
        }
        fn on_disconnected(&self) {
            self.0.lock().push("disconnected".into());
        }
        fn on_connection_lost(&self, cause: &str) {
            self.0.lock().push(format!("lost {cause}"));
        }
        fn on_message_arrived(&self, topic: &str, _: &[u8], _: u8, _: bool) {
            self.0.lock().push(format!("arrived {topic}"));
        }
        fn on_message_published(&self, id: MessageId, _: &str) {
            self.0.lock().push(format!("published {id}"));
        }
        fn on_message_confirmed(&self, id: MessageId, _: &str) {
            self.0.lock().push(format!("confirmed {id}"));
        }
    }

    fn attach(service: &InMemoryDataService) -> Arc<Log> {
        let log = Arc::new(Log::default());
        let as_listener: Arc<dyn DataServiceListener> = log.clone();
        service.add_listener(Arc::downgrade(&as_listener));
        log
    }

    #[test]
    fn test_connection_callbacks() {
        let service = InMemoryDataService::new();
        let log = attach(&service);

        service.connect().unwrap();
        service.connect().unwrap();
        service.disconnect(Duration::from_secs(1));
        service.simulate_connection_lost("timeout");

        assert_eq!(
            *log.0.lock(),
            vec!["established", "disconnecting", "disconnected", "lost timeout"]
        );
    }

    #[test]
    fn test_delivery_states() {
        let service = InMemoryDataService::new();
        let log = attach(&service);

        let q1 = service.publish("a/b/c", b"1", 1, false, 5).unwrap();
        let q0 = service.publish("a/b/c", b"0", 0, false, 5).unwrap();

        assert_eq!(service.unpublished_message_ids("^a/").unwrap(), vec![q1, q0]);

        service.notify_published(q1);
        service.notify_published(q0);
        assert_eq!(service.in_flight_message_ids(".*").unwrap(), vec![q1]);

        assert!(service.confirm(q1));
        assert!(!service.confirm(q1));
        assert!(service.in_flight_message_ids(".*").unwrap().is_empty());

        assert_eq!(
            *log.0.lock(),
            vec![
                format!("published {q1}"),
                format!("published {q0}"),
                format!("confirmed {q1}")
            ]
        );
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let service = InMemoryDataService::new();
        drop(attach(&service));

        service.inject("a/b/c", b"", 0, false);
        assert!(service.state.lock().listeners.is_empty());
    }

    #[test]
    fn test_invalid_regex_is_transport_error() {
        let service = InMemoryDataService::new();
        assert!(service.unpublished_message_ids("(").unwrap_err().is_transport_error());
    }
}
