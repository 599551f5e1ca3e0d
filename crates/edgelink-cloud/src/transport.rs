//! # Data Service Interface
//!
//! The reliable transport the cloud service sits on. Implementations own the
//! broker connection and the outbound queue; the cloud service only ever sees
//! topics, bytes and message ids.
//!
//! ```text
//!   CloudClient::publish ──► DataService::publish ──► queue ──► broker
//!                                                         │
//!   DataServiceListener ◄── published / confirmed / arrived
//! ```
//!
//! Callbacks may arrive on any thread. Implementations must not hold their
//! own internal locks while calling a listener, since the listener may call
//! straight back into `publish`.

use std::sync::Weak;
use std::time::Duration;

use crate::error::CloudResult;

/// Transport-assigned id of a published message.
pub type MessageId = u32;

/// Reliable publish/subscribe transport.
pub trait DataService: Send + Sync {
    fn connect(&self) -> CloudResult<()>;

    /// Disconnects, giving in-flight messages up to `quiesce` to complete.
    fn disconnect(&self, quiesce: Duration);

    fn is_connected(&self) -> bool;

    /// Queues a message. Accepted while disconnected; sent on reconnect.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        priority: u8,
    ) -> CloudResult<MessageId>;

    fn subscribe(&self, topic: &str, qos: u8) -> CloudResult<()>;

    fn unsubscribe(&self, topic: &str) -> CloudResult<()>;

    /// Ids of queued messages whose topic matches `topic_regex`.
    fn unpublished_message_ids(&self, topic_regex: &str) -> CloudResult<Vec<MessageId>>;

    /// Ids of sent but unconfirmed messages whose topic matches `topic_regex`.
    fn in_flight_message_ids(&self, topic_regex: &str) -> CloudResult<Vec<MessageId>>;

    /// Ids of in-flight messages dropped after a connection loss.
    fn dropped_in_flight_message_ids(&self, topic_regex: &str) -> CloudResult<Vec<MessageId>>;

    /// Registers a callback target. Held weakly so the service can be dropped.
    fn add_listener(&self, listener: Weak<dyn DataServiceListener>);
}

/// Transport callbacks consumed by the cloud service.
pub trait DataServiceListener: Send + Sync {
    fn on_connection_established(&self);

    /// Called before an orderly disconnect, while publishing still works.
    fn on_disconnecting(&self);

    fn on_disconnected(&self);

    fn on_connection_lost(&self, cause: &str);

    fn on_message_arrived(&self, topic: &str, payload: &[u8], qos: u8, retained: bool);

    fn on_message_published(&self, message_id: MessageId, topic: &str);

    fn on_message_confirmed(&self, message_id: MessageId, topic: &str);
}
