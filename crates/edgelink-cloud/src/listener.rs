//! # Client Listeners
//!
//! Callbacks an application registers on its [`CloudClient`](crate::CloudClient),
//! and the fan-out loop that delivers them.
//!
//! ## Fan-out
//! ```text
//!   event ──► snapshot of adapters (registration order)
//!                 │
//!                 ├─► listener A ── Ok
//!                 ├─► listener B ── Err / panic ──► logged
//!                 └─► listener C ── Ok            (still called)
//! ```
//!
//! The snapshot is taken under a read lock and released before any listener
//! runs, so a listener may add or remove listeners from inside a callback.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use edgelink_core::KuraPayload;
use parking_lot::RwLock;
use tracing::error;

use crate::error::CloudError;
use crate::transport::MessageId;

/// Result returned by every listener callback.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

// =============================================================================
// Listener Trait
// =============================================================================

/// Application-side callbacks. Every method defaults to doing nothing.
///
/// `app_topic` is the topic with the namespace prefix and application id
/// stripped, e.g. `"status"` for `#account-name/#client-id/heater/status`.
pub trait CloudClientListener: Send + Sync {
    fn on_control_message_arrived(
        &self,
        _device_id: &str,
        _app_topic: &str,
        _payload: &KuraPayload,
        _qos: u8,
        _retain: bool,
    ) -> ListenerResult {
        Ok(())
    }

    fn on_message_arrived(
        &self,
        _device_id: &str,
        _app_topic: &str,
        _payload: &KuraPayload,
        _qos: u8,
        _retain: bool,
    ) -> ListenerResult {
        Ok(())
    }

    fn on_connection_lost(&self) -> ListenerResult {
        Ok(())
    }

    fn on_connection_established(&self) -> ListenerResult {
        Ok(())
    }

    fn on_message_confirmed(&self, _message_id: MessageId, _app_topic: &str) -> ListenerResult {
        Ok(())
    }

    fn on_message_published(&self, _message_id: MessageId, _app_topic: &str) -> ListenerResult {
        Ok(())
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// One registered listener. Two adapters are equal when they wrap the same
/// listener object.
#[derive(Clone)]
pub(crate) struct ListenerAdapter {
    listener: Arc<dyn CloudClientListener>,
}

impl ListenerAdapter {
    fn wraps(&self, listener: &Arc<dyn CloudClientListener>) -> bool {
        Arc::as_ptr(&self.listener) as *const () == Arc::as_ptr(listener) as *const ()
    }
}

impl PartialEq for ListenerAdapter {
    fn eq(&self, other: &Self) -> bool {
        self.wraps(&other.listener)
    }
}

// =============================================================================
// ListenerSet
// =============================================================================

/// Ordered, duplicate-free listeners of one application.
pub(crate) struct ListenerSet {
    app_id: String,
    adapters: RwLock<Vec<ListenerAdapter>>,
}

impl ListenerSet {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            adapters: RwLock::new(Vec::new()),
        }
    }

    /// Appends `listener`; false if it is already registered.
    pub fn add(&self, listener: Arc<dyn CloudClientListener>) -> bool {
        let mut adapters = self.adapters.write();
        if adapters.iter().any(|a| a.wraps(&listener)) {
            return false;
        }
        adapters.push(ListenerAdapter { listener });
        true
    }

    pub fn remove(&self, listener: &Arc<dyn CloudClientListener>) -> bool {
        let mut adapters = self.adapters.write();
        let before = adapters.len();
        adapters.retain(|a| !a.wraps(listener));
        adapters.len() != before
    }

    pub fn clear(&self) {
        self.adapters.write().clear();
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    /// Calls `deliver` on every listener in registration order.
    ///
    /// Errors and panics are logged; they never stop delivery to the
    /// listeners after the failing one.
    pub fn fan_out<F>(&self, callback: &'static str, deliver: F)
    where
        F: Fn(&dyn CloudClientListener) -> ListenerResult,
    {
        let snapshot = self.adapters.read().clone();

        for adapter in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| deliver(adapter.listener.as_ref())));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            let failure = CloudError::Listener {
                app_id: self.app_id.clone(),
                callback,
                reason,
            };
            error!(app_id = %self.app_id, callback, error = %failure, "Listener failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CloudClientListener for Recorder {
        fn on_message_published(&self, message_id: MessageId, app_topic: &str) -> ListenerResult {
            self.log.lock().push(format!("{}:{}:{}", self.name, message_id, app_topic));
            Ok(())
        }
    }

    struct Failing;

    impl CloudClientListener for Failing {
        fn on_message_published(&self, _: MessageId, _: &str) -> ListenerResult {
            Err("listener refused".into())
        }
    }

    struct Panicking;

    impl CloudClientListener for Panicking {
        fn on_message_published(&self, _: MessageId, _: &str) -> ListenerResult {
            panic!("listener exploded");
        }
    }

    fn publish(set: &ListenerSet, id: MessageId) {
        set.fan_out("on_message_published", |l| l.on_message_published(id, "status"))
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new("app");
        let listener: Arc<dyn CloudClientListener> = Arc::new(Recorder {
            name: "a",
            log: Arc::clone(&log),
        });

        assert!(set.add(Arc::clone(&listener)));
        assert!(!set.add(Arc::clone(&listener)));
        assert_eq!(set.len(), 1);

        publish(&set, 1);
        assert_eq!(*log.lock(), vec!["a:1:status".to_string()]);
    }

    #[test]
    fn test_replacing_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new("app");
        let first: Arc<dyn CloudClientListener> = Arc::new(Recorder {
            name: "first",
            log: Arc::clone(&log),
        });
        let second: Arc<dyn CloudClientListener> = Arc::new(Recorder {
            name: "second",
            log: Arc::clone(&log),
        });

        set.add(Arc::clone(&first));
        set.add(Arc::clone(&second));
        assert!(set.remove(&first));
        assert!(!set.remove(&first));

        publish(&set, 9);
        assert_eq!(*log.lock(), vec!["second:9:status".to_string()]);
    }

    #[test]
    fn test_failures_do_not_stop_fan_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new("app");
        set.add(Arc::new(Failing));
        set.add(Arc::new(Panicking));
        set.add(Arc::new(Recorder {
            name: "last",
            log: Arc::clone(&log),
        }));

        publish(&set, 3);
        publish(&set, 4);

        assert_eq!(set.len(), 3);
        assert_eq!(
            *log.lock(),
            vec!["last:3:status".to_string(), "last:4:status".to_string()]
        );
    }

    #[test]
    fn test_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new("app");
        for name in ["one", "two", "three"] {
            set.add(Arc::new(Recorder {
                name,
                log: Arc::clone(&log),
            }));
        }

        publish(&set, 4);
        assert_eq!(
            *log.lock(),
            vec![
                "one:4:status".to_string(),
                "two:4:status".to_string(),
                "three:4:status".to_string()
            ]
        );
    }
}
