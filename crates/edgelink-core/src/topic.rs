//! # Topic Namespace
//!
//! Pure functions that build and split the topic strings used on the wire.
//!
//! ## Topic Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Topic Namespace                                 │
//! │                                                                         │
//! │  Data plane:                                                            │
//! │    #account-name / #client-id / appId / appTopic                        │
//! │                                                                         │
//! │  Control plane:                                                         │
//! │    $EDC / #account-name / #client-id / appId / appTopic                 │
//! │                                                                         │
//! │  Lifecycle:                                                             │
//! │    $EDC / #account-name / #client-id / MQTT/BIRTH                       │
//! │    $EDC / #account-name / #client-id / MQTT/DC                          │
//! │    $EDC / #account-name / #client-id / MQTT/APPS                        │
//! │                                                                         │
//! │  The account and client-id tokens are substituted by the transport      │
//! │  at publish time; this crate never sees the real values.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Tracking
//! Transport queries for unpublished / in-flight / dropped messages take a
//! regex. [`TopicNamespace::delivery_tracking_regex`] scopes those queries to
//! exactly one application, on both planes, without matching an application
//! whose id merely starts with the same characters.

use crate::error::{CoreError, CoreResult};
use crate::policy::AnnouncementKind;

// =============================================================================
// Topic Constants
// =============================================================================

/// Placeholder for the broker account, replaced by the transport.
pub const ACCOUNT_NAME_TOKEN: &str = "#account-name";

/// Placeholder for the device client id, replaced by the transport.
pub const CLIENT_ID_TOKEN: &str = "#client-id";

/// Separator between topic segments.
pub const TOPIC_SEPARATOR: &str = "/";

/// Multi-level wildcard.
pub const TOPIC_WILDCARD: &str = "#";

/// Lifecycle suffix for the birth certificate.
pub const BIRTH_SUFFIX: &str = "MQTT/BIRTH";

/// Lifecycle suffix for the disconnect certificate.
pub const DISCONNECT_SUFFIX: &str = "MQTT/DC";

/// Lifecycle suffix for the apps certificate.
pub const APPS_SUFFIX: &str = "MQTT/APPS";

/// Application id used by the broker for feedback messages; never routed.
pub const BROKER_FEEDBACK_APP_ID: &str = "BA";

/// Application-topic segment that marks a response to a request.
pub const REPLY_SEGMENT: &str = "REPLY";

// =============================================================================
// TopicNamespace
// =============================================================================

/// Builds topic strings for one device.
///
/// Cheap to clone; a new one is built whenever the options change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamespace {
    control_prefix: String,
    account: String,
    client_id: String,
    separator: String,
}

/// A transport topic split into its namespace parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    /// True when the topic starts with the control prefix
    pub control: bool,
    pub account: String,
    pub device_id: String,
    pub app_id: String,
    /// Everything after the application id, without the leading separator.
    /// Empty when the topic ends at the application id.
    pub app_topic: String,
}

impl TopicNamespace {
    /// Creates a namespace with the standard account/client-id tokens.
    pub fn new(control_prefix: impl Into<String>) -> Self {
        Self::with_tokens(
            control_prefix,
            ACCOUNT_NAME_TOKEN,
            CLIENT_ID_TOKEN,
            TOPIC_SEPARATOR,
        )
    }

    /// Creates a namespace with explicit tokens.
    pub fn with_tokens(
        control_prefix: impl Into<String>,
        account: impl Into<String>,
        client_id: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            control_prefix: control_prefix.into(),
            account: account.into(),
            client_id: client_id.into(),
            separator: separator.into(),
        }
    }

    pub fn control_prefix(&self) -> &str {
        &self.control_prefix
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    // =========================================================================
    // Builders
    // =========================================================================

    /// `account/clientId/appId/appTopic`
    pub fn data_topic(&self, app_id: &str, app_topic: &str) -> String {
        self.app_topic_for(&self.client_id, app_id, app_topic, false)
    }

    /// `controlPrefix/account/clientId/appId/appTopic`
    pub fn control_topic(&self, app_id: &str, app_topic: &str) -> String {
        self.app_topic_for(&self.client_id, app_id, app_topic, true)
    }

    /// Control-plane topic addressed to another device under the same account.
    pub fn device_control_topic(&self, device_id: &str, app_id: &str, app_topic: &str) -> String {
        self.app_topic_for(device_id, app_id, app_topic, true)
    }

    /// `controlPrefix/account/clientId/<suffix>` for a lifecycle announcement.
    pub fn lifecycle_topic(&self, kind: AnnouncementKind) -> String {
        let suffix = match kind {
            AnnouncementKind::Birth => BIRTH_SUFFIX,
            AnnouncementKind::Disconnect => DISCONNECT_SUFFIX,
            AnnouncementKind::Apps => APPS_SUFFIX,
        };
        self.join(&[
            &self.control_prefix,
            &self.account,
            &self.client_id,
            suffix,
        ])
    }

    /// `controlPrefix/account/clientId/#`, subscribed on every connect.
    pub fn default_subscription_topic(&self) -> String {
        self.join(&[
            &self.control_prefix,
            &self.account,
            &self.client_id,
            TOPIC_WILDCARD,
        ])
    }

    /// `controlPrefix/account/requester/appId/REPLY/requestId`
    pub fn reply_topic(&self, requester_client_id: &str, app_id: &str, request_id: &str) -> String {
        self.join(&[
            &self.control_prefix,
            &self.account,
            requester_client_id,
            app_id,
            REPLY_SEGMENT,
            request_id,
        ])
    }

    /// Regex matching every topic of `app_id` on either plane.
    ///
    /// Shape: `^(controlPrefix/)?account/[^/]+/appId(/.+)?$`. The client
    /// segment cannot span a separator, so another application's user topic
    /// never matches. The literal segments are escaped, so `$EDC` becomes
    /// `\$EDC`.
    ///
    /// ## Example
    /// ```rust
    /// use edgelink_core::topic::TopicNamespace;
    ///
    /// let ns = TopicNamespace::new("$EDC");
    /// let re = regex::Regex::new(&ns.delivery_tracking_regex("appId")).unwrap();
    ///
    /// assert!(re.is_match("#account-name/#client-id/appId/status"));
    /// assert!(re.is_match("$EDC/#account-name/#client-id/appId"));
    /// assert!(!re.is_match("#account-name/#client-id/appIdX/status"));
    /// ```
    pub fn delivery_tracking_regex(&self, app_id: &str) -> String {
        let sep = regex::escape(&self.separator);
        format!(
            "^({prefix}{sep})?{account}{sep}[^{sep}]+{sep}{app}({sep}.+)?$",
            prefix = regex::escape(&self.control_prefix),
            account = regex::escape(&self.account),
            app = regex::escape(app_id),
            sep = sep,
        )
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    /// Splits a transport topic into `{control, account, device, app, appTopic}`.
    ///
    /// ## Errors
    /// [`CoreError::ForeignTopic`] when fewer than three segments follow the
    /// optional control prefix.
    pub fn parse(&self, topic: &str) -> CoreResult<ParsedTopic> {
        let sep = self.separator.as_str();
        let control_head = format!("{}{}", self.control_prefix, sep);

        let (control, rest) = match topic.strip_prefix(control_head.as_str()) {
            Some(rest) => (true, rest),
            None => (false, topic),
        };

        let mut parts = rest.splitn(4, sep);
        let account = parts.next().filter(|s| !s.is_empty());
        let device_id = parts.next().filter(|s| !s.is_empty());
        let app_id = parts.next().filter(|s| !s.is_empty());

        match (account, device_id, app_id) {
            (Some(account), Some(device_id), Some(app_id)) => Ok(ParsedTopic {
                control,
                account: account.to_string(),
                device_id: device_id.to_string(),
                app_id: app_id.to_string(),
                app_topic: parts.next().unwrap_or_default().to_string(),
            }),
            _ => Err(CoreError::ForeignTopic(topic.to_string())),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn app_topic_for(&self, device_id: &str, app_id: &str, app_topic: &str, control: bool) -> String {
        let mut topic = String::new();
        if control {
            topic.push_str(&self.control_prefix);
            topic.push_str(&self.separator);
        }
        topic.push_str(&self.account);
        topic.push_str(&self.separator);
        topic.push_str(device_id);
        topic.push_str(&self.separator);
        topic.push_str(app_id);
        if !app_topic.is_empty() {
            topic.push_str(&self.separator);
            topic.push_str(app_topic);
        }
        topic
    }

    fn join(&self, segments: &[&str]) -> String {
        segments.join(&self.separator)
    }
}

impl Default for TopicNamespace {
    fn default() -> Self {
        Self::new(crate::options::DEFAULT_CONTROL_PREFIX)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn ns() -> TopicNamespace {
        TopicNamespace::new("$EDC")
    }

    #[test]
    fn test_data_and_control_topics() {
        let ns = ns();
        assert_eq!(
            ns.data_topic("appId", "appTopic"),
            "#account-name/#client-id/appId/appTopic"
        );
        assert_eq!(
            ns.control_topic("appId", "appTopic"),
            "$EDC/#account-name/#client-id/appId/appTopic"
        );
    }

    #[test]
    fn test_lifecycle_topics() {
        let ns = ns();
        assert_eq!(
            ns.lifecycle_topic(AnnouncementKind::Birth),
            "$EDC/#account-name/#client-id/MQTT/BIRTH"
        );
        assert_eq!(
            ns.lifecycle_topic(AnnouncementKind::Disconnect),
            "$EDC/#account-name/#client-id/MQTT/DC"
        );
        assert_eq!(
            ns.lifecycle_topic(AnnouncementKind::Apps),
            "$EDC/#account-name/#client-id/MQTT/APPS"
        );
    }

    #[test]
    fn test_default_subscription_and_reply() {
        let ns = ns();
        assert_eq!(
            ns.default_subscription_topic(),
            "$EDC/#account-name/#client-id/#"
        );
        assert_eq!(
            ns.reply_topic("requester", "CONF-V1", "req-7"),
            "$EDC/#account-name/requester/CONF-V1/REPLY/req-7"
        );
    }

    #[test]
    fn test_tracking_regex_string() {
        let pattern = ns().delivery_tracking_regex("appId");
        assert!(pattern.starts_with(r"^(\$EDC/)?"));
        assert!(pattern.ends_with(r"/[^/]+/appId(/.+)?$"));
    }

    #[test]
    fn test_tracking_regex_scoping() {
        let ns = TopicNamespace::with_tokens("$EDC", "account", "client", "/");
        let re = Regex::new(&ns.delivery_tracking_regex("app1")).unwrap();

        assert!(re.is_match("account/client/app1/sub"));
        assert!(re.is_match("account/client/app1"));
        assert!(re.is_match("$EDC/account/client/app1"));
        assert!(re.is_match("$EDC/account/client/app1/a/b"));

        assert!(!re.is_match("account/client/app12/sub"));
        assert!(!re.is_match("account/client/app1x"));
        assert!(!re.is_match("other/client/app1/sub"));
    }

    #[test]
    fn test_tracking_regex_ignores_other_apps_user_topics() {
        let ns = ns();
        let re = Regex::new(&ns.delivery_tracking_regex("sub")).unwrap();

        assert!(!re.is_match(&ns.data_topic("app1", "sub")));
        assert!(!re.is_match(&ns.control_topic("app1", "sub")));
        assert!(!re.is_match(&ns.data_topic("app1", "sub/deeper")));
        assert!(re.is_match(&ns.data_topic("sub", "app1")));
        assert!(re.is_match(&ns.control_topic("sub", "x")));
    }

    #[test]
    fn test_tracking_regex_escapes_app_id() {
        let ns = ns();
        let re = Regex::new(&ns.delivery_tracking_regex("a.b")).unwrap();
        assert!(re.is_match(&ns.data_topic("a.b", "t")));
        assert!(!re.is_match(&ns.data_topic("axb", "t")));
    }

    #[test]
    fn test_parse_round_trip() {
        let ns = ns();
        let cases = [
            ("app", "topic"),
            ("app", "a/b/c"),
            ("app", ""),
            ("app", "/leading"),
        ];

        for (app_id, app_topic) in cases {
            let parsed = ns.parse(&ns.data_topic(app_id, app_topic)).unwrap();
            assert!(!parsed.control);
            assert_eq!(parsed.app_id, app_id);
            assert_eq!(parsed.app_topic, app_topic);

            let parsed = ns.parse(&ns.control_topic(app_id, app_topic)).unwrap();
            assert!(parsed.control);
            assert_eq!(parsed.account, ACCOUNT_NAME_TOKEN);
            assert_eq!(parsed.device_id, CLIENT_ID_TOKEN);
            assert_eq!(parsed.app_id, app_id);
            assert_eq!(parsed.app_topic, app_topic);
        }
    }

    #[test]
    fn test_parse_foreign_topic() {
        let ns = ns();
        assert!(matches!(
            ns.parse("only/two"),
            Err(CoreError::ForeignTopic(_))
        ));
        assert!(ns.parse("$EDC/acct/dev").is_err());
        assert!(ns.parse("").is_err());
    }
}
