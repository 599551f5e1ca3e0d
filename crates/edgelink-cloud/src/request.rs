//! # Request Handlers
//!
//! Request/response over control topics.
//!
//! ```text
//!   request:  $EDC/acct/thisDevice/CONF-V1/GET/configurations/heater
//!             metrics: requester.client.id = "console", request.id = "r-17"
//!                │
//!                ▼  RequestHandler::handle(Get, ["configurations", "heater"], payload)
//!                │
//!   response: $EDC/acct/console/CONF-V1/REPLY/r-17
//!             metrics: response.code = 200
//! ```

use std::fmt;
use std::str::FromStr;

use edgelink_core::payload::request_metrics;
use edgelink_core::{KuraPayload, TopicNamespace};
use thiserror::Error;

/// QoS of request responses.
pub const RESPONSE_QOS: u8 = 0;

/// Priority of request responses.
pub const RESPONSE_PRIORITY: u8 = 1;

pub const RESPONSE_CODE_OK: i32 = 200;

// =============================================================================
// Types
// =============================================================================

/// Request method, the first application-topic segment of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Put,
    Post,
    Del,
    Exec,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Put => "PUT",
            RequestMethod::Post => "POST",
            RequestMethod::Del => "DEL",
            RequestMethod::Exec => "EXEC",
        }
    }
}

impl FromStr for RequestMethod {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(RequestMethod::Get),
            "PUT" => Ok(RequestMethod::Put),
            "POST" => Ok(RequestMethod::Post),
            "DEL" => Ok(RequestMethod::Del),
            "EXEC" => Ok(RequestMethod::Exec),
            other => Err(RequestError::BadRequest(format!("unknown method '{other}'"))),
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a request handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl RequestError {
    pub fn response_code(&self) -> i32 {
        match self {
            RequestError::BadRequest(_) => 400,
            RequestError::NotFound(_) => 404,
            RequestError::Internal(_) => 500,
        }
    }
}

/// Serves requests addressed to one application id.
pub trait RequestHandler: Send + Sync {
    fn handle(
        &self,
        method: RequestMethod,
        resources: &[String],
        request: &KuraPayload,
    ) -> Result<KuraPayload, RequestError>;
}

// =============================================================================
// Request Parsing
// =============================================================================

/// A request routed to a handler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InboundRequest {
    pub requester_client_id: String,
    pub request_id: String,
    pub method: Result<RequestMethod, RequestError>,
    pub resources: Vec<String>,
}

impl InboundRequest {
    /// Extracts the request from a control message's application topic and
    /// payload. `None` when the payload lacks the requester metrics, in which
    /// case nobody could receive a reply.
    pub fn parse(app_topic: &str, payload: &KuraPayload, separator: &str) -> Option<Self> {
        let requester_client_id = payload.metric_str(request_metrics::REQUESTER_CLIENT_ID)?;
        let request_id = payload.metric_str(request_metrics::REQUEST_ID)?;

        let mut segments = app_topic.split(separator).filter(|s| !s.is_empty());
        let method = match segments.next() {
            Some(method) => method.parse(),
            None => Err(RequestError::BadRequest("missing method".into())),
        };

        Some(Self {
            requester_client_id: requester_client_id.to_string(),
            request_id: request_id.to_string(),
            method,
            resources: segments.map(str::to_string).collect(),
        })
    }

    pub fn reply_topic(&self, namespace: &TopicNamespace, app_id: &str) -> String {
        namespace.reply_topic(&self.requester_client_id, app_id, &self.request_id)
    }
}

/// Adds `response.code` (and the message for failures) to a response.
pub(crate) fn response_payload(outcome: Result<KuraPayload, RequestError>) -> KuraPayload {
    match outcome {
        Ok(mut payload) => {
            payload.add_metric(request_metrics::RESPONSE_CODE, RESPONSE_CODE_OK);
            if payload.timestamp.is_none() {
                payload.timestamp = KuraPayload::now().timestamp;
            }
            payload
        }
        Err(e) => KuraPayload::now()
            .with_metric(request_metrics::RESPONSE_CODE, e.response_code())
            .with_metric(request_metrics::RESPONSE_EXCEPTION_MESSAGE, e.to_string()),
    }
}
