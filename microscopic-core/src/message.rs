//! Wire envelopes exchanged between clients and services.
//!
//! Bytes-on-wire are a transport concern; these types only fix the shape
//! every transport carries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The envelope a transport hands to a service: `{ content: { .. } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The request carried by this envelope.
    pub content: RequestMessage,
}

impl Envelope {
    /// Wrap a request in an envelope.
    pub fn new(content: RequestMessage) -> Self {
        Self { content }
    }
}

/// A call to a named, optionally versioned method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Correlation id generated by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Method name.
    pub method: String,
    /// Method version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
    /// Timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Free-form request headers.
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// Timing and identity metadata.
    #[serde(default)]
    pub info: RequestInfo,
}

impl RequestMessage {
    /// Create a request for the given method with no parameters.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    /// Set the method version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Set the timeout in milliseconds.
    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    /// Set the time the request was sent, in epoch milliseconds.
    pub fn with_sent(mut self, sent: i64) -> Self {
        self.info.sent = Some(sent);
        self
    }
}

/// Timing and identity metadata attached to a request.
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// When the caller sent the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<i64>,
    /// When the service received the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<i64>,
    /// When the service produced its terminal response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded: Option<i64>,
    /// The calling client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    /// The serving service instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceInfo>,
}

/// Identity of the calling client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client id.
    pub id: String,
    /// Client address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Identity of a service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Instance id.
    pub id: String,
    /// Instance address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Response status. Encoded on the wire as `1 = success`, `2 = fail`,
/// `3 = timeout`; anything else decodes as [`Status::Pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", from = "WireStatus")]
pub enum Status {
    /// No terminal outcome yet.
    #[default]
    Pending,
    /// The method produced a result.
    Success,
    /// The method failed.
    Fail,
    /// The deadline elapsed first.
    Timeout,
}

impl Status {
    /// Check if this is one of the terminal states.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Status::Pending => 0,
            Status::Success => 1,
            Status::Fail => 2,
            Status::Timeout => 3,
        }
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        match code {
            1 => Status::Success,
            2 => Status::Fail,
            3 => Status::Timeout,
            _ => Status::Pending,
        }
    }
}

/// A status as read off the wire: any value is accepted, only known codes
/// map to a terminal state.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireStatus {
    Code(u64),
    Other(serde::de::IgnoredAny),
}

impl From<WireStatus> for Status {
    fn from(status: WireStatus) -> Self {
        match status {
            WireStatus::Code(code) => u8::try_from(code).map(Status::from).unwrap_or_default(),
            WireStatus::Other(_) => Status::Pending,
        }
    }
}

/// A failure as it travels on the wire: a message plus optional details.
///
/// `ErrorPayload` is itself an error, so handlers can return it (boxed) to
/// control the details a caller sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    /// Create a payload with a message and no details.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert any error into a payload.
    ///
    /// An `ErrorPayload` inside the error is preserved with its details;
    /// any other error contributes its message only.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        match error.downcast_ref::<ErrorPayload>() {
            Some(payload) => payload.clone(),
            None => Self::new(error.to_string()),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorPayload {}

/// The envelope a service produces for every request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Response id.
    pub id: String,
    /// Terminal status.
    #[serde(default)]
    pub status: Status,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on fail or timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseMessage {
    /// A successful response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            status: Status::Success,
            result: Some(result),
            error: None,
        }
    }

    /// A failed response.
    pub fn fail(id: impl Into<String>, error: ErrorPayload) -> Self {
        Self {
            id: id.into(),
            status: Status::Fail,
            result: None,
            error: Some(error),
        }
    }

    /// A timed-out response.
    pub fn timeout(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Timeout,
            result: None,
            error: Some(ErrorPayload::new("Timeout")),
        }
    }
}
