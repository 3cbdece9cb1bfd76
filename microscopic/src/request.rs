//! Inbound requests.

use crate::{method::Method, response::Response};
use microscopic_core::{RequestInfo, RequestMessage, now_millis};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};
use tokio::task::AbortHandle;

struct Inner {
    message: RwLock<RequestMessage>,
    method: OnceLock<Arc<Method>>,
    response: Response,
    timer: Mutex<Option<AbortHandle>>,
}

/// One inbound call as seen by extensions and handlers.
///
/// A cheap handle: clones share the same request and the same [`Response`].
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

impl Request {
    /// Wrap a received request envelope.
    pub fn new(message: RequestMessage) -> Self {
        Self {
            inner: Arc::new(Inner {
                message: RwLock::new(message),
                method: OnceLock::new(),
                response: Response::new(),
                timer: Mutex::new(None),
            }),
        }
    }

    /// The client-generated request id, if any.
    pub fn id(&self) -> Option<String> {
        self.message().id.clone()
    }

    /// The requested method name.
    pub fn method_name(&self) -> String {
        self.message().method.clone()
    }

    /// The requested method version.
    pub fn version(&self) -> Option<String> {
        self.message().version.clone()
    }

    /// The call parameters.
    pub fn params(&self) -> Value {
        self.message().params.clone()
    }

    /// Deserialize the call parameters.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.message().params)
    }

    /// Deserialize one named parameter.
    ///
    /// Returns `None` if the parameter is missing or has the wrong shape.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let message = self.message();
        let value = message.params.get(key)?;
        T::deserialize(value).ok()
    }

    /// The call headers.
    pub fn headers(&self) -> Map<String, Value> {
        self.message().headers.clone()
    }

    /// A single header.
    pub fn header(&self, key: &str) -> Option<Value> {
        self.message().headers.get(key).cloned()
    }

    /// Set a header, e.g. from an extension.
    pub fn set_header(&self, key: impl Into<String>, value: Value) {
        self.inner
            .message
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .headers
            .insert(key.into(), value);
    }

    /// The deadline in milliseconds, if the caller set one.
    pub fn timeout(&self) -> Option<u64> {
        self.message().timeout.filter(|timeout| *timeout > 0)
    }

    /// Request metadata, with `responded` taken from the response.
    pub fn info(&self) -> RequestInfo {
        let mut info = self.message().info.clone();
        if let Some(responded) = self.inner.response.responded_at() {
            info.responded = Some(responded);
        }
        info
    }

    /// The resolved method, once the lifecycle found it.
    pub fn method(&self) -> Option<Arc<Method>> {
        self.inner.method.get().cloned()
    }

    /// The response of this request.
    pub fn response(&self) -> &Response {
        &self.inner.response
    }

    /// Settle the response with a result or an error.
    ///
    /// Same contract as [`Response::respond`].
    pub fn set_response(
        &self,
        outcome: Result<Value, microscopic_core::BoxError>,
    ) -> Result<(), crate::error::ResponseError> {
        self.inner.response.respond(outcome)
    }

    /// Check if the caller's deadline has already passed.
    ///
    /// A request without a send timestamp or timeout never expires.
    pub fn is_expired(&self) -> bool {
        let message = self.message();
        match (message.info.sent, message.timeout) {
            (Some(sent), Some(timeout)) => {
                let timeout = i64::try_from(timeout).unwrap_or(i64::MAX);
                sent.saturating_add(timeout) <= now_millis()
            }
            _ => false,
        }
    }

    /// Snapshot of the request envelope, without the response.
    pub fn to_message(&self) -> RequestMessage {
        let mut message = self.message().clone();
        message.info = self.info();
        message
    }

    pub(crate) fn set_method(&self, method: Arc<Method>) {
        let _ = self.inner.method.set(method);
    }

    pub(crate) fn update_info(&self, update: impl FnOnce(&mut RequestInfo)) {
        let mut message = self.inner.message.write().unwrap_or_else(|e| e.into_inner());
        update(&mut message.info);
    }

    pub(crate) fn arm_timer(&self, timer: AbortHandle) {
        let previous = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub(crate) fn disarm_timer(&self) {
        let timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    fn message(&self) -> RwLockReadGuard<'_, RequestMessage> {
        self.inner.message.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message();
        f.debug_struct("Request")
            .field("id", &message.id)
            .field("method", &message.method)
            .field("version", &message.version)
            .field("response", &self.inner.response)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_params_access() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Sum {
            a: i64,
            b: i64,
        }

        let request = Request::new(RequestMessage::new("sum").with_params(json!({ "a": 1, "b": 2 })));
        assert_eq!(request.param::<i64>("a"), Some(1));
        assert_eq!(request.param::<String>("a"), None);
        assert_eq!(request.param::<i64>("c"), None);
        assert_eq!(request.parse_params::<Sum>().unwrap(), Sum { a: 1, b: 2 });
    }

    #[test]
    fn test_headers() {
        let request = Request::new(RequestMessage::new("x"));
        request.set_header("trace", json!("abc"));
        assert_eq!(request.header("trace"), Some(json!("abc")));
        assert_eq!(request.headers().len(), 1);
    }

    #[test]
    fn test_expiry() {
        let now = now_millis();

        let expired = Request::new(RequestMessage::new("x").with_timeout(10).with_sent(now - 1_000));
        assert!(expired.is_expired());

        let fresh = Request::new(RequestMessage::new("x").with_timeout(10_000).with_sent(now));
        assert!(!fresh.is_expired());

        let unbounded = Request::new(RequestMessage::new("x").with_sent(now - 1_000));
        assert!(!unbounded.is_expired());
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let request = Request::new(RequestMessage::new("x").with_timeout(0));
        assert_eq!(request.timeout(), None);
    }

    #[test]
    fn test_to_message_carries_responded() {
        let request = Request::new(RequestMessage::new("x").with_params(json!([1])));
        assert!(request.to_message().info.responded.is_none());

        request.set_response(Ok(json!(true))).unwrap();
        let message = request.to_message();
        assert_eq!(message.method, "x");
        assert_eq!(message.params, json!([1]));
        assert_eq!(message.info.responded, request.response().responded_at());
    }

    #[test]
    fn test_clones_share_response() {
        let request = Request::new(RequestMessage::new("x"));
        let other = request.clone();
        other.set_response(Ok(json!(1))).unwrap();
        assert!(request.response().is_responded());
    }
}
