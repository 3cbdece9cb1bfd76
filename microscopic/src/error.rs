//! Error types of the facade.
//!
//! - [`MethodError`] - Invalid method definitions
//! - [`ResponseError`] - A second terminal transition of a response
//! - [`LifecycleError`] - Failures written into a response by the request lifecycle
//! - [`ServiceError`] - Service construction, configuration and start/stop failures
//! - [`ClientError`] - Everything an outbound call can complete with

use microscopic_core::{BoxError, ErrorPayload, RegistryError, ResponseMessage, TransportError};
use microscopic_std::ComponentError;
use thiserror::Error;

/// Errors raised while defining a method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MethodError {
    /// The method has an empty name.
    #[error("method name is required")]
    NameRequired,

    /// The method has no handler.
    #[error("method {0} has no handler")]
    HandlerRequired(String),

    /// A method with the same composite key is already registered.
    #[error("method {0} is already registered")]
    Duplicate(String),
}

/// Errors raised by a response transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseError {
    /// The response already reached a terminal state.
    #[error("Response called twice")]
    CalledTwice,
}

/// Failures the request lifecycle turns into a failed response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// No method is registered under the composite key.
    #[error("method not found: {key}")]
    MethodNotFound {
        /// The composite key that was looked up.
        key: String,
    },

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The pipeline was stopped before anything answered the request.
    #[error("request ended without a response")]
    Unanswered,
}

/// Errors raised by a service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The service has an empty name.
    #[error("service name is required")]
    NameRequired,

    /// The event is not a known service or request lifecycle event.
    #[error("unknown lifecycle event: {0}")]
    UnknownEvent(String),

    /// The extension kind does not match the event.
    #[error("event {event} expects a {expected} extension")]
    ExtensionMismatch {
        /// The event name.
        event: String,
        /// The expected extension kind.
        expected: &'static str,
    },

    /// The transport is not bound yet.
    #[error("service is not started")]
    NotStarted,

    /// The options could not be parsed.
    #[error("invalid service options: {0}")]
    Options(#[from] serde_json::Error),

    /// A method definition was rejected.
    #[error(transparent)]
    Method(#[from] MethodError),

    /// The transport type could not be resolved.
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The registry failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A lifecycle extension failed.
    #[error("lifecycle extension failed: {0}")]
    Extension(BoxError),
}

impl ServiceError {
    /// Recover the service error carried through a lifecycle pipeline.
    pub(crate) fn from_pipeline(error: BoxError) -> Self {
        match error.downcast::<ServiceError>() {
            Ok(error) => *error,
            Err(other) => ServiceError::Extension(other),
        }
    }
}

/// The outcome of an outbound call that did not succeed.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The client has no transport bound yet.
    #[error("client is not initialized")]
    NotReady,

    /// Loading the service options or components failed.
    #[error("client initialization failed: {0}")]
    Init(String),

    /// The registry returned no nodes.
    #[error("no nodes available for service {0}")]
    NoNodes(String),

    /// The load balancer declined to pick a node.
    #[error("load balancer selected no node")]
    NoNodeSelected,

    /// The registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The transport reported a failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A component could not be resolved.
    #[error(transparent)]
    Component(#[from] ComponentError),

    /// The deadline elapsed, locally or on the service.
    #[error("Request timeout!")]
    Timeout {
        /// The timeout response, when the service produced one.
        response: Option<Box<ResponseMessage>>,
    },

    /// The service answered with a failure.
    #[error("{0}")]
    Remote(ErrorPayload),

    /// The response carried neither a known status nor an error.
    #[error("Unknown error")]
    Unknown,

    /// The client went away before the call completed.
    #[error("call was dropped before completion")]
    Dropped,
}

impl ClientError {
    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_error_message() {
        assert_eq!(ResponseError::CalledTwice.to_string(), "Response called twice");
    }

    #[test]
    fn test_service_error_survives_pipeline() {
        let boxed: BoxError = Box::new(ServiceError::NotStarted);
        assert!(matches!(
            ServiceError::from_pipeline(boxed),
            ServiceError::NotStarted
        ));

        let foreign: BoxError = "boom".into();
        match ServiceError::from_pipeline(foreign) {
            ServiceError::Extension(error) => assert_eq!(error.to_string(), "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_client_timeout_message() {
        let error = ClientError::Timeout { response: None };
        assert!(error.is_timeout());
        assert_eq!(error.to_string(), "Request timeout!");
    }
}
