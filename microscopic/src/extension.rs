//! Lifecycle events and extensions.
//!
//! Extensions are extra pipeline steps attached to a named event of either
//! the service lifecycle (start/stop) or the request lifecycle. They run
//! after the built-in steps of their event, in registration order.
//!
//! | event | lifecycle | context |
//! |---|---|---|
//! | `onPreStart`, `onPostStart`, `onPreStop`, `onPostStop` | service | [`Service`] |
//! | `onRequest`, `onPreMethod`, `onPostMethod` | request processing | [`Request`] |
//! | `onPreResponse`, `onPostResponse` | response delivery | [`Request`] |

use crate::{error::ServiceError, request::Request, service::Service};
use microscopic_core::{Flow, SharedStep, Step, StepResult};
use std::{fmt, str::FromStr, sync::Arc};

/// An event of the service lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEvent {
    /// Before the transport is bound.
    PreStart,
    /// After the service registered itself.
    PostStart,
    /// Before the service shuts down.
    PreStop,
    /// After the transport was closed.
    PostStop,
}

impl ServiceEvent {
    /// Every service event.
    pub const ALL: [ServiceEvent; 4] = [
        ServiceEvent::PreStart,
        ServiceEvent::PostStart,
        ServiceEvent::PreStop,
        ServiceEvent::PostStop,
    ];

    /// The event name.
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceEvent::PreStart => "onPreStart",
            ServiceEvent::PostStart => "onPostStart",
            ServiceEvent::PreStop => "onPreStop",
            ServiceEvent::PostStop => "onPostStop",
        }
    }
}

/// An event of the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    /// After the method was resolved and the timer armed.
    Request,
    /// Right before the method runs.
    PreMethod,
    /// After the method ran, while the response is still pending.
    PostMethod,
    /// Before the response is handed to the caller.
    PreResponse,
    /// After the response was handed to the caller.
    PostResponse,
}

impl RequestEvent {
    /// Every request event.
    pub const ALL: [RequestEvent; 5] = [
        RequestEvent::Request,
        RequestEvent::PreMethod,
        RequestEvent::PostMethod,
        RequestEvent::PreResponse,
        RequestEvent::PostResponse,
    ];

    /// The event name.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestEvent::Request => "onRequest",
            RequestEvent::PreMethod => "onPreMethod",
            RequestEvent::PostMethod => "onPostMethod",
            RequestEvent::PreResponse => "onPreResponse",
            RequestEvent::PostResponse => "onPostResponse",
        }
    }
}

/// Any lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A service lifecycle event.
    Service(ServiceEvent),
    /// A request lifecycle event.
    Request(RequestEvent),
}

impl FromStr for Event {
    type Err = ServiceError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ServiceEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == name)
            .map(Event::Service)
            .or_else(|| {
                RequestEvent::ALL
                    .into_iter()
                    .find(|event| event.as_str() == name)
                    .map(Event::Request)
            })
            .ok_or_else(|| ServiceError::UnknownEvent(name.to_string()))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Service(event) => f.write_str(event.as_str()),
            Event::Request(event) => f.write_str(event.as_str()),
        }
    }
}

/// A step attached to a lifecycle event.
#[derive(Clone)]
pub enum Extension {
    /// Runs with the service as context.
    Service(SharedStep<Service>),
    /// Runs with the request as context.
    Request(SharedStep<Request>),
}

impl Extension {
    /// Wrap a service lifecycle step.
    pub fn service<S: Step<Service>>(step: S) -> Self {
        Extension::Service(Arc::new(step))
    }

    /// Wrap a request lifecycle step.
    pub fn request<S: Step<Request>>(step: S) -> Self {
        Extension::Request(Arc::new(step))
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extension::Service(_) => f.write_str("Extension::Service"),
            Extension::Request(_) => f.write_str("Extension::Request"),
        }
    }
}

/// A request extension that traces requests and responses at `debug` level.
///
/// Attach it to `onRequest` to log arrivals and to `onPostResponse` to log
/// outcomes; it logs whichever applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExtension;

impl Step<Request> for LoggingExtension {
    async fn run(&self, request: &Request) -> StepResult {
        let response = request.response();
        if response.is_responded() {
            tracing::debug!(
                method = %request.method_name(),
                response = response.id(),
                status = ?response.status(),
                "request answered"
            );
        } else {
            tracing::debug!(
                method = %request.method_name(),
                version = ?request.version(),
                params = %request.params(),
                "request received"
            );
        }
        Ok(Flow::Continue)
    }
}
