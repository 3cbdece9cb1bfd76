//! Named, versioned methods.
//!
//! A [`Method`] binds a composite key (`name` or `name_version`, lower-cased)
//! to a [`Handler`]. Whatever the handler does, its outcome reaches the
//! response through the [`Reply`] capability: panics and errors are caught at
//! this boundary and become a failed response.

use crate::{
    error::{LifecycleError, MethodError},
    request::Request,
    response::Reply,
};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use microscopic_core::{BoxError, ErrorPayload};
use serde_json::Value;
use std::{
    any::Any,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

/// The future an async handler resolves to.
pub type HandlerFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// A handler resolved once at definition time and shared by every call.
pub type FixedFuture = Shared<BoxFuture<'static, Result<Value, ErrorPayload>>>;

/// The code behind a method.
#[derive(Clone)]
pub enum Handler {
    /// Receives the request and a reply capability, and replies when ready.
    Callback(Arc<dyn Fn(Request, Reply) + Send + Sync>),
    /// Returns a future whose output becomes the reply.
    Async(Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>),
    /// A value computed once; every call replies with its outcome.
    Fixed(FixedFuture),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Callback(_) => f.write_str("Handler::Callback"),
            Handler::Async(_) => f.write_str("Handler::Async"),
            Handler::Fixed(_) => f.write_str("Handler::Fixed"),
        }
    }
}

/// Builder describing a method before it is registered.
///
/// # Example
///
/// ```rust,ignore
/// service.add_method(
///     MethodDefinition::new("sum")
///         .version("v2")
///         .handle(|request: Request| async move {
///             let (a, b): (i64, i64) = request.parse_params()?;
///             Ok(json!(a + b))
///         }),
/// )?;
/// ```
#[derive(Debug, Default)]
pub struct MethodDefinition {
    name: String,
    version: Option<String>,
    handler: Option<Handler>,
}

impl MethodDefinition {
    /// Start a definition with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            handler: None,
        }
    }

    /// Set the version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the handler.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Use a callback handler that replies through [`Reply`].
    pub fn callback<F>(self, handler: F) -> Self
    where
        F: Fn(Request, Reply) + Send + Sync + 'static,
    {
        self.handler(Handler::Callback(Arc::new(handler)))
    }

    /// Use an async handler.
    pub fn handle<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.handler(Handler::Async(Arc::new(move |request| {
            handler(request).boxed()
        })))
    }

    /// Use a future resolved once and shared by every call.
    pub fn fixed<Fut>(self, future: Fut) -> Self
    where
        Fut: Future<Output = Result<Value, ErrorPayload>> + Send + 'static,
    {
        self.handler(Handler::Fixed(future.boxed().shared()))
    }
}

/// A registered method.
#[derive(Debug)]
pub struct Method {
    key: String,
    base: String,
    version: Option<String>,
    handler: Handler,
}

impl Method {
    /// Validate a definition.
    pub fn new(definition: MethodDefinition) -> Result<Self, MethodError> {
        let MethodDefinition {
            name,
            version,
            handler,
        } = definition;

        if name.trim().is_empty() {
            return Err(MethodError::NameRequired);
        }
        let key = Self::key(&name, version.as_deref());
        let handler = handler.ok_or_else(|| MethodError::HandlerRequired(key.clone()))?;

        Ok(Self {
            key,
            base: name,
            version,
            handler,
        })
    }

    /// Build the composite key for a name and optional version.
    pub fn key(name: &str, version: Option<&str>) -> String {
        match version {
            Some(version) if !version.is_empty() => format!("{name}_{version}").to_lowercase(),
            _ => name.to_lowercase(),
        }
    }

    /// The composite key.
    pub fn name(&self) -> &str {
        &self.key
    }

    /// The name as defined.
    pub fn base_name(&self) -> &str {
        &self.base
    }

    /// The version as defined.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Invoke the handler.
    ///
    /// Returns once the handler was started; async handlers keep running on
    /// the runtime and reply when they finish.
    pub fn run(&self, request: Request, reply: Reply) {
        match &self.handler {
            Handler::Callback(handler) => {
                let fallback = reply.clone();
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(request, reply))) {
                    settle(&self.key, &fallback, Err(panicked(panic)));
                }
            }
            Handler::Async(handler) => {
                let future = match catch_unwind(AssertUnwindSafe(|| handler(request))) {
                    Ok(future) => future,
                    Err(panic) => {
                        settle(&self.key, &reply, Err(panicked(panic)));
                        return;
                    }
                };
                let key = self.key.clone();
                tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(future)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(panicked(panic)));
                    settle(&key, &reply, outcome);
                });
            }
            Handler::Fixed(future) => {
                let future = future.clone();
                let key = self.key.clone();
                tokio::spawn(async move {
                    let outcome = future.await.map_err(|error| Box::new(error) as BoxError);
                    settle(&key, &reply, outcome);
                });
            }
        }
    }
}

fn settle(key: &str, reply: &Reply, outcome: Result<Value, BoxError>) {
    if !reply.send_if_pending(outcome) {
        tracing::warn!(method = key, "late reply dropped");
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> BoxError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Box::new(LifecycleError::Panicked(message))
}
