//! # Service
//!
//! A named set of methods reachable over one transport.
//!
//! ## Lifecycle
//!
//! ```text
//! start: onPreStart → bind transport → listen → register → heartbeat → onPostStart
//! stop:  onPreStop → cancel heartbeat → unregister → close transport → onPostStop
//! ```
//!
//! Both run as [`Pipeline`]s over the service handle; the first failing step
//! ends the run and its error is returned from [`Service::start`] or
//! [`Service::stop`].
//!
//! While started, the service renews its registration every
//! [`HEARTBEAT_INTERVAL`]. The heartbeat is cancelled by `stop` and when the
//! last handle to the service is dropped.

use crate::{
    error::{MethodError, ServiceError},
    extension::{Event, Extension, RequestEvent, ServiceEvent},
    lifecycle,
    method::{Method, MethodDefinition},
    request::Request,
};
use microscopic_core::{
    BoxError, Connection, Envelope, Flow, Inbound, Pipeline, RequestMessage, Responder,
    ResponseMessage, Sequential, ServiceInfo, ServiceOptions, ServiceRegistry, SharedStep, Step,
    StepResult, Transport, local_ip,
};
use microscopic_std::Components;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use uuid::Uuid;

/// How often a started service renews its registration.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A plugin that configures a service.
///
/// Any `FnOnce(&Service, O) -> Result<(), ServiceError>` is a plugin.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a service plugin",
    label = "expected a plugin taking `{O}` options",
    note = "Plugins are closures `FnOnce(&Service, {O}) -> Result<(), ServiceError>`."
)]
pub trait Plugin<O> {
    /// Apply the plugin to a service.
    fn register(self, service: &Service, options: O) -> Result<(), ServiceError>;
}

impl<O, F> Plugin<O> for F
where
    F: FnOnce(&Service, O) -> Result<(), ServiceError>,
{
    fn register(self, service: &Service, options: O) -> Result<(), ServiceError> {
        (self)(service, options)
    }
}

struct ServiceInner {
    name: String,
    id: RwLock<String>,
    options: ServiceOptions,
    methods: RwLock<HashMap<String, Arc<Method>>>,
    service_extensions: RwLock<HashMap<ServiceEvent, Vec<SharedStep<Service>>>>,
    request_extensions: RwLock<HashMap<RequestEvent, Vec<SharedStep<Request>>>>,
    registry: Arc<dyn ServiceRegistry>,
    components: Arc<Components>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    connection: RwLock<Option<Connection>>,
    registered: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        let heartbeat = self
            .heartbeat
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
    }
}

/// A handle to a service.
///
/// Clones share the same service.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

impl Service {
    /// Create a service.
    ///
    /// `options` are normalized: an empty transport type falls back to the
    /// default and the worker settings are copied into the transport options.
    pub fn new(
        name: impl Into<String>,
        options: ServiceOptions,
        registry: Arc<dyn ServiceRegistry>,
        components: Arc<Components>,
    ) -> Result<Self, ServiceError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceError::NameRequired);
        }

        Ok(Self {
            inner: Arc::new(ServiceInner {
                name,
                id: RwLock::new(Uuid::new_v4().to_string()),
                options: options.normalized(),
                methods: RwLock::new(HashMap::new()),
                service_extensions: RwLock::new(HashMap::new()),
                request_extensions: RwLock::new(HashMap::new()),
                registry,
                components,
                transport: RwLock::new(None),
                connection: RwLock::new(None),
                registered: AtomicBool::new(false),
                heartbeat: Mutex::new(None),
            }),
        })
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The instance id. Replaced by the registry's id once registered.
    pub fn id(&self) -> String {
        self.inner
            .id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The effective options.
    pub fn options(&self) -> &ServiceOptions {
        &self.inner.options
    }

    /// The connection info clients use, once listening.
    pub fn connection(&self) -> Option<Connection> {
        self.inner
            .connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Identity stamped into every request this service receives.
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.inner.name.clone(),
            id: self.id(),
            ip: Some(local_ip().to_string()),
        }
    }

    /// Check if the service is bound to a transport.
    pub fn is_started(&self) -> bool {
        self.transport().is_some()
    }

    /// Register a method.
    ///
    /// Fails if the definition is invalid or the composite key is taken.
    pub fn add_method(&self, definition: MethodDefinition) -> Result<(), MethodError> {
        let method = Method::new(definition)?;
        let mut methods = self.inner.methods.write().unwrap_or_else(|e| e.into_inner());
        if methods.contains_key(method.name()) {
            return Err(MethodError::Duplicate(method.name().to_string()));
        }
        tracing::debug!(service = %self.inner.name, method = method.name(), "method added");
        methods.insert(method.name().to_string(), Arc::new(method));
        Ok(())
    }

    /// Look up a method by exact composite key.
    pub fn get_method(&self, name: &str, version: Option<&str>) -> Option<Arc<Method>> {
        self.inner
            .methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&Method::key(name, version))
            .cloned()
    }

    /// The composite keys of all registered methods, sorted.
    pub fn method_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Attach an extension to a named lifecycle event.
    ///
    /// Fails if the event is unknown or the extension kind does not match
    /// the event's lifecycle.
    pub fn ext(&self, event: &str, extension: Extension) -> Result<(), ServiceError> {
        match (event.parse::<Event>()?, extension) {
            (Event::Service(event), Extension::Service(step)) => {
                self.push_service_extension(event, step);
                Ok(())
            }
            (Event::Request(event), Extension::Request(step)) => {
                self.push_request_extension(event, step);
                Ok(())
            }
            (Event::Service(event), Extension::Request(_)) => Err(ServiceError::ExtensionMismatch {
                event: event.as_str().to_string(),
                expected: "service",
            }),
            (Event::Request(event), Extension::Service(_)) => Err(ServiceError::ExtensionMismatch {
                event: event.as_str().to_string(),
                expected: "request",
            }),
        }
    }

    /// Attach a step to a service lifecycle event.
    pub fn ext_service<S: Step<Service>>(&self, event: ServiceEvent, step: S) {
        self.push_service_extension(event, Arc::new(step));
    }

    /// Attach a step to a request lifecycle event.
    pub fn ext_request<S: Step<Request>>(&self, event: RequestEvent, step: S) {
        self.push_request_extension(event, Arc::new(step));
    }

    /// Apply a plugin with its options.
    pub fn register<O, P: Plugin<O>>(&self, plugin: P, options: O) -> Result<(), ServiceError> {
        plugin.register(self, options)
    }

    /// Handle one inbound envelope on the runtime.
    ///
    /// `None` is ignored. The response is handed to `respond` once.
    pub fn on_message(&self, message: Option<Envelope>, respond: Responder) {
        let Some(envelope) = message else {
            return;
        };
        let service = self.clone();
        tokio::spawn(lifecycle::execute(
            service,
            Request::new(envelope.content),
            respond,
        ));
    }

    /// Run one request to completion and return what would be delivered.
    ///
    /// Returns `None` if a response extension prevented delivery.
    pub async fn handle(&self, message: RequestMessage) -> Option<ResponseMessage> {
        let (tx, rx) = oneshot::channel();
        lifecycle::execute(
            self.clone(),
            Request::new(message),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        )
        .await;
        rx.await.ok()
    }

    /// Start the service.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut pipeline: Pipeline<Service, _, _> = Pipeline::with_hooks(Sequential, finish);
        pipeline
            .add_group(self.service_extensions(ServiceEvent::PreStart))
            .add(bind_transport)
            .add(listen)
            .add(register)
            .add(heartbeat)
            .add_group(self.service_extensions(ServiceEvent::PostStart));

        if let Err(error) = pipeline.start(self).await {
            if let Err(cleanup) = self.teardown().await {
                tracing::warn!(service = %self.inner.name, error = %cleanup, "partial start not undone");
            }
            return Err(error);
        }
        tracing::info!(service = %self.inner.name, id = %self.id(), "service started");
        Ok(())
    }

    /// Stop the service.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut pipeline: Pipeline<Service, _, _> = Pipeline::with_hooks(Sequential, finish);
        pipeline
            .add_group(self.service_extensions(ServiceEvent::PreStop))
            .add(shutdown)
            .add_group(self.service_extensions(ServiceEvent::PostStop));

        pipeline.start(self).await?;
        tracing::info!(service = %self.inner.name, "service stopped");
        Ok(())
    }

    pub(crate) fn request_extensions(&self, event: RequestEvent) -> Vec<SharedStep<Request>> {
        self.inner
            .request_extensions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }

    fn service_extensions(&self, event: ServiceEvent) -> Vec<SharedStep<Service>> {
        self.inner
            .service_extensions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .cloned()
            .unwrap_or_default()
    }

    fn push_service_extension(&self, event: ServiceEvent, step: SharedStep<Service>) {
        self.inner
            .service_extensions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event)
            .or_default()
            .push(step);
    }

    fn push_request_extension(&self, event: RequestEvent, step: SharedStep<Request>) {
        self.inner
            .request_extensions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event)
            .or_default()
            .push(step);
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn start_heartbeat(&self) {
        let service = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(inner) = service.upgrade() else {
                    break;
                };
                let id = inner.id.read().unwrap_or_else(|e| e.into_inner()).clone();
                match inner.registry.renew(&inner.name, &id).await {
                    Ok(()) => tracing::trace!(service = %inner.name, "registration renewed"),
                    Err(error) => {
                        tracing::warn!(service = %inner.name, %error, "registration renewal failed")
                    }
                }
            }
        });

        let previous = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Undo whatever part of `start` took effect: heartbeat, registration,
    /// listener and transport.
    async fn teardown(&self) -> Result<(), ServiceError> {
        self.stop_heartbeat();

        let transport = self
            .inner
            .transport
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.inner
            .connection
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let unregistered = if self.inner.registered.swap(false, Ordering::SeqCst) {
            self.inner
                .registry
                .unregister(&self.inner.name, &self.id())
                .await
                .map_err(ServiceError::from)
        } else {
            Ok(())
        };

        if let Some(transport) = transport {
            transport.close().await.map_err(ServiceError::from)?;
        }
        unregistered
    }

    fn stop_heartbeat(&self) {
        let task = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("id", &self.id())
            .field("methods", &self.method_keys())
            .field("started", &self.is_started())
            .finish()
    }
}

impl Inbound for Service {
    fn on_message(&self, message: Option<Envelope>, respond: Responder) {
        Service::on_message(self, message, respond);
    }
}

/// What a transport holds on to: it must not keep the service alive.
struct WeakInbound(Weak<ServiceInner>);

impl Inbound for WeakInbound {
    fn on_message(&self, message: Option<Envelope>, respond: Responder) {
        match self.0.upgrade() {
            Some(inner) => Service { inner }.on_message(message, respond),
            None => tracing::debug!("message for a dropped service ignored"),
        }
    }
}

fn finish(error: Option<BoxError>) -> Result<(), ServiceError> {
    match error {
        Some(error) => Err(ServiceError::from_pipeline(error)),
        None => Ok(()),
    }
}

async fn bind_transport(service: Service) -> StepResult {
    let transport = service
        .inner
        .components
        .transport(&service.inner.options.transport)
        .map_err(ServiceError::from)?;
    tracing::debug!(
        service = %service.inner.name,
        kind = %transport.options().kind,
        "transport bound"
    );
    *service
        .inner
        .transport
        .write()
        .unwrap_or_else(|e| e.into_inner()) = Some(transport);
    Ok(Flow::Continue)
}

async fn listen(service: Service) -> StepResult {
    let transport = service.transport().ok_or(ServiceError::NotStarted)?;
    let inbound: Arc<dyn Inbound> = Arc::new(WeakInbound(Arc::downgrade(&service.inner)));
    let connection = transport
        .listen(service.info(), inbound)
        .await
        .map_err(ServiceError::from)?;
    tracing::debug!(service = %service.inner.name, %connection, "listening");
    *service
        .inner
        .connection
        .write()
        .unwrap_or_else(|e| e.into_inner()) = Some(connection);
    Ok(Flow::Continue)
}

async fn register(service: Service) -> StepResult {
    let connection = service.connection().ok_or(ServiceError::NotStarted)?;
    let id = service
        .inner
        .registry
        .register(&service.inner.name, &connection, &service.inner.options)
        .await
        .map_err(ServiceError::from)?;
    tracing::info!(service = %service.inner.name, %id, "service registered");
    *service.inner.id.write().unwrap_or_else(|e| e.into_inner()) = id;
    service.inner.registered.store(true, Ordering::SeqCst);
    Ok(Flow::Continue)
}

async fn heartbeat(service: Service) -> StepResult {
    service.start_heartbeat();
    Ok(Flow::Continue)
}

async fn shutdown(service: Service) -> StepResult {
    service.teardown().await?;
    Ok(Flow::Continue)
}
