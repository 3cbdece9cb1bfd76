//! Test doubles for services and clients.
//!
//! - [`RecordingTransport`]: records every send and answers according to a
//!   configurable [`Behavior`]
//! - [`StaticRegistry`]: serves a fixed node list and records registrations
//! - [`CountingStep`]: a pipeline step that counts its runs

use async_trait::async_trait;
use microscopic_core::{
    Connection, Envelope, ErrorPayload, Flow, Inbound, Node, RegistryError, RequestMessage,
    ResponseCallback, ResponseMessage, ServiceInfo, ServiceOptions, ServiceRegistry, Step,
    StepResult, Transport, TransportError, TransportOptions,
};
use serde_json::json;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::oneshot;

/// How a [`RecordingTransport`] answers a send.
#[derive(Debug, Clone, Default)]
pub enum Behavior {
    /// Succeed with the request params as the result.
    #[default]
    Echo,
    /// Answer with the given response.
    Respond(ResponseMessage),
    /// Answer twice with the given response.
    RespondTwice(ResponseMessage),
    /// Answer with the given response after a delay.
    Delay(Duration, ResponseMessage),
    /// Report a transport failure through the callback.
    Fail,
    /// Refuse to dispatch the request.
    Reject,
    /// Never answer.
    Never,
}

struct RecordingInner {
    options: TransportOptions,
    behavior: Mutex<Behavior>,
    sent: Mutex<Vec<(Connection, RequestMessage)>>,
    listened: Mutex<Vec<ServiceInfo>>,
    inbound: Mutex<Option<Arc<dyn Inbound>>>,
    closed: AtomicBool,
}

/// A transport that records traffic instead of moving it.
///
/// Clones share their state, so a test can keep one handle while a factory
/// hands another to the code under test.
#[derive(Clone)]
pub struct RecordingTransport {
    inner: Arc<RecordingInner>,
}

impl RecordingTransport {
    /// Type name reported in the default options.
    pub const TYPE: &'static str = "recording";

    /// Create a transport that echoes params back.
    pub fn new() -> Self {
        Self::with_options(TransportOptions::new(Self::TYPE))
    }

    /// Create a transport with the given options.
    pub fn with_options(options: TransportOptions) -> Self {
        Self {
            inner: Arc::new(RecordingInner {
                options,
                behavior: Mutex::new(Behavior::default()),
                sent: Mutex::new(Vec::new()),
                listened: Mutex::new(Vec::new()),
                inbound: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Change how later sends are answered.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.inner.behavior.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Every request sent so far, with the connection it was sent to.
    pub fn sent(&self) -> Vec<(Connection, RequestMessage)> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every service that started listening.
    pub fn listened(&self) -> Vec<ServiceInfo> {
        self.inner
            .listened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Check if [`Transport::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Deliver a request to the listening service and wait for its answer.
    ///
    /// Returns `None` when nothing is listening or the service drops the
    /// request without answering.
    pub async fn inject(&self, message: Option<RequestMessage>) -> Option<ResponseMessage> {
        let inbound = self
            .inner
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;

        let (tx, rx) = oneshot::channel();
        inbound.on_message(
            message.map(Envelope::new),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
        rx.await.ok()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn options(&self) -> &TransportOptions {
        &self.inner.options
    }

    async fn listen(
        &self,
        service: ServiceInfo,
        inbound: Arc<dyn Inbound>,
    ) -> Result<Connection, TransportError> {
        let connection = json!({ "recording": service.name });
        self.inner
            .listened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(service);
        *self.inner.inbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(inbound);
        Ok(connection)
    }

    async fn send(
        &self,
        connection: &Connection,
        request: RequestMessage,
        callback: ResponseCallback,
    ) -> Result<(), TransportError> {
        let behavior = self
            .inner
            .behavior
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if matches!(behavior, Behavior::Reject) {
            return Err(TransportError::Unreachable(connection.to_string()));
        }

        let echo = ResponseMessage::success(
            request.id.clone().unwrap_or_default(),
            request.params.clone(),
        );
        self.inner
            .sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((connection.clone(), request));

        match behavior {
            Behavior::Echo => callback(Ok(echo)),
            Behavior::Respond(response) => callback(Ok(response)),
            Behavior::RespondTwice(response) => {
                callback(Ok(response.clone()));
                callback(Ok(response));
            }
            Behavior::Delay(delay, response) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callback(Ok(response));
                });
            }
            Behavior::Fail => callback(Err(TransportError::Closed)),
            Behavior::Reject | Behavior::Never => {}
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        Ok(())
    }
}

/// A registry with a fixed node list.
///
/// Registrations are recorded but do not change what
/// [`get_service`](ServiceRegistry::get_service) returns.
#[derive(Default)]
pub struct StaticRegistry {
    nodes: Mutex<Vec<Node>>,
    options: Mutex<Option<ServiceOptions>>,
    lookup_delay: Option<Duration>,
    failing: AtomicBool,
    registered: Mutex<Vec<(String, Connection)>>,
    renewals: AtomicUsize,
    unregistered: Mutex<Vec<(String, String)>>,
}

impl StaticRegistry {
    /// Create a registry serving the given nodes.
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Self::default()
        }
    }

    /// Publish options for every service name.
    pub fn with_options(self, options: ServiceOptions) -> Self {
        *self.options.lock().unwrap_or_else(|e| e.into_inner()) = Some(options);
        self
    }

    /// Delay every options lookup.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    /// Replace the served nodes.
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.lock().unwrap_or_else(|e| e.into_inner()) = nodes;
    }

    /// Make every lookup fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every registration so far, as `(name, connection)`.
    pub fn registered(&self) -> Vec<(String, Connection)> {
        self.registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get the number of renewals.
    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Every removal so far, as `(name, id)`.
    pub fn unregistered(&self) -> Vec<(String, String)> {
        self.unregistered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::Backend(Box::new(ErrorPayload::new(
                "registry unavailable",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn register(
        &self,
        name: &str,
        connection: &Connection,
        _options: &ServiceOptions,
    ) -> Result<String, RegistryError> {
        self.check()?;
        let mut registered = self.registered.lock().unwrap_or_else(|e| e.into_inner());
        registered.push((name.to_string(), connection.clone()));
        Ok(format!("instance-{}", registered.len()))
    }

    async fn renew(&self, _name: &str, _id: &str) -> Result<(), RegistryError> {
        self.check()?;
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self, name: &str, id: &str) -> Result<(), RegistryError> {
        self.unregistered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), id.to_string()));
        Ok(())
    }

    async fn get_service(&self, _name: &str) -> Result<Vec<Node>, RegistryError> {
        self.check()?;
        Ok(self.nodes.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn get_service_options(
        &self,
        _name: &str,
    ) -> Result<Option<ServiceOptions>, RegistryError> {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.options.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// A step that counts how often it ran and then returns a fixed [`Flow`].
#[derive(Clone)]
pub struct CountingStep {
    runs: Arc<AtomicUsize>,
    flow: Flow,
}

impl CountingStep {
    /// A step that continues.
    pub fn new() -> Self {
        Self::with_flow(Flow::Continue)
    }

    /// A step that returns `flow`.
    pub fn with_flow(flow: Flow) -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
            flow,
        }
    }

    /// Get the number of runs so far, across all clones.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Default for CountingStep {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> Step<C> for CountingStep {
    async fn run(&self, _ctx: &C) -> StepResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microscopic_core::Pipeline;

    #[tokio::test]
    async fn test_recording_transport_echoes_and_records() {
        let transport = RecordingTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        transport
            .send(
                &json!("node"),
                RequestMessage::new("ping").with_params(json!({ "n": 1 })),
                Arc::new(move |outcome| sink.lock().unwrap().push(outcome.unwrap())),
            )
            .await
            .unwrap();

        assert_eq!(transport.sent().len(), 1);
        assert_eq!(seen.lock().unwrap()[0].result, Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn test_recording_transport_reject() {
        let transport = RecordingTransport::new();
        transport.set_behavior(Behavior::Reject);
        let result = transport
            .send(&json!("node"), RequestMessage::new("ping"), Arc::new(|_| {}))
            .await;
        assert!(result.is_err());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_static_registry_records() {
        let registry = StaticRegistry::new(vec![Node::new("a")]);
        let id = registry
            .register("svc", &json!("a"), &ServiceOptions::new())
            .await
            .unwrap();
        registry.renew("svc", &id).await.unwrap();
        registry.unregister("svc", &id).await.unwrap();

        assert_eq!(registry.registered().len(), 1);
        assert_eq!(registry.renewals(), 1);
        assert_eq!(registry.unregistered(), vec![("svc".to_string(), id)]);
        assert_eq!(registry.get_service("svc").await.unwrap().len(), 1);

        registry.set_failing(true);
        assert!(registry.get_service("svc").await.is_err());
    }

    #[tokio::test]
    async fn test_counting_step() {
        let step = CountingStep::new();
        let mut pipeline: Pipeline<()> = Pipeline::new();
        pipeline.add(step.clone()).add(step.clone());
        pipeline.start(&()).await.unwrap();
        assert_eq!(step.runs(), 2);
    }
}
