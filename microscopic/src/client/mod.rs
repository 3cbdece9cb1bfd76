//! # Clients
//!
//! A [`Client`] calls the methods of one named service. On creation it loads
//! the options the service published to the registry and builds the same
//! transport (and balancer, if one is named) from the component table.
//!
//! ```text
//! send → build payload → arm timer → [queue until ready]
//!      → get_service → select_node → transport.send → Completion
//! ```
//!
//! Every call completes exactly once, through the callback given to
//! [`Client::send`] or the future returned by [`Client::call`].

mod outbound;
mod selection;

pub use outbound::{CallCallback, map_outcome};
pub use selection::select_node;

use crate::error::ClientError;
use microscopic_core::{
    ClientInfo, LoadBalancer, RequestMessage, ResponseCallback, ResponseMessage, ServiceOptions,
    ServiceRegistry, Transport, TransportError, local_ip, now_millis,
};
use microscopic_std::Components;
use outbound::OutboundRequest;
use serde_json::{Map, Value};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

/// Deadline applied to calls that do not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// What a call does while the client is still initializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitMode {
    /// Hold the call and dispatch it once the transport is bound.
    #[default]
    Queue,
    /// Refuse the call with [`ClientError::NotReady`].
    FailFast,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Behavior of calls issued before initialization completes.
    pub mode: InitMode,
    /// Deadline of calls that do not set one.
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: InitMode::Queue,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Set the init mode.
    pub fn with_mode(mut self, mode: InitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the default deadline.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Call parameters.
    pub params: Value,
    /// Method version.
    pub version: Option<String>,
    /// Deadline; the client default applies when unset.
    pub timeout: Option<Duration>,
    /// Call headers.
    pub headers: Map<String, Value>,
}

impl SendOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the call parameters.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Call a specific method version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }
}

struct Binding {
    options: ServiceOptions,
    transport: Arc<dyn Transport>,
    balancer: Option<Arc<dyn LoadBalancer>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InitStatus {
    Pending,
    Ready,
    Failed(String),
}

struct ClientInner {
    id: String,
    service: String,
    registry: Arc<dyn ServiceRegistry>,
    components: Arc<Components>,
    config: ClientConfig,
    binding: RwLock<Option<Arc<Binding>>>,
    queue: Mutex<VecDeque<OutboundRequest>>,
    status: watch::Sender<InitStatus>,
}

/// Calls the methods of one service.
///
/// A cheap handle: clones share the same binding and queue.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client and start loading the service options.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        service: impl Into<String>,
        registry: Arc<dyn ServiceRegistry>,
        components: Arc<Components>,
        config: ClientConfig,
    ) -> Self {
        let (status, _) = watch::channel(InitStatus::Pending);
        let inner = Arc::new(ClientInner {
            id: Uuid::new_v4().to_string(),
            service: service.into(),
            registry,
            components,
            config,
            binding: RwLock::new(None),
            queue: Mutex::new(VecDeque::new()),
            status,
        });

        tokio::spawn(initialize(inner.clone()));
        Self { inner }
    }

    /// The generated client id, sent with every call.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The service this client calls.
    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    /// Check if the transport is bound.
    pub fn is_ready(&self) -> bool {
        *self.inner.status.borrow() == InitStatus::Ready
    }

    /// The options loaded for the service, once ready.
    pub fn options(&self) -> Option<ServiceOptions> {
        self.binding().map(|binding| binding.options.clone())
    }

    /// Wait until initialization completes.
    pub async fn ready(&self) -> Result<(), ClientError> {
        let mut status = self.inner.status.subscribe();
        let status = (*status
            .wait_for(|status| *status != InitStatus::Pending)
            .await
            .map_err(|_| ClientError::Dropped)?)
        .clone();

        match status {
            InitStatus::Ready => Ok(()),
            InitStatus::Failed(reason) => Err(ClientError::Init(reason)),
            InitStatus::Pending => Err(ClientError::NotReady),
        }
    }

    /// Call a method; `callback` receives the outcome exactly once.
    ///
    /// An `Err` return means the call was refused and `callback` will never
    /// run: the client is not initialized in [`InitMode::FailFast`], or its
    /// initialization failed.
    pub fn send<F>(
        &self,
        method: impl Into<String>,
        options: SendOptions,
        callback: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce(Result<ResponseMessage, ClientError>) + Send + 'static,
    {
        let timeout = options.timeout.unwrap_or(self.inner.config.default_timeout);
        let message = self.build_message(method.into(), options, timeout);

        {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            let status = self.inner.status.borrow().clone();
            match status {
                InitStatus::Ready => {}
                InitStatus::Failed(reason) => return Err(ClientError::Init(reason)),
                InitStatus::Pending if self.inner.config.mode == InitMode::FailFast => {
                    return Err(ClientError::NotReady);
                }
                InitStatus::Pending => {
                    let request = OutboundRequest::new(message, Box::new(callback));
                    request.completion.arm(timeout);
                    tracing::debug!(
                        service = %self.inner.service,
                        method = %request.message.method,
                        "call queued until the client is ready"
                    );
                    queue.push_back(request);
                    return Ok(());
                }
            }
        }

        let binding = self.binding().ok_or(ClientError::NotReady)?;
        let request = OutboundRequest::new(message, Box::new(callback));
        request.completion.arm(timeout);
        tokio::spawn(dispatch(self.inner.clone(), binding, request));
        Ok(())
    }

    /// Call a method and await the outcome.
    pub async fn call(
        &self,
        method: impl Into<String>,
        options: SendOptions,
    ) -> Result<ResponseMessage, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(method, options, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.unwrap_or(Err(ClientError::Dropped))
    }

    fn build_message(&self, method: String, options: SendOptions, timeout: Duration) -> RequestMessage {
        let SendOptions {
            params,
            version,
            timeout: _,
            headers,
        } = options;

        let mut message = RequestMessage::new(method)
            .with_params(params)
            .with_timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            .with_sent(now_millis());
        message.id = Some(Uuid::new_v4().to_string());
        message.version = version;
        message.headers = headers;
        message.info.client = Some(ClientInfo {
            id: self.inner.id.clone(),
            ip: Some(local_ip().to_string()),
        });
        message
    }

    fn binding(&self) -> Option<Arc<Binding>> {
        self.inner
            .binding
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("service", &self.inner.service)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

async fn initialize(inner: Arc<ClientInner>) {
    let outcome = load_binding(&inner).await;

    let queued: Vec<OutboundRequest> = {
        let mut queue = inner.queue.lock().unwrap_or_else(|e| e.into_inner());
        match &outcome {
            Ok(binding) => {
                *inner.binding.write().unwrap_or_else(|e| e.into_inner()) = Some(binding.clone());
                inner.status.send_replace(InitStatus::Ready);
            }
            Err(error) => {
                inner.status.send_replace(InitStatus::Failed(error.to_string()));
            }
        }
        queue.drain(..).collect()
    };

    match outcome {
        Ok(binding) => {
            tracing::debug!(
                service = %inner.service,
                transport = %binding.options.transport.kind,
                queued = queued.len(),
                "client ready"
            );
            for request in queued {
                dispatch(inner.clone(), binding.clone(), request).await;
            }
        }
        Err(error) => {
            tracing::warn!(service = %inner.service, %error, "client initialization failed");
            for request in queued {
                request.completion.fail(ClientError::Init(error.to_string()));
            }
        }
    }
}

async fn load_binding(inner: &ClientInner) -> Result<Arc<Binding>, ClientError> {
    let options = inner
        .registry
        .get_service_options(&inner.service)
        .await?
        .unwrap_or_default();
    let transport = inner.components.transport(&options.transport)?;
    let balancer = options
        .loadbalancer
        .as_deref()
        .map(|name| inner.components.balancer(name))
        .transpose()?;

    Ok(Arc::new(Binding {
        options,
        transport,
        balancer,
    }))
}

async fn dispatch(inner: Arc<ClientInner>, binding: Arc<Binding>, request: OutboundRequest) {
    let OutboundRequest {
        message,
        completion,
    } = request;
    if completion.is_fired() {
        tracing::debug!(method = %message.method, "call completed before dispatch");
        return;
    }

    let nodes = match inner.registry.get_service(&inner.service).await {
        Ok(nodes) => nodes,
        Err(error) => return completion.fail(error.into()),
    };
    let node = match select_node(
        &inner.service,
        &nodes,
        binding.balancer.as_deref(),
        binding.transport.options(),
    ) {
        Ok(node) => node,
        Err(error) => return completion.fail(error),
    };

    tracing::debug!(
        service = %inner.service,
        method = %message.method,
        id = ?message.id,
        connection = %node.connection,
        "dispatching call"
    );

    let sink = completion.clone();
    let callback: ResponseCallback =
        Arc::new(move |outcome: Result<ResponseMessage, TransportError>| sink.complete(outcome));
    if let Err(error) = binding
        .transport
        .send(&node.connection, message, callback)
        .await
    {
        tracing::warn!(service = %inner.service, %error, "transport send failed");
        completion.fail(error.into());
    }
}
