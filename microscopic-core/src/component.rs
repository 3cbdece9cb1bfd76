//! Collaborator boundaries.
//!
//! The framework consumes these capabilities without implementing their
//! internals: a [`Transport`] moves requests and responses, a
//! [`ServiceRegistry`] knows which nodes serve a name, and a
//! [`LoadBalancer`] picks one node for a single call.

use crate::{
    error::{RegistryError, TransportError},
    message::{Envelope, RequestMessage, ResponseMessage, ServiceInfo},
    options::{ServiceOptions, TransportOptions},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Opaque connection handle understood by one transport.
pub type Connection = Value;

/// A service instance as reported by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Instance id, when the registry tracks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Connection handle handed to [`Transport::send`].
    pub connection: Connection,
}

impl Node {
    /// Create a node from a connection handle.
    pub fn new(connection: impl Into<Connection>) -> Self {
        Self {
            id: None,
            connection: connection.into(),
        }
    }

    /// Attach an instance id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Delivers the finished response for one inbound request back to its caller.
pub type Responder = Box<dyn FnOnce(ResponseMessage) + Send>;

/// Receives the outcome of one outbound request.
///
/// Transports may invoke it late, more than once, or never; callers guard
/// against all three.
pub type ResponseCallback = Arc<dyn Fn(Result<ResponseMessage, TransportError>) + Send + Sync>;

/// The receiving side of a transport: whatever handles inbound envelopes.
pub trait Inbound: Send + Sync {
    /// Handle one inbound envelope. `None` is ignored.
    fn on_message(&self, message: Option<Envelope>, respond: Responder);
}

/// Moves requests to services and responses back to callers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The effective options of this transport instance.
    fn options(&self) -> &TransportOptions;

    /// Start accepting envelopes for a service.
    ///
    /// Returns the connection info clients use to reach it.
    async fn listen(
        &self,
        service: ServiceInfo,
        inbound: Arc<dyn Inbound>,
    ) -> Result<Connection, TransportError>;

    /// Send a request to the given connection.
    ///
    /// The outcome is reported through `callback`; an `Err` return means the
    /// request could not be dispatched at all.
    async fn send(
        &self,
        connection: &Connection,
        request: RequestMessage,
        callback: ResponseCallback,
    ) -> Result<(), TransportError>;

    /// Stop listening and release resources.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Registration and discovery of service instances.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Register an instance and return its id.
    async fn register(
        &self,
        name: &str,
        connection: &Connection,
        options: &ServiceOptions,
    ) -> Result<String, RegistryError>;

    /// Renew the registration of an instance.
    async fn renew(&self, name: &str, id: &str) -> Result<(), RegistryError>;

    /// Remove an instance.
    async fn unregister(&self, name: &str, id: &str) -> Result<(), RegistryError> {
        let _ = (name, id);
        Ok(())
    }

    /// List the nodes currently serving a name.
    async fn get_service(&self, name: &str) -> Result<Vec<Node>, RegistryError>;

    /// Load the options a service published at registration.
    async fn get_service_options(&self, name: &str)
    -> Result<Option<ServiceOptions>, RegistryError>;
}

/// Selects one node for a single outbound call.
pub trait LoadBalancer: Send + Sync {
    /// Pick a node, or `None` when the list is empty.
    fn balance(&self, nodes: &[Node]) -> Option<Node>;
}

impl<F> LoadBalancer for F
where
    F: Fn(&[Node]) -> Option<Node> + Send + Sync,
{
    fn balance(&self, nodes: &[Node]) -> Option<Node> {
        (self)(nodes)
    }
}
