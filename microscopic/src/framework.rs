//! The framework entry point.

use crate::{
    client::{Client, ClientConfig},
    error::ServiceError,
    service::Service,
};
use microscopic_core::{ServiceOptions, ServiceRegistry};
use microscopic_std::{Components, MemoryRegistry};
use std::sync::Arc;

/// Creates services and clients that share one registry and one component
/// table.
///
/// # Example
///
/// ```rust,ignore
/// let framework = Microscopic::in_memory();
///
/// let service = framework.create_service("calc", ServiceOptions::new())?;
/// service.add_method(MethodDefinition::new("sum").handle(sum))?;
/// service.start().await?;
///
/// let client = framework.create_client("calc");
/// let response = client.call("sum", SendOptions::new().with_params(json!([1, 2]))).await?;
/// ```
#[derive(Clone)]
pub struct Microscopic {
    registry: Arc<dyn ServiceRegistry>,
    components: Arc<Components>,
}

impl Microscopic {
    /// Create a framework over the given registry with the built-in components.
    pub fn new(registry: impl ServiceRegistry + 'static) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    /// Create a framework over a registry shared with other code.
    pub fn from_shared(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            registry,
            components: Arc::new(Components::with_builtins()),
        }
    }

    /// Create a framework backed by an in-process [`MemoryRegistry`].
    pub fn in_memory() -> Self {
        Self::new(MemoryRegistry::new())
    }

    /// Replace the component table.
    pub fn with_components(mut self, components: Components) -> Self {
        self.components = Arc::new(components);
        self
    }

    /// The component table; register custom transports and balancers here.
    pub fn components(&self) -> &Components {
        &self.components
    }

    /// The shared registry.
    pub fn registry(&self) -> Arc<dyn ServiceRegistry> {
        self.registry.clone()
    }

    /// Create a service. It is not reachable until [`Service::start`].
    pub fn create_service(
        &self,
        name: impl Into<String>,
        options: ServiceOptions,
    ) -> Result<Service, ServiceError> {
        Service::new(
            name,
            options,
            self.registry.clone(),
            self.components.clone(),
        )
    }

    /// Create a client for the named service with the default configuration.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_client(&self, service: impl Into<String>) -> Client {
        self.create_client_with(service, ClientConfig::default())
    }

    /// Create a client for the named service.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_client_with(&self, service: impl Into<String>, config: ClientConfig) -> Client {
        Client::new(
            service,
            self.registry.clone(),
            self.components.clone(),
            config,
        )
    }
}

impl std::fmt::Debug for Microscopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microscopic")
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}
