//! Capability lookup table.
//!
//! Services and clients name their transport and balancer by type string
//! (`"memory"`, `"round-robin"`). [`Components`] resolves those names to
//! factories registered ahead of time; nothing is ever loaded by path.
//!
//! Factories can be registered three ways:
//!
//! - **Built-ins**: [`Components::with_builtins`] registers `memory`,
//!   `round-robin` and `random`.
//! - **Runtime**: [`Components::register_transport`] /
//!   [`Components::register_balancer`].
//! - **Compile time** (feature `inventory`): submit a [`ComponentRegistration`]
//!   with `inventory::submit!` and it is picked up by `with_builtins`.

use crate::{
    balancers::{RandomBalancer, RoundRobin},
    transports::{MemoryNetwork, MemoryTransport},
};
use microscopic_core::{BoxError, LoadBalancer, Transport, TransportOptions};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use thiserror::Error;

/// Builds a transport from its options.
pub type TransportFactory =
    Arc<dyn Fn(TransportOptions) -> Result<Arc<dyn Transport>, ComponentError> + Send + Sync>;

/// Builds a load balancer.
pub type BalancerFactory = Arc<dyn Fn() -> Arc<dyn LoadBalancer> + Send + Sync>;

/// Errors that can occur while resolving a component.
#[derive(Error, Debug)]
pub enum ComponentError {
    /// No transport factory is registered under the name.
    #[error("unknown transport type: {0}")]
    UnknownTransport(String),

    /// No balancer factory is registered under the name.
    #[error("unknown load balancer type: {0}")]
    UnknownBalancer(String),

    /// The factory failed to build the component.
    #[error("failed to construct component {name}")]
    Construction {
        /// Component type.
        name: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}

/// Registration entry for a component factory.
///
/// This struct is submitted to `inventory` for automatic collection.
#[cfg(feature = "inventory")]
pub struct ComponentRegistration {
    /// The type name services and clients refer to.
    pub name: &'static str,
    /// The factory.
    pub factory: Factory,
}

/// A compile-time factory.
#[cfg(feature = "inventory")]
pub enum Factory {
    /// Builds a transport.
    Transport(fn(TransportOptions) -> Result<Arc<dyn Transport>, ComponentError>),
    /// Builds a load balancer.
    Balancer(fn() -> Arc<dyn LoadBalancer>),
}

#[cfg(feature = "inventory")]
inventory::collect!(ComponentRegistration);

/// Name-to-factory table for transports and balancers.
pub struct Components {
    transports: RwLock<HashMap<String, TransportFactory>>,
    balancers: RwLock<HashMap<String, BalancerFactory>>,
    network: MemoryNetwork,
}

impl Components {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            transports: RwLock::new(HashMap::new()),
            balancers: RwLock::new(HashMap::new()),
            network: MemoryNetwork::new(),
        }
    }

    /// Create a table with the built-in components registered.
    ///
    /// The `memory` transport of this table routes over [`Components::network`].
    pub fn with_builtins() -> Self {
        let components = Self::new();

        let network = components.network.clone();
        components.register_transport(MemoryTransport::TYPE, move |options| {
            Ok(Arc::new(MemoryTransport::new(options, network.clone())) as Arc<dyn Transport>)
        });
        components.register_balancer(RoundRobin::TYPE, || Arc::new(RoundRobin::new()));
        components.register_balancer(RandomBalancer::TYPE, || Arc::new(RandomBalancer));

        #[cfg(feature = "inventory")]
        for registration in inventory::iter::<ComponentRegistration>() {
            match registration.factory {
                Factory::Transport(build) => {
                    components.register_transport(registration.name, build);
                }
                Factory::Balancer(build) => {
                    components.register_balancer(registration.name, build);
                }
            }
        }

        components
    }

    /// The in-process network used by the built-in `memory` transport.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Register (or replace) a transport factory.
    pub fn register_transport<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(TransportOptions) -> Result<Arc<dyn Transport>, ComponentError> + Send + Sync + 'static,
    {
        let mut transports = self.transports.write().unwrap_or_else(|e| e.into_inner());
        transports.insert(name.into(), Arc::new(factory));
    }

    /// Register (or replace) a balancer factory.
    pub fn register_balancer<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn LoadBalancer> + Send + Sync + 'static,
    {
        let mut balancers = self.balancers.write().unwrap_or_else(|e| e.into_inner());
        balancers.insert(name.into(), Arc::new(factory));
    }

    /// Check whether a transport type is registered.
    pub fn has_transport(&self, name: &str) -> bool {
        self.transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Check whether a balancer type is registered.
    pub fn has_balancer(&self, name: &str) -> bool {
        self.balancers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Build the transport named by `options.kind`.
    pub fn transport(&self, options: &TransportOptions) -> Result<Arc<dyn Transport>, ComponentError> {
        let factory = self
            .transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&options.kind)
            .cloned()
            .ok_or_else(|| ComponentError::UnknownTransport(options.kind.clone()))?;

        factory(options.clone())
    }

    /// Build the balancer registered under `name`.
    pub fn balancer(&self, name: &str) -> Result<Arc<dyn LoadBalancer>, ComponentError> {
        let factory = self
            .balancers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ComponentError::UnknownBalancer(name.to_string()))?;

        Ok(factory())
    }
}

impl Default for Components {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut transports: Vec<String> = self
            .transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        let mut balancers: Vec<String> = self
            .balancers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        transports.sort();
        balancers.sort();

        f.debug_struct("Components")
            .field("transports", &transports)
            .field("balancers", &balancers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use microscopic_core::Node;

    #[test]
    fn test_builtins_are_registered() {
        let components = Components::with_builtins();
        assert!(components.has_transport("memory"));
        assert!(components.has_balancer("round-robin"));
        assert!(components.has_balancer("random"));
    }

    #[test]
    fn test_unknown_transport_fails() {
        let components = Components::with_builtins();
        let result = components.transport(&TransportOptions::new("carrier-pigeon"));
        assert!(matches!(result, Err(ComponentError::UnknownTransport(name)) if name == "carrier-pigeon"));
    }

    #[test]
    fn test_unknown_balancer_fails() {
        let components = Components::new();
        assert!(matches!(
            components.balancer("round-robin"),
            Err(ComponentError::UnknownBalancer(_))
        ));
    }

    #[test]
    fn test_runtime_registration() {
        let components = Components::new();
        let recording = RecordingTransport::new();
        let handle = recording.clone();
        components.register_transport("test-transport", move |_| {
            Ok(Arc::new(handle.clone()) as Arc<dyn Transport>)
        });

        let transport = components
            .transport(&TransportOptions::new("test-transport"))
            .unwrap();
        assert_eq!(transport.options().kind, RecordingTransport::TYPE);
    }

    #[test]
    fn test_closure_balancer_registration() {
        let components = Components::new();
        components.register_balancer("last", || {
            Arc::new(|nodes: &[Node]| nodes.last().cloned()) as Arc<dyn LoadBalancer>
        });

        let balancer = components.balancer("last").unwrap();
        let nodes = vec![Node::new("1"), Node::new("2")];
        assert_eq!(balancer.balance(&nodes), Some(Node::new("2")));
    }

    #[test]
    fn test_factory_receives_options() {
        let components = Components::with_builtins();
        let options = TransportOptions::new("memory").with_loadbalancing(false);
        let transport = components.transport(&options).unwrap();
        assert!(!transport.options().allows_loadbalancing());
    }
}
