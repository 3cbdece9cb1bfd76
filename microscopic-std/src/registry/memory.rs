//! In-process service registry.

use async_trait::async_trait;
use microscopic_core::{Connection, Node, RegistryError, ServiceOptions, ServiceRegistry};
use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};
use tokio::time::Instant;
use uuid::Uuid;

struct Instance {
    id: String,
    connection: Connection,
    renewed: Instant,
}

#[derive(Default)]
struct Entry {
    options: Option<ServiceOptions>,
    instances: Vec<Instance>,
}

/// A registry that keeps every registration in memory.
///
/// With a TTL, instances that were not renewed within it are left out of
/// [`get_service`](ServiceRegistry::get_service) and dropped on the next
/// `register` or `renew` of the same service. Without one, instances live
/// until they are unregistered.
#[derive(Default)]
pub struct MemoryRegistry {
    services: RwLock<HashMap<String, Entry>>,
    ttl: Option<Duration>,
}

impl MemoryRegistry {
    /// Create a registry without expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that expires instances not renewed within `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Get the number of live instances of a service.
    pub fn instance_count(&self, name: &str) -> usize {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        services
            .get(name)
            .map(|entry| entry.instances.iter().filter(|i| self.is_live(i)).count())
            .unwrap_or(0)
    }

    fn purge(&self, name: &str, entry: &mut Entry) {
        let before = entry.instances.len();
        entry.instances.retain(|i| self.is_live(i));
        let dropped = before - entry.instances.len();
        if dropped > 0 {
            tracing::debug!(service = name, dropped, "purged expired instances");
        }
    }

    fn is_live(&self, instance: &Instance) -> bool {
        match self.ttl {
            Some(ttl) => instance.renewed.elapsed() < ttl,
            None => true,
        }
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn register(
        &self,
        name: &str,
        connection: &Connection,
        options: &ServiceOptions,
    ) -> Result<String, RegistryError> {
        let id = Uuid::new_v4().to_string();
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let entry = services.entry(name.to_string()).or_default();
        self.purge(name, entry);
        entry.options = Some(options.clone());
        entry.instances.push(Instance {
            id: id.clone(),
            connection: connection.clone(),
            renewed: Instant::now(),
        });

        tracing::debug!(service = name, %id, "registered instance");
        Ok(id)
    }

    async fn renew(&self, name: &str, id: &str) -> Result<(), RegistryError> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let unknown = || RegistryError::UnknownInstance {
            service: name.to_string(),
            id: id.to_string(),
        };
        let entry = services.get_mut(name).ok_or_else(unknown)?;
        let instance = entry
            .instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(unknown)?;
        instance.renewed = Instant::now();
        self.purge(name, entry);
        Ok(())
    }

    async fn unregister(&self, name: &str, id: &str) -> Result<(), RegistryError> {
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        let entry = services
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let before = entry.instances.len();
        entry.instances.retain(|i| i.id != id);
        if entry.instances.len() == before {
            return Err(RegistryError::UnknownInstance {
                service: name.to_string(),
                id: id.to_string(),
            });
        }

        tracing::debug!(service = name, %id, "unregistered instance");
        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<Vec<Node>, RegistryError> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        let entry = services
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        Ok(entry
            .instances
            .iter()
            .filter(|i| self.is_live(i))
            .map(|i| Node::new(i.connection.clone()).with_id(i.id.clone()))
            .collect())
    }

    async fn get_service_options(
        &self,
        name: &str,
    ) -> Result<Option<ServiceOptions>, RegistryError> {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        Ok(services.get(name).and_then(|entry| entry.options.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_discover() {
        let registry = MemoryRegistry::new();
        let options = ServiceOptions::new().with_loadbalancer("round-robin");

        let first = registry
            .register("users", &json!({ "address": "a" }), &options)
            .await
            .unwrap();
        let second = registry
            .register("users", &json!({ "address": "b" }), &options)
            .await
            .unwrap();
        assert_ne!(first, second);

        let nodes = registry.get_service("users").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id.as_deref(), Some(first.as_str()));
        assert_eq!(nodes[1].connection, json!({ "address": "b" }));

        let loaded = registry.get_service_options("users").await.unwrap();
        assert_eq!(loaded, Some(options));
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.get_service("ghost").await,
            Err(RegistryError::NotFound(_))
        ));
        assert!(registry.get_service_options("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = MemoryRegistry::new();
        let id = registry
            .register("users", &json!("a"), &ServiceOptions::new())
            .await
            .unwrap();

        registry.unregister("users", &id).await.unwrap();
        assert!(registry.get_service("users").await.unwrap().is_empty());
        assert!(matches!(
            registry.unregister("users", &id).await,
            Err(RegistryError::UnknownInstance { .. })
        ));
    }

    #[tokio::test]
    async fn test_renew_unknown_instance() {
        let registry = MemoryRegistry::new();
        registry
            .register("users", &json!("a"), &ServiceOptions::new())
            .await
            .unwrap();
        assert!(matches!(
            registry.renew("users", "nope").await,
            Err(RegistryError::UnknownInstance { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_and_renewal() {
        let registry = MemoryRegistry::with_ttl(Duration::from_secs(10));
        let stale = registry
            .register("users", &json!("a"), &ServiceOptions::new())
            .await
            .unwrap();
        let fresh = registry
            .register("users", &json!("b"), &ServiceOptions::new())
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        registry.renew("users", &fresh).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let nodes = registry.get_service("users").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id.as_deref(), Some(fresh.as_str()));
        assert_eq!(registry.instance_count("users"), 1);

        // an expired instance can still be renewed back to life
        registry.renew("users", &stale).await.unwrap();
        assert_eq!(registry.instance_count("users"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_instances_are_purged() {
        let registry = MemoryRegistry::with_ttl(Duration::from_secs(10));
        for address in ["a", "b"] {
            registry
                .register("users", &json!(address), &ServiceOptions::new())
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        let live = registry
            .register("users", &json!("c"), &ServiceOptions::new())
            .await
            .unwrap();
        let stored = |registry: &MemoryRegistry| {
            registry.services.read().unwrap()["users"].instances.len()
        };
        assert_eq!(stored(&registry), 1);

        let other = registry
            .register("users", &json!("d"), &ServiceOptions::new())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        registry.renew("users", &live).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        registry.renew("users", &live).await.unwrap();

        assert_eq!(stored(&registry), 1);
        assert!(matches!(
            registry.renew("users", &other).await,
            Err(RegistryError::UnknownInstance { .. })
        ));
    }
}
