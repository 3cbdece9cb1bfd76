//! Service and transport options.
//!
//! Options are plain `serde` structs so a service can publish them to the
//! registry and a client can load them back to pick the same transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transport type used when a service does not name one.
pub const DEFAULT_TRANSPORT: &str = "memory";

/// Options handed to a transport factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Registered transport type (e.g. `"memory"`).
    #[serde(rename = "type", default = "default_transport")]
    pub kind: String,
    /// `Some(false)` disables load balancing for clients of this transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancing: Option<bool>,
    /// Worker configuration copied from the service options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<Value>,
    /// Transport-specific settings.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_transport() -> String {
    DEFAULT_TRANSPORT.to_string()
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSPORT)
    }
}

impl TransportOptions {
    /// Create options for the given transport type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            loadbalancing: None,
            worker: None,
            extra: Map::new(),
        }
    }

    /// Enable or disable load balancing for clients.
    pub fn with_loadbalancing(mut self, enabled: bool) -> Self {
        self.loadbalancing = Some(enabled);
        self
    }

    /// Set a transport-specific setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Check whether clients may balance across nodes of this transport.
    pub fn allows_loadbalancing(&self) -> bool {
        self.loadbalancing != Some(false)
    }
}

/// Options of a service, merged over the defaults at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportOptions,
    /// Registered balancer type clients should use (e.g. `"round-robin"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancer: Option<String>,
    /// Worker configuration, forwarded to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<Value>,
    /// Application-specific settings.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServiceOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given transport type.
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Ask clients to balance with the given balancer type.
    pub fn with_loadbalancer(mut self, balancer: impl Into<String>) -> Self {
        self.loadbalancer = Some(balancer.into());
        self
    }

    /// Set the worker configuration.
    pub fn with_worker(mut self, worker: Value) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Merge caller-supplied JSON options over the defaults.
    ///
    /// Top-level keys in `overrides` replace the default values; keys that are
    /// absent keep their defaults. `null` and non-object input yield the
    /// defaults.
    pub fn from_json(overrides: Value) -> Result<Self, serde_json::Error> {
        let mut merged = serde_json::to_value(Self::default())?;
        if let (Value::Object(base), Value::Object(overrides)) = (&mut merged, overrides) {
            for (key, value) in overrides {
                base.insert(key, value);
            }
        }
        Ok(serde_json::from_value::<Self>(merged)?.normalized())
    }

    /// Apply the invariants every service relies on: a non-empty transport
    /// type, and the worker configuration copied into the transport.
    pub fn normalized(mut self) -> Self {
        if self.transport.kind.trim().is_empty() {
            self.transport.kind = default_transport();
        }
        if self.transport.worker.is_none() {
            self.transport.worker = self.worker.clone();
        }
        if matches!(self.loadbalancer.as_deref(), Some(name) if name.trim().is_empty()) {
            self.loadbalancer = None;
        }
        self
    }
}
