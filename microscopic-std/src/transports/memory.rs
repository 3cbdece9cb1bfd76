//! In-process transport.
//!
//! [`MemoryTransport`] hands envelopes straight to the listening service's
//! [`Inbound`] without touching a socket. All transports built from the same
//! [`MemoryNetwork`] can reach each other, which makes it the default for
//! single-process deployments and tests.

use async_trait::async_trait;
use microscopic_core::{
    Connection, Envelope, Inbound, RequestMessage, ResponseCallback, ServiceInfo, Transport,
    TransportError, TransportOptions,
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// The shared address space of all memory transports.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    listeners: RwLock<HashMap<String, Arc<dyn Inbound>>>,
    next_port: AtomicU64,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an inbound handler to an address.
    ///
    /// Without an explicit address one is generated from `name`.
    pub fn bind(
        &self,
        address: Option<String>,
        name: &str,
        inbound: Arc<dyn Inbound>,
    ) -> Result<String, TransportError> {
        let address = address.unwrap_or_else(|| {
            let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
            format!("memory://{name}/{port}")
        });

        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if listeners.contains_key(&address) {
            return Err(TransportError::Listen(format!("address in use: {address}")));
        }
        listeners.insert(address.clone(), inbound);
        Ok(address)
    }

    /// Remove the handler bound to an address.
    pub fn unbind(&self, address: &str) -> bool {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address)
            .is_some()
    }

    /// Look up the handler bound to an address.
    pub fn route(&self, address: &str) -> Option<Arc<dyn Inbound>> {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
    }

    /// Get the number of bound addresses.
    pub fn len(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Check if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A transport that delivers envelopes within the process.
///
/// Connection handles are `{"address": "memory://..."}` objects (a bare
/// address string is accepted too). A fixed address can be requested with
/// the `address` transport setting.
pub struct MemoryTransport {
    options: TransportOptions,
    network: MemoryNetwork,
    bound: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Type name under which this transport is registered.
    pub const TYPE: &'static str = "memory";

    /// Create a transport on the given network.
    pub fn new(options: TransportOptions, network: MemoryNetwork) -> Self {
        Self {
            options,
            network,
            bound: Mutex::new(Vec::new()),
        }
    }

    fn address_of(connection: &Connection) -> Result<&str, TransportError> {
        match connection {
            Value::String(address) => Ok(address),
            Value::Object(fields) => fields
                .get("address")
                .and_then(Value::as_str)
                .ok_or_else(|| TransportError::InvalidConnection(connection.to_string())),
            other => Err(TransportError::InvalidConnection(other.to_string())),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn options(&self) -> &TransportOptions {
        &self.options
    }

    async fn listen(
        &self,
        service: ServiceInfo,
        inbound: Arc<dyn Inbound>,
    ) -> Result<Connection, TransportError> {
        let requested = self
            .options
            .extra
            .get("address")
            .and_then(Value::as_str)
            .map(str::to_string);

        let address = self.network.bind(requested, &service.name, inbound)?;
        self.bound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(address.clone());

        tracing::debug!(service = %service.name, %address, "memory transport listening");
        Ok(json!({ "address": address }))
    }

    async fn send(
        &self,
        connection: &Connection,
        request: RequestMessage,
        callback: ResponseCallback,
    ) -> Result<(), TransportError> {
        let address = Self::address_of(connection)?;
        let inbound = self
            .network
            .route(address)
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;

        inbound.on_message(
            Some(Envelope::new(request)),
            Box::new(move |response| callback(Ok(response))),
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let bound = std::mem::take(&mut *self.bound.lock().unwrap_or_else(|e| e.into_inner()));
        for address in bound {
            self.network.unbind(&address);
        }
        Ok(())
    }
}
