//! Error types for the collaborator boundaries.
//!
//! - [`BoxError`] - The error value carried by pipeline steps
//! - [`TransportError`] - Errors raised by a [`Transport`](crate::Transport)
//! - [`RegistryError`] - Errors raised by a [`ServiceRegistry`](crate::ServiceRegistry)

use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while moving requests and responses.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Nothing is listening at the given connection.
    #[error("no listener reachable at {0}")]
    Unreachable(String),

    /// The connection handle could not be interpreted by this transport.
    #[error("invalid connection handle: {0}")]
    InvalidConnection(String),

    /// The transport failed to start listening.
    #[error("listen failed: {0}")]
    Listen(String),

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,

    /// A custom transport error.
    #[error(transparent)]
    Custom(BoxError),
}

/// Errors that can occur while talking to the service registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No service with the given name is registered.
    #[error("service not found: {0}")]
    NotFound(String),

    /// The instance id is not registered under the service.
    #[error("unknown instance {id} of service {service}")]
    UnknownInstance {
        /// Service name.
        service: String,
        /// Instance id.
        id: String,
    },

    /// A custom registry backend error.
    #[error(transparent)]
    Backend(BoxError),
}

impl From<BoxError> for TransportError {
    fn from(err: BoxError) -> Self {
        TransportError::Custom(err)
    }
}

impl From<BoxError> for RegistryError {
    fn from(err: BoxError) -> Self {
        RegistryError::Backend(err)
    }
}
