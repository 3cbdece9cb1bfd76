//! # microscopic-core
//!
//! Core traits and wire types for the Microscopic RPC framework.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! transports, registries and balancers that plug into a service without
//! needing the full `microscopic` facade.
//!
//! # Building Blocks
//!
//! ## Pipeline ([`Pipeline`])
//!
//! The sequential step executor everything else is built on. Steps run one at
//! a time in insertion order; the first error (or [`Flow::Stop`]) ends the run
//! and the final hook fires exactly once.
//!
//! - **Steps**: [`Step`] for static dispatch, [`DynStep`] for lists of boxed steps
//! - **Drivers**: a [`Driver`] decides how each step is invoked and whether the
//!   pipeline may continue. [`Sequential`] simply runs every step.
//!
//! ## Wire Envelopes ([`RequestMessage`], [`ResponseMessage`])
//!
//! The serializable shapes exchanged between a client and a service.
//!
//! ## Collaborators ([`Transport`], [`ServiceRegistry`], [`LoadBalancer`])
//!
//! The boundaries the framework consumes but does not implement: moving bytes,
//! discovering nodes, and picking one node out of many.
//!
//! # Error Types
//!
//! - [`BoxError`] - The error value carried through pipelines
//! - [`TransportError`] - Transport failures
//! - [`RegistryError`] - Service registry failures

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod clock;
mod component;
mod error;
mod message;
mod options;
mod pipeline;

// Re-exports
pub use clock::{local_ip, now_millis};
pub use component::{
    Connection, Inbound, LoadBalancer, Node, Responder, ResponseCallback, ServiceRegistry,
    Transport,
};
pub use error::{BoxError, RegistryError, TransportError};
pub use message::{
    ClientInfo, Envelope, ErrorPayload, RequestInfo, RequestMessage, ResponseMessage, ServiceInfo,
    Status,
};
pub use options::{DEFAULT_TRANSPORT, ServiceOptions, TransportOptions};
pub use pipeline::{
    Driver, DynStep, Flow, Pipeline, Sequential, SharedStep, StepResult, Step, propagate,
};
