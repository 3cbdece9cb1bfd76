//! # microscopic
//!
//! A lightweight RPC microservice framework: named, versioned methods served
//! over a pluggable transport, discovered through a registry, and called by
//! clients that correlate every request with exactly one outcome.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use microscopic::prelude::*;
//! use serde_json::json;
//!
//! let framework = Microscopic::in_memory();
//!
//! let service = framework.create_service("calc", ServiceOptions::new())?;
//! service.add_method(MethodDefinition::new("sum").handle(|request: Request| async move {
//!     let (a, b): (i64, i64) = request.parse_params()?;
//!     Ok(json!(a + b))
//! }))?;
//! service.start().await?;
//!
//! let client = framework.create_client("calc");
//! let response = client.call("sum", SendOptions::new().with_params(json!([1, 2]))).await?;
//! assert_eq!(response.result, Some(json!(3)));
//! ```
//!
//! ## Building Blocks
//!
//! - [`Service`]: methods, lifecycle extensions and the start/stop pipelines
//! - [`Request`] and [`Response`]: one inbound call and its single outcome
//! - [`Client`]: outbound calls with timeouts and node selection
//! - [`Microscopic`]: creates services and clients over a shared registry
//!
//! Pipelines, wire envelopes and collaborator traits live in
//! [`microscopic_core`]; the built-in transport, registry and balancers live in
//! [`microscopic_std`].

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod extension;
pub mod framework;
mod lifecycle;
pub mod method;
pub mod request;
pub mod response;
pub mod service;

pub use client::{Client, ClientConfig, DEFAULT_TIMEOUT, InitMode, SendOptions};
pub use error::{ClientError, LifecycleError, MethodError, ResponseError, ServiceError};
pub use extension::{Event, Extension, LoggingExtension, RequestEvent, ServiceEvent};
pub use framework::Microscopic;
pub use method::{Handler, Method, MethodDefinition};
pub use request::Request;
pub use response::{Reply, Response};
pub use service::{HEARTBEAT_INTERVAL, Plugin, Service};

pub use microscopic_core::{
    BoxError, Connection, ErrorPayload, Flow, LoadBalancer, Node, RegistryError, RequestMessage,
    ResponseMessage, ServiceOptions, ServiceRegistry, Status, Step, StepResult, Transport,
    TransportError, TransportOptions,
};
pub use microscopic_std::{
    ComponentError, Components, MemoryNetwork, MemoryRegistry, MemoryTransport, RandomBalancer,
    RoundRobin,
};

/// Test doubles for services and clients.
pub mod testing {
    pub use microscopic_std::testing::{
        Behavior, CountingStep, RecordingTransport, StaticRegistry,
    };
}

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        BoxError, Client, ClientConfig, ClientError, Extension, Flow, InitMode,
        LoggingExtension, MethodDefinition, Microscopic, Reply, Request, RequestEvent,
        ResponseMessage, SendOptions, Service, ServiceError, ServiceEvent, ServiceOptions, Status,
        TransportOptions,
    };
}

#[cfg(feature = "inventory")]
pub use inventory;
