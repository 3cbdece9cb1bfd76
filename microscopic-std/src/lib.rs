//! # microscopic-std
//!
//! Standard components for the Microscopic RPC framework.
//!
//! This crate provides:
//! - **Component table**: [`Components`], mapping capability names to factories
//! - **Transports**: [`MemoryTransport`] over a shared [`MemoryNetwork`]
//! - **Registries**: [`MemoryRegistry`]
//! - **Balancers**: [`RoundRobin`], [`RandomBalancer`]
//! - **Testing doubles**: [`testing`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core traits
pub use microscopic_core;

// Modules
pub mod balancers;
pub mod components;
pub mod registry;
pub mod testing;
pub mod transports;

pub use balancers::{RandomBalancer, RoundRobin};
pub use components::{BalancerFactory, ComponentError, Components, TransportFactory};
pub use registry::MemoryRegistry;
pub use transports::{MemoryNetwork, MemoryTransport};

#[cfg(feature = "inventory")]
pub use components::{ComponentRegistration, Factory};

#[cfg(feature = "inventory")]
pub use inventory;
