//! Built-in transports.

pub mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};
