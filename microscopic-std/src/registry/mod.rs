//! Built-in service registries.

pub mod memory;

pub use memory::MemoryRegistry;
