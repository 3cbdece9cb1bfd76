//! Built-in load balancers.

pub mod random;
pub mod round_robin;

pub use random::RandomBalancer;
pub use round_robin::RoundRobin;
