use microscopic_core::{LoadBalancer, Node};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin load balancer.
///
/// Keeps a cursor across calls and picks the next node of whatever list it
/// is given, wrapping around at the end.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Type name under which this balancer is registered.
    pub const TYPE: &'static str = "round-robin";

    /// Create a new round-robin balancer starting at the first node.
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobin {
    fn balance(&self, nodes: &[Node]) -> Option<Node> {
        if nodes.is_empty() {
            return None;
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
        nodes.get(index).cloned()
    }
}
