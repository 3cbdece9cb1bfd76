use microscopic_core::{LoadBalancer, Node};
use rand::Rng;

/// Picks a node uniformly at random.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalancer;

impl RandomBalancer {
    /// Type name under which this balancer is registered.
    pub const TYPE: &'static str = "random";
}

impl LoadBalancer for RandomBalancer {
    fn balance(&self, nodes: &[Node]) -> Option<Node> {
        if nodes.is_empty() {
            return None;
        }

        let index = rand::rng().random_range(0..nodes.len());
        nodes.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_picks_member() {
        let nodes = vec![Node::new("a"), Node::new("b"), Node::new("c")];
        for _ in 0..32 {
            let picked = RandomBalancer.balance(&nodes).unwrap();
            assert!(nodes.contains(&picked));
        }
    }

    #[test]
    fn test_random_empty() {
        assert_eq!(RandomBalancer.balance(&[]), None);
    }
}
