//! Connection selection.

use crate::error::ClientError;
use microscopic_core::{LoadBalancer, Node, TransportOptions};

/// Pick the node a single call goes to.
///
/// The first node is used unless a balancer is attached and the transport
/// does not disable load balancing (`loadbalancing: false`); then the
/// balancer decides.
pub fn select_node(
    service: &str,
    nodes: &[Node],
    balancer: Option<&dyn LoadBalancer>,
    transport: &TransportOptions,
) -> Result<Node, ClientError> {
    let first = nodes
        .first()
        .ok_or_else(|| ClientError::NoNodes(service.to_string()))?;

    match balancer {
        Some(balancer) if transport.allows_loadbalancing() => {
            balancer.balance(nodes).ok_or(ClientError::NoNodeSelected)
        }
        _ => Ok(first.clone()),
    }
}
