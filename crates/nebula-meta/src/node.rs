//! Fleet member identity and state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a cluster member: `(host, port)`.
///
/// This is the sole cross-component reference to a node; nothing holds a
/// node object owned by another component. Ordering is lexicographic on
/// `(host, port)`, which is also the assignment tie-breaker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Host name or address.
    pub host: String,
    /// RPC port.
    pub port: u16,
}

impl NodeId {
    /// Creates a new node id.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role a member plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Coordinator: compiles queries, runs reconciliation.
    Server,
    /// Worker: holds blocks, executes plan fragments.
    Node,
}

/// A cluster member as the coordinator sees it.
///
/// Created from config; `size` is reset from block inventory every tick
/// rather than accumulated, and `active` reflects the health policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Member identity.
    pub id: NodeId,
    /// Member role.
    pub role: NodeRole,
    /// Whether the member currently answers RPCs. Parses as true; the
    /// reconciler's health policy maintains it from then on via
    /// [`crate::ClusterInfo::set_active`].
    pub active: bool,
    /// Estimated resident bytes, rebuilt from inventory each tick.
    pub size: u64,
}

impl Node {
    /// Creates an active worker node.
    pub fn worker(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: NodeId::new(host, port),
            role: NodeRole::Node,
            active: true,
            size: 0,
        }
    }

    /// Returns true if this member holds data and accepts tasks.
    #[inline]
    #[must_use]
    pub fn is_worker(&self) -> bool {
        matches!(self.role, NodeRole::Node)
    }

    /// Returns true if this member currently answers RPCs.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering_is_lexicographic() {
        let a = NodeId::new("alpha", 9000);
        let b = NodeId::new("alpha", 9001);
        let c = NodeId::new("beta", 8000);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId::new("10.0.0.2", 9199).to_string(), "10.0.0.2:9199");
    }
}
