//! Client-side error types.

use thiserror::Error;

use nebula_meta::NodeId;

/// Result type for node client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors talking to a worker node.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection could be established; no RPC ran on the node.
    #[error("connect failed to {node}: {reason}")]
    Connect {
        /// Target node.
        node: NodeId,
        /// Transport detail.
        reason: String,
    },

    /// The RPC ran and the node (or the transport mid-call) failed it.
    #[error("rpc to {node} failed: {status}")]
    Rpc {
        /// Target node.
        node: NodeId,
        /// gRPC status.
        status: tonic::Status,
    },

    /// The reply arrived but could not be decoded.
    #[error("bad reply from {node}: {reason}")]
    Decode {
        /// Target node.
        node: NodeId,
        /// Decode detail.
        reason: String,
    },
}

impl ClientError {
    /// Returns true if an RPC was actually established on the node.
    ///
    /// The dispatcher uses this to decide whether a failure advances the
    /// per-spec consecutive-failure counter: a connect failure never ran
    /// anything on the node, so it does not count.
    #[must_use]
    pub const fn established(&self) -> bool {
        !matches!(self, Self::Connect { .. })
    }

    /// The node the failure relates to.
    #[must_use]
    pub const fn node(&self) -> &NodeId {
        match self {
            Self::Connect { node, .. } | Self::Rpc { node, .. } | Self::Decode { node, .. } => node,
        }
    }
}
