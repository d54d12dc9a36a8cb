//! Nebula gRPC protocol definitions.
//!
//! This crate provides the service definitions and generated code for the
//! two RPC surfaces:
//!
//! - `V1`: the coordinator surface (`Tables`, `State`, `Query`) plus the
//!   shared `Echo` liveness service
//! - `Node`: the worker surface (`Echo`, `State`, `Blocks`, `Task`,
//!   streaming `Query`)
//!
//! Task and plan payloads travel as opaque self-describing bytes; only
//! the envelope is protobuf.

#![warn(clippy::all)]

/// Generated protobuf types and gRPC service definitions.
#[allow(missing_docs)]
#[allow(clippy::derive_partial_eq_without_eq)]
pub mod proto {
    tonic::include_proto!("nebula");
}

// Re-export commonly used types
pub use proto::*;

// Re-export server and client types. The generated `node_client::NodeClient`
// stub is intentionally not re-exported at the top level: `nebula-client`
// exposes a trait of the same name and owns the only call site.
pub use proto::echo_client::EchoClient;
pub use proto::echo_server::{Echo, EchoServer};
pub use proto::node_server::{Node, NodeServer};
pub use proto::v1_client::V1Client;
pub use proto::v1_server::{V1Server, V1};
