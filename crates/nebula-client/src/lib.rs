//! Coordinator-side client for worker nodes.
//!
//! The control plane and the query fan-out both talk to workers through
//! the [`NodeClient`] trait; [`RemoteNodeConnector`] hands out tonic-backed
//! clients with cached channels, and [`mock`] provides a scripted in-memory
//! implementation for control-plane tests and simulations.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod connector;
pub mod error;
pub mod mock;

pub use client::{NodeClient, NodeState, RemoteNodeClient};
pub use connector::{ClientConfig, NodeConnector, RemoteNodeConnector};
pub use error::{ClientError, ClientResult};
