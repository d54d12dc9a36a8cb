//! The Nebula coordinator.
//!
//! The coordinator owns the cluster control plane — the periodic
//! reconciliation loop in [`node_sync`] that loads config, refreshes the
//! spec universe, reconciles per-node block inventory, balances
//! assignments and dispatches tasks — plus the thin query fan-out in
//! [`query`] and the `V1` gRPC surface in [`service`].
//!
//! Shared state ([`runtime::Runtime`]) is an explicit value constructed at
//! startup; there are no process-wide singletons, and tests build their
//! own runtimes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod node_sync;
pub mod query;
pub mod runtime;
pub mod service;
pub mod table_service;

pub use node_sync::{NodeSync, SyncOptions, TickReport};
pub use runtime::{Runtime, TableMetrics};
pub use service::{EchoService, V1Service};
pub use table_service::TableService;
