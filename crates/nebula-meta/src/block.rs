//! Coordinator-side view of a resident block.

use serde::{Deserialize, Serialize};

use nebula_common::TimeRange;

/// Summary of one immutable block resident on a node.
///
/// Identity is `(spec, holder, epoch)`: the spec signature the block was
/// ingested from, the node holding it, and the residency epoch that
/// distinguishes re-ingests of the same spec on the same node. The
/// coordinator only ever sees this summary; block bytes never leave the
/// node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Signature of the spec this block was materialised from.
    pub spec: String,
    /// Table the block belongs to.
    pub table: String,
    /// Residency epoch on the holding node.
    pub epoch: u64,
    /// Number of rows.
    pub rows: u64,
    /// Raw bytes the block occupies.
    pub raw_bytes: u64,
    /// Time window covered by the rows.
    pub window: TimeRange,
}
