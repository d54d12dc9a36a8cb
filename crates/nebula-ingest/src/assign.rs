//! Spec-to-node balance policy.
//!
//! Specs are long-lived and their sizes differ by orders of magnitude.
//! Greedy smallest-first keeps imbalance bounded by the largest spec and
//! is stable across ticks when the fleet is stable, so warm data tends to
//! stay where it landed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use nebula_meta::NodeId;

/// A node's working load during one assignment round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLoad {
    /// Node identity; ties on size break lexicographically on this.
    pub id: NodeId,
    /// Resident bytes at the start of the round.
    pub size: u64,
}

/// Assigns each `(signature, size)` entry to the node with the smallest
/// working size, bumping that size so later entries see the placement.
///
/// `specs` must be in stable signature order for cross-tick stability;
/// callers iterate an ordered repo so this holds by construction. Returns
/// `(signature, node)` placements; empty when there are no nodes.
#[must_use]
pub fn balance(loads: Vec<NodeLoad>, specs: &[(String, u64)]) -> Vec<(String, NodeId)> {
    if loads.is_empty() {
        return Vec::new();
    }

    // Min-heap on (size, id): pop the smallest node, charge the spec,
    // push it back.
    let mut heap: BinaryHeap<Reverse<(u64, NodeId)>> = loads
        .into_iter()
        .map(|l| Reverse((l.size, l.id)))
        .collect();

    let mut placements = Vec::with_capacity(specs.len());
    for (signature, size) in specs {
        let Reverse((load, id)) = heap.pop().expect("heap holds at least one node");
        placements.push((signature.clone(), id.clone()));
        heap.push(Reverse((load + size, id)));
    }
    placements
}
