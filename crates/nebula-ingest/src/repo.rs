//! The spec repository.
//!
//! `SpecRepo` owns the canonical spec set and its state machine. It is
//! single-writer by design: only the reconciliation scheduler mutates it,
//! between RPC boundaries, so no lock is held across suspension points.
//! Query-path readers take a cloned snapshot.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use nebula_common::{NebulaError, NebulaResult};
use nebula_meta::{ClusterInfo, NodeId};

use crate::assign::{balance, NodeLoad};
use crate::scan::SourceScanner;
use crate::spec::{IngestSpec, SpecState};
use crate::task::TaskState;

/// Consecutive ingestion failures after which a spec is demoted and
/// reassigned elsewhere.
pub const FAILURE_DEMOTE_THRESHOLD: u32 = 3;

/// Counters describing what one refresh changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    /// Specs newly created in `NEW`.
    pub added: usize,
    /// Surviving specs demoted because their content changed.
    pub changed: usize,
    /// Specs deleted because their source disappeared.
    pub removed: usize,
    /// Surviving specs demoted because their node left the active set.
    pub orphaned: usize,
}

/// Canonical set of ingestion specs keyed by signature.
///
/// Signature order is the iteration order, which makes assignment stable
/// across ticks.
#[derive(Debug, Default)]
pub struct SpecRepo {
    specs: BTreeMap<String, IngestSpec>,
}

impl SpecRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of specs currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if no specs are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Looks up a spec by signature.
    #[must_use]
    pub fn get(&self, signature: &str) -> Option<&IngestSpec> {
        self.specs.get(signature)
    }

    /// Iterates specs in signature order.
    pub fn specs(&self) -> impl Iterator<Item = &IngestSpec> {
        self.specs.values()
    }

    /// Clones the full set for readers outside the scheduler thread.
    #[must_use]
    pub fn snapshot(&self) -> Vec<IngestSpec> {
        self.specs.values().cloned().collect()
    }

    /// Rebuilds the spec universe from table definitions.
    ///
    /// `active` is the node registry's live view; specs whose affinity
    /// fell out of it are demoted to `NEW` (a `READY` spec has lost its
    /// only block holder). Set-difference semantics:
    ///
    /// - partitions without a spec become `NEW` specs
    /// - surviving specs with changed content (`mtime` or `size`) are
    ///   demoted and re-ingested; their stale blocks expire via inventory
    /// - specs whose partition disappeared are deleted
    ///
    /// A source whose scan fails is skipped: its existing specs are
    /// retained untouched and the next tick retries. Two distinct
    /// partitions hashing to one signature is a fatal invariant violation.
    pub fn refresh(
        &mut self,
        ci: &ClusterInfo,
        active: &[NodeId],
        scanner: &dyn SourceScanner,
    ) -> NebulaResult<RefreshStats> {
        let mut stats = RefreshStats::default();

        // Enumerate the new universe. `universe` maps signature to the
        // freshly-built spec; `seen_uris` backs collision detection.
        let mut universe: BTreeMap<String, IngestSpec> = BTreeMap::new();
        let mut seen_uris: HashMap<String, String> = HashMap::new();
        let mut failed_sources: HashSet<(String, usize)> = HashSet::new();

        for table in ci.tables() {
            for (index, source) in table.sources.iter().enumerate() {
                let units = match scanner.scan(table, source) {
                    Ok(units) => units,
                    Err(e) => {
                        warn!(
                            table = %table.name,
                            source = index,
                            error = %e,
                            "source scan failed, retaining existing specs"
                        );
                        failed_sources.insert((table.name.clone(), index));
                        continue;
                    }
                };

                for unit in units {
                    let spec = IngestSpec::new(
                        &table.name,
                        index,
                        &unit.uri,
                        source.format,
                        &source.time_column,
                        unit.size,
                        unit.mtime,
                    );
                    let signature = spec.signature().to_string();
                    if let Some(existing_uri) = seen_uris.get(&signature) {
                        if existing_uri != spec.uri() {
                            return Err(NebulaError::invariant(format!(
                                "signature {} shared by distinct inputs: {} and {}",
                                signature,
                                existing_uri,
                                spec.uri()
                            )));
                        }
                        // Same unit enumerated twice; keep the first.
                        continue;
                    }
                    seen_uris.insert(signature.clone(), spec.uri().to_string());
                    universe.insert(signature, spec);
                }
            }
        }

        let active: HashSet<&NodeId> = active.iter().collect();

        // Removals: specs whose partition vanished, unless the owning
        // source failed to scan this tick.
        self.specs.retain(|signature, spec| {
            if universe.contains_key(signature) {
                return true;
            }
            if failed_sources.contains(&(spec.table().to_string(), spec.source_index())) {
                return true;
            }
            debug!(signature = %signature, "spec removed from universe");
            stats.removed += 1;
            false
        });

        // Survivors and additions.
        for (signature, fresh) in universe {
            match self.specs.get_mut(&signature) {
                Some(spec) => {
                    if spec.mtime() != fresh.mtime() || spec.size() != fresh.size() {
                        if spec.state() != SpecState::New {
                            spec.demote();
                        }
                        spec.refresh_content(fresh.size(), fresh.mtime());
                        stats.changed += 1;
                    }
                }
                None => {
                    self.specs.insert(signature, fresh);
                    stats.added += 1;
                }
            }
        }

        // Affinity loss: a spec placed on a node that left the active set
        // goes back to NEW so assignment can re-place it.
        for spec in self.specs.values_mut() {
            if let Some(node) = spec.affinity() {
                if !active.contains(node) {
                    debug!(signature = spec.signature(), node = %node, "affinity lost");
                    spec.demote();
                    stats.orphaned += 1;
                }
            }
        }

        if stats != RefreshStats::default() {
            info!(
                added = stats.added,
                changed = stats.changed,
                removed = stats.removed,
                orphaned = stats.orphaned,
                total = self.specs.len(),
                "spec universe refreshed"
            );
        }
        Ok(stats)
    }

    /// Reconciles an existing block against the repo.
    ///
    /// Returns true if the block is current: its spec exists and is either
    /// unplaced (claim it for `node`) or already placed on `node`. Returns
    /// false when the spec is gone or placed elsewhere — the caller expires
    /// the block.
    pub fn assign(&mut self, signature: &str, node: &NodeId) -> bool {
        match self.specs.get_mut(signature) {
            None => false,
            Some(spec) => match spec.state() {
                SpecState::New => {
                    spec.place(node.clone());
                    true
                }
                SpecState::Assigned | SpecState::Ready => spec.affinity() == Some(node),
                SpecState::Failed => false,
            },
        }
    }

    /// Batch-assigns every `NEW` spec across `loads`, smallest node first.
    pub fn assign_nodes(&mut self, loads: Vec<NodeLoad>) {
        let pending: Vec<(String, u64)> = self
            .specs
            .values()
            .filter(|s| s.state() == SpecState::New)
            .map(|s| (s.signature().to_string(), s.size()))
            .collect();
        if pending.is_empty() {
            return;
        }

        let placements = balance(loads, &pending);
        for (signature, node) in placements {
            if let Some(spec) = self.specs.get_mut(&signature) {
                spec.place(node);
            }
        }
    }

    /// Moves a spec to `state`, enforcing machine legality.
    pub fn set_state(&mut self, signature: &str, state: SpecState) -> NebulaResult<()> {
        let spec = self.specs.get_mut(signature).ok_or_else(|| {
            NebulaError::invariant(format!("set_state on unknown spec {signature}"))
        })?;
        spec.set_state(state)
    }

    /// Specs that should be dispatched this tick, with their targets.
    #[must_use]
    pub fn pending_sync(&self, tick: u64) -> Vec<(String, NodeId)> {
        self.specs
            .values()
            .filter(|s| s.need_sync(tick))
            .filter_map(|s| s.affinity().map(|n| (s.signature().to_string(), n.clone())))
            .collect()
    }

    /// Records that a spec's ingestion task went out this tick.
    pub fn record_sent(&mut self, signature: &str, tick: u64) {
        if let Some(spec) = self.specs.get_mut(signature) {
            spec.mark_sent(tick);
        }
    }

    /// Applies a node's reply to an ingestion task.
    ///
    /// `counted` is false when no RPC was established (connect failure):
    /// the attempt is treated as failed but does not advance the
    /// consecutive-failure counter.
    pub fn record_ingest_reply(
        &mut self,
        signature: &str,
        reply: TaskState,
        counted: bool,
    ) -> NebulaResult<()> {
        let Some(spec) = self.specs.get_mut(signature) else {
            // The spec can vanish between dispatch and reply via refresh;
            // nothing to record.
            return Ok(());
        };

        match reply {
            TaskState::Succeeded => {
                spec.clear_failures();
                spec.set_state(SpecState::Ready)?;
            }
            TaskState::Queued | TaskState::Running => {
                // Still in flight on the node; the next tick polls again.
                debug!(signature, state = %reply, "ingestion in flight");
            }
            TaskState::Failed => {
                if !counted {
                    warn!(signature, "ingestion unreachable, not counting failure");
                    return Ok(());
                }
                let failures = spec.record_failure();
                warn!(signature, failures, "ingestion failed");
                if failures >= FAILURE_DEMOTE_THRESHOLD {
                    info!(signature, "failure threshold reached, demoting for reassignment");
                    spec.demote();
                }
            }
        }
        Ok(())
    }
}
