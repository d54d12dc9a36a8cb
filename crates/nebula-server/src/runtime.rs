//! Coordinator runtime: explicit ownership of shared state.
//!
//! What the original design kept as process singletons — the cluster
//! snapshot, the table catalogue, the fan-out pool — lives here as one
//! value constructed at startup. Tests build a fresh `Runtime` each.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;

use nebula_common::TimeRange;
use nebula_meta::{BlockSummary, ClusterInfo, NodeId};

use crate::table_service::TableService;

/// Aggregate block metrics of one table across the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMetrics {
    /// Blocks resident.
    pub block_count: u64,
    /// Rows across blocks.
    pub row_count: u64,
    /// Raw bytes across blocks.
    pub mem_bytes: u64,
    /// Time window covered.
    pub window: TimeRange,
}

/// Shared coordinator state.
pub struct Runtime {
    cluster: RwLock<Arc<ClusterInfo>>,
    tables: TableService,
    metrics: RwLock<HashMap<String, TableMetrics>>,
    fanout: Arc<Semaphore>,
}

impl Runtime {
    /// Creates a runtime.
    ///
    /// `fanout_permits` bounds concurrent node RPCs across reconciliation
    /// and queries; size it at least `max(node_count, query_concurrency)
    /// + 1` so the two lanes cannot deadlock the pool.
    #[must_use]
    pub fn new(fanout_permits: usize) -> Arc<Self> {
        Arc::new(Self {
            cluster: RwLock::new(Arc::new(ClusterInfo::empty())),
            tables: TableService::new(),
            metrics: RwLock::new(HashMap::new()),
            fanout: Arc::new(Semaphore::new(fanout_permits.max(2))),
        })
    }

    /// The current cluster snapshot.
    #[must_use]
    pub fn cluster(&self) -> Arc<ClusterInfo> {
        Arc::clone(&self.cluster.read())
    }

    /// Publishes a new cluster snapshot and re-enrols the catalogue.
    ///
    /// A config generation parses every node as active; health verdicts
    /// already recorded against the previous snapshot survive the reload
    /// so a reload never resurrects a dead node.
    pub fn publish(&self, mut ci: ClusterInfo) {
        {
            let current = self.cluster.read();
            for node in current.nodes().iter().filter(|n| !n.is_active()) {
                ci.set_active(&node.id, false);
            }
        }
        let ci = Arc::new(ci);
        self.tables.enroll(&ci);
        *self.cluster.write() = ci;
    }

    /// Records the health policy's verdict for one node in the snapshot.
    ///
    /// Called by the reconciler every time a node's state RPC settles, so
    /// snapshot readers (the query fan-out above all) see the same active
    /// set the control plane acts on. Rebuilds copy-on-change; a verdict
    /// that matches the snapshot is free.
    pub fn mark_health(&self, id: &NodeId, active: bool) {
        let mut guard = self.cluster.write();
        let changed = guard
            .nodes()
            .iter()
            .any(|n| &n.id == id && n.is_active() != active);
        if changed {
            let mut next = ClusterInfo::clone(&guard);
            next.set_active(id, active);
            *guard = Arc::new(next);
        }
    }

    /// The table catalogue.
    #[must_use]
    pub fn tables(&self) -> &TableService {
        &self.tables
    }

    /// The fan-out bound shared by reconciliation and queries.
    #[must_use]
    pub fn fanout(&self) -> Arc<Semaphore> {
        Arc::clone(&self.fanout)
    }

    /// Metrics of one table, if any blocks are known.
    #[must_use]
    pub fn table_metrics(&self, table: &str) -> Option<TableMetrics> {
        self.metrics.read().get(table).copied()
    }

    /// Rebuilds per-table metrics from a full inventory pass.
    ///
    /// Called once per tick with every block seen across the fleet, so
    /// metrics reflect inventory rather than accumulating drift.
    pub fn update_table_metrics<'a>(&self, blocks: impl Iterator<Item = &'a BlockSummary>) {
        let mut next: HashMap<String, TableMetrics> = HashMap::new();
        for block in blocks {
            next.entry(block.table.clone())
                .and_modify(|m| {
                    m.block_count += 1;
                    m.row_count += block.rows;
                    m.mem_bytes += block.raw_bytes;
                    m.window.merge(&block.window);
                })
                .or_insert(TableMetrics {
                    block_count: 1,
                    row_count: block.rows,
                    mem_bytes: block.raw_bytes,
                    window: block.window,
                });
        }
        *self.metrics.write() = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_meta::config::ClusterConfigFile;

    fn cluster(hosts: &[&str]) -> ClusterInfo {
        let mut doc = String::from("version: \"1\"\nnodes:\n");
        for host in hosts {
            doc.push_str(&format!("  - {{ host: {host}, port: 9199, role: node }}\n"));
        }
        doc.push_str("tables: []\n");
        let file = ClusterConfigFile::parse(doc.as_bytes()).unwrap();
        ClusterInfo::from_config("test", file).unwrap()
    }

    fn is_active(runtime: &Runtime, id: &NodeId) -> bool {
        runtime
            .cluster()
            .nodes()
            .iter()
            .find(|n| &n.id == id)
            .is_some_and(|n| n.is_active())
    }

    #[test]
    fn test_mark_health_flips_snapshot() {
        let runtime = Runtime::new(4);
        runtime.publish(cluster(&["a", "b"]));
        let a = NodeId::new("a", 9199);

        assert!(is_active(&runtime, &a));
        runtime.mark_health(&a, false);
        assert!(!is_active(&runtime, &a));
        runtime.mark_health(&a, true);
        assert!(is_active(&runtime, &a));
    }

    #[test]
    fn test_publish_preserves_health_verdicts() {
        let runtime = Runtime::new(4);
        runtime.publish(cluster(&["a", "b"]));
        let a = NodeId::new("a", 9199);
        runtime.mark_health(&a, false);

        // A config reload parses everything active again; the recorded
        // verdict must survive it.
        runtime.publish(cluster(&["a", "b", "c"]));
        assert!(!is_active(&runtime, &a));
        assert!(is_active(&runtime, &NodeId::new("b", 9199)));
        assert!(is_active(&runtime, &NodeId::new("c", 9199)));
    }

    #[test]
    fn test_metrics_rebuilt_not_accumulated() {
        let runtime = Runtime::new(4);
        let block = |rows: u64, begin: i64| BlockSummary {
            spec: format!("events@0/{rows}"),
            table: "events".to_string(),
            epoch: 1,
            rows,
            raw_bytes: rows * 10,
            window: TimeRange::new(begin, begin + 10),
        };

        runtime.update_table_metrics([block(5, 0), block(7, 100)].iter());
        let m = runtime.table_metrics("events").unwrap();
        assert_eq!(m.block_count, 2);
        assert_eq!(m.row_count, 12);
        assert_eq!(m.window, TimeRange::new(0, 110));

        // A second pass with fewer blocks shrinks the metrics.
        runtime.update_table_metrics([block(5, 0)].iter());
        let m = runtime.table_metrics("events").unwrap();
        assert_eq!(m.block_count, 1);
        assert_eq!(m.row_count, 5);
    }
}
