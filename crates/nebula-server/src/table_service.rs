//! In-memory table catalogue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use nebula_meta::{ClusterInfo, Table};

/// Name → table lookup for the query path.
///
/// Re-enrolled wholesale whenever the cluster config changes; readers see
/// either the old or the new catalogue, never a mixture.
#[derive(Default)]
pub struct TableService {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl TableService {
    /// Creates an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the catalogue with the snapshot's table universe.
    pub fn enroll(&self, ci: &ClusterInfo) {
        let next: HashMap<String, Arc<Table>> = ci
            .tables()
            .iter()
            .map(|t| (t.name.clone(), Arc::new(t.clone())))
            .collect();
        info!(tables = next.len(), "table catalogue enrolled");
        *self.tables.write() = next;
    }

    /// Looks up a table.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.read().get(name).cloned()
    }

    /// Table names, at most `limit`, in sorted order.
    #[must_use]
    pub fn names(&self, limit: usize) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names.truncate(limit);
        names
    }
}
