//! In-memory blocks and the node's residency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use nebula_common::memory::{PagedSlice, Pool};
use nebula_common::{NebulaError, NebulaResult, TimeRange};
use nebula_meta::BlockSummary;

/// One immutable ingested block.
///
/// Row data is serialised into a paged slice drawn from the node's pool;
/// the block owns its slice exclusively and the memory is released as a
/// whole when the block is dropped.
pub struct Block {
    summary: BlockSummary,
    /// Source freshness marker the block was built from; a newer spec
    /// replaces the block.
    mtime: u64,
    data: PagedSlice,
}

impl Block {
    /// Builds a block from rows.
    pub fn build(
        pool: &Arc<Pool>,
        spec: &str,
        table: &str,
        epoch: u64,
        mtime: u64,
        time_column: &str,
        rows: &[Value],
    ) -> NebulaResult<Self> {
        let mut window = TimeRange::new(i64::MAX, i64::MAX);
        let mut first = true;
        for row in rows {
            let t = row
                .get(time_column)
                .and_then(Value::as_i64)
                .ok_or_else(|| NebulaError::SchemaMismatch {
                    table: table.to_string(),
                    message: format!("row missing integral time column {time_column}"),
                })?;
            if first {
                window = TimeRange::new(t, t);
                first = false;
            } else {
                window.merge(&TimeRange::new(t, t));
            }
        }
        if first {
            window = TimeRange::new(0, 0);
        }

        let encoded = serde_json::to_vec(rows).map_err(|e| NebulaError::InvalidArgument {
            message: format!("row encode: {e}"),
        })?;
        let mut data = pool.slice();
        data.write(0, &encoded);

        Ok(Self {
            summary: BlockSummary {
                spec: spec.to_string(),
                table: table.to_string(),
                epoch,
                rows: rows.len() as u64,
                raw_bytes: data.len() as u64,
                window,
            },
            mtime,
            data,
        })
    }

    /// Coordinator-facing summary.
    #[must_use]
    pub fn summary(&self) -> &BlockSummary {
        &self.summary
    }

    /// Freshness marker of the ingested source.
    #[must_use]
    pub const fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Decodes the rows for fragment execution.
    pub fn rows(&self) -> NebulaResult<Vec<Value>> {
        serde_json::from_slice(self.data.as_bytes()).map_err(|e| NebulaError::InvalidArgument {
            message: format!("row decode: {e}"),
        })
    }
}

/// The node's block residency, keyed by spec signature.
///
/// One block per spec: re-ingesting a changed spec replaces the block
/// under a fresh residency epoch.
pub struct BlockManager {
    pool: Arc<Pool>,
    blocks: DashMap<String, Block>,
    epoch: AtomicU64,
}

impl BlockManager {
    /// Creates a manager drawing block memory from `pool`.
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            blocks: DashMap::new(),
            epoch: AtomicU64::new(1),
        })
    }

    /// The backing pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Returns the resident block's freshness for a spec, if any.
    #[must_use]
    pub fn resident_mtime(&self, spec: &str) -> Option<u64> {
        self.blocks.get(spec).map(|b| b.mtime())
    }

    /// Ingests rows for a spec, replacing any older block.
    pub fn add(
        &self,
        spec: &str,
        table: &str,
        mtime: u64,
        time_column: &str,
        rows: &[Value],
    ) -> NebulaResult<BlockSummary> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        let block = Block::build(&self.pool, spec, table, epoch, mtime, time_column, rows)?;
        let summary = block.summary().clone();
        self.blocks.insert(spec.to_string(), block);
        info!(
            spec,
            table,
            epoch,
            rows = summary.rows,
            bytes = summary.raw_bytes,
            "block ingested"
        );
        Ok(summary)
    }

    /// Drops every block whose spec signature is in `specs`.
    ///
    /// Returns the number of blocks removed; absent specs are ignored.
    pub fn expire(&self, specs: &[String]) -> usize {
        let mut removed = 0;
        for spec in specs {
            if self.blocks.remove(spec).is_some() {
                removed += 1;
                debug!(spec = %spec, "block expired");
            }
        }
        removed
    }

    /// Summaries of all resident blocks.
    #[must_use]
    pub fn all(&self) -> Vec<BlockSummary> {
        self.blocks.iter().map(|e| e.summary().clone()).collect()
    }

    /// Decoded rows of every block of `table` overlapping `window`.
    pub fn scan(&self, table: &str, window: &TimeRange) -> NebulaResult<Vec<Value>> {
        let mut rows = Vec::new();
        for entry in self.blocks.iter() {
            let summary = entry.summary();
            if summary.table == table && summary.window.overlaps(window) {
                rows.extend(entry.rows()?);
            }
        }
        Ok(rows)
    }

    /// `(block_count, row_count, mem_bytes)` for the `State` RPC.
    #[must_use]
    pub fn state(&self) -> (u64, u64, u64) {
        let mut blocks = 0;
        let mut rows = 0;
        let mut bytes = 0;
        for entry in self.blocks.iter() {
            blocks += 1;
            rows += entry.summary().rows;
            bytes += entry.summary().raw_bytes;
        }
        (blocks, rows, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> Arc<BlockManager> {
        BlockManager::new(Pool::shared(1024))
    }

    fn rows() -> Vec<Value> {
        vec![
            json!({"ts": 100, "user": "u1", "value": 5}),
            json!({"ts": 200, "user": "u2", "value": 7}),
        ]
    }

    #[test]
    fn test_add_builds_summary() {
        let bm = manager();
        let summary = bm.add("events@0/a", "events", 9, "ts", &rows()).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.window, TimeRange::new(100, 200));
        assert!(summary.raw_bytes > 0);
        assert_eq!(bm.state().0, 1);
    }

    #[test]
    fn test_reingest_replaces_under_new_epoch() {
        let bm = manager();
        let first = bm.add("events@0/a", "events", 1, "ts", &rows()).unwrap();
        let second = bm.add("events@0/a", "events", 2, "ts", &rows()).unwrap();
        assert!(second.epoch > first.epoch);
        assert_eq!(bm.all().len(), 1);
        assert_eq!(bm.resident_mtime("events@0/a"), Some(2));
    }

    #[test]
    fn test_expire_releases_memory() {
        let bm = manager();
        bm.add("events@0/a", "events", 1, "ts", &rows()).unwrap();
        assert!(bm.pool().reserved() > 0);
        let removed = bm.expire(&["events@0/a".to_string(), "ghost".to_string()]);
        assert_eq!(removed, 1);
        assert_eq!(bm.all().len(), 0);
        assert_eq!(bm.pool().reserved(), 0);
    }

    #[test]
    fn test_missing_time_column_is_schema_mismatch() {
        let bm = manager();
        let bad = vec![json!({"user": "u1"})];
        let err = bm.add("events@0/a", "events", 1, "ts", &bad).unwrap_err();
        assert_eq!(err.code(), nebula_common::ErrorCode::SchemaMismatch);
    }

    #[test]
    fn test_scan_filters_by_table_and_window() {
        let bm = manager();
        bm.add("events@0/a", "events", 1, "ts", &rows()).unwrap();
        bm.add("clicks@0/a", "clicks", 1, "ts", &rows()).unwrap();

        let hit = bm.scan("events", &TimeRange::new(0, 1000)).unwrap();
        assert_eq!(hit.len(), 2);
        let miss = bm.scan("events", &TimeRange::new(300, 400)).unwrap();
        assert!(miss.is_empty());
    }
}
