//! Partition enumeration behind ingestion sources.
//!
//! Readers (CSV, Kafka, S3) live outside the control plane; all the spec
//! refresh needs is the list of concrete partitions a source currently
//! resolves to, with enough metadata to build signatures and detect
//! content changes.

use std::time::{SystemTime, UNIX_EPOCH};

use nebula_common::NebulaResult;
use nebula_meta::{IngestionSource, Table};

/// One concrete partition behind a source template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUnit {
    /// Concrete path of the partition.
    pub uri: String,
    /// Size in bytes, used as the post-ingest estimate.
    pub size: u64,
    /// Last-modified marker in unix seconds.
    pub mtime: u64,
}

/// Enumerates the current partitions of an ingestion source.
///
/// Implementations are expected to apply the source's retention window:
/// partitions older than `retention` seconds should not be returned, which
/// is how expired data leaves the spec universe.
pub trait SourceScanner: Send + Sync {
    /// Lists the partitions currently behind `source` of `table`.
    fn scan(&self, table: &Table, source: &IngestionSource) -> NebulaResult<Vec<PartitionUnit>>;
}

/// Scanner for `local:` sources: every regular file under the source path
/// is one partition.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalScanner;

impl LocalScanner {
    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl SourceScanner for LocalScanner {
    fn scan(&self, _table: &Table, source: &IngestionSource) -> NebulaResult<Vec<PartitionUnit>> {
        let path = source.uri.strip_prefix("local:").unwrap_or(&source.uri);
        let cutoff = Self::now().saturating_sub(source.retention);

        let mut units = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let mtime = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if mtime < cutoff {
                continue;
            }
            units.push(PartitionUnit {
                uri: entry.path().to_string_lossy().to_string(),
                size: meta.len(),
                mtime,
            });
        }
        // Directory iteration order is platform-defined; make enumeration
        // deterministic.
        units.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(units)
    }
}
