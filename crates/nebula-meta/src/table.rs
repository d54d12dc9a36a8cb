//! Tables and their ingestion sources.

use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// On-wire format of an ingestion source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Delimiter-separated text.
    Csv,
    /// Newline-delimited JSON.
    Json,
    /// Parquet files.
    Parquet,
}

/// One logical feed of data into a table.
///
/// The `uri` is a path template; enumeration of the concrete partitions
/// behind it happens during spec refresh. Immutable within a config
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSource {
    /// Path template, e.g. `s3://bucket/events/{date}`.
    pub uri: String,
    /// Payload format.
    pub format: DataFormat,
    /// Column carrying event time, used for block windows.
    pub time_column: String,
    /// How long ingested data stays queryable, in seconds.
    pub retention: u64,
}

/// A queryable table: name, schema and ordered ingestion sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name, unique within the cluster.
    pub name: String,
    /// Row schema.
    pub schema: Schema,
    /// Ordered ingestion sources.
    pub sources: Vec<IngestionSource>,
}

impl Table {
    /// Creates a table with a single source.
    pub fn single_source(
        name: impl Into<String>,
        schema: Schema,
        source: IngestionSource,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            sources: vec![source],
        }
    }
}
