//! Cluster config file model.
//!
//! The file is YAML-shaped:
//!
//! ```yaml
//! version: "1"
//! nodes:
//!   - host: 10.0.0.2
//!     port: 9199
//!     role: node
//! tables:
//!   - name: events
//!     schema: "ROW<ts:BIGINT, user:VARCHAR, value:DOUBLE>"
//!     sources:
//!       - uri: "s3://data/events/{date}"
//!         format: csv
//!         time-column: ts
//!         retention: 864000
//! ```

use serde::{Deserialize, Serialize};

use crate::node::NodeRole;
use crate::table::DataFormat;

/// One `nodes[]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    /// Host name or address.
    pub host: String,
    /// RPC port.
    pub port: u16,
    /// Member role.
    pub role: NodeRole,
}

/// One `sources[]` entry under a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDef {
    /// Path template.
    pub uri: String,
    /// Payload format.
    pub format: DataFormat,
    /// Column carrying event time.
    #[serde(rename = "time-column")]
    pub time_column: String,
    /// Retention in seconds.
    pub retention: u64,
}

/// One `tables[]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Schema text, `ROW<col:TYPE,...>`.
    pub schema: String,
    /// Ordered ingestion sources.
    pub sources: Vec<SourceDef>,
}

/// The whole cluster config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfigFile {
    /// Config generation marker, free-form.
    pub version: String,
    /// Fleet members.
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    /// Table universe.
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

impl ClusterConfigFile {
    /// Parses a YAML document.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "7"
nodes:
  - host: 10.0.0.2
    port: 9199
    role: node
  - host: 10.0.0.3
    port: 9199
    role: node
tables:
  - name: events
    schema: "ROW<ts:BIGINT, user:VARCHAR, value:DOUBLE>"
    sources:
      - uri: "s3://data/events/{date}"
        format: csv
        time-column: ts
        retention: 864000
"#;

    #[test]
    fn test_parse_sample() {
        let file = ClusterConfigFile::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(file.version, "7");
        assert_eq!(file.nodes.len(), 2);
        assert_eq!(file.tables.len(), 1);
        let table = &file.tables[0];
        assert_eq!(table.sources[0].time_column, "ts");
        assert_eq!(table.sources[0].format, DataFormat::Csv);
    }

    #[test]
    fn test_rejects_bad_yaml() {
        assert!(ClusterConfigFile::parse(b"version: [unclosed").is_err());
    }

    #[test]
    fn test_empty_sections_default() {
        let file = ClusterConfigFile::parse(b"version: \"1\"").unwrap();
        assert!(file.nodes.is_empty());
        assert!(file.tables.is_empty());
    }
}
