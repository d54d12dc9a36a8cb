//! The `ClusterInfo` snapshot.

use nebula_common::{NebulaError, NebulaResult};

use crate::config::ClusterConfigFile;
use crate::node::{Node, NodeRole};
use crate::schema::Schema;
use crate::table::{IngestionSource, Table};

/// An immutable snapshot of cluster configuration.
///
/// Rebuilt copy-on-change by the config loader; readers hold a shared
/// snapshot and never observe a partial update.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    version: String,
    nodes: Vec<Node>,
    tables: Vec<Table>,
}

impl ClusterInfo {
    /// An empty snapshot, used before the first successful config load.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: String::new(),
            nodes: Vec::new(),
            tables: Vec::new(),
        }
    }

    /// Builds a snapshot from a parsed config file.
    ///
    /// Schema text is validated here so a bad schema surfaces as
    /// `ConfigInvalid` rather than at query time.
    pub fn from_config(uri: &str, file: ClusterConfigFile) -> NebulaResult<Self> {
        let nodes = file
            .nodes
            .into_iter()
            .map(|def| Node {
                id: crate::node::NodeId::new(def.host, def.port),
                role: def.role,
                // Parsed members start active; the health policy owns the
                // flag from here via `set_active`.
                active: true,
                size: 0,
            })
            .collect();

        let mut tables = Vec::with_capacity(file.tables.len());
        for def in file.tables {
            let schema = Schema::parse(&def.schema).map_err(|e| NebulaError::ConfigInvalid {
                uri: uri.to_string(),
                reason: format!("table {}: {}", def.name, e),
            })?;
            let sources = def
                .sources
                .into_iter()
                .map(|s| IngestionSource {
                    uri: s.uri,
                    format: s.format,
                    time_column: s.time_column,
                    retention: s.retention,
                })
                .collect();
            tables.push(Table {
                name: def.name,
                schema,
                sources,
            });
        }

        Ok(Self {
            version: file.version,
            nodes,
            tables,
        })
    }

    /// Config generation marker.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All configured members.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Worker members only.
    pub fn workers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Node)
    }

    /// All tables.
    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Flips a member's active flag.
    ///
    /// Nodes parse as active; the health policy maintains the flag from
    /// then on through snapshot rebuilds. Returns true if the member
    /// exists and the flag actually changed.
    pub fn set_active(&mut self, id: &crate::node::NodeId, active: bool) -> bool {
        match self.nodes.iter_mut().find(|n| &n.id == id) {
            Some(node) if node.active != active => {
                node.active = active;
                true
            }
            _ => false,
        }
    }
}
