//! Tasks delivered to worker nodes.
//!
//! A task is the one unit the dispatcher sends: ingest a spec, expire a
//! batch of blocks, or execute an out-of-band command. Payloads are
//! self-describing and round-trip byte-for-byte through serde.

use std::fmt;

use serde::{Deserialize, Serialize};

use nebula_common::{hash64, NebulaError, NebulaResult};
use nebula_meta::DataFormat;

use crate::spec::IngestSpec;

/// What kind of work a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    /// Materialise a spec into a block.
    Ingestion,
    /// Drop a batch of blocks by spec signature.
    Expiration,
    /// Out-of-band command.
    Command,
}

/// A node's reply to task delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Accepted, waiting to run.
    Queued,
    /// Currently executing.
    Running,
    /// Completed; effects are visible.
    Succeeded,
    /// Attempted and failed.
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Everything a node needs to ingest one spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionPayload {
    /// Spec signature; becomes the block's spec identity.
    pub signature: String,
    /// Target table.
    pub table: String,
    /// Concrete partition path.
    pub uri: String,
    /// Payload format.
    pub format: DataFormat,
    /// Event-time column.
    pub time_column: String,
    /// Estimated raw bytes.
    pub size: u64,
    /// Source last-modified marker.
    pub mtime: u64,
}

impl From<&IngestSpec> for IngestionPayload {
    fn from(spec: &IngestSpec) -> Self {
        Self {
            signature: spec.signature().to_string(),
            table: spec.table().to_string(),
            uri: spec.uri().to_string(),
            format: spec.format(),
            time_column: spec.time_column().to_string(),
            size: spec.size(),
            mtime: spec.mtime(),
        }
    }
}

/// A batch of blocks to drop, by spec signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExpire {
    /// Spec signatures whose blocks should be dropped.
    pub specs: Vec<String>,
}

impl BlockExpire {
    /// Creates an expire batch.
    #[must_use]
    pub fn new(specs: Vec<String>) -> Self {
        Self { specs }
    }

    /// Content signature of the batch.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("expire/{:016x}", hash64(self.specs.join(",").as_bytes()))
    }
}

/// Supported out-of-band commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Ask the node to exit.
    Shutdown,
}

/// An out-of-band command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTask {
    /// The command to run.
    pub command: Command,
}

impl CommandTask {
    /// The shutdown command.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self {
            command: Command::Shutdown,
        }
    }

    fn signature(&self) -> String {
        match self.command {
            Command::Shutdown => "command/shutdown".to_string(),
        }
    }
}

/// Task payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskPayload {
    /// Spec to ingest.
    Ingestion(IngestionPayload),
    /// Blocks to expire.
    Expiration(BlockExpire),
    /// Command to run.
    Command(CommandTask),
}

/// The unit of work sent to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Work kind; redundant with the payload tag but kept explicit on the
    /// wire for cheap routing.
    pub task_type: TaskType,
    /// Signature identifying this task's content.
    pub signature: String,
    /// The work itself.
    pub payload: TaskPayload,
}

impl Task {
    /// Builds an ingestion task from a spec.
    #[must_use]
    pub fn ingestion(spec: &IngestSpec) -> Self {
        Self {
            task_type: TaskType::Ingestion,
            signature: spec.signature().to_string(),
            payload: TaskPayload::Ingestion(IngestionPayload::from(spec)),
        }
    }

    /// Builds a batched expiration task.
    #[must_use]
    pub fn expiration(expire: BlockExpire) -> Self {
        Self {
            task_type: TaskType::Expiration,
            signature: expire.signature(),
            payload: TaskPayload::Expiration(expire),
        }
    }

    /// Builds a command task.
    #[must_use]
    pub fn command(command: CommandTask) -> Self {
        Self {
            task_type: TaskType::Command,
            signature: command.signature(),
            payload: TaskPayload::Command(command),
        }
    }

    /// Serialises for the wire.
    pub fn to_bytes(&self) -> NebulaResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| NebulaError::InvalidArgument {
            message: format!("task encode: {e}"),
        })
    }

    /// Deserialises from the wire.
    pub fn from_bytes(bytes: &[u8]) -> NebulaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| NebulaError::InvalidArgument {
            message: format!("task decode: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_round_trip() {
        let spec = IngestSpec::new(
            "events",
            1,
            "s3://data/events/part-7",
            DataFormat::Json,
            "ts",
            4096,
            1234,
        );
        let task = Task::ingestion(&spec);
        let bytes = task.to_bytes().unwrap();
        let decoded = Task::from_bytes(&bytes).unwrap();
        assert_eq!(task, decoded);
        // Re-encoding is byte-for-byte identical.
        assert_eq!(bytes, decoded.to_bytes().unwrap());
    }

    #[test]
    fn test_expire_round_trip() {
        let task = Task::expiration(BlockExpire::new(vec![
            "events@0/00ff".to_string(),
            "events@1/aa00".to_string(),
        ]));
        assert_eq!(task.task_type, TaskType::Expiration);
        let decoded = Task::from_bytes(&task.to_bytes().unwrap()).unwrap();
        assert_eq!(task, decoded);
    }

    #[test]
    fn test_expire_signature_tracks_content() {
        let a = BlockExpire::new(vec!["s1".into()]);
        let b = BlockExpire::new(vec!["s1".into(), "s2".into()]);
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), BlockExpire::new(vec!["s1".into()]).signature());
    }

    #[test]
    fn test_command_task() {
        let task = Task::command(CommandTask::shutdown());
        assert_eq!(task.signature, "command/shutdown");
        let decoded = Task::from_bytes(&task.to_bytes().unwrap()).unwrap();
        assert_eq!(task, decoded);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Task::from_bytes(b"{not json").is_err());
    }
}
