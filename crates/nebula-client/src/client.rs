//! The node client trait and its tonic-backed implementation.

use std::future::Future;
use std::pin::Pin;

use tonic::transport::Channel;
use tracing::debug;

use nebula_common::TimeRange;
use nebula_ingest::{Task, TaskState};
use nebula_meta::{BlockSummary, NodeId, PlanFragment};
use nebula_proto::proto;

use crate::error::{ClientError, ClientResult};

/// Boxed future used by trait methods.
///
/// Keeps the trait object-safe without an async-trait dependency.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = ClientResult<T>> + Send + 'a>>;

/// Health and inventory summary of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeState {
    /// Blocks resident.
    pub block_count: u64,
    /// Total rows across blocks.
    pub row_count: u64,
    /// Memory bytes in use for block data.
    pub mem_bytes: u64,
}

/// Everything the coordinator does to a worker node.
///
/// One implementation speaks tonic to a real node; the scripted mock in
/// [`crate::mock`] backs control-plane tests.
pub trait NodeClient: Send + Sync + std::fmt::Debug {
    /// Liveness probe; echoes `name` back.
    fn echo(&self, name: String) -> ClientFuture<'_, String>;

    /// Health and inventory summary.
    fn state(&self) -> ClientFuture<'_, NodeState>;

    /// Full residency list for inventory diffing.
    fn blocks(&self) -> ClientFuture<'_, Vec<BlockSummary>>;

    /// Delivers a task; returns the node's task state.
    fn task(&self, task: Task) -> ClientFuture<'_, TaskState>;

    /// Executes a plan fragment, collecting the batch stream.
    fn query(&self, plan: PlanFragment) -> ClientFuture<'_, Vec<Vec<u8>>>;

    /// The node this client talks to.
    fn node(&self) -> &NodeId;
}

/// Tonic-backed node client over a (cheaply clonable) channel.
#[derive(Debug)]
pub struct RemoteNodeClient {
    node: NodeId,
    channel: Channel,
}

impl RemoteNodeClient {
    /// Wraps an established channel.
    #[must_use]
    pub fn new(node: NodeId, channel: Channel) -> Self {
        Self { node, channel }
    }

    fn stub(&self) -> proto::node_client::NodeClient<Channel> {
        proto::node_client::NodeClient::new(self.channel.clone())
    }

    fn rpc_err(&self, status: tonic::Status) -> ClientError {
        ClientError::Rpc {
            node: self.node.clone(),
            status,
        }
    }
}

impl NodeClient for RemoteNodeClient {
    fn echo(&self, name: String) -> ClientFuture<'_, String> {
        Box::pin(async move {
            let mut stub = self.stub();
            let reply = stub
                .echo(proto::EchoRequest { name })
                .await
                .map_err(|s| self.rpc_err(s))?;
            Ok(reply.into_inner().message)
        })
    }

    fn state(&self) -> ClientFuture<'_, NodeState> {
        Box::pin(async move {
            let mut stub = self.stub();
            let reply = stub
                .state(proto::NodeStateRequest {})
                .await
                .map_err(|s| self.rpc_err(s))?
                .into_inner();
            Ok(NodeState {
                block_count: reply.block_count,
                row_count: reply.row_count,
                mem_bytes: reply.mem_bytes,
            })
        })
    }

    fn blocks(&self) -> ClientFuture<'_, Vec<BlockSummary>> {
        Box::pin(async move {
            let mut stub = self.stub();
            let reply = stub
                .blocks(proto::BlocksRequest {})
                .await
                .map_err(|s| self.rpc_err(s))?
                .into_inner();
            Ok(reply
                .blocks
                .into_iter()
                .map(|b| BlockSummary {
                    spec: b.spec,
                    table: b.table,
                    epoch: b.epoch,
                    rows: b.rows,
                    raw_bytes: b.raw_bytes,
                    window: TimeRange::new(b.min_time, b.max_time),
                })
                .collect())
        })
    }

    fn task(&self, task: Task) -> ClientFuture<'_, TaskState> {
        Box::pin(async move {
            let bytes = task.to_bytes().map_err(|e| ClientError::Decode {
                node: self.node.clone(),
                reason: e.to_string(),
            })?;
            debug!(node = %self.node, signature = %task.signature, "sending task");
            let mut stub = self.stub();
            let reply = stub
                .task(proto::TaskRequest { task: bytes })
                .await
                .map_err(|s| self.rpc_err(s))?
                .into_inner();
            Ok(task_state_from_proto(reply.state))
        })
    }

    fn query(&self, plan: PlanFragment) -> ClientFuture<'_, Vec<Vec<u8>>> {
        Box::pin(async move {
            let bytes = plan.to_bytes().map_err(|e| ClientError::Decode {
                node: self.node.clone(),
                reason: e.to_string(),
            })?;
            let mut stub = self.stub();
            let mut stream = stub
                .query(proto::PlanFragment { plan: bytes })
                .await
                .map_err(|s| self.rpc_err(s))?
                .into_inner();

            let mut batches = Vec::new();
            loop {
                match stream.message().await {
                    Ok(Some(batch)) => batches.push(batch.data),
                    Ok(None) => break,
                    Err(s) => return Err(self.rpc_err(s)),
                }
            }
            Ok(batches)
        })
    }

    fn node(&self) -> &NodeId {
        &self.node
    }
}

/// Maps the proto task-state enum, defaulting unknown values to `Failed`.
#[must_use]
pub fn task_state_from_proto(state: i32) -> TaskState {
    match proto::TaskState::try_from(state) {
        Ok(proto::TaskState::Queued) => TaskState::Queued,
        Ok(proto::TaskState::Running) => TaskState::Running,
        Ok(proto::TaskState::Succeeded) => TaskState::Succeeded,
        Ok(proto::TaskState::Failed) | Err(_) => TaskState::Failed,
    }
}

/// Maps a task state onto the wire enum.
#[must_use]
pub fn task_state_to_proto(state: TaskState) -> i32 {
    let mapped = match state {
        TaskState::Queued => proto::TaskState::Queued,
        TaskState::Running => proto::TaskState::Running,
        TaskState::Succeeded => proto::TaskState::Succeeded,
        TaskState::Failed => proto::TaskState::Failed,
    };
    mapped as i32
}
