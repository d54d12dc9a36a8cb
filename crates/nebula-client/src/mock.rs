//! Scripted in-memory node fleet for tests and simulations.
//!
//! A [`MockFleet`] implements [`NodeConnector`] over a set of
//! [`MockNode`]s. Each mock node records every task it receives, serves a
//! block inventory that reacts to ingestion and expiration, and can be
//! made unreachable to simulate churn. No network is involved.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use nebula_common::TimeRange;
use nebula_ingest::{Task, TaskPayload, TaskState};
use nebula_meta::{BlockSummary, NodeId, PlanFragment};

use crate::client::{ClientFuture, NodeClient, NodeState};
use crate::connector::NodeConnector;
use crate::error::{ClientError, ClientResult};

/// One scripted worker.
#[derive(Debug)]
pub struct MockNode {
    id: NodeId,
    reachable: AtomicBool,
    blocks: Mutex<Vec<BlockSummary>>,
    ingest_replies: Mutex<HashMap<String, VecDeque<TaskState>>>,
    tasks: Mutex<Vec<Task>>,
    state_calls: AtomicUsize,
    query_batches: Mutex<Vec<Vec<u8>>>,
    next_epoch: AtomicU64,
}

impl MockNode {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            reachable: AtomicBool::new(true),
            blocks: Mutex::new(Vec::new()),
            ingest_replies: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            state_calls: AtomicUsize::new(0),
            query_batches: Mutex::new(Vec::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    /// This node's identity.
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Makes the node (un)reachable; connecting to an unreachable node
    /// fails without establishing an RPC.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Scripts the reply for the next ingestion of `spec`. Replies queue
    /// per spec; unscripted ingestions succeed.
    pub fn push_ingest_reply(&self, spec: &str, state: TaskState) {
        self.ingest_replies
            .lock()
            .entry(spec.to_string())
            .or_default()
            .push_back(state);
    }

    /// Seeds a resident block, as if ingested in an earlier life.
    pub fn seed_block(&self, block: BlockSummary) {
        self.blocks.lock().push(block);
    }

    /// Current residency.
    #[must_use]
    pub fn resident_blocks(&self) -> Vec<BlockSummary> {
        self.blocks.lock().clone()
    }

    /// Every task received, in order.
    #[must_use]
    pub fn received_tasks(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }

    /// Forgets received tasks; residency is untouched.
    pub fn clear_tasks(&self) {
        self.tasks.lock().clear();
    }

    /// Number of `State` RPCs served.
    #[must_use]
    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    /// Scripts the batches the next query returns.
    pub fn set_query_batches(&self, batches: Vec<Vec<u8>>) {
        *self.query_batches.lock() = batches;
    }

    /// Total raw bytes resident.
    #[must_use]
    pub fn mem_bytes(&self) -> u64 {
        self.blocks.lock().iter().map(|b| b.raw_bytes).sum()
    }

    fn apply_task(&self, task: &Task) -> TaskState {
        match &task.payload {
            TaskPayload::Ingestion(payload) => {
                let reply = self
                    .ingest_replies
                    .lock()
                    .get_mut(&payload.signature)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(TaskState::Succeeded);
                if reply == TaskState::Succeeded {
                    let mut blocks = self.blocks.lock();
                    // Re-ingesting a resident spec is a no-op success.
                    if !blocks.iter().any(|b| b.spec == payload.signature) {
                        blocks.push(BlockSummary {
                            spec: payload.signature.clone(),
                            table: payload.table.clone(),
                            epoch: self.next_epoch.fetch_add(1, Ordering::SeqCst),
                            rows: payload.size / 10,
                            raw_bytes: payload.size,
                            window: TimeRange::new(payload.mtime as i64, payload.mtime as i64),
                        });
                    }
                }
                reply
            }
            TaskPayload::Expiration(expire) => {
                self.blocks
                    .lock()
                    .retain(|b| !expire.specs.contains(&b.spec));
                TaskState::Succeeded
            }
            TaskPayload::Command(_) => TaskState::Succeeded,
        }
    }
}

/// Client handle over one mock node.
#[derive(Debug)]
pub struct MockNodeClient {
    node: Arc<MockNode>,
}

impl NodeClient for MockNodeClient {
    fn echo(&self, name: String) -> ClientFuture<'_, String> {
        Box::pin(async move { Ok(format!("This is from nebula: {name}")) })
    }

    fn state(&self) -> ClientFuture<'_, NodeState> {
        Box::pin(async move {
            self.node.state_calls.fetch_add(1, Ordering::SeqCst);
            let blocks = self.node.blocks.lock();
            Ok(NodeState {
                block_count: blocks.len() as u64,
                row_count: blocks.iter().map(|b| b.rows).sum(),
                mem_bytes: blocks.iter().map(|b| b.raw_bytes).sum(),
            })
        })
    }

    fn blocks(&self) -> ClientFuture<'_, Vec<BlockSummary>> {
        Box::pin(async move { Ok(self.node.resident_blocks()) })
    }

    fn task(&self, task: Task) -> ClientFuture<'_, TaskState> {
        Box::pin(async move {
            let reply = self.node.apply_task(&task);
            self.node.tasks.lock().push(task);
            Ok(reply)
        })
    }

    fn query(&self, _plan: PlanFragment) -> ClientFuture<'_, Vec<Vec<u8>>> {
        Box::pin(async move { Ok(self.node.query_batches.lock().clone()) })
    }

    fn node(&self) -> &NodeId {
        &self.node.id
    }
}

/// A connector over scripted nodes.
#[derive(Default)]
pub struct MockFleet {
    nodes: Mutex<HashMap<NodeId, Arc<MockNode>>>,
}

impl MockFleet {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a node and returns its scripting handle.
    pub fn add_node(&self, id: NodeId) -> Arc<MockNode> {
        let node = Arc::new(MockNode::new(id.clone()));
        self.nodes.lock().insert(id, Arc::clone(&node));
        node
    }

    /// Looks up a node's scripting handle.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<Arc<MockNode>> {
        self.nodes.lock().get(id).cloned()
    }
}

impl NodeConnector for MockFleet {
    fn make_client(
        &self,
        node: &NodeId,
    ) -> Pin<Box<dyn Future<Output = ClientResult<Arc<dyn NodeClient>>> + Send + '_>> {
        let node = node.clone();
        Box::pin(async move {
            let handle = self.nodes.lock().get(&node).cloned();
            match handle {
                Some(mock) if mock.reachable.load(Ordering::SeqCst) => {
                    Ok(Arc::new(MockNodeClient { node: mock }) as Arc<dyn NodeClient>)
                }
                Some(_) => Err(ClientError::Connect {
                    node,
                    reason: "node marked unreachable".to_string(),
                }),
                None => Err(ClientError::Connect {
                    node,
                    reason: "no such node in fleet".to_string(),
                }),
            }
        })
    }

    fn evict(&self, _node: &NodeId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_ingest::{BlockExpire, IngestSpec};
    use nebula_meta::DataFormat;

    fn spec() -> IngestSpec {
        IngestSpec::new("events", 0, "/data/p0", DataFormat::Csv, "ts", 100, 5)
    }

    #[tokio::test]
    async fn test_ingestion_creates_block() {
        let fleet = MockFleet::new();
        let node = fleet.add_node(NodeId::new("a", 9199));
        let client = fleet.make_client(node.id()).await.unwrap();

        let reply = client.task(Task::ingestion(&spec())).await.unwrap();
        assert_eq!(reply, TaskState::Succeeded);
        assert_eq!(node.resident_blocks().len(), 1);
        assert_eq!(node.mem_bytes(), 100);

        // Re-ingest is an idempotent success.
        client.task(Task::ingestion(&spec())).await.unwrap();
        assert_eq!(node.resident_blocks().len(), 1);
    }

    #[tokio::test]
    async fn test_expiration_drops_blocks() {
        let fleet = MockFleet::new();
        let node = fleet.add_node(NodeId::new("a", 9199));
        let client = fleet.make_client(node.id()).await.unwrap();
        client.task(Task::ingestion(&spec())).await.unwrap();

        let signature = spec().signature().to_string();
        client
            .task(Task::expiration(BlockExpire::new(vec![signature])))
            .await
            .unwrap();
        assert!(node.resident_blocks().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_connect() {
        let fleet = MockFleet::new();
        let node = fleet.add_node(NodeId::new("a", 9199));
        node.set_reachable(false);
        let err = fleet.make_client(node.id()).await.unwrap_err();
        assert!(!err.established());
    }

    #[tokio::test]
    async fn test_scripted_failure_then_success() {
        let fleet = MockFleet::new();
        let node = fleet.add_node(NodeId::new("a", 9199));
        node.push_ingest_reply(spec().signature(), TaskState::Failed);
        let client = fleet.make_client(node.id()).await.unwrap();

        assert_eq!(
            client.task(Task::ingestion(&spec())).await.unwrap(),
            TaskState::Failed
        );
        assert!(node.resident_blocks().is_empty());
        assert_eq!(
            client.task(Task::ingestion(&spec())).await.unwrap(),
            TaskState::Succeeded
        );
    }
}
