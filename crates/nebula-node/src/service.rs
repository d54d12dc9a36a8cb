//! Worker gRPC surface.

use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use nebula_ingest::{Task, TaskState};
use nebula_meta::PlanFragment;
use nebula_proto::proto;

use crate::block::BlockManager;
use crate::executor::{FragmentExecutor, TaskExecutor};

/// Rows per streamed batch.
const BATCH_ROWS: usize = 500;

fn task_state_wire(state: TaskState) -> i32 {
    let mapped = match state {
        TaskState::Queued => proto::TaskState::Queued,
        TaskState::Running => proto::TaskState::Running,
        TaskState::Succeeded => proto::TaskState::Succeeded,
        TaskState::Failed => proto::TaskState::Failed,
    };
    mapped as i32
}

/// Implementation of the `Node` service.
pub struct NodeService {
    blocks: Arc<BlockManager>,
    executor: Arc<TaskExecutor>,
}

impl NodeService {
    /// Creates the service.
    #[must_use]
    pub fn new(blocks: Arc<BlockManager>, executor: Arc<TaskExecutor>) -> Self {
        Self { blocks, executor }
    }
}

#[tonic::async_trait]
impl proto::node_server::Node for NodeService {
    async fn echo(
        &self,
        request: Request<proto::EchoRequest>,
    ) -> Result<Response<proto::EchoResponse>, Status> {
        let name = request.into_inner().name;
        Ok(Response::new(proto::EchoResponse {
            message: format!("This is from nebula: {name}"),
        }))
    }

    async fn state(
        &self,
        _request: Request<proto::NodeStateRequest>,
    ) -> Result<Response<proto::NodeStateResponse>, Status> {
        let (block_count, row_count, mem_bytes) = self.blocks.state();
        Ok(Response::new(proto::NodeStateResponse {
            block_count,
            row_count,
            mem_bytes,
        }))
    }

    async fn blocks(
        &self,
        _request: Request<proto::BlocksRequest>,
    ) -> Result<Response<proto::BlocksResponse>, Status> {
        let blocks = self
            .blocks
            .all()
            .into_iter()
            .map(|b| proto::BlockSummary {
                spec: b.spec,
                table: b.table,
                epoch: b.epoch,
                rows: b.rows,
                raw_bytes: b.raw_bytes,
                min_time: b.window.begin,
                max_time: b.window.end,
            })
            .collect();
        Ok(Response::new(proto::BlocksResponse { blocks }))
    }

    async fn task(
        &self,
        request: Request<proto::TaskRequest>,
    ) -> Result<Response<proto::TaskResponse>, Status> {
        let task = Task::from_bytes(&request.into_inner().task)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        debug!(signature = %task.signature, "task received");
        let state = self.executor.execute(&task);
        Ok(Response::new(proto::TaskResponse {
            state: task_state_wire(state),
        }))
    }

    type QueryStream = ReceiverStream<Result<proto::RowBatch, Status>>;

    async fn query(
        &self,
        request: Request<proto::PlanFragment>,
    ) -> Result<Response<Self::QueryStream>, Status> {
        let plan = PlanFragment::from_bytes(&request.into_inner().plan)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let rows = FragmentExecutor
            .execute(&self.blocks, &plan)
            .map_err(|e| {
                warn!(table = %plan.table, error = %e, "fragment execution failed");
                Status::internal(e.to_string())
            })?;

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            for chunk in rows.chunks(BATCH_ROWS) {
                let data = match serde_json::to_vec(chunk) {
                    Ok(data) => data,
                    Err(e) => {
                        let _ = tx.send(Err(Status::internal(e.to_string()))).await;
                        return;
                    }
                };
                if tx.send(Ok(proto::RowBatch { data })).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
