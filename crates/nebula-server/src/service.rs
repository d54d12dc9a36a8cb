//! Coordinator gRPC surface.

use std::sync::Arc;
use std::time::Instant;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use nebula_client::NodeConnector;
use nebula_proto::proto;

use crate::query::handler::{QueryContext, QueryError, QueryHandler};
use crate::runtime::Runtime;

/// Implementation of the `V1` service.
pub struct V1Service {
    runtime: Arc<Runtime>,
    handler: QueryHandler,
    #[cfg_attr(not(feature = "nuclear"), allow(dead_code))]
    connector: Arc<dyn NodeConnector>,
    max_tables: usize,
}

impl V1Service {
    /// Creates the service.
    pub fn new(
        runtime: Arc<Runtime>,
        connector: Arc<dyn NodeConnector>,
        max_tables: usize,
    ) -> Self {
        Self {
            handler: QueryHandler::new(Arc::clone(&runtime), Arc::clone(&connector)),
            runtime,
            connector,
            max_tables,
        }
    }

    fn error_reply(code: proto::ErrorCode, message: String, elapsed_ms: u64) -> proto::QueryResponse {
        proto::QueryResponse {
            r#type: proto::DataType::Json as i32,
            stats: Some(proto::Statistics {
                error: code as i32,
                message,
                query_time_ms: elapsed_ms,
                rows_scanned: 0,
            }),
            data: Vec::new(),
        }
    }
}

fn code_of(err: &QueryError) -> proto::ErrorCode {
    match err {
        QueryError::InvalidQuery(_) => proto::ErrorCode::InvalidQuery,
        QueryError::InvalidTable(_) => proto::ErrorCode::InvalidTable,
        QueryError::Compile(_) => proto::ErrorCode::CompileError,
        QueryError::Execution(_) => proto::ErrorCode::ExecutionError,
    }
}

/// Pulls `(user, groups)` out of the request metadata.
///
/// Keys are `nebula-auth` (gate, must be `"1"`), `nebula-user` and
/// `nebula-groups` (comma-separated), matching what the serving front end
/// forwards.
fn auth_context<T>(request: &Request<T>) -> QueryContext {
    let metadata = request.metadata();
    let authed = metadata
        .get("nebula-auth")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "1");
    if !authed {
        return QueryContext::unauthenticated();
    }

    let user = metadata
        .get("nebula-user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unauth")
        .to_string();
    let groups = metadata
        .get("nebula-groups")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    QueryContext { user, groups }
}

#[tonic::async_trait]
impl proto::v1_server::V1 for V1Service {
    async fn tables(
        &self,
        request: Request<proto::ListTables>,
    ) -> Result<Response<proto::TableList>, Status> {
        let mut limit = request.into_inner().limit as usize;
        if limit < 1 {
            limit = self.max_tables;
        }
        let table = self.runtime.tables().names(limit);
        info!(tables = table.len(), "served table list");
        Ok(Response::new(proto::TableList { table }))
    }

    async fn state(
        &self,
        request: Request<proto::TableStateRequest>,
    ) -> Result<Response<proto::TableStateResponse>, Status> {
        let name = request.into_inner().table;
        let table = self
            .runtime
            .tables()
            .query(&name)
            .ok_or_else(|| Status::not_found(format!("no such table: {name}")))?;

        let metrics = self.runtime.table_metrics(&name);
        let (dimension, metric) = table.schema.split();
        let reply = proto::TableStateResponse {
            block_count: metrics.map_or(0, |m| m.block_count),
            row_count: metrics.map_or(0, |m| m.row_count),
            mem_size: metrics.map_or(0, |m| m.mem_bytes),
            min_time: metrics.map_or(0, |m| m.window.begin),
            max_time: metrics.map_or(0, |m| m.window.end),
            dimension: dimension.into_iter().map(str::to_string).collect(),
            metric: metric.into_iter().map(str::to_string).collect(),
        };
        info!(table = %name, "served table state");
        Ok(Response::new(reply))
    }

    async fn query(
        &self,
        request: Request<proto::QueryRequest>,
    ) -> Result<Response<proto::QueryResponse>, Status> {
        let started = Instant::now();
        let ctx = auth_context(&request);
        let query = request.into_inner();

        #[cfg(feature = "nuclear")]
        if query.table == "_nuclear_" {
            return self.nuclear().await;
        }

        let plan = match self.handler.compile(&query, &ctx) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(table = %query.table, error = %e, "query rejected");
                return Ok(Response::new(Self::error_reply(
                    code_of(&e),
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                )));
            }
        };

        info!(table = %plan.table, user = %ctx.user, "query started");
        let outcome = match self.handler.query(&plan).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(table = %plan.table, error = %e, "query failed");
                return Ok(Response::new(Self::error_reply(
                    code_of(&e),
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                )));
            }
        };

        let data = outcome
            .cursor
            .as_buffer(&outcome.output)
            .map_err(|e| Status::internal(e.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(table = %plan.table, elapsed_ms, "query finished");

        Ok(Response::new(proto::QueryResponse {
            r#type: proto::DataType::Json as i32,
            stats: Some(proto::Statistics {
                error: proto::ErrorCode::None as i32,
                message: String::new(),
                query_time_ms: elapsed_ms.max(1),
                rows_scanned: outcome.rows_scanned,
            }),
            data,
        }))
    }
}

#[cfg(feature = "nuclear")]
impl V1Service {
    /// Operational escape hatch: sends a shutdown command to the first
    /// configured worker. Compiled in only with the `nuclear` feature.
    async fn nuclear(&self) -> Result<Response<proto::QueryResponse>, Status> {
        use nebula_ingest::{CommandTask, Task};

        warn!("nuclear command received, shutting down a node");
        let ci = self.runtime.cluster();
        let target = ci
            .workers()
            .next()
            .map(|n| n.id.clone())
            .ok_or_else(|| Status::failed_precondition("cluster has no nodes"))?;

        let client = self
            .connector
            .make_client(&target)
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;
        client
            .task(Task::command(CommandTask::shutdown()))
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;
        Ok(Response::new(Self::error_reply(
            proto::ErrorCode::None,
            String::new(),
            0,
        )))
    }
}

/// Implementation of the `Echo` service.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoService;

#[tonic::async_trait]
impl proto::echo_server::Echo for EchoService {
    async fn echo_back(
        &self,
        request: Request<proto::EchoRequest>,
    ) -> Result<Response<proto::EchoResponse>, Status> {
        let name = request.into_inner().name;
        Ok(Response::new(proto::EchoResponse {
            message: format!("This is from nebula: {name}"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_context_requires_gate() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert("nebula-user", "alice".parse().unwrap());
        // No nebula-auth gate: identity is ignored.
        let ctx = auth_context(&request);
        assert_eq!(ctx.user, "unauth");

        request
            .metadata_mut()
            .insert("nebula-auth", "1".parse().unwrap());
        request
            .metadata_mut()
            .insert("nebula-groups", "eng,ops".parse().unwrap());
        let ctx = auth_context(&request);
        assert_eq!(ctx.user, "alice");
        assert!(ctx.groups.contains("eng"));
        assert!(ctx.groups.contains("ops"));
    }
}
