//! Task execution and plan fragment evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tracing::{info, warn};

use nebula_common::NebulaResult;
use nebula_ingest::task::{Command, IngestionPayload};
use nebula_ingest::{Task, TaskPayload, TaskState};
use nebula_meta::plan::{AggFunc, CompareOp, PlanFragment, Predicate};

use crate::block::BlockManager;

/// Produces the rows behind an ingestion payload.
///
/// Concrete readers (CSV files, Kafka topics, object stores) live outside
/// the node crate and plug in here.
pub trait RowSource: Send + Sync {
    /// Fetches all rows of the payload's partition.
    fn fetch(&self, payload: &IngestionPayload) -> NebulaResult<Vec<Value>>;
}

/// In-memory row source keyed by partition path.
///
/// Used by tests and demos; a node built with an empty `StaticSource`
/// fails every ingestion, which is also useful for failure-path tests.
#[derive(Default)]
pub struct StaticSource {
    rows: DashMap<String, Vec<Value>>,
}

impl StaticSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the rows behind a partition path.
    pub fn insert(&self, uri: impl Into<String>, rows: Vec<Value>) {
        self.rows.insert(uri.into(), rows);
    }
}

impl RowSource for StaticSource {
    fn fetch(&self, payload: &IngestionPayload) -> NebulaResult<Vec<Value>> {
        self.rows
            .get(&payload.uri)
            .map(|r| r.clone())
            .ok_or_else(|| nebula_common::NebulaError::ExecutionFailed {
                message: format!("no rows registered for {}", payload.uri),
            })
    }
}

/// Executes coordinator tasks against the node's residency.
pub struct TaskExecutor {
    blocks: Arc<BlockManager>,
    source: Arc<dyn RowSource>,
    shutdown: Arc<Notify>,
}

impl TaskExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(blocks: Arc<BlockManager>, source: Arc<dyn RowSource>) -> Self {
        Self {
            blocks,
            source,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal fired when a shutdown command arrives.
    #[must_use]
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Runs one task to completion and reports its state.
    ///
    /// Execution is synchronous: by the time the RPC replies, effects are
    /// visible. `Queued`/`Running` replies exist on the wire for nodes
    /// that queue work; this implementation never needs them.
    pub fn execute(&self, task: &Task) -> TaskState {
        match &task.payload {
            TaskPayload::Ingestion(payload) => self.ingest(payload),
            TaskPayload::Expiration(expire) => {
                let removed = self.blocks.expire(&expire.specs);
                info!(requested = expire.specs.len(), removed, "expired blocks");
                TaskState::Succeeded
            }
            TaskPayload::Command(cmd) => match cmd.command {
                Command::Shutdown => {
                    info!("shutdown command received");
                    self.shutdown.notify_waiters();
                    TaskState::Succeeded
                }
            },
        }
    }

    fn ingest(&self, payload: &IngestionPayload) -> TaskState {
        // Same spec at the same freshness is already resident.
        if self.blocks.resident_mtime(&payload.signature) == Some(payload.mtime) {
            return TaskState::Succeeded;
        }

        let rows = match self.source.fetch(payload) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(spec = %payload.signature, error = %e, "ingest fetch failed");
                return TaskState::Failed;
            }
        };

        match self.blocks.add(
            &payload.signature,
            &payload.table,
            payload.mtime,
            &payload.time_column,
            &rows,
        ) {
            Ok(_) => TaskState::Succeeded,
            Err(e) => {
                warn!(spec = %payload.signature, error = %e, "ingest failed");
                TaskState::Failed
            }
        }
    }
}

/// Evaluates plan fragments against resident blocks.
///
/// Produces *partial* aggregates: one JSON row per group carrying each
/// aggregate's merge state under its output name. The coordinator merges
/// partials from all nodes and finalises them.
#[derive(Debug, Default, Clone, Copy)]
pub struct FragmentExecutor;

impl FragmentExecutor {
    /// Runs a fragment over the manager's residency.
    pub fn execute(&self, blocks: &BlockManager, plan: &PlanFragment) -> NebulaResult<Vec<Value>> {
        let rows = blocks.scan(&plan.table, &plan.window)?;

        // group key -> per-aggregate state
        let mut groups: BTreeMap<Vec<String>, Vec<AggState>> = BTreeMap::new();

        for row in rows {
            if !time_in_window(&row, plan) || !matches(&row, plan.filter.as_ref()) {
                continue;
            }
            let key: Vec<String> = plan
                .dimensions
                .iter()
                .map(|d| text_of(row.get(d)))
                .collect();
            let states = groups.entry(key).or_insert_with(|| {
                plan.aggregates.iter().map(|a| AggState::new(a.func)).collect()
            });
            for (state, agg) in states.iter_mut().zip(&plan.aggregates) {
                state.accept(row.get(agg.column.as_str()));
            }
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, states) in groups {
            let mut obj = Map::new();
            for (dim, value) in plan.dimensions.iter().zip(key) {
                obj.insert(dim.clone(), Value::String(value));
            }
            for (state, agg) in states.iter().zip(&plan.aggregates) {
                obj.insert(agg.output_name(), state.partial());
            }
            out.push(Value::Object(obj));
        }
        Ok(out)
    }
}

/// Partial state of one aggregate over one group.
#[derive(Debug, Clone, Copy)]
enum AggState {
    Count(u64),
    Sum(f64),
    Min(Option<f64>),
    Max(Option<f64>),
    Avg { sum: f64, count: u64 },
}

impl AggState {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Self::Count(0),
            AggFunc::Sum => Self::Sum(0.0),
            AggFunc::Min => Self::Min(None),
            AggFunc::Max => Self::Max(None),
            AggFunc::Avg => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    fn accept(&mut self, value: Option<&Value>) {
        let number = value.and_then(Value::as_f64);
        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(total) => {
                if let Some(v) = number {
                    *total += v;
                }
            }
            Self::Min(min) => {
                if let Some(v) = number {
                    *min = Some(min.map_or(v, |m| m.min(v)));
                }
            }
            Self::Max(max) => {
                if let Some(v) = number {
                    *max = Some(max.map_or(v, |m| m.max(v)));
                }
            }
            Self::Avg { sum, count } => {
                if let Some(v) = number {
                    *sum += v;
                    *count += 1;
                }
            }
        }
    }

    fn partial(&self) -> Value {
        match self {
            Self::Count(n) => json!(n),
            Self::Sum(total) => json!(total),
            Self::Min(min) => min.map_or(Value::Null, |v| json!(v)),
            Self::Max(max) => max.map_or(Value::Null, |v| json!(v)),
            Self::Avg { sum, count } => json!({ "sum": sum, "count": count }),
        }
    }
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn time_in_window(row: &Value, plan: &PlanFragment) -> bool {
    row.get(&plan.time_column)
        .and_then(Value::as_i64)
        .is_some_and(|t| plan.window.contains(t))
}

fn matches(row: &Value, filter: Option<&Predicate>) -> bool {
    let Some(pred) = filter else { return true };
    let field = row.get(&pred.column);
    let equal = match field {
        Some(Value::String(s)) => s == &pred.value,
        Some(Value::Number(n)) => pred
            .value
            .parse::<f64>()
            .is_ok_and(|v| n.as_f64() == Some(v)),
        Some(Value::Bool(b)) => pred.value.parse::<bool>().is_ok_and(|v| *b == v),
        _ => false,
    };
    match pred.op {
        CompareOp::Eq => equal,
        CompareOp::Neq => !equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_common::memory::Pool;
    use nebula_common::TimeRange;
    use nebula_ingest::{BlockExpire, IngestSpec};
    use nebula_meta::plan::Aggregate;
    use nebula_meta::DataFormat;

    fn setup() -> (Arc<BlockManager>, Arc<StaticSource>, TaskExecutor) {
        let blocks = BlockManager::new(Pool::shared(1024));
        let source = StaticSource::new();
        let exec = TaskExecutor::new(Arc::clone(&blocks), source.clone() as Arc<dyn RowSource>);
        (blocks, source, exec)
    }

    fn sample_spec(uri: &str) -> IngestSpec {
        IngestSpec::new("events", 0, uri, DataFormat::Csv, "ts", 64, 5)
    }

    fn sample_rows() -> Vec<Value> {
        vec![
            json!({"ts": 10, "user": "u1", "value": 3.0}),
            json!({"ts": 20, "user": "u1", "value": 5.0}),
            json!({"ts": 30, "user": "u2", "value": 7.0}),
        ]
    }

    #[test]
    fn test_ingestion_task_builds_block() {
        let (blocks, source, exec) = setup();
        source.insert("/p0", sample_rows());

        let state = exec.execute(&Task::ingestion(&sample_spec("/p0")));
        assert_eq!(state, TaskState::Succeeded);
        assert_eq!(blocks.state(), (1, 3, blocks.all()[0].raw_bytes));

        // Same freshness again: idempotent success, same epoch.
        let epoch = blocks.all()[0].epoch;
        assert_eq!(
            exec.execute(&Task::ingestion(&sample_spec("/p0"))),
            TaskState::Succeeded
        );
        assert_eq!(blocks.all()[0].epoch, epoch);
    }

    #[test]
    fn test_ingestion_without_rows_fails() {
        let (_, _, exec) = setup();
        assert_eq!(
            exec.execute(&Task::ingestion(&sample_spec("/missing"))),
            TaskState::Failed
        );
    }

    #[test]
    fn test_expiration_task() {
        let (blocks, source, exec) = setup();
        source.insert("/p0", sample_rows());
        let spec = sample_spec("/p0");
        exec.execute(&Task::ingestion(&spec));

        let state = exec.execute(&Task::expiration(BlockExpire::new(vec![
            spec.signature().to_string(),
        ])));
        assert_eq!(state, TaskState::Succeeded);
        assert!(blocks.all().is_empty());
    }

    fn plan(filter: Option<Predicate>, dims: Vec<&str>, aggs: Vec<(&str, AggFunc)>) -> PlanFragment {
        PlanFragment {
            table: "events".to_string(),
            time_column: "ts".to_string(),
            window: TimeRange::new(0, 100),
            filter,
            dimensions: dims.into_iter().map(String::from).collect(),
            aggregates: aggs
                .into_iter()
                .map(|(c, f)| Aggregate {
                    column: c.to_string(),
                    func: f,
                })
                .collect(),
        }
    }

    #[test]
    fn test_fragment_count_with_filter() {
        let (blocks, source, exec) = setup();
        source.insert("/p0", sample_rows());
        exec.execute(&Task::ingestion(&sample_spec("/p0")));

        let fragment = plan(
            Some(Predicate {
                column: "user".to_string(),
                op: CompareOp::Eq,
                value: "u1".to_string(),
            }),
            vec![],
            vec![("value", AggFunc::Count)],
        );
        let out = FragmentExecutor.execute(&blocks, &fragment).unwrap();
        assert_eq!(out, vec![json!({"count(value)": 2})]);
    }

    #[test]
    fn test_fragment_grouped_partials() {
        let (blocks, source, exec) = setup();
        source.insert("/p0", sample_rows());
        exec.execute(&Task::ingestion(&sample_spec("/p0")));

        let fragment = plan(
            None,
            vec!["user"],
            vec![("value", AggFunc::Sum), ("value", AggFunc::Avg)],
        );
        let out = FragmentExecutor.execute(&blocks, &fragment).unwrap();
        assert_eq!(
            out,
            vec![
                json!({"user": "u1", "sum(value)": 8.0, "avg(value)": {"sum": 8.0, "count": 2}}),
                json!({"user": "u2", "sum(value)": 7.0, "avg(value)": {"sum": 7.0, "count": 1}}),
            ]
        );
    }

    #[test]
    fn test_fragment_window_excludes_rows() {
        let (blocks, source, exec) = setup();
        source.insert("/p0", sample_rows());
        exec.execute(&Task::ingestion(&sample_spec("/p0")));

        let mut fragment = plan(None, vec![], vec![("value", AggFunc::Count)]);
        fragment.window = TimeRange::new(15, 25);
        // Block window [10,30] overlaps, but only ts=20 passes row filtering.
        let out = FragmentExecutor.execute(&blocks, &fragment).unwrap();
        assert_eq!(out, vec![json!({"count(value)": 1})]);
    }
}
