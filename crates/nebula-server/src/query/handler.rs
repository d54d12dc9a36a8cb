//! Query compilation, fan-out and merge.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use nebula_client::NodeConnector;
use nebula_common::TimeRange;
use nebula_meta::plan::{AggFunc, Aggregate, CompareOp, PlanFragment, Predicate};
use nebula_meta::Table;
use nebula_proto::proto;

use crate::query::cursor::Cursor;
use crate::query::udaf::{merger_for, Merger};
use crate::runtime::Runtime;

/// Query-path errors, mapped one-to-one onto the wire error codes.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request itself is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The table does not exist.
    #[error("invalid table: {0}")]
    InvalidTable(String),
    /// The request references columns or functions the table lacks.
    #[error("compile error: {0}")]
    Compile(String),
    /// A node failed mid-execution.
    #[error("execution error: {0}")]
    Execution(String),
}

/// Authenticated caller identity forwarded with every query.
///
/// The compiler consumes it for row- and column-level predicates; the
/// thin fan-out records it for audit.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Caller user name.
    pub user: String,
    /// Caller group set.
    pub groups: HashSet<String>,
}

impl QueryContext {
    /// Context for callers without auth metadata.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            user: "unauth".to_string(),
            groups: HashSet::new(),
        }
    }
}

/// A merged query result.
#[derive(Debug)]
pub struct QueryOutcome {
    /// The merged cursor.
    pub cursor: Cursor,
    /// Output column order for serialisation.
    pub output: Vec<String>,
    /// Partial rows received across nodes.
    pub rows_scanned: u64,
}

/// Compiles requests and fans them out across the fleet.
pub struct QueryHandler {
    runtime: Arc<Runtime>,
    connector: Arc<dyn NodeConnector>,
}

impl QueryHandler {
    /// Creates a handler.
    pub fn new(runtime: Arc<Runtime>, connector: Arc<dyn NodeConnector>) -> Self {
        Self { runtime, connector }
    }

    /// Validates a request against the catalogue and builds the fragment
    /// every node will execute.
    pub fn compile(
        &self,
        request: &proto::QueryRequest,
        ctx: &QueryContext,
    ) -> Result<PlanFragment, QueryError> {
        let table = self
            .runtime
            .tables()
            .query(&request.table)
            .ok_or_else(|| QueryError::InvalidTable(request.table.clone()))?;

        if request.aggregate.is_empty() {
            return Err(QueryError::InvalidQuery(
                "query needs at least one aggregate".to_string(),
            ));
        }

        let time_column = table
            .sources
            .first()
            .map(|s| s.time_column.clone())
            .ok_or_else(|| {
                QueryError::Compile(format!("table {} has no time column", table.name))
            })?;

        let mut aggregates = Vec::with_capacity(request.aggregate.len());
        for agg in &request.aggregate {
            let func = AggFunc::parse(&agg.func).map_err(|e| QueryError::Compile(e.to_string()))?;
            // `count(*)` counts rows; charge it to the time column.
            let column = if agg.column.is_empty() || agg.column == "*" {
                if func != AggFunc::Count {
                    return Err(QueryError::Compile(format!(
                        "{} needs a column",
                        func.name()
                    )));
                }
                time_column.clone()
            } else {
                require_column(&table, &agg.column)?;
                agg.column.clone()
            };
            aggregates.push(Aggregate { column, func });
        }

        for dim in &request.dimension {
            require_column(&table, dim)?;
        }

        let filter = parse_filter(&table, &request.filter)?;

        // A zeroed window means "everything".
        let window = if request.start == 0 && request.end == 0 {
            TimeRange::MAX
        } else {
            TimeRange::new(request.start, request.end)
        };

        debug!(
            table = %table.name,
            user = %ctx.user,
            groups = ctx.groups.len(),
            "query compiled"
        );
        Ok(PlanFragment {
            table: table.name.clone(),
            time_column,
            window,
            filter,
            dimensions: request.dimension.clone(),
            aggregates,
        })
    }

    /// Fans the fragment out to every active worker and merges partials.
    pub async fn query(&self, plan: &PlanFragment) -> Result<QueryOutcome, QueryError> {
        let ci = self.runtime.cluster();
        // Nodes the reconciler has demoted carry `active = false` in the
        // snapshot; they are excluded before any dial rather than eating
        // a connect timeout per query.
        let workers: Vec<_> = ci
            .workers()
            .filter(|n| n.is_active())
            .map(|n| n.id.clone())
            .collect();

        let mut join = JoinSet::new();
        for id in workers {
            let connector = Arc::clone(&self.connector);
            let fanout = self.runtime.fanout();
            let plan = plan.clone();
            join.spawn(async move {
                let _permit = fanout.acquire_owned().await;
                let result = async {
                    let client = connector.make_client(&id).await?;
                    client.query(plan).await
                }
                .await;
                (id, result)
            });
        }

        let mut node_cursors = Vec::new();
        let mut rows_scanned = 0u64;
        while let Some(joined) = join.join_next().await {
            let Ok((id, result)) = joined else { continue };
            match result {
                Ok(batches) => {
                    let mut rows = Vec::new();
                    for batch in batches {
                        let decoded: Vec<Value> =
                            serde_json::from_slice(&batch).map_err(|e| {
                                QueryError::Execution(format!("bad batch from {id}: {e}"))
                            })?;
                        rows.extend(decoded);
                    }
                    rows_scanned += rows.len() as u64;
                    node_cursors.push(Cursor::Block(rows));
                }
                Err(e) if e.established() => {
                    return Err(QueryError::Execution(e.to_string()));
                }
                Err(e) => {
                    // A node that cannot be reached holds no reachable
                    // blocks; skip it like the control plane does.
                    warn!(node = %id, error = %e, "query skipping unreachable node");
                }
            }
        }

        let partials = Cursor::Composite(node_cursors);
        let merged = merge_partials(plan, partials.into_rows());
        let output = output_columns(plan);
        info!(
            table = %plan.table,
            groups = merged.len(),
            rows_scanned,
            "query merged"
        );
        Ok(QueryOutcome {
            cursor: Cursor::Flat(merged),
            output,
            rows_scanned,
        })
    }
}

/// Output column order: dimensions then aggregates.
#[must_use]
pub fn output_columns(plan: &PlanFragment) -> Vec<String> {
    plan.dimensions
        .iter()
        .cloned()
        .chain(plan.aggregates.iter().map(Aggregate::output_name))
        .collect()
}

/// Merges per-node partial rows into final rows.
fn merge_partials(plan: &PlanFragment, partial_rows: Vec<Value>) -> Vec<Value> {
    let mut groups: BTreeMap<Vec<String>, Vec<Box<dyn Merger>>> = BTreeMap::new();

    for row in &partial_rows {
        let key: Vec<String> = plan
            .dimensions
            .iter()
            .map(|d| text_of(row.get(d)))
            .collect();
        let states = groups.entry(key).or_insert_with(|| {
            plan.aggregates
                .iter()
                .map(|a| merger_for(a.func))
                .collect()
        });
        for (state, agg) in states.iter_mut().zip(&plan.aggregates) {
            state.accept(row.get(&agg.output_name()).unwrap_or(&Value::Null));
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, states) in groups {
        let mut obj = Map::new();
        for (dim, value) in plan.dimensions.iter().zip(key) {
            obj.insert(dim.clone(), Value::String(value));
        }
        for (state, agg) in states.iter().zip(&plan.aggregates) {
            obj.insert(agg.output_name(), state.finish());
        }
        out.push(Value::Object(obj));
    }
    out
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn require_column(table: &Table, column: &str) -> Result<(), QueryError> {
    if table.schema.kind_of(column).is_some() {
        Ok(())
    } else {
        Err(QueryError::Compile(format!(
            "table {} has no column {column}",
            table.name
        )))
    }
}

/// Parses `column=value` / `column!=value`; empty means no filter.
fn parse_filter(table: &Table, text: &str) -> Result<Option<Predicate>, QueryError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let (column, op, value) = if let Some((c, v)) = text.split_once("!=") {
        (c, CompareOp::Neq, v)
    } else if let Some((c, v)) = text.split_once('=') {
        (c, CompareOp::Eq, v)
    } else {
        return Err(QueryError::InvalidQuery(format!(
            "unparseable filter: {text}"
        )));
    };

    let column = column.trim();
    require_column(table, column)?;
    Ok(Some(Predicate {
        column: column.to_string(),
        op,
        value: value.trim().trim_matches('\'').to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(dims: Vec<&str>, aggs: Vec<(&str, AggFunc)>) -> PlanFragment {
        PlanFragment {
            table: "events".to_string(),
            time_column: "ts".to_string(),
            window: TimeRange::MAX,
            filter: None,
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
    fn test_merge_counts_across_nodes() {
        let plan = plan(vec![], vec![("ts", AggFunc::Count)]);
        let merged = merge_partials(
            &plan,
            vec![json!({"count(ts)": 3}), json!({"count(ts)": 4})],
        );
        assert_eq!(merged, vec![json!({"count(ts)": 7})]);
    }

    #[test]
    fn test_merge_grouped_sums() {
        let plan = plan(vec!["user"], vec![("value", AggFunc::Sum)]);
        let merged = merge_partials(
            &plan,
            vec![
                json!({"user": "u1", "sum(value)": 2.0}),
                json!({"user": "u2", "sum(value)": 5.0}),
                json!({"user": "u1", "sum(value)": 3.0}),
            ],
        );
        assert_eq!(
            merged,
            vec![
                json!({"user": "u1", "sum(value)": 5.0}),
                json!({"user": "u2", "sum(value)": 5.0}),
            ]
        );
    }

    #[test]
    fn test_output_columns_order() {
        let plan = plan(vec!["user"], vec![("value", AggFunc::Max)]);
        assert_eq!(output_columns(&plan), vec!["user", "max(value)"]);
    }
}
