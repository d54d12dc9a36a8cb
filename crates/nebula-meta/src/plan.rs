//! Query plan fragments.
//!
//! The DSL front end compiles a request into one [`PlanFragment`]; the
//! coordinator sends the same fragment to every node holding blocks of
//! the table and merges the partial results. The fragment is deliberately
//! small: a table, a window, an optional predicate, grouping dimensions
//! and aggregates.

use serde::{Deserialize, Serialize};

use nebula_common::{NebulaError, NebulaResult, TimeRange};

/// Comparison operators the thin predicate language supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
}

/// A single-column predicate, `column <op> value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    /// Column the predicate applies to.
    pub column: String,
    /// Comparison operator.
    pub op: CompareOp,
    /// Right-hand literal, compared textually for dimensions and
    /// numerically for metrics.
    pub value: String,
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    /// Row count.
    Count,
    /// Numeric sum.
    Sum,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Arithmetic mean.
    Avg,
}

impl AggFunc {
    /// Parses the wire name of a function.
    pub fn parse(name: &str) -> NebulaResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            other => Err(NebulaError::PlanCompileFailed {
                message: format!("unknown aggregate function: {other}"),
            }),
        }
    }

    /// Wire name of the function.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
        }
    }
}

/// One aggregate output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Input column; ignored for `Count`.
    pub column: String,
    /// Function applied.
    pub func: AggFunc,
}

impl Aggregate {
    /// Output column name, e.g. `count(user)`.
    #[must_use]
    pub fn output_name(&self) -> String {
        format!("{}({})", self.func.name(), self.column)
    }
}

/// The per-node unit of query execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFragment {
    /// Table to scan.
    pub table: String,
    /// Column carrying event time, for row-level window filtering.
    pub time_column: String,
    /// Time window to scan.
    pub window: TimeRange,
    /// Optional row predicate.
    pub filter: Option<Predicate>,
    /// Grouping dimensions; empty means one global group.
    pub dimensions: Vec<String>,
    /// Aggregate outputs; at least one.
    pub aggregates: Vec<Aggregate>,
}

impl PlanFragment {
    /// Serialises for the wire.
    pub fn to_bytes(&self) -> NebulaResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| NebulaError::InvalidArgument {
            message: format!("plan encode: {e}"),
        })
    }

    /// Deserialises from the wire.
    pub fn from_bytes(bytes: &[u8]) -> NebulaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| NebulaError::InvalidArgument {
            message: format!("plan decode: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_round_trip() {
        let plan = PlanFragment {
            table: "events".to_string(),
            time_column: "ts".to_string(),
            window: TimeRange::new(0, 3600),
            filter: Some(Predicate {
                column: "user".to_string(),
                op: CompareOp::Eq,
                value: "u1".to_string(),
            }),
            dimensions: vec!["country".to_string()],
            aggregates: vec![Aggregate {
                column: "value".to_string(),
                func: AggFunc::Sum,
            }],
        };
        let decoded = PlanFragment::from_bytes(&plan.to_bytes().unwrap()).unwrap();
        assert_eq!(plan, decoded);
    }

    #[test]
    fn test_agg_func_parse() {
        assert_eq!(AggFunc::parse("COUNT").unwrap(), AggFunc::Count);
        assert_eq!(AggFunc::parse("sum").unwrap(), AggFunc::Sum);
        assert!(AggFunc::parse("median").is_err());
    }

    #[test]
    fn test_output_name() {
        let agg = Aggregate {
            column: "value".to_string(),
            func: AggFunc::Avg,
        };
        assert_eq!(agg.output_name(), "avg(value)");
    }
}
