//! Result cursors.
//!
//! Every shape a result set can take is one variant of a closed sum; the
//! single `as_buffer` operation dispatches on the tag. This replaces the
//! open multi-method registration the serialisation layer grew out of.

use serde_json::{Map, Value};

use nebula_common::{NebulaError, NebulaResult};

/// A result cursor over JSON rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Partial rows produced by one node's block execution.
    Block(Vec<Value>),
    /// Sampled raw rows (no aggregate merge applies).
    Samples(Vec<Value>),
    /// Fully merged flat rows.
    Flat(Vec<Value>),
    /// Several cursors chained in order.
    Composite(Vec<Cursor>),
    /// Empty cursor for tests.
    Mock,
}

impl Cursor {
    /// Total rows behind the cursor.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Block(rows) | Self::Samples(rows) | Self::Flat(rows) => rows.len(),
            Self::Composite(cursors) => cursors.iter().map(Cursor::len).sum(),
            Self::Mock => 0,
        }
    }

    /// Returns true if no rows are behind the cursor.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into owned rows, in cursor order.
    #[must_use]
    pub fn into_rows(self) -> Vec<Value> {
        match self {
            Self::Block(rows) | Self::Samples(rows) | Self::Flat(rows) => rows,
            Self::Composite(cursors) => cursors.into_iter().flat_map(Cursor::into_rows).collect(),
            Self::Mock => Vec::new(),
        }
    }

    /// Serialises the cursor as a JSON array, projecting every row onto
    /// `output` columns in order (absent fields become null).
    pub fn as_buffer(&self, output: &[String]) -> NebulaResult<Vec<u8>> {
        let projected: Vec<Value> = match self {
            Self::Block(rows) | Self::Samples(rows) | Self::Flat(rows) => {
                rows.iter().map(|r| project(r, output)).collect()
            }
            Self::Composite(cursors) => {
                let mut all = Vec::with_capacity(self.len());
                for cursor in cursors {
                    let nested = cursor.clone().into_rows();
                    all.extend(nested.iter().map(|r| project(r, output)));
                }
                all
            }
            Self::Mock => Vec::new(),
        };
        serde_json::to_vec(&projected).map_err(|e| NebulaError::ExecutionFailed {
            message: format!("result encode: {e}"),
        })
    }
}

fn project(row: &Value, output: &[String]) -> Value {
    let mut obj = Map::with_capacity(output.len());
    for column in output {
        obj.insert(
            column.clone(),
            row.get(column).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_projection_orders_and_fills() {
        let cursor = Cursor::Flat(vec![json!({"b": 2, "a": 1})]);
        let buffer = cursor.as_buffer(&columns(&["a", "b", "c"])).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&buffer).unwrap(),
            json!([{"a": 1, "b": 2, "c": null}])
        );
    }

    #[test]
    fn test_composite_chains_in_order() {
        let cursor = Cursor::Composite(vec![
            Cursor::Block(vec![json!({"n": 1})]),
            Cursor::Mock,
            Cursor::Samples(vec![json!({"n": 2}), json!({"n": 3})]),
        ]);
        assert_eq!(cursor.len(), 3);
        let rows = cursor.into_rows();
        assert_eq!(rows, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    }

    #[test]
    fn test_mock_is_empty_array() {
        let buffer = Cursor::Mock.as_buffer(&columns(&["x"])).unwrap();
        assert_eq!(buffer, b"[]");
    }
}
