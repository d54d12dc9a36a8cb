//! Row schema and its text codec.
//!
//! Table schemas are declared in config as `ROW<name:TYPE, ...>`. The type
//! tree is deliberately flat: compound columns are not supported in the
//! cluster config surface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing schema text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The text is not wrapped in `ROW<...>`.
    #[error("schema must have the form ROW<col:TYPE,...>, got: {0}")]
    NotARow(String),

    /// A column entry is not `name:TYPE`.
    #[error("malformed column entry: {0}")]
    MalformedColumn(String),

    /// Unrecognised type name.
    #[error("unknown column type: {0}")]
    UnknownType(String),

    /// The same column name appears twice.
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    /// A row type with no columns.
    #[error("schema has no columns")]
    Empty,
}

/// Scalar column kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Boolean.
    Bool,
    /// 8-bit signed integer.
    Byte,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
}

impl Kind {
    /// Returns true for kinds that aggregate as metrics.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Int | Self::Long | Self::Float | Self::Double
        )
    }

    /// Canonical type name used in schema text.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "BOOLEAN",
            Self::Byte => "TINYINT",
            Self::Short => "SMALLINT",
            Self::Int => "INTEGER",
            Self::Long => "BIGINT",
            Self::Float => "REAL",
            Self::Double => "DOUBLE",
            Self::String => "VARCHAR",
        }
    }
}

impl FromStr for Kind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both canonical SQL names and the short aliases used in
        // hand-written configs.
        match s.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Ok(Self::Bool),
            "BYTE" | "TINYINT" => Ok(Self::Byte),
            "SHORT" | "SMALLINT" => Ok(Self::Short),
            "INT" | "INTEGER" => Ok(Self::Int),
            "LONG" | "BIGINT" => Ok(Self::Long),
            "FLOAT" | "REAL" => Ok(Self::Float),
            "DOUBLE" => Ok(Self::Double),
            "STRING" | "VARCHAR" => Ok(Self::String),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column kind.
    pub kind: Kind,
}

/// A flat row schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Builds a schema from columns.
    ///
    /// Column order is meaningful and preserved.
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Parses schema text of the form `ROW<a:BIGINT, b:VARCHAR>`.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let trimmed = text.trim();
        let upper = trimmed.to_ascii_uppercase();
        if !upper.starts_with("ROW<") || !trimmed.ends_with('>') {
            return Err(SchemaError::NotARow(trimmed.to_string()));
        }
        let inner = &trimmed[4..trimmed.len() - 1];

        let mut columns = Vec::new();
        for entry in inner.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, ty) = entry
                .split_once(':')
                .ok_or_else(|| SchemaError::MalformedColumn(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(SchemaError::MalformedColumn(entry.to_string()));
            }
            columns.push(Column {
                name: name.to_string(),
                kind: ty.trim().parse()?,
            });
        }
        Self::new(columns)
    }

    /// All columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Looks up a column kind by name.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    /// Splits columns into `(dimensions, metrics)` by kind.
    ///
    /// Numeric columns are metrics; everything else is a dimension.
    #[must_use]
    pub fn split(&self) -> (Vec<&str>, Vec<&str>) {
        let mut dimensions = Vec::new();
        let mut metrics = Vec::new();
        for col in &self.columns {
            if col.kind.is_numeric() {
                metrics.push(col.name.as_str());
            } else {
                dimensions.push(col.name.as_str());
            }
        }
        (dimensions, metrics)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROW<")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", col.name, col.kind.name())?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let schema = Schema::parse("ROW<id:bigint, event:string, flag:bool>").unwrap();
        assert_eq!(schema.columns().len(), 3);
        assert_eq!(schema.kind_of("id"), Some(Kind::Long));
        assert_eq!(schema.kind_of("event"), Some(Kind::String));
        assert_eq!(schema.to_string(), "ROW<id:BIGINT,event:VARCHAR,flag:BOOLEAN>");

        // Canonical text parses back to an equal schema.
        let again = Schema::parse(&schema.to_string()).unwrap();
        assert_eq!(schema, again);
    }

    #[test]
    fn test_split_dimensions_metrics() {
        let schema = Schema::parse("ROW<user:string, country:string, value:double, ts:bigint>")
            .unwrap();
        let (dims, metrics) = schema.split();
        assert_eq!(dims, vec!["user", "country"]);
        assert_eq!(metrics, vec!["value", "ts"]);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            Schema::parse("id:bigint"),
            Err(SchemaError::NotARow(_))
        ));
        assert!(matches!(
            Schema::parse("ROW<id>"),
            Err(SchemaError::MalformedColumn(_))
        ));
        assert!(matches!(
            Schema::parse("ROW<id:decimal>"),
            Err(SchemaError::UnknownType(_))
        ));
        assert!(matches!(
            Schema::parse("ROW<a:int,a:int>"),
            Err(SchemaError::DuplicateColumn(_))
        ));
        assert_eq!(Schema::parse("ROW<>"), Err(SchemaError::Empty));
    }
}
