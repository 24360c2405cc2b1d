use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregation;
pub mod column;
pub mod cube;
pub mod export;
pub mod grouping;
pub mod loader;
pub mod naming;
pub mod query;
pub mod spec;

/// Field holding the record id when none is configured
pub const DEFAULT_ID_FIELD: &str = "sale_id";

/// Name of the traceability column appended after the generated names
pub const TRACEABILITY_COLUMN: &str = "sale_ids";

/// Date format used for parsing and rendering `Value::Date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Stable, unique identifier of a fact record
pub type RecordId = i64;

/// Error type used across the crate
#[derive(Debug, Error)]
pub enum CubeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid specification: {0}")]
    InvalidSpecification(String),

    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    #[error("No records left to aggregate")]
    EmptyInput,

    #[error("Cube has no rows to query")]
    EmptyCube,

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Duplicate record id: {0}")]
    DuplicateRecordId(RecordId),

    #[error("Schema/parse error: {0}")]
    Parse(String),

    #[error("Integer overflow: {0}")]
    Overflow(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

#[derive(Debug)]
pub struct ParseSummary {
    pub rows_processed: usize,
    pub errors: Vec<ParseError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// 1-based line number in the source file, header included
    pub row: usize,
    pub column: String,
    pub value: String,
    pub error: String,
}

/// Scalar field value
#[derive(Debug, Clone)]
pub enum Value {
    /// Integer column
    Int(i64),
    /// Float column
    Float(f64),
    /// String column
    Str(String),
    /// Calendar date column
    Date(NaiveDate),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::Float(_) => 1,
            Value::Str(_) => 2,
            Value::Date(_) => 3,
        }
    }

    /// Numeric view of the value, `None` for text and dates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(_) | Value::Date(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural ordering: numbers compare numerically (an `Int` sorts before an
/// equal `Float`), then text, then dates.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Str(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            // Debug keeps the fractional part ("20.0") so the type survives a reload
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Str(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

/// Aggregate operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    /// Sum of the present numeric values
    Sum,
    /// Arithmetic mean of the present numeric values
    Mean,
    /// Number of records in the group
    Count,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl AggregateOp {
    /// Name used as the column suffix
    pub fn name(self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Mean => "mean",
            AggregateOp::Count => "count",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
        }
    }

    /// Whether the operation needs a numeric column
    pub fn requires_numeric(self) -> bool {
        matches!(self, AggregateOp::Sum | AggregateOp::Mean)
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateOp {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sum" => Ok(AggregateOp::Sum),
            "mean" => Ok(AggregateOp::Mean),
            "count" => Ok(AggregateOp::Count),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            other => Err(CubeError::UnsupportedAggregation(other.to_string())),
        }
    }
}
