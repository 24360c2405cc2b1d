//! # olap_cube
//!
//! `olap_cube` builds pre-aggregated, multi-dimensional summary tables
//! ("cubes") from cleaned fact records. It supports:
//!
//! - Memory-mapped CSV loading of fact tables with per-column type inference
//! - Multi-key grouping with stable, ascending key order
//! - Several aggregations per metric field: sum, mean, count, min, max
//! - A traceability column listing the source record ids of every row
//! - Parallel group aggregation with Rayon, deterministic output order
//! - CSV export/reload of cubes and Arrow conversion
//! - Reporting helpers (totals per dimension value, least/most) with an LRU cache
//!
//! # Example
//!
//! ```rust
//! use olap_cube::{
//!     AggregateOp, ColumnType, DimensionSpec, Extremum, FactBatch, MetricSpec, Schema, Value,
//!     build_cube, extremum, sum_by_dimension_value,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Schema::new([
//!         ("id", ColumnType::Int64),
//!         ("type", ColumnType::Str),
//!         ("amt", ColumnType::Int64),
//!     ])?;
//!     let batch = FactBatch::from_rows(schema, "id", vec![
//!         vec![Some(Value::Int(1)), Some("cash".into()), Some(Value::Int(10))],
//!         vec![Some(Value::Int(2)), Some("card".into()), Some(Value::Int(20))],
//!         vec![Some(Value::Int(3)), Some("cash".into()), Some(Value::Int(5))],
//!     ])?;
//!
//!     let metrics = MetricSpec::new().metric("amt", [AggregateOp::Sum, AggregateOp::Mean]);
//!     let cube = build_cube(&batch, &DimensionSpec::new(["type"]), &metrics)?;
//!     assert_eq!(cube.columns(), ["type", "amt_sum", "amt_mean", "sale_ids"]);
//!     assert_eq!(cube.rows()[1].record_ids, vec![1, 3]);
//!
//!     let totals = sum_by_dimension_value(&cube, "type", "amt_sum")?;
//!     assert_eq!(extremum(&totals, Extremum::Min)?, (Value::from("cash"), 15.0));
//!     Ok(())
//! }
//! ```

mod helpers;
pub mod processor;

pub use processor::aggregation::{GroupAggregate, ResolvedMetric, aggregate, record_ids};
pub use processor::column::{ColumnType, FactBatch, FactRecord, Schema};
pub use processor::cube::{AggregateRow, Cube, CubeBuilder, CubeConfig, build_cube};
pub use processor::export::{load_cube, read_cube_csv, write_cube_csv, write_cube_to_dir};
pub use processor::grouping::{GroupKey, Partition, partition};
pub use processor::loader::{LoadOptions, load_facts};
pub use processor::naming::name_columns;
pub use processor::query::{CubeQuery, Extremum, extremum, sum_by_dimension_value};
pub use processor::spec::{CubeSpec, DimensionSpec, MetricEntry, MetricSpec};
pub use processor::{
    AggregateOp, CubeError, DEFAULT_ID_FIELD, ParseError, ParseSummary, RecordId,
    TRACEABILITY_COLUMN, Value,
};
