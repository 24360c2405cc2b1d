use std::collections::HashSet;
use std::sync::Arc;

use arrow2::{
    array::{
        Array, Float64Array, Int32Array, Int64Array, ListArray, MutableListArray,
        MutablePrimitiveArray, TryExtend, Utf8Array,
    },
    chunk::Chunk,
    datatypes::{DataType, Field, Schema as ArrowSchema},
};
use chrono::Datelike;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info};

use crate::processor::aggregation::{ResolvedMetric, aggregate, resolve_metrics};
use crate::processor::column::{ColumnType, FactBatch, FactRecord};
use crate::processor::grouping::{self, GroupKey};
use crate::processor::naming::name_columns;
use crate::processor::spec::{DimensionSpec, MetricSpec};
use crate::processor::{AggregateOp, CubeError, RecordId, TRACEABILITY_COLUMN, Value};

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// One row of a cube
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    /// Group key, one value per dimension
    pub dimensions: Vec<Value>,
    /// One value per metric column; `None` when undefined for the group
    pub metrics: Vec<Option<Value>>,
    /// Ids of the records mapped into the group, in input order
    pub record_ids: Vec<RecordId>,
}

/// Pre-aggregated table: rows in ascending key order, keys unique
///
/// `columns` holds the dimension names, the metric names and finally the
/// traceability column, and describes every row.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    columns: Vec<String>,
    dimension_count: usize,
    rows: Vec<AggregateRow>,
}

impl Cube {
    /// Assembles a cube from already-aggregated rows (e.g. a reloaded
    /// artifact). Rows are sorted by key; duplicate keys are rejected.
    pub fn from_parts(
        columns: Vec<String>,
        dimension_count: usize,
        mut rows: Vec<AggregateRow>,
    ) -> Result<Self, CubeError> {
        if dimension_count == 0 || columns.len() < dimension_count + 1 {
            return Err(CubeError::InvalidSpecification(format!(
                "{} columns cannot hold {dimension_count} dimensions and a traceability column",
                columns.len()
            )));
        }
        if columns.last().map(String::as_str) != Some(TRACEABILITY_COLUMN) {
            return Err(CubeError::InvalidSpecification(format!(
                "last column must be '{TRACEABILITY_COLUMN}'"
            )));
        }

        let metric_count = columns.len() - dimension_count - 1;
        for row in &rows {
            if row.dimensions.len() != dimension_count || row.metrics.len() != metric_count {
                return Err(CubeError::Parse(format!(
                    "row shape {}+{} does not match {dimension_count}+{metric_count} columns",
                    row.dimensions.len(),
                    row.metrics.len()
                )));
            }
        }

        rows.sort_by(|a, b| a.dimensions.cmp(&b.dimensions));
        if let Some(pair) = rows.windows(2).find(|w| w[0].dimensions == w[1].dimensions) {
            return Err(CubeError::Parse(format!(
                "group {:?} appears more than once",
                pair[0].dimensions
            )));
        }

        Ok(Cube {
            columns,
            dimension_count,
            rows,
        })
    }

    /// All column names, traceability column last
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn dimension_count(&self) -> usize {
        self.dimension_count
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.columns[..self.dimension_count]
    }

    pub fn metric_names(&self) -> &[String] {
        &self.columns[self.dimension_count..self.columns.len() - 1]
    }

    pub fn dimension_index(&self, name: &str) -> Option<usize> {
        self.dimension_names().iter().position(|n| n == name)
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metric_names().iter().position(|n| n == name)
    }

    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of source records traced by all rows together
    pub fn traced_records(&self) -> usize {
        self.rows.iter().map(|r| r.record_ids.len()).sum()
    }

    /// Converts the cube to an Arrow chunk; the traceability column becomes
    /// a `List<Int64>`.
    pub fn to_arrow(&self) -> Result<(ArrowSchema, Chunk<Arc<dyn Array>>), CubeError> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<Arc<dyn Array>> = Vec::with_capacity(self.columns.len());

        for (i, name) in self.dimension_names().iter().enumerate() {
            let cells: Vec<Option<&Value>> =
                self.rows.iter().map(|r| Some(&r.dimensions[i])).collect();
            let (field, array) = arrow_column(name, &cells)?;
            fields.push(field);
            arrays.push(array);
        }

        for (i, name) in self.metric_names().iter().enumerate() {
            let cells: Vec<Option<&Value>> =
                self.rows.iter().map(|r| r.metrics[i].as_ref()).collect();
            let (field, array) = arrow_column(name, &cells)?;
            fields.push(field);
            arrays.push(array);
        }

        let mut ids = MutableListArray::<i32, MutablePrimitiveArray<i64>>::new();
        ids.try_extend(
            self.rows
                .iter()
                .map(|r| Some(r.record_ids.iter().map(|id| Some(*id)))),
        )
        .map_err(|e| CubeError::Internal(format!("building id lists: {e}")))?;
        let ids: ListArray<i32> = ids.into();
        fields.push(Field::new(TRACEABILITY_COLUMN, ids.data_type().clone(), false));
        arrays.push(Arc::new(ids));

        let chunk = Chunk::try_new(arrays)
            .map_err(|e| CubeError::Internal(format!("assembling arrow chunk: {e}")))?;
        Ok((ArrowSchema::from(fields), chunk))
    }
}

fn arrow_column(
    name: &str,
    cells: &[Option<&Value>],
) -> Result<(Field, Arc<dyn Array>), CubeError> {
    // an all-missing metric column has no type of its own
    let column_type = cells
        .iter()
        .flatten()
        .next()
        .map(|v| ColumnType::of(v))
        .unwrap_or(ColumnType::Float64);

    let array: Arc<dyn Array> = match column_type {
        ColumnType::Int64 => Arc::new(Int64Array::from(collect_cells(name, cells, |v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })?)),
        ColumnType::Float64 => Arc::new(Float64Array::from(collect_cells(
            name,
            cells,
            Value::as_f64,
        )?)),
        ColumnType::Str => Arc::new(Utf8Array::<i32>::from(collect_cells(name, cells, |v| {
            v.as_str().map(str::to_string)
        })?)),
        ColumnType::Date => Arc::new(
            Int32Array::from(collect_cells(name, cells, |v| match v {
                Value::Date(d) => Some(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
                _ => None,
            })?)
            .to(DataType::Date32),
        ),
    };

    let nullable = cells.iter().any(Option::is_none);
    Ok((Field::new(name, array.data_type().clone(), nullable), array))
}

fn collect_cells<T>(
    name: &str,
    cells: &[Option<&Value>],
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<Option<T>>, CubeError> {
    cells
        .iter()
        .map(|cell| match cell {
            None => Ok(None),
            Some(v) => extract(*v).map(Some).ok_or_else(|| {
                CubeError::Parse(format!("column '{name}' mixes types at value '{v}'"))
            }),
        })
        .collect()
}

/// Cube construction settings
#[derive(Debug, Clone)]
pub struct CubeConfig {
    /// Aggregate groups on the rayon pool
    pub parallel: bool,
}

impl Default for CubeConfig {
    fn default() -> Self {
        CubeConfig { parallel: true }
    }
}

/// Builds cubes from fact batches
///
/// # Examples
///
/// ```rust
/// # use olap_cube::{
/// #     AggregateOp, ColumnType, CubeBuilder, CubeConfig, DimensionSpec, FactBatch, MetricSpec,
/// #     Schema, Value,
/// # };
/// let schema = Schema::new([("id", ColumnType::Int64), ("type", ColumnType::Str)]).unwrap();
/// let batch = FactBatch::from_rows(schema, "id", vec![
///     vec![Some(Value::Int(1)), Some("cash".into())],
///     vec![Some(Value::Int(2)), Some("card".into())],
/// ]).unwrap();
/// let metrics = MetricSpec::new().metric("id", [AggregateOp::Count]);
///
/// let cube = CubeBuilder::new(CubeConfig { parallel: false })
///     .build(&batch, &DimensionSpec::new(["type"]), &metrics)
///     .unwrap();
/// assert_eq!(cube.columns(), ["type", "id_count", "sale_ids"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CubeBuilder {
    config: CubeConfig,
}

impl CubeBuilder {
    pub fn new(config: CubeConfig) -> Self {
        CubeBuilder { config }
    }

    /// Builds the cube for `dimensions` and `metrics`.
    ///
    /// # Errors
    /// - [`CubeError::InvalidSpecification`] if `dimensions` is empty or
    ///   repeats a field, a field is not in the schema, or `sum`/`mean`
    ///   target a non-numeric field
    /// - [`CubeError::EmptyInput`] if no record survives the exclusion of
    ///   missing dimension values
    /// - [`CubeError::Overflow`] if an integer `sum` does not fit in an i64
    pub fn build(
        &self,
        batch: &FactBatch,
        dimensions: &DimensionSpec,
        metrics: &MetricSpec,
    ) -> Result<Cube, CubeError> {
        validate_dimensions(dimensions)?;
        let resolved = resolve_metrics(batch.schema(), metrics)?;

        let partition = grouping::partition(batch, dimensions)?;
        if partition.groups.is_empty() {
            return Err(CubeError::EmptyInput);
        }
        let distinct = partition.groups.len();
        let included = partition.included();
        let excluded = partition.excluded;

        let groups: Vec<(GroupKey, Vec<&FactRecord>)> = partition.groups.into_iter().collect();
        let mut rows: Vec<AggregateRow> = if self.config.parallel {
            groups
                .into_par_iter()
                .map(|(key, members)| assemble_row(key, &members, &resolved))
                .collect::<Result<_, _>>()?
        } else {
            groups
                .into_iter()
                .map(|(key, members)| assemble_row(key, &members, &resolved))
                .collect::<Result<_, _>>()?
        };
        // completion order must never leak into the output
        rows.sort_by(|a, b| a.dimensions.cmp(&b.dimensions));

        verify_rows(&rows, distinct, included, &resolved)?;

        let mut columns = name_columns(dimensions, metrics);
        columns.push(TRACEABILITY_COLUMN.to_string());
        debug!(columns = ?columns, "named cube columns");

        info!(
            dimensions = ?dimensions.fields(),
            rows = rows.len(),
            records = included,
            excluded,
            "OLAP cube created"
        );

        Ok(Cube {
            columns,
            dimension_count: dimensions.len(),
            rows,
        })
    }
}

/// Builds a cube with the default configuration
pub fn build_cube(
    batch: &FactBatch,
    dimensions: &DimensionSpec,
    metrics: &MetricSpec,
) -> Result<Cube, CubeError> {
    CubeBuilder::default().build(batch, dimensions, metrics)
}

fn validate_dimensions(dimensions: &DimensionSpec) -> Result<(), CubeError> {
    if dimensions.is_empty() {
        return Err(CubeError::InvalidSpecification(
            "at least one dimension is required".into(),
        ));
    }
    let mut seen = HashSet::with_capacity(dimensions.len());
    for field in dimensions.fields() {
        if !seen.insert(field.as_str()) {
            return Err(CubeError::InvalidSpecification(format!(
                "dimension '{field}' is listed twice"
            )));
        }
    }
    Ok(())
}

fn assemble_row(
    key: GroupKey,
    members: &[&FactRecord],
    metrics: &[ResolvedMetric],
) -> Result<AggregateRow, CubeError> {
    let agg = aggregate(members, metrics)?;
    Ok(AggregateRow {
        dimensions: key,
        metrics: agg.values,
        record_ids: agg.record_ids,
    })
}

fn verify_rows(
    rows: &[AggregateRow],
    distinct: usize,
    included: usize,
    metrics: &[ResolvedMetric],
) -> Result<(), CubeError> {
    if rows.len() != distinct {
        return Err(CubeError::Internal(format!(
            "{} rows for {distinct} distinct groups",
            rows.len()
        )));
    }

    let traced: usize = rows.iter().map(|r| r.record_ids.len()).sum();
    if traced != included {
        return Err(CubeError::Internal(format!(
            "{traced} traced records for {included} grouped records"
        )));
    }

    if rows.windows(2).any(|w| w[0].dimensions >= w[1].dimensions) {
        return Err(CubeError::Internal("group keys are not unique".into()));
    }

    for row in rows {
        for (metric, value) in metrics.iter().zip(&row.metrics) {
            if metric.op == AggregateOp::Count
                && value.as_ref() != Some(&Value::Int(row.record_ids.len() as i64))
            {
                return Err(CubeError::Internal(format!(
                    "count for {:?} disagrees with its record ids",
                    row.dimensions
                )));
            }
        }
    }

    Ok(())
}
