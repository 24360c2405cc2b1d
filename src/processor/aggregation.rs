use tracing::warn;

use crate::helpers::simd_helpers::{sum_f64, sum_i64};
use crate::processor::column::{ColumnType, FactRecord, Schema};
use crate::processor::naming::metric_column_name;
use crate::processor::spec::MetricSpec;
use crate::processor::{AggregateOp, CubeError, RecordId, Value};

/// A (field, function) pair resolved against a schema
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    pub field: String,
    pub op: AggregateOp,
    pub index: usize,
    pub column_type: ColumnType,
}

impl ResolvedMetric {
    pub fn column_name(&self) -> String {
        metric_column_name(&self.field, self.op.name())
    }
}

/// Resolves every metric pair, in output-column order.
///
/// Fails when a field is not in the schema or when `sum`/`mean` target a
/// non-numeric column.
pub fn resolve_metrics(
    schema: &Schema,
    metrics: &MetricSpec,
) -> Result<Vec<ResolvedMetric>, CubeError> {
    metrics
        .pairs()
        .map(|(field, op)| {
            let index = schema.resolve(field)?;
            let column_type = schema.column_type(index);
            if op.requires_numeric() && !column_type.is_numeric() {
                return Err(CubeError::InvalidSpecification(format!(
                    "cannot apply '{op}' to {column_type:?} field '{field}'"
                )));
            }
            Ok(ResolvedMetric {
                field: field.to_string(),
                op,
                index,
                column_type,
            })
        })
        .collect()
}

/// Aggregated values of one group plus its traceability list
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAggregate {
    /// One entry per resolved metric; `None` when undefined (no values)
    pub values: Vec<Option<Value>>,
    /// Source record ids in input order
    pub record_ids: Vec<RecordId>,
}

/// Aggregates one group in a single pass over its records.
///
/// Record ids and metric inputs are collected together, so the id list
/// always describes exactly the records that produced the values.
///
/// # Errors
/// [`CubeError::Overflow`] if an integer `sum` does not fit in an i64.
pub fn aggregate(
    group: &[&FactRecord],
    metrics: &[ResolvedMetric],
) -> Result<GroupAggregate, CubeError> {
    let mut record_ids = Vec::with_capacity(group.len());
    let mut inputs: Vec<Vec<&Value>> = vec![Vec::with_capacity(group.len()); metrics.len()];

    for record in group {
        record_ids.push(record.id());
        for (slot, metric) in inputs.iter_mut().zip(metrics) {
            if metric.op == AggregateOp::Count {
                continue;
            }
            if let Some(v) = record.get(metric.index) {
                slot.push(v);
            }
        }
    }

    let values = metrics
        .iter()
        .zip(&inputs)
        .map(|(metric, present)| reduce(metric, group.len(), present))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GroupAggregate { values, record_ids })
}

/// Ordered record ids of a group
pub fn record_ids(group: &[&FactRecord]) -> Vec<RecordId> {
    group.iter().map(|r| r.id()).collect()
}

fn reduce(
    metric: &ResolvedMetric,
    group_len: usize,
    present: &[&Value],
) -> Result<Option<Value>, CubeError> {
    let value = match metric.op {
        AggregateOp::Count => Some(Value::Int(group_len as i64)),
        AggregateOp::Sum => Some(match metric.column_type {
            ColumnType::Int64 => {
                let sum = sum_i64(&ints(present)).ok_or_else(|| {
                    CubeError::Overflow(format!("sum of '{}' does not fit in i64", metric.field))
                })?;
                Value::Int(sum)
            }
            _ => Value::Float(sum_f64(&floats(present))),
        }),
        AggregateOp::Mean => {
            if present.is_empty() {
                warn!(
                    field = %metric.field,
                    "mean is undefined for a group with no values"
                );
                return Ok(None);
            }
            Some(Value::Float(sum_f64(&floats(present)) / present.len() as f64))
        }
        AggregateOp::Min => present.iter().min().map(|v| (*v).clone()),
        AggregateOp::Max => present.iter().max().map(|v| (*v).clone()),
    };
    Ok(value)
}

fn ints(values: &[&Value]) -> Vec<i64> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        })
        .collect()
}

fn floats(values: &[&Value]) -> Vec<f64> {
    values.iter().filter_map(|v| v.as_f64()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::column::FactBatch;

    fn batch() -> FactBatch {
        let schema = Schema::new([
            ("id", ColumnType::Int64),
            ("type", ColumnType::Str),
            ("amt", ColumnType::Int64),
            ("price", ColumnType::Float64),
        ])
        .unwrap();
        let rows = vec![
            vec![
                Some(Value::Int(1)),
                Some("cash".into()),
                Some(Value::Int(10)),
                Some(Value::Float(1.5)),
            ],
            vec![Some(Value::Int(3)), Some("cash".into()), Some(Value::Int(5)), None],
            vec![Some(Value::Int(7)), Some("cash".into()), None, Some(Value::Float(0.5))],
        ];
        FactBatch::from_rows(schema, "id", rows).unwrap()
    }

    fn metrics(
        batch: &FactBatch,
        spec: Vec<(&'static str, Vec<&'static str>)>,
    ) -> Vec<ResolvedMetric> {
        let spec = MetricSpec::parse(spec).unwrap();
        resolve_metrics(batch.schema(), &spec).unwrap()
    }

    #[test]
    fn test_all_functions_skip_missing_values() {
        let batch = batch();
        let group: Vec<&FactRecord> = batch.records().iter().collect();
        let resolved = metrics(
            &batch,
            vec![
                ("amt", vec!["sum", "mean", "count", "min", "max"]),
                ("price", vec!["sum"]),
            ],
        );

        let agg = aggregate(&group, &resolved).unwrap();
        assert_eq!(agg.record_ids, vec![1, 3, 7]);
        assert_eq!(
            agg.values,
            vec![
                Some(Value::Int(15)),
                Some(Value::Float(7.5)),
                Some(Value::Int(3)),
                Some(Value::Int(5)),
                Some(Value::Int(10)),
                Some(Value::Float(2.0)),
            ]
        );
        assert_eq!(record_ids(&group), agg.record_ids);
    }

    #[test]
    fn test_no_contributing_values() {
        let batch = batch();
        let group: Vec<&FactRecord> = vec![&batch.records()[2]];
        let resolved = metrics(&batch, vec![("amt", vec!["sum", "mean", "min"])]);

        let agg = aggregate(&group, &resolved).unwrap();
        assert_eq!(agg.values, vec![Some(Value::Int(0)), None, None]);
    }

    #[test]
    fn test_min_max_on_text() {
        let batch = batch();
        let group: Vec<&FactRecord> = batch.records().iter().collect();
        let resolved = metrics(&batch, vec![("type", vec!["min", "max", "count"])]);
        let agg = aggregate(&group, &resolved).unwrap();
        assert_eq!(
            agg.values,
            vec![Some("cash".into()), Some("cash".into()), Some(Value::Int(3))]
        );
    }

    #[test]
    fn test_integer_sum_overflow_is_an_error() {
        let schema =
            Schema::new([("id", ColumnType::Int64), ("amt", ColumnType::Int64)]).unwrap();
        let batch = FactBatch::from_rows(
            schema,
            "id",
            vec![
                vec![Some(Value::Int(1)), Some(Value::Int(i64::MAX))],
                vec![Some(Value::Int(2)), Some(Value::Int(1))],
            ],
        )
        .unwrap();
        let group: Vec<&FactRecord> = batch.records().iter().collect();

        let resolved = metrics(&batch, vec![("amt", vec!["mean", "max"])]);
        assert!(aggregate(&group, &resolved).is_ok());

        let resolved = metrics(&batch, vec![("amt", vec!["sum"])]);
        let err = aggregate(&group, &resolved).unwrap_err();
        assert!(matches!(err, CubeError::Overflow(msg) if msg.contains("amt")));
    }

    #[test]
    fn test_sum_on_text_is_rejected() {
        let batch = batch();
        let spec = MetricSpec::new().metric("type", [AggregateOp::Sum]);
        let err = resolve_metrics(batch.schema(), &spec).unwrap_err();
        assert!(matches!(err, CubeError::InvalidSpecification(_)));
    }

    #[test]
    fn test_unknown_metric_field() {
        let batch = batch();
        let spec = MetricSpec::new().metric("qty", [AggregateOp::Count]);
        let err = resolve_metrics(batch.schema(), &spec).unwrap_err();
        assert!(matches!(err, CubeError::InvalidSpecification(_)));
    }
}
