use crate::processor::spec::{DimensionSpec, MetricSpec};

/// Output column names for a cube: the dimension names unchanged, then one
/// `<field>_<function>` per metric pair, in specification order.
///
/// The traceability column is not part of this list; callers append it.
pub fn name_columns(dimensions: &DimensionSpec, metrics: &MetricSpec) -> Vec<String> {
    let mut names: Vec<String> = dimensions.fields().to_vec();

    for entry in metrics.entries() {
        for op in &entry.ops {
            names.push(metric_column_name(&entry.field, op.name()));
        }
    }

    names
}

/// Name of a single metric column
pub fn metric_column_name(field: &str, function: &str) -> String {
    format!("{field}_{function}")
        .trim_end_matches('_')
        .to_string()
}
