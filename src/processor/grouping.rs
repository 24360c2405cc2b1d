use std::collections::BTreeMap;

use tracing::debug;

use crate::processor::CubeError;
use crate::processor::Value;
use crate::processor::column::{FactBatch, FactRecord};
use crate::processor::spec::DimensionSpec;

/// Tuple of dimension values, in dimension order
pub type GroupKey = Vec<Value>;

/// Records grouped by key; iteration is in ascending key order
#[derive(Debug)]
pub struct Partition<'a> {
    pub groups: BTreeMap<GroupKey, Vec<&'a FactRecord>>,
    /// Records dropped because a dimension value was missing
    pub excluded: usize,
}

impl<'a> Partition<'a> {
    /// Number of records placed in some group
    pub fn included(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Partitions a batch by the values of `dimensions`.
///
/// Records missing any dimension value are excluded. Within a group records
/// keep their input order.
pub fn partition<'a>(
    batch: &'a FactBatch,
    dimensions: &DimensionSpec,
) -> Result<Partition<'a>, CubeError> {
    let indices = dimensions
        .fields()
        .iter()
        .map(|field| batch.schema().resolve(field))
        .collect::<Result<Vec<usize>, _>>()?;

    let partition = partition_by_indices(batch.records(), &indices);
    debug!(
        dimensions = ?dimensions.fields(),
        groups = partition.groups.len(),
        excluded = partition.excluded,
        "partitioned fact records"
    );
    Ok(partition)
}

/// Partitions records by the values at the given schema positions
pub fn partition_by_indices<'a, I>(records: I, indices: &[usize]) -> Partition<'a>
where
    I: IntoIterator<Item = &'a FactRecord>,
{
    let mut groups: BTreeMap<GroupKey, Vec<&'a FactRecord>> = BTreeMap::new();
    let mut excluded = 0;

    'records: for record in records {
        let mut key = Vec::with_capacity(indices.len());
        for &idx in indices {
            match record.get(idx) {
                Some(v) => key.push(v.clone()),
                None => {
                    excluded += 1;
                    continue 'records;
                }
            }
        }
        groups.entry(key).or_default().push(record);
    }

    Partition { groups, excluded }
}
