use lru::LruCache;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use tracing::info;

use crate::processor::cube::Cube;
use crate::processor::{CubeError, Value};

/// Which end of a sorted slice to pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extremum {
    Min,
    Max,
}

/// Totals of one metric column per value of one dimension, ascending by
/// total (ties by dimension value).
///
/// The dimension does not need to be the cube's leading one. Missing metric
/// cells contribute nothing.
pub fn sum_by_dimension_value(
    cube: &Cube,
    dimension: &str,
    metric_column: &str,
) -> Result<Vec<(Value, f64)>, CubeError> {
    let dim_idx = cube.dimension_index(dimension).ok_or_else(|| {
        CubeError::InvalidSpecification(format!("'{dimension}' is not a dimension of the cube"))
    })?;
    let metric_idx = cube.metric_index(metric_column).ok_or_else(|| {
        CubeError::InvalidSpecification(format!(
            "'{metric_column}' is not a metric column of the cube"
        ))
    })?;

    let mut totals: BTreeMap<&Value, f64> = BTreeMap::new();
    for row in cube.rows() {
        let total = totals.entry(&row.dimensions[dim_idx]).or_insert(0.0);
        if let Some(cell) = &row.metrics[metric_idx] {
            *total += cell.as_f64().ok_or_else(|| {
                CubeError::InvalidSpecification(format!(
                    "metric column '{metric_column}' holds non-numeric value '{cell}'"
                ))
            })?;
        }
    }

    let mut sorted: Vec<(Value, f64)> =
        totals.into_iter().map(|(v, t)| (v.clone(), t)).collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(sorted)
}

/// First (`Min`) or last (`Max`) entry of a list from [`sum_by_dimension_value`]
pub fn extremum(sorted: &[(Value, f64)], which: Extremum) -> Result<(Value, f64), CubeError> {
    let picked = match which {
        Extremum::Min => sorted.first(),
        Extremum::Max => sorted.last(),
    };
    picked.cloned().ok_or(CubeError::EmptyCube)
}

#[derive(Debug, Hash, Eq, PartialEq, Clone)]
struct QueryKey {
    dimension: String,
    metric_column: String,
}

/// Reporting view over a cube that memoizes dimension totals
#[derive(Debug)]
pub struct CubeQuery<'a> {
    cube: &'a Cube,
    cache: RefCell<LruCache<QueryKey, Vec<(Value, f64)>>>,
}

impl<'a> CubeQuery<'a> {
    const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(128).unwrap();

    pub fn new(cube: &'a Cube) -> Self {
        Self::with_capacity(cube, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(cube: &'a Cube, capacity: NonZeroUsize) -> Self {
        Self {
            cube,
            cache: RefCell::new(LruCache::new(capacity)),
        }
    }

    pub fn cube(&self) -> &Cube {
        self.cube
    }

    /// Cached [`sum_by_dimension_value`]
    pub fn sum_by_dimension_value(
        &self,
        dimension: &str,
        metric_column: &str,
    ) -> Result<Vec<(Value, f64)>, CubeError> {
        let key = QueryKey {
            dimension: dimension.to_string(),
            metric_column: metric_column.to_string(),
        };

        if let Some(hit) = self.cache.borrow_mut().get(&key) {
            return Ok(hit.clone());
        }

        let result = sum_by_dimension_value(self.cube, dimension, metric_column)?;
        self.cache.borrow_mut().put(key, result.clone());
        Ok(result)
    }

    /// Dimension value with the lowest total
    pub fn least(&self, dimension: &str, metric_column: &str) -> Result<(Value, f64), CubeError> {
        let (value, total) =
            extremum(&self.sum_by_dimension_value(dimension, metric_column)?, Extremum::Min)?;
        info!(%dimension, value = %value, total, "least {metric_column} by {dimension}");
        Ok((value, total))
    }

    /// Dimension value with the highest total
    pub fn most(&self, dimension: &str, metric_column: &str) -> Result<(Value, f64), CubeError> {
        let (value, total) =
            extremum(&self.sum_by_dimension_value(dimension, metric_column)?, Extremum::Max)?;
        info!(%dimension, value = %value, total, "most {metric_column} by {dimension}");
        Ok((value, total))
    }

    /// Number of cached results
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}
