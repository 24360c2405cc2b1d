use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::processor::{AggregateOp, CubeError};

/// Ordered field names whose values jointly form a group key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSpec(Vec<String>);

impl DimensionSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DimensionSpec(fields.into_iter().map(Into::into).collect())
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One metric field and the functions applied to it, in listed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub field: String,
    pub ops: Vec<AggregateOp>,
}

/// Parses `field=op[,op...]`, the form accepted on the command line
impl FromStr for MetricEntry {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, ops) = s.split_once('=').ok_or_else(|| {
            CubeError::InvalidSpecification(format!("expected field=op[,op...], got '{s}'"))
        })?;

        let field = field.trim();
        if field.is_empty() {
            return Err(CubeError::InvalidSpecification(format!(
                "metric '{s}' has no field name"
            )));
        }

        let ops = ops
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<AggregateOp>, _>>()?;

        Ok(MetricEntry {
            field: field.to_string(),
            ops,
        })
    }
}

/// Mapping from source field to aggregation functions, in specification order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSpec(Vec<MetricEntry>);

impl MetricSpec {
    pub fn new() -> Self {
        MetricSpec::default()
    }

    /// Adds functions for a field; a field seen before keeps its position
    pub fn metric<I>(mut self, field: &str, ops: I) -> Self
    where
        I: IntoIterator<Item = AggregateOp>,
    {
        self.push(MetricEntry {
            field: field.to_string(),
            ops: ops.into_iter().collect(),
        });
        self
    }

    pub fn push(&mut self, entry: MetricEntry) {
        match self.0.iter_mut().find(|e| e.field == entry.field) {
            Some(existing) => existing.ops.extend(entry.ops),
            None => self.0.push(entry),
        }
    }

    /// Builds a spec from function names, failing on unknown names
    pub fn parse<'a, I, F>(entries: I) -> Result<Self, CubeError>
    where
        I: IntoIterator<Item = (&'a str, F)>,
        F: IntoIterator<Item = &'a str>,
    {
        let mut spec = MetricSpec::new();
        for (field, names) in entries {
            let ops = names
                .into_iter()
                .map(str::parse)
                .collect::<Result<Vec<AggregateOp>, _>>()?;
            spec.push(MetricEntry {
                field: field.to_string(),
                ops,
            });
        }
        Ok(spec)
    }

    pub fn entries(&self) -> &[MetricEntry] {
        &self.0
    }

    /// All (field, op) pairs in output-column order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, AggregateOp)> + '_ {
        self.0
            .iter()
            .flat_map(|e| e.ops.iter().map(move |op| (e.field.as_str(), *op)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Dimensions and metrics of one cube, loadable from JSON:
///
/// ```json
/// {"dimensions": ["payment_type"],
///  "metrics": {"sale_amount": ["sum", "mean"], "sale_id": "count"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeSpec {
    pub dimensions: DimensionSpec,
    pub metrics: MetricSpec,
}

#[derive(Deserialize)]
struct RawCubeSpec {
    dimensions: Vec<String>,
    metrics: serde_json::Value,
}

impl CubeSpec {
    pub fn from_json(text: &str) -> Result<Self, CubeError> {
        let raw: RawCubeSpec = serde_json::from_str(text)?;

        let serde_json::Value::Object(map) = raw.metrics else {
            return Err(CubeError::InvalidSpecification(
                "metrics must be an object of field -> function(s)".into(),
            ));
        };

        let mut metrics = MetricSpec::new();
        for (field, functions) in map {
            let names: Vec<String> = match functions {
                serde_json::Value::String(name) => vec![name],
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        serde_json::Value::String(name) => Ok(name),
                        other => Err(CubeError::InvalidSpecification(format!(
                            "function name for '{field}' must be a string, got {other}"
                        ))),
                    })
                    .collect::<Result<_, _>>()?,
                other => {
                    return Err(CubeError::InvalidSpecification(format!(
                        "functions for '{field}' must be a string or list, got {other}"
                    )));
                }
            };

            let ops = names
                .iter()
                .map(|n| n.parse())
                .collect::<Result<Vec<AggregateOp>, _>>()?;
            metrics.push(MetricEntry { field, ops });
        }

        Ok(CubeSpec {
            dimensions: DimensionSpec::new(raw.dimensions),
            metrics,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, CubeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
