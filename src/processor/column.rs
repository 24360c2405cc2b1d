use std::collections::HashSet;

use chrono::NaiveDate;

use crate::processor::{CubeError, DATE_FORMAT, RecordId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Float64,
    Str,
    Date,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Int64 | ColumnType::Float64)
    }

    /// Infers the narrowest type able to hold a raw CSV field
    pub fn infer(field: &[u8]) -> ColumnType {
        if atoi_simd::parse::<i64>(field).is_ok() {
            ColumnType::Int64
        } else if fast_float::parse::<f64, _>(field).is_ok() {
            ColumnType::Float64
        } else if parse_date(field).is_some() {
            ColumnType::Date
        } else {
            ColumnType::Str
        }
    }

    /// Narrowest type holding values of both `self` and `other`: integers
    /// widen to float, any other mix falls back to text
    pub fn widen(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Int64, ColumnType::Float64) | (ColumnType::Float64, ColumnType::Int64) => {
                ColumnType::Float64
            }
            _ => ColumnType::Str,
        }
    }

    /// Infers one type for a whole column from all of its non-empty cells;
    /// `None` when every cell is empty
    pub fn infer_column<'a, I>(cells: I) -> Option<ColumnType>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        cells
            .into_iter()
            .filter(|cell| !cell.is_empty())
            .map(ColumnType::infer)
            .reduce(ColumnType::widen)
    }

    /// Parses a raw, non-empty CSV field as this type
    pub fn parse(self, field: &[u8]) -> Result<Value, CubeError> {
        match self {
            ColumnType::Int64 => atoi_simd::parse::<i64>(field)
                .map(Value::Int)
                .map_err(|e| CubeError::Parse(format!("not an integer: {e:?}"))),
            ColumnType::Float64 => fast_float::parse::<f64, _>(field)
                .map(Value::Float)
                .map_err(|e| CubeError::Parse(format!("not a float: {e}"))),
            ColumnType::Date => parse_date(field)
                .map(Value::Date)
                .ok_or_else(|| CubeError::Parse(format!("not a {DATE_FORMAT} date"))),
            ColumnType::Str => Ok(Value::Str(String::from_utf8_lossy(field).into_owned())),
        }
    }

    /// Coerces a value into this column, widening integers in float columns
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (ColumnType::Int64, v @ Value::Int(_)) => Some(v),
            (ColumnType::Float64, v @ Value::Float(_)) => Some(v),
            (ColumnType::Float64, Value::Int(i)) => Some(Value::Float(i as f64)),
            (ColumnType::Str, v @ Value::Str(_)) => Some(v),
            (ColumnType::Date, v @ Value::Date(_)) => Some(v),
            _ => None,
        }
    }

    pub fn of(value: &Value) -> ColumnType {
        match value {
            Value::Int(_) => ColumnType::Int64,
            Value::Float(_) => ColumnType::Float64,
            Value::Str(_) => ColumnType::Str,
            Value::Date(_) => ColumnType::Date,
        }
    }
}

fn parse_date(field: &[u8]) -> Option<NaiveDate> {
    let text = std::str::from_utf8(field).ok()?;
    NaiveDate::parse_from_str(text, DATE_FORMAT).ok()
}

/// Ordered field names with their types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, ColumnType)>,
}

impl Schema {
    pub fn new<I, S>(fields: I) -> Result<Self, CubeError>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let fields: Vec<(String, ColumnType)> =
            fields.into_iter().map(|(n, t)| (n.into(), t)).collect();

        let mut seen = HashSet::with_capacity(fields.len());
        for (name, _) in &fields {
            if !seen.insert(name.as_str()) {
                return Err(CubeError::InvalidSpecification(format!(
                    "field '{name}' appears twice in the schema"
                )));
            }
        }

        Ok(Schema { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.fields[idx].0
    }

    pub fn column_type(&self, idx: usize) -> ColumnType {
        self.fields[idx].1
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Resolves a field name to its position
    pub fn resolve(&self, name: &str) -> Result<usize, CubeError> {
        self.index_of(name).ok_or_else(|| {
            CubeError::InvalidSpecification(format!("field '{name}' is not in the input schema"))
        })
    }
}

/// One atomic input row, values aligned with the batch schema
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    id: RecordId,
    values: Vec<Option<Value>>,
}

impl FactRecord {
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Value at a schema position, `None` when missing
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(Option::as_ref)
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }
}

/// Homogeneous, immutable-once-built collection of fact records
#[derive(Debug, Clone)]
pub struct FactBatch {
    schema: Schema,
    id_index: usize,
    records: Vec<FactRecord>,
    seen_ids: HashSet<RecordId>,
}

impl FactBatch {
    /// Creates an empty batch whose record ids come from `id_field`
    pub fn new(schema: Schema, id_field: &str) -> Result<Self, CubeError> {
        let id_index = schema
            .index_of(id_field)
            .ok_or_else(|| CubeError::MissingColumn(id_field.to_string()))?;

        if schema.column_type(id_index) != ColumnType::Int64 {
            return Err(CubeError::InvalidSpecification(format!(
                "id field '{id_field}' must be an integer column"
            )));
        }

        Ok(FactBatch {
            schema,
            id_index,
            records: Vec::new(),
            seen_ids: HashSet::new(),
        })
    }

    /// Builds a batch from rows of optional values
    pub fn from_rows<I>(schema: Schema, id_field: &str, rows: I) -> Result<Self, CubeError>
    where
        I: IntoIterator<Item = Vec<Option<Value>>>,
    {
        let mut batch = FactBatch::new(schema, id_field)?;
        for row in rows {
            batch.push(row)?;
        }
        Ok(batch)
    }

    /// Appends a record, validating arity, types and id uniqueness
    pub fn push(&mut self, values: Vec<Option<Value>>) -> Result<RecordId, CubeError> {
        if values.len() != self.schema.len() {
            return Err(CubeError::Parse(format!(
                "expected {} fields, got {}",
                self.schema.len(),
                values.len()
            )));
        }

        let values = values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| match value {
                None => Ok(None),
                Some(v) => {
                    let ty = self.schema.column_type(idx);
                    let shown = v.to_string();
                    ty.coerce(v).map(Some).ok_or_else(|| {
                        CubeError::Parse(format!(
                            "value '{shown}' does not fit {ty:?} column '{}'",
                            self.schema.name(idx)
                        ))
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = match values[self.id_index] {
            Some(Value::Int(id)) => id,
            _ => {
                return Err(CubeError::Parse(format!(
                    "record has no '{}' id",
                    self.schema.name(self.id_index)
                )));
            }
        };

        if !self.seen_ids.insert(id) {
            return Err(CubeError::DuplicateRecordId(id));
        }

        self.records.push(FactRecord { id, values });
        Ok(id)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn id_field(&self) -> &str {
        self.schema.name(self.id_index)
    }

    pub(crate) fn id_index(&self) -> usize {
        self.id_index
    }

    pub fn records(&self) -> &[FactRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_inference_widens() {
        fn infer(cells: &[&[u8]]) -> Option<ColumnType> {
            ColumnType::infer_column(cells.iter().copied())
        }
        assert_eq!(infer(&[b"1", b"", b"2"]), Some(ColumnType::Int64));
        assert_eq!(infer(&[b"1", b"2.5"]), Some(ColumnType::Float64));
        assert_eq!(infer(&[b"101", b"A7", b"B9"]), Some(ColumnType::Str));
        assert_eq!(infer(&[b"2024-01-01", b"soon"]), Some(ColumnType::Str));
        assert_eq!(infer(&[b"2024-01-01", b"7"]), Some(ColumnType::Str));
        assert_eq!(infer(&[b"", b""]), None);
    }

    fn schema() -> Schema {
        Schema::new([
            ("id", ColumnType::Int64),
            ("type", ColumnType::Str),
            ("amt", ColumnType::Float64),
        ])
        .unwrap()
    }

    #[test]
    fn test_infer_column_types() {
        assert_eq!(ColumnType::infer(b"42"), ColumnType::Int64);
        assert_eq!(ColumnType::infer(b"4.2"), ColumnType::Float64);
        assert_eq!(ColumnType::infer(b"2024-03-01"), ColumnType::Date);
        assert_eq!(ColumnType::infer(b"cash"), ColumnType::Str);
    }

    #[test]
    fn test_push_widens_ints_in_float_columns() {
        let mut batch = FactBatch::new(schema(), "id").unwrap();
        batch
            .push(vec![Some(Value::Int(1)), Some("cash".into()), Some(Value::Int(10))])
            .unwrap();
        assert_eq!(batch.records()[0].get(2), Some(&Value::Float(10.0)));
    }

    #[test]
    fn test_push_rejects_duplicate_ids() {
        let mut batch = FactBatch::new(schema(), "id").unwrap();
        batch.push(vec![Some(Value::Int(1)), None, None]).unwrap();
        let err = batch.push(vec![Some(Value::Int(1)), None, None]).unwrap_err();
        assert!(matches!(err, CubeError::DuplicateRecordId(1)));
    }

    #[test]
    fn test_push_rejects_type_mismatch() {
        let mut batch = FactBatch::new(schema(), "id").unwrap();
        let err = batch
            .push(vec![Some(Value::Int(1)), Some(Value::Int(5)), None])
            .unwrap_err();
        assert!(matches!(err, CubeError::Parse(_)));
    }

    #[test]
    fn test_missing_id_field() {
        let err = FactBatch::new(schema(), "sale_id").unwrap_err();
        assert!(matches!(err, CubeError::MissingColumn(name) if name == "sale_id"));
    }

    #[test]
    fn test_duplicate_schema_fields() {
        let err = Schema::new([("a", ColumnType::Int64), ("a", ColumnType::Str)]).unwrap_err();
        assert!(matches!(err, CubeError::InvalidSpecification(_)));
    }
}
