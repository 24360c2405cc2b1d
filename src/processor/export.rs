use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::helpers::csv_helpers::{split_fields, split_records, write_field};
use crate::processor::column::ColumnType;
use crate::processor::cube::{AggregateRow, Cube};
use crate::processor::{CubeError, RecordId, TRACEABILITY_COLUMN, Value};

/// Writes a cube as a flat CSV table into `sink`.
///
/// The header is the cube's column list. Undefined metric cells are left
/// empty and the traceability column is written as `"[1, 3]"`.
pub fn write_cube_csv<W: Write>(cube: &Cube, sink: W) -> Result<(), CubeError> {
    let mut out = BufWriter::new(sink);

    for (i, name) in cube.columns().iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write_field(&mut out, name)?;
    }
    out.write_all(b"\n")?;

    for row in cube.rows() {
        for value in &row.dimensions {
            write_field(&mut out, &value.to_string())?;
            out.write_all(b",")?;
        }
        for value in &row.metrics {
            if let Some(value) = value {
                write_field(&mut out, &value.to_string())?;
            }
            out.write_all(b",")?;
        }
        write_field(&mut out, &format_record_ids(&row.record_ids))?;
        out.write_all(b"\n")?;
    }

    out.flush()?;
    Ok(())
}

/// Writes the cube to `dir/file_name`, creating the directory if needed
pub fn write_cube_to_dir(
    cube: &Cube,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf, CubeError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    write_cube_csv(cube, File::create(&path)?)?;
    info!(path = %path.display(), rows = cube.len(), "OLAP cube saved");
    Ok(path)
}

/// Reads a cube written by [`write_cube_csv`].
///
/// The first `dimension_count` columns are dimensions, the last one is the
/// traceability column, everything in between is a metric. Cell types are
/// inferred from every cell of a column, widening the same way fact files
/// do. A text column whose values all look numeric reloads as numbers.
pub fn read_cube_csv<R: Read>(mut reader: R, dimension_count: usize) -> Result<Cube, CubeError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;

    let mut records = split_records(&buf);
    let (_, header) = records
        .next()
        .ok_or_else(|| CubeError::Parse("Missing header line".into()))?;
    let mut fields = Vec::new();
    split_fields(header, &mut fields);
    let columns: Vec<String> = fields
        .iter()
        .map(|f| String::from_utf8_lossy(f).trim().to_string())
        .collect();
    let num_cols = columns.len();
    if dimension_count == 0 || num_cols < dimension_count + 1 {
        return Err(CubeError::InvalidSpecification(format!(
            "{num_cols} columns cannot hold {dimension_count} dimensions and a traceability column"
        )));
    }
    if columns.last().map(String::as_str) != Some(TRACEABILITY_COLUMN) {
        return Err(CubeError::InvalidSpecification(format!(
            "last column must be '{TRACEABILITY_COLUMN}'"
        )));
    }

    // Split every record first so column types see every cell
    let mut table: Vec<(usize, Vec<Vec<u8>>)> = Vec::new();
    for (line_no, record) in records {
        split_fields(record, &mut fields);
        if fields.len() != num_cols {
            return Err(CubeError::Parse(format!(
                "line {line_no}: expected {num_cols} fields, got {}",
                fields.len()
            )));
        }
        table.push((line_no, fields.iter().map(|f| f.to_vec()).collect()));
    }

    // an all-empty metric column is read as float
    let types: Vec<ColumnType> = (0..num_cols - 1)
        .map(|col| {
            ColumnType::infer_column(table.iter().map(|(_, cells)| cells[col].as_slice()))
                .unwrap_or(ColumnType::Float64)
        })
        .collect();

    let mut rows = Vec::with_capacity(table.len());
    for (line_no, cells) in &table {
        let mut values = Vec::with_capacity(num_cols - 1);
        for (col, cell) in cells[..num_cols - 1].iter().enumerate() {
            let value = if cell.is_empty() {
                None
            } else {
                let value = types[col].parse(cell).map_err(|e| {
                    CubeError::Parse(format!("line {line_no}, column '{}': {e}", columns[col]))
                })?;
                Some(value)
            };
            values.push(value);
        }

        let metrics = values.split_off(dimension_count);
        let dimensions = values
            .into_iter()
            .collect::<Option<Vec<Value>>>()
            .ok_or_else(|| CubeError::Parse(format!("line {line_no}: missing dimension value")))?;

        rows.push(AggregateRow {
            dimensions,
            metrics,
            record_ids: parse_record_ids(&cells[num_cols - 1])?,
        });
    }

    Cube::from_parts(columns, dimension_count, rows)
}

/// Reads a cube artifact from disk
pub fn load_cube(path: &Path, dimension_count: usize) -> Result<Cube, CubeError> {
    let cube = read_cube_csv(File::open(path)?, dimension_count)?;
    info!(path = %path.display(), rows = cube.len(), "OLAP cube loaded");
    Ok(cube)
}

/// Renders ids as `[1, 3]`
pub fn format_record_ids(ids: &[RecordId]) -> String {
    let inner: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("[{}]", inner.join(", "))
}

/// Parses `[1, 3]` back into ids
pub fn parse_record_ids(cell: &[u8]) -> Result<Vec<RecordId>, CubeError> {
    let text = std::str::from_utf8(cell)
        .map_err(|e| CubeError::Parse(format!("record id list is not UTF-8: {e}")))?
        .trim();
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| CubeError::Parse(format!("malformed record id list '{text}'")))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|id| {
            atoi_simd::parse::<RecordId>(id.trim().as_bytes())
                .map_err(|_| CubeError::Parse(format!("malformed record id '{}'", id.trim())))
        })
        .collect()
}
