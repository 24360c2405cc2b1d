use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use memchr::memchr;
use memmap2::Mmap;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{info, warn};

use crate::helpers::csv_helpers::{count_lines, split_fields, split_records};
use crate::processor::column::{ColumnType, FactBatch, Schema};
use crate::processor::{CubeError, DEFAULT_ID_FIELD, ParseError, ParseSummary, Value};

/// Fact file loading options
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Field holding each record's unique id
    pub id_field: String,
    /// Number of chunks parsed in parallel; `None` uses the rayon pool size
    pub chunks: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            id_field: DEFAULT_ID_FIELD.to_string(),
            chunks: None,
        }
    }
}

/// Parsed rows of one chunk, still in file order
struct ChunkResult {
    rows: Vec<(usize, Vec<Option<Value>>)>,
    errors: Vec<ParseError>,
    lines: usize,
}

/// Loads a cleaned fact table from a CSV file using memory mapping.
///
/// Column types are inferred from every non-empty value (int, float, date,
/// string). A column widens when a later value does not fit: integers to
/// float, any other mix to string. The id column is always integral. Empty
/// fields are missing values. Rows that do not
/// match the header or the inferred types are skipped and reported in the
/// returned [`ParseSummary`].
///
/// # Errors
/// Returns a [`CubeError`] if:
/// - the file cannot be opened or mapped
/// - the header is missing or lacks the id field
/// - two rows share a record id
pub fn load_facts(
    path: &Path,
    options: &LoadOptions,
) -> Result<(FactBatch, ParseSummary), CubeError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let buf: &[u8] = &mmap[..];

    // Parse header
    let header_end = memchr(b'\n', buf).unwrap_or(buf.len());
    let header_line = buf[..header_end].strip_suffix(b"\r").unwrap_or(&buf[..header_end]);
    if header_line.is_empty() {
        return Err(CubeError::Parse("Missing header line".into()));
    }
    let mut fields = Vec::new();
    split_fields(header_line, &mut fields);
    let headers: Vec<String> = fields
        .iter()
        .map(|f| String::from_utf8_lossy(f).trim().to_string())
        .collect();

    let data = buf.get(header_end + 1..).unwrap_or(&[]);
    let mut types = infer_schema(data, headers.len());
    // a malformed id fails its own row, never the whole id column
    if let Some(idx) = headers.iter().position(|h| *h == options.id_field) {
        types[idx] = ColumnType::Int64;
    }
    let schema = Schema::new(headers.iter().cloned().zip(types))?;
    let mut batch = FactBatch::new(schema, &options.id_field)?;

    // Parse chunks in parallel; quoted fields may hold newlines, so a file
    // with quotes is read as one chunk
    let num_chunks = if memchr(b'"', data).is_some() {
        1
    } else {
        options
            .chunks
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    };
    let chunks = find_chunk_boundaries(data, num_chunks);
    let results: Vec<ChunkResult> = chunks
        .par_iter()
        .map(|(start, end)| parse_chunk(&data[*start..*end], batch.schema()))
        .collect();

    // Merge in file order; line numbers count the header as line 1
    let mut errors = Vec::new();
    let mut lines_before = 1;
    let id_index = batch.id_index();
    for chunk in results {
        for mut error in chunk.errors {
            error.row += lines_before;
            errors.push(error);
        }
        for (local_line, row) in chunk.rows {
            if row[id_index].is_none() {
                errors.push(ParseError {
                    row: lines_before + local_line,
                    column: options.id_field.clone(),
                    value: String::new(),
                    error: "missing record id".into(),
                });
                continue;
            }
            batch.push(row)?;
        }
        lines_before += chunk.lines;
    }
    errors.sort_by_key(|e| e.row);

    if !errors.is_empty() {
        warn!(path = %path.display(), skipped = errors.len(), "skipped malformed fact rows");
    }
    info!(path = %path.display(), records = batch.len(), "fact records loaded");

    let summary = ParseSummary {
        rows_processed: batch.len(),
        errors,
    };
    Ok((batch, summary))
}

fn infer_schema(data: &[u8], num_cols: usize) -> Vec<ColumnType> {
    let mut inferred: Vec<Option<ColumnType>> = vec![None; num_cols];
    let mut fields = Vec::with_capacity(num_cols);

    for (_, record) in split_records(data) {
        split_fields(record, &mut fields);
        if fields.len() != num_cols {
            continue;
        }
        for (slot, field) in inferred.iter_mut().zip(&fields) {
            if field.is_empty() {
                continue;
            }
            let seen = ColumnType::infer(field);
            *slot = Some(slot.map_or(seen, |known| known.widen(seen)));
        }
    }

    // a column with no values at all is read as text
    inferred
        .into_iter()
        .map(|t| t.unwrap_or(ColumnType::Str))
        .collect()
}

fn find_chunk_boundaries(data: &[u8], num_chunks: usize) -> Vec<(usize, usize)> {
    if data.is_empty() {
        return vec![];
    }

    let chunk_size = data.len() / num_chunks;
    let mut boundaries = Vec::with_capacity(num_chunks);
    let mut start = 0;

    for i in 0..num_chunks - 1 {
        let mut end = ((i + 1) * chunk_size).max(start);

        // Find next newline
        match memchr(b'\n', &data[end..]) {
            Some(offset) => end += offset + 1, // Include the newline
            None => end = data.len(),
        }

        if start < end {
            boundaries.push((start, end));
        }
        start = end;
        if start >= data.len() {
            break;
        }
    }

    // Last chunk gets everything remaining
    if start < data.len() {
        boundaries.push((start, data.len()));
    }

    boundaries
}

fn parse_chunk(chunk: &[u8], schema: &Schema) -> ChunkResult {
    let num_cols = schema.len();
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    let mut fields: Vec<Cow<[u8]>> = Vec::with_capacity(num_cols);

    'lines: for (line_no, line) in split_records(chunk) {
        split_fields(line, &mut fields);

        if fields.len() != num_cols {
            errors.push(ParseError {
                row: line_no,
                column: String::new(),
                value: String::from_utf8_lossy(line).into_owned(),
                error: format!("Expected {} fields, got {}", num_cols, fields.len()),
            });
            continue;
        }

        let mut values = Vec::with_capacity(num_cols);
        for (col_idx, field) in fields.iter().enumerate() {
            if field.is_empty() {
                values.push(None);
                continue;
            }
            match schema.column_type(col_idx).parse(field) {
                Ok(value) => values.push(Some(value)),
                Err(e) => {
                    errors.push(ParseError {
                        row: line_no,
                        column: schema.name(col_idx).to_string(),
                        value: String::from_utf8_lossy(field).into_owned(),
                        error: e.to_string(),
                    });
                    continue 'lines;
                }
            }
        }

        rows.push((line_no, values));
    }

    ChunkResult {
        rows,
        errors,
        lines: count_lines(chunk),
    }
}
