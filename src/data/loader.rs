use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::ChunkReader;
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, ReferenceSet, RowId, Spectrum, SpectrumMatrix};
use crate::temporal::{parse_timestamp, TemporalIndex};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a measurement matrix from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv` / `.txt` – wide table: metadata columns, then one column per wavenumber
/// * `.json`         – `[{ "x": [...], "y": [...], ...meta }, ...]`
/// * `.parquet`      – `x` / `y` list columns, or one float column per wavenumber
pub fn load_file(path: &Path, separator: char) -> Result<SpectrumMatrix> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let matrix = match ext.as_str() {
        "csv" | "txt" => {
            let file = std::fs::File::open(path).context("opening CSV")?;
            read_wide_csv(file, separator)
        }
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    info!(
        "loaded {} spectra x {} channels from {}",
        matrix.len(),
        matrix.channel_count(),
        path.display()
    );
    Ok(matrix)
}

/// Load media spectra; every row of the file becomes a reference.
pub fn load_reference(path: &Path, separator: char) -> Result<ReferenceSet> {
    let matrix = load_file(path, separator)?;
    Ok(ReferenceSet::new(matrix)?)
}

/// Load a `(row, timestamp)` table.
///
/// The row column is the first header named `row`, `row_id`, `id` or `index`
/// (else column 0); the timestamp column is the first named `timestamp`,
/// `datetime` or `time` (else column 1).
pub fn load_temporal_index(path: &Path, separator: char) -> Result<TemporalIndex> {
    let file = std::fs::File::open(path).context("opening timestamp table")?;
    read_temporal_csv(file, separator).with_context(|| format!("loading {}", path.display()))
}

// ---------------------------------------------------------------------------
// Wide CSV loader
// ---------------------------------------------------------------------------

/// Instrument export layout:
///
/// ```text
/// META:Sample;META:DateTime;400.0;401.5;403.0;...
/// 'A1';'2023-05-17 10:00:00';0,12;0,14;0,11;...
/// ```
///
/// The first header cell that parses as a number starts the wavenumber axis;
/// everything before it is metadata (a `META:` prefix is dropped). Single
/// quotes are stripped and decimal commas accepted in numeric cells.
pub fn read_wide_csv<R: Read>(input: R, separator: char) -> Result<SpectrumMatrix> {
    if !separator.is_ascii() {
        bail!("separator '{separator}' is not a single-byte character");
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator as u8)
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut records = reader.records();
    let header = match records.next() {
        Some(r) => r.context("reading CSV header")?,
        None => bail!("CSV is empty"),
    };
    let header: Vec<String> = header.iter().map(clean_cell).collect();

    let start_col = header
        .iter()
        .position(|h| parse_number(h).is_some())
        .context("no numeric wavenumber column in CSV header")?;
    let wavenumbers: Vec<f64> = header[start_col..]
        .iter()
        .enumerate()
        .map(|(j, h)| {
            parse_number(h)
                .with_context(|| format!("header column {}: '{h}' is not a wavenumber", start_col + j))
        })
        .collect::<Result<_>>()?;
    let labels: Vec<String> = header[..start_col]
        .iter()
        .map(|l| l.strip_prefix("META:").unwrap_or(l).to_string())
        .collect();
    debug!("CSV header: {} metadata columns, {} channels", labels.len(), wavenumbers.len());

    let mut spectra = Vec::new();
    for (row_no, result) in records.enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.iter().all(|c| c.is_empty()) {
            continue;
        }
        if record.len() != header.len() {
            bail!(
                "CSV row {row_no}: {} fields but the header has {}",
                record.len(),
                header.len()
            );
        }

        let mut metadata = BTreeMap::new();
        for (label, cell) in labels.iter().zip(record.iter()) {
            metadata.insert(label.clone(), guess_metadata_type(&clean_cell(cell)));
        }
        let intensities = record
            .iter()
            .skip(start_col)
            .enumerate()
            .map(|(j, cell)| {
                let cell = clean_cell(cell);
                parse_number(&cell)
                    .with_context(|| format!("Row {row_no}, channel {j}: '{cell}' is not a number"))
            })
            .collect::<Result<Vec<f64>>>()?;

        spectra.push(Spectrum {
            id: RowId(spectra.len()),
            intensities,
            metadata,
        });
    }

    Ok(SpectrumMatrix::new(wavenumbers, spectra)?)
}

fn clean_cell(s: &str) -> String {
    s.trim().replace('\'', "")
}

/// Parse a float, accepting a decimal comma.
fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>()
        .or_else(|_| s.replace(',', ".").parse::<f64>())
        .ok()
}

pub(crate) fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    if parse_timestamp(s).is_some() {
        return MetadataValue::Date(s.to_string());
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Timestamp table
// ---------------------------------------------------------------------------

pub fn read_temporal_csv<R: Read>(input: R, separator: char) -> Result<TemporalIndex> {
    if !separator.is_ascii() {
        bail!("separator '{separator}' is not a single-byte character");
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator as u8)
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers: Vec<String> = reader
        .headers()
        .context("reading timestamp headers")?
        .iter()
        .map(|h| clean_cell(h).to_ascii_lowercase())
        .collect();

    let find = |names: &[&str], fallback: usize| {
        headers
            .iter()
            .position(|h| names.contains(&h.as_str()))
            .unwrap_or(fallback)
    };
    let row_idx = find(&["row", "row_id", "id", "index"], 0);
    let ts_idx = find(&["timestamp", "datetime", "time"], 1);
    if row_idx == ts_idx || row_idx >= headers.len() || ts_idx >= headers.len() {
        bail!("timestamp table needs a row column and a timestamp column");
    }

    let mut entries = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("timestamp row {row_no}"))?;
        let id_cell = clean_cell(record.get(row_idx).unwrap_or(""));
        let ts_cell = clean_cell(record.get(ts_idx).unwrap_or(""));
        let id: usize = id_cell
            .parse()
            .with_context(|| format!("timestamp row {row_no}: '{id_cell}' is not a row id"))?;
        let ts = parse_timestamp(&ts_cell)
            .with_context(|| format!("timestamp row {row_no}: cannot parse '{ts_cell}'"))?;
        entries.push((RowId(id), ts));
    }
    Ok(TemporalIndex::new(entries))
}

// ---------------------------------------------------------------------------
// Shared axis bookkeeping for list layouts
// ---------------------------------------------------------------------------

/// Collects `(x, y)` rows and insists that every `x` is the same axis.
#[derive(Default)]
struct AxisCollector {
    axis: Option<Vec<f64>>,
    spectra: Vec<Spectrum>,
}

impl AxisCollector {
    fn push(
        &mut self,
        x: Option<Vec<f64>>,
        y: Vec<f64>,
        metadata: BTreeMap<String, MetadataValue>,
    ) -> Result<()> {
        let row = self.spectra.len();
        if let Some(x) = x {
            if let Some(axis) = &self.axis {
                if axis.len() != x.len() || axis.iter().zip(&x).any(|(a, b)| a != b) {
                    bail!("Row {row}: wavenumber axis differs from row 0");
                }
            } else {
                self.axis = Some(x);
            }
        }
        self.spectra.push(Spectrum {
            id: RowId(row),
            intensities: y,
            metadata,
        });
        Ok(())
    }

    fn finish(self, fallback_axis: Option<Vec<f64>>) -> Result<SpectrumMatrix> {
        let axis = self
            .axis
            .or(fallback_axis)
            .context("no wavenumber axis found")?;
        Ok(SpectrumMatrix::new(axis, self.spectra)?)
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON (`df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "x": [400.0, 401.5, ...], "y": [0.12, 0.14, ...], "DateTime": "2023-05-17 10:00:00" },
///   ...
/// ]
/// ```
///
/// `intensities` is accepted in place of `y`. The first record must carry
/// `x`; later records may repeat it.
fn load_json(path: &Path) -> Result<SpectrumMatrix> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    parse_json(&text)
}

fn parse_json(text: &str) -> Result<SpectrumMatrix> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;
    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut collector = AxisCollector::default();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let x = match obj.get("x") {
            Some(v) => Some(json_array_to_f64(Some(v), i, "x")?),
            None if i == 0 => bail!("Row 0: missing 'x' wavenumber array"),
            None => None,
        };
        let y_key = if obj.contains_key("y") { "y" } else { "intensities" };
        let y = json_array_to_f64(obj.get(y_key), i, y_key)?;

        let metadata = obj
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "x" | "y" | "intensities"))
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect();

        collector.push(x, y, metadata)?;
    }
    collector.finish(None)
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => guess_metadata_type(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing spectral data.
///
/// Two schemas are understood:
/// - list layout: `x` and `y` as List<Float64> / LargeList<Float64>, other
///   columns are metadata (what `generate_sample` writes);
/// - wide layout: one Float64/Float32 column per wavenumber, named by the
///   wavenumber, other columns are metadata.
fn load_parquet(path: &Path) -> Result<SpectrumMatrix> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    read_parquet(file)
}

/// Read Parquet from anything the parquet crate can seek in (a `File`,
/// in-memory `Bytes`).
pub fn read_parquet<R: ChunkReader + 'static>(input: R) -> Result<SpectrumMatrix> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(input).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;
    read_record_batches(reader)
}

/// Turn a stream of Arrow record batches into a matrix. Row numbers in
/// errors count across batches.
fn read_record_batches<I>(batches: I) -> Result<SpectrumMatrix>
where
    I: IntoIterator<Item = std::result::Result<RecordBatch, ArrowError>>,
{
    let mut collector = AxisCollector::default();
    let mut wide_axis: Option<Vec<f64>> = None;

    for batch_result in batches {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        let y_idx = schema.index_of("y").ok();
        let x_idx = schema.index_of("x").ok();

        // Wide layout: numeric column names are channels.
        let channel_cols: Vec<(usize, f64)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter_map(|(i, f)| parse_number(f.name()).map(|w| (i, w)))
            .collect();
        if y_idx.is_none() && channel_cols.is_empty() {
            bail!("Parquet file has neither a 'y' column nor wavenumber columns");
        }
        if y_idx.is_none() {
            wide_axis.get_or_insert_with(|| channel_cols.iter().map(|&(_, w)| w).collect());
        }

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != x_idx && Some(*i) != y_idx)
            .filter(|(i, _)| y_idx.is_some() || !channel_cols.iter().any(|(c, _)| c == i))
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..n_rows {
            let global = collector.spectra.len();
            let (x, y) = match y_idx {
                Some(y_idx) => {
                    let y = extract_f64_list(batch.column(y_idx), row)
                        .with_context(|| format!("Row {global}: failed to read 'y'"))?;
                    let x = match x_idx {
                        Some(x_idx) => Some(
                            extract_f64_list(batch.column(x_idx), row)
                                .with_context(|| format!("Row {global}: failed to read 'x'"))?,
                        ),
                        None => None,
                    };
                    (x, y)
                }
                None => {
                    let y = channel_cols
                        .iter()
                        .map(|&(c, _)| extract_f64_scalar(batch.column(c), row))
                        .collect::<Result<Vec<f64>>>()
                        .with_context(|| format!("Row {global}: failed to read channels"))?;
                    (None, y)
                }
            };

            let metadata = meta_cols
                .iter()
                .map(|(col_idx, col_name)| {
                    (col_name.clone(), extract_metadata_value(batch.column(*col_idx), row))
                })
                .collect();

            collector.push(x, y, metadata)?;
        }
    }

    collector.finish(wide_axis)
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract one intensity from a wide-layout channel column.
fn extract_f64_scalar(col: &Arc<dyn Array>, row: usize) -> Result<f64> {
    if col.is_null(row) {
        return Ok(f64::NAN);
    }
    if let Some(arr) = col.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.value(row))
    } else if let Some(arr) = col.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.value(row) as f64)
    } else {
        bail!("channel column has type {:?}, expected Float64 or Float32", col.data_type())
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => match any.downcast_ref::<StringArray>() {
            Some(s) => guess_metadata_type(s.value(row)),
            None => MetadataValue::Null,
        },
        DataType::LargeUtf8 => guess_metadata_type(col.as_string::<i64>().value(row)),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Bool(a.value(row))),
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
            match array_value_to_string(col.as_ref(), row) {
                Ok(s) => MetadataValue::Date(s),
                Err(_) => MetadataValue::Null,
            }
        }
        other => match array_value_to_string(col.as_ref(), row) {
            Ok(s) => MetadataValue::String(s),
            Err(_) => MetadataValue::String(format!("{other:?}")),
        },
    }
}
