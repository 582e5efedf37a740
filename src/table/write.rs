// src/table/write.rs

use anyhow::{anyhow, Context, Result};
use arrow::array::{ArrayRef, Date32Array, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
    sync::Arc,
};

use super::annotate::{AnnotatedTable, Sidecar};

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub(crate) fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn cell_text(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Write `path` atomically: `write` fills a hidden sibling tmp file, which is
/// then renamed over the target. On failure the tmp file is removed and the
/// target is left as it was.
pub fn write_atomic<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> Result<()>,
{
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("output path {:?} has no file name", path))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;

    // 1) write into ".<name>.tmp" next to the target
    let tmp_path = dir.join(format!(".{}.tmp", file_name.to_string_lossy()));
    let mut tmp =
        File::create(&tmp_path).with_context(|| format!("creating {:?}", tmp_path))?;
    let written = write(&mut tmp).and_then(|_| {
        tmp.sync_all()
            .with_context(|| format!("flushing {:?}", tmp_path))
    });
    drop(tmp);
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // 2) rename over the original
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {:?} -> {:?}", tmp_path, path))?;
    Ok(())
}

/// Write the annotated table as CSV: `date`, then `COLUMN, COLUMN_PCT_CHANGE`
/// for each series. Missing cells are empty.
pub fn write_csv<P: AsRef<Path>>(path: P, annotated: &AnnotatedTable) -> Result<()> {
    let table = &annotated.table;
    write_atomic(&path, |file| {
        let mut wtr = csv::Writer::from_writer(file);

        let mut header = Vec::with_capacity(1 + 2 * table.columns().len());
        header.push("date".to_string());
        for (col, derived) in table.columns().iter().zip(&annotated.derived) {
            header.push(col.name.clone());
            header.push(derived.name.clone());
        }
        wtr.write_record(&header).context("writing CSV header")?;

        for (row, date) in table.dates().iter().enumerate() {
            let mut record = Vec::with_capacity(header.len());
            record.push(iso(*date));
            for (idx, derived) in annotated.derived.iter().enumerate() {
                record.push(cell_text(table.column_cells(idx)[row].value()));
                record.push(cell_text(derived.values[row]));
            }
            wtr.write_record(&record)
                .with_context(|| format!("writing CSV row {}", row))?;
        }
        wtr.flush().context("flushing CSV writer")?;
        Ok(())
    })
    .with_context(|| format!("writing table {:?}", path.as_ref()))
}

/// Pretty JSON with a trailing newline.
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, doc: &T) -> Result<()> {
    write_atomic(&path, |file| {
        serde_json::to_writer_pretty(&mut *file, doc).context("serializing JSON")?;
        file.write_all(b"\n")?;
        Ok(())
    })
    .with_context(|| format!("writing {:?}", path.as_ref()))
}

pub fn write_sidecar<P: AsRef<Path>>(path: P, sidecar: &Sidecar) -> Result<()> {
    write_json(path, sidecar)
}

/// Export the annotated table as Parquet: `date` (Date32) followed by nullable
/// Float64 value/pct pairs in the same order as the CSV.
pub fn write_parquet<P: AsRef<Path>>(path: P, annotated: &AnnotatedTable) -> Result<()> {
    let table = &annotated.table;

    // 1) schema
    let mut fields = vec![Field::new("date", DataType::Date32, false)];
    for (col, derived) in table.columns().iter().zip(&annotated.derived) {
        fields.push(Field::new(&col.name, DataType::Float64, true));
        fields.push(Field::new(&derived.name, DataType::Float64, true));
    }
    let schema = Arc::new(Schema::new(fields));

    // 2) arrays
    let days: Vec<i32> = table
        .dates()
        .iter()
        .map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
        .collect();
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(Date32Array::from(days))];
    for (idx, derived) in annotated.derived.iter().enumerate() {
        let values: Vec<Option<f64>> = table
            .column_cells(idx)
            .iter()
            .map(|c| c.value())
            .collect();
        arrays.push(Arc::new(Float64Array::from(values)));
        arrays.push(Arc::new(Float64Array::from(derived.values.clone())));
    }

    let batch =
        RecordBatch::try_new(schema.clone(), arrays).context("building table record batch")?;

    // 3) write
    write_atomic(&path, |file| {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))
            .context("creating Arrow writer for table")?;
        writer.write(&batch).context("writing table batch")?;
        writer.close().context("closing table writer")?;
        Ok(())
    })
    .with_context(|| format!("writing parquet {:?}", path.as_ref()))
}
