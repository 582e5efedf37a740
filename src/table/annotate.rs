// src/table/annotate.rs

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::{Cell, Frequency, MergedTable};

/// Suffix of every derived percentage-change column.
pub const PCT_SUFFIX: &str = "_PCT_CHANGE";

const SIDECAR_NOTES: &str = "Frequencies are as reported by FRED metadata or declared for Census. \
The merged table preserves native frequencies; expect empty cells between lower-frequency \
observations. Each series has a matching _PCT_CHANGE column holding (current - previous) / previous \
between the series' own successive observations; it is empty for the first observation and \
immediately after a missing value.";

/// Percentage change of one series column.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: String,
    pub source: String,
    /// One entry per table row.
    pub values: Vec<Option<f64>>,
}

/// A merged table plus one derived column per original column, in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedTable {
    pub table: MergedTable,
    pub derived: Vec<DerivedColumn>,
}

/// Compute `(current - previous) / previous` over a column's own observations.
///
/// `Absent` rows belong to other series and are skipped. The first observation,
/// any observation right after a `Missing` one, and a zero previous value all
/// yield `None`.
pub fn pct_change(cells: &[Cell]) -> Vec<Option<f64>> {
    let mut out = vec![None; cells.len()];
    let mut previous: Option<f64> = None;

    for (row, cell) in cells.iter().enumerate() {
        match *cell {
            Cell::Absent => {}
            Cell::Missing => previous = None,
            Cell::Value(current) => {
                out[row] = previous
                    .filter(|p| *p != 0.0)
                    .map(|p| (current - p) / p)
                    .filter(|v| v.is_finite());
                previous = Some(current);
            }
        }
    }
    out
}

/// Augment `table` with a `{COLUMN}_PCT_CHANGE` column per series column.
/// The input is left untouched, so annotating twice gives the same result.
pub fn annotate(table: &MergedTable) -> AnnotatedTable {
    let derived = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| DerivedColumn {
            name: format!("{}{}", col.name, PCT_SUFFIX),
            source: col.name.clone(),
            values: pct_change(table.column_cells(idx)),
        })
        .collect();

    AnnotatedTable {
        table: table.clone(),
        derived,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Ok,
    Unavailable,
}

/// Sidecar entry for one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRecord {
    pub column: String,
    pub frequency: Frequency,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub unit: Option<String>,
    pub note: Option<String>,
    pub title: Option<String>,
    pub seasonal_adjustment: Option<String>,
    pub source: String,
    pub observations: usize,
    pub status: SeriesStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metadata document written next to the table, keyed by series id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sidecar {
    pub generated_at: String,
    pub notes: String,
    pub series: BTreeMap<String, SeriesRecord>,
}

/// Build the sidecar from the merged table. Dates are the first and last
/// rows where the column holds a value.
pub fn build_metadata(table: &MergedTable) -> Sidecar {
    let mut series = BTreeMap::new();

    for (idx, col) in table.columns().iter().enumerate() {
        let cells = table.column_cells(idx);
        let mut defined = cells
            .iter()
            .zip(table.dates())
            .filter(|(c, _)| c.value().is_some())
            .map(|(_, d)| *d);
        let first_date = defined.next();
        let last_date = defined.last().or(first_date);

        let status = if col.meta.unavailable.is_some() {
            SeriesStatus::Unavailable
        } else {
            SeriesStatus::Ok
        };

        series.insert(
            col.series_id.clone(),
            SeriesRecord {
                column: col.name.clone(),
                frequency: col.frequency,
                first_date,
                last_date,
                unit: col.meta.unit.clone(),
                note: col.meta.note.clone(),
                title: col.meta.title.clone(),
                seasonal_adjustment: col.meta.seasonal_adjustment.clone(),
                source: col.meta.source.clone(),
                observations: cells.iter().filter(|c| c.is_observation()).count(),
                status,
                error: col.meta.unavailable.clone(),
            },
        );
    }

    Sidecar {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        notes: SIDECAR_NOTES.to_string(),
        series,
    }
}
