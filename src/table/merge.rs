// src/table/merge.rs

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tracing::debug;

use super::types::{Cell, ColumnInfo, MergedTable, Series};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("column `{0}` is produced by more than one series")]
    DuplicateColumn(String),
}

/// Full outer join of `series` on exact date equality.
///
/// Every date seen in any series becomes exactly one row, ascending. A column
/// holds its series' observation at that date, or [`Cell::Absent`] when the
/// series has none. Nothing is resampled or aligned; monthly and annual series
/// interleave sparsely. Columns keep the order they were supplied in.
pub fn merge<'a, I>(series: I) -> Result<MergedTable, MergeError>
where
    I: IntoIterator<Item = &'a Series>,
{
    let series: Vec<&Series> = series.into_iter().collect();

    // 1) column names must be unique
    let mut seen = HashSet::with_capacity(series.len());
    for s in &series {
        if !seen.insert(s.column.as_str()) {
            return Err(MergeError::DuplicateColumn(s.column.clone()));
        }
    }

    // 2) union of all dates, sorted
    let dates: Vec<NaiveDate> = series
        .iter()
        .flat_map(|s| s.observations().iter().map(|o| o.date))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // 3) scatter each series into its column
    let mut columns = Vec::with_capacity(series.len());
    let mut cells = Vec::with_capacity(series.len());
    for s in &series {
        let mut col = vec![Cell::Absent; dates.len()];
        for obs in s.observations() {
            // every observation date is in the union, so this always hits
            if let Ok(row) = dates.binary_search(&obs.date) {
                col[row] = Cell::from(obs.value);
            }
        }
        debug!(column = %s.column, observations = s.len(), "merged column");
        columns.push(ColumnInfo {
            name: s.column.clone(),
            series_id: s.id.clone(),
            frequency: s.frequency,
            meta: s.meta.clone(),
        });
        cells.push(col);
    }

    Ok(MergedTable {
        dates,
        columns,
        cells,
    })
}
