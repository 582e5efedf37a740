// src/table/types.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nominal spacing of observations in a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Annual,
    #[default]
    Unknown,
}

impl Frequency {
    /// Map FRED's `frequency_short` code ("M", "Q", "A", ...) to a frequency.
    pub fn from_short_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" => Some(Frequency::Monthly),
            "Q" => Some(Frequency::Quarterly),
            "A" => Some(Frequency::Annual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annual => "annual",
            Frequency::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dated reading. `value` is `None` when the source reported a missing
/// or malformed value for this date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

/// Descriptive fields carried from the source into the metadata sidecar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub source: String,
    pub title: Option<String>,
    pub unit: Option<String>,
    pub seasonal_adjustment: Option<String>,
    pub note: Option<String>,
    /// Set when the series could not be fetched; holds the reason.
    pub unavailable: Option<String>,
}

/// A single named time series from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub id: String,
    pub column: String,
    pub frequency: Frequency,
    pub meta: SeriesMeta,
    /// Sorted ascending by date, one entry per date.
    observations: Vec<Observation>,
}

impl Series {
    /// Build a series from raw observations. Observations are sorted by date;
    /// when a date repeats, the first occurrence in source order is kept.
    pub fn new(
        id: impl Into<String>,
        column: impl Into<String>,
        frequency: Frequency,
        meta: SeriesMeta,
        mut observations: Vec<Observation>,
    ) -> Self {
        // stable sort keeps source order among equal dates
        observations.sort_by_key(|o| o.date);
        observations.dedup_by_key(|o| o.date);
        Self {
            id: id.into(),
            column: column.into(),
            frequency,
            meta,
            observations,
        }
    }

    /// A series with no observations, used when a fetch gives up.
    pub fn empty(
        id: impl Into<String>,
        column: impl Into<String>,
        frequency: Frequency,
        meta: SeriesMeta,
    ) -> Self {
        Self::new(id, column, frequency, meta, Vec::new())
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// First and last dates carrying a non-missing value.
    pub fn observed_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut defined = self.observations.iter().filter(|o| o.value.is_some());
        let first = defined.next()?.date;
        let last = defined.last().map_or(first, |o| o.date);
        Some((first, last))
    }
}

/// One cell of a merged column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    /// The series has no observation at this date.
    Absent,
    /// The series has an observation here, but its value is missing.
    Missing,
    Value(f64),
}

impl Cell {
    pub fn value(&self) -> Option<f64> {
        match self {
            Cell::Value(v) => Some(*v),
            Cell::Absent | Cell::Missing => None,
        }
    }

    /// True when this row is one of the series' own observation dates.
    pub fn is_observation(&self) -> bool {
        !matches!(self, Cell::Absent)
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Missing, Cell::Value)
    }
}

/// Column header plus the series description it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub series_id: String,
    pub frequency: Frequency,
    pub meta: SeriesMeta,
}

/// Date-indexed outer join of several series, stored column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    pub(crate) dates: Vec<NaiveDate>,
    pub(crate) columns: Vec<ColumnInfo>,
    /// `cells[c][r]` is column `c` at `dates[r]`.
    pub(crate) cells: Vec<Vec<Cell>>,
}

impl MergedTable {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn num_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_cells(&self, idx: usize) -> &[Cell] {
        &self.cells[idx]
    }

    /// Cells of the named column, if present.
    pub fn cells_by_name(&self, name: &str) -> Option<&[Cell]> {
        self.column_index(name).map(|i| self.cells[i].as_slice())
    }

    /// Row index for an exact date.
    pub fn row_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn series_sorts_and_keeps_first_duplicate() {
        let s = Series::new(
            "X",
            "X",
            Frequency::Annual,
            SeriesMeta::default(),
            vec![
                Observation::new(d(2021, 12, 31), Some(2.0)),
                Observation::new(d(2020, 12, 31), Some(1.0)),
                Observation::new(d(2021, 12, 31), Some(9.0)),
            ],
        );
        assert_eq!(s.len(), 2);
        assert_eq!(s.observations()[0].date, d(2020, 12, 31));
        assert_eq!(s.observations()[1].value, Some(2.0));
    }

    #[test]
    fn observed_range_skips_missing_edges() {
        let s = Series::new(
            "X",
            "X",
            Frequency::Monthly,
            SeriesMeta::default(),
            vec![
                Observation::new(d(2020, 1, 1), None),
                Observation::new(d(2020, 2, 1), Some(1.0)),
                Observation::new(d(2020, 3, 1), Some(1.5)),
                Observation::new(d(2020, 4, 1), None),
            ],
        );
        assert_eq!(s.observed_range(), Some((d(2020, 2, 1), d(2020, 3, 1))));

        let blank = Series::empty("Y", "Y", Frequency::Annual, SeriesMeta::default());
        assert_eq!(blank.observed_range(), None);
    }

    #[test]
    fn frequency_short_codes() {
        assert_eq!(Frequency::from_short_code("M"), Some(Frequency::Monthly));
        assert_eq!(Frequency::from_short_code(" a "), Some(Frequency::Annual));
        assert_eq!(Frequency::from_short_code("W"), None);
    }
}
