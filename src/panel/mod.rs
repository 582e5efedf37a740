// src/panel/mod.rs
//
// Year-level view of the merged table. This is an explicit, separately
// written collapse; the main table itself is never resampled.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};
use tracing::{info, warn};

use crate::survey::SurveyAggregates;
use crate::table::write::{cell_text, write_atomic, write_json};
use crate::table::{Cell, ColumnInfo, Frequency, MergedTable};

pub mod categories;

use categories::{decade, econ_era, unemployment_category, ECON_ERA_LABELS, UNEMPLOYMENT_LABELS};

pub const DECADE: &str = "decade";
pub const ECON_ERA: &str = "econ_era";
pub const UNEMP_CAT: &str = "unemp_cat";
pub const RESPONDENT_COUNT: &str = "respondent_count";

#[derive(Debug, Clone, PartialEq)]
pub struct PanelColumn {
    pub name: String,
    pub label: String,
    /// One entry per panel year.
    pub values: Vec<Option<f64>>,
}

/// One row per calendar year.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnualPanel {
    pub years: Vec<i32>,
    pub columns: Vec<PanelColumn>,
}

impl AnnualPanel {
    pub fn column(&self, name: &str) -> Option<&PanelColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Value of `name` in `year`.
    pub fn get(&self, name: &str, year: i32) -> Option<f64> {
        let row = self.years.binary_search(&year).ok()?;
        self.column(name)?.values[row]
    }
}

/// Pick one value per year for a column:
///  - monthly: the December value, else the last value in the year
///  - quarterly: the last value in the year
///  - annual/unknown: the first value in the year
fn yearly_value(frequency: Frequency, cells: &[Cell], dates: &[NaiveDate], rows: &[usize]) -> Option<f64> {
    let mut defined = rows
        .iter()
        .filter_map(|&r| cells[r].value().map(|v| (dates[r], v)));
    match frequency {
        Frequency::Monthly => {
            let values: Vec<(NaiveDate, f64)> = defined.collect();
            values
                .iter()
                .find(|(d, _)| d.month() == 12)
                .or_else(|| values.last())
                .map(|(_, v)| *v)
        }
        Frequency::Quarterly => defined.last().map(|(_, v)| v),
        Frequency::Annual | Frequency::Unknown => defined.next().map(|(_, v)| v),
    }
}

fn series_label(col: &ColumnInfo) -> String {
    match (&col.meta.title, &col.meta.unit) {
        (Some(t), Some(u)) => format!("{} ({})", t, u),
        (Some(t), None) => t.clone(),
        _ => col.name.clone(),
    }
}

/// Collapse `table` to one row per year and attach the labeled derived
/// variables. Survey aggregates, when given, are outer-joined by year.
pub fn build_annual_panel(
    table: &MergedTable,
    survey: Option<&SurveyAggregates>,
    unemployment_column: Option<&str>,
) -> AnnualPanel {
    // 1) group rows by year; years from survey join in too
    let mut rows_by_year: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (row, date) in table.dates().iter().enumerate() {
        rows_by_year.entry(date.year()).or_default().push(row);
    }
    let mut years: BTreeSet<i32> = rows_by_year.keys().copied().collect();
    if let Some(s) = survey {
        years.extend(s.years.keys().copied());
    }
    let years: Vec<i32> = years.into_iter().collect();

    let mut columns = Vec::new();

    // 2) series columns
    for (idx, col) in table.columns().iter().enumerate() {
        let cells = table.column_cells(idx);
        let values = years
            .iter()
            .map(|y| {
                rows_by_year
                    .get(y)
                    .and_then(|rows| yearly_value(col.frequency, cells, table.dates(), rows))
            })
            .collect();
        columns.push(PanelColumn {
            name: col.name.clone(),
            label: series_label(col),
            values,
        });
    }

    // 3) survey columns
    if let Some(s) = survey {
        columns.push(PanelColumn {
            name: RESPONDENT_COUNT.to_string(),
            label: "Survey respondents".to_string(),
            values: years
                .iter()
                .map(|y| s.respondents(*y).map(|n| n as f64))
                .collect(),
        });
        for ind in &s.indicators {
            columns.push(PanelColumn {
                name: ind.column().to_string(),
                label: ind.label().to_string(),
                values: years.iter().map(|y| s.value(*y, *ind)).collect(),
            });
        }
    }

    // 4) labeled derived variables
    columns.push(PanelColumn {
        name: DECADE.to_string(),
        label: "Decade".to_string(),
        values: years.iter().map(|y| Some(decade(*y) as f64)).collect(),
    });
    columns.push(PanelColumn {
        name: ECON_ERA.to_string(),
        label: "Economic Era".to_string(),
        values: years.iter().map(|y| Some(econ_era(*y) as f64)).collect(),
    });
    if let Some(name) = unemployment_column {
        match columns.iter().find(|c| c.name == name) {
            Some(rate) => {
                let values = rate
                    .values
                    .iter()
                    .map(|v| v.map(|r| unemployment_category(r) as f64))
                    .collect();
                columns.push(PanelColumn {
                    name: UNEMP_CAT.to_string(),
                    label: "Unemployment Category".to_string(),
                    values,
                });
            }
            None => warn!(column = name, "unemployment column not in table; skipping unemp_cat"),
        }
    }

    AnnualPanel { years, columns }
}

/// Variable and value labels for the panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelLabels {
    pub variables: BTreeMap<String, String>,
    pub values: BTreeMap<String, BTreeMap<String, String>>,
}

impl PanelLabels {
    pub fn for_panel(panel: &AnnualPanel) -> Self {
        let mut variables = BTreeMap::new();
        variables.insert("year".to_string(), "Year".to_string());
        for c in &panel.columns {
            variables.insert(c.name.clone(), c.label.clone());
        }

        let to_map = |pairs: &[(u8, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        let mut values = BTreeMap::new();
        values.insert(ECON_ERA.to_string(), to_map(ECON_ERA_LABELS));
        if panel.column(UNEMP_CAT).is_some() {
            values.insert(UNEMP_CAT.to_string(), to_map(UNEMPLOYMENT_LABELS));
        }
        Self { variables, values }
    }
}

/// Write the panel as CSV (`year` first) and its labels as JSON.
pub fn write_panel<P: AsRef<Path>, Q: AsRef<Path>>(
    path: P,
    labels_path: Q,
    panel: &AnnualPanel,
) -> Result<()> {
    write_atomic(&path, |file| {
        let mut wtr = csv::Writer::from_writer(file);
        let mut header = vec!["year".to_string()];
        header.extend(panel.columns.iter().map(|c| c.name.clone()));
        wtr.write_record(&header)?;

        for (row, year) in panel.years.iter().enumerate() {
            let mut record = vec![year.to_string()];
            record.extend(panel.columns.iter().map(|c| cell_text(c.values[row])));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    })
    .with_context(|| format!("writing annual panel {:?}", path.as_ref()))?;

    write_json(&labels_path, &PanelLabels::for_panel(panel))?;
    info!(
        years = panel.years.len(),
        columns = panel.columns.len(),
        path = %path.as_ref().display(),
        "wrote annual panel"
    );
    Ok(())
}
