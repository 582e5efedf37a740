// src/survey/mod.rs

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use std::{collections::BTreeMap, fs::File, io::Read, path::Path};
use tracing::{debug, info, instrument, warn};

use crate::table::parse::parse_value;
use crate::table::write::{cell_text, write_atomic};

const YEAR_HEADERS: &[&str] = &["year"];

/// Per-year indicators derived from respondent-level survey rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    /// Share reporting union membership (`union == 1`), percent.
    Union,
    /// Share working full time (`wrkstat == 1`), percent.
    Employed,
    /// Share with a bachelor's degree or higher (`degree >= 3`), percent.
    College,
    /// Mean respondent income.
    AvgIncome,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::Union,
        Indicator::Employed,
        Indicator::College,
        Indicator::AvgIncome,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Indicator::Union => "gss_union_pct",
            Indicator::Employed => "gss_employed_pct",
            Indicator::College => "gss_college_pct",
            Indicator::AvgIncome => "gss_avg_income",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Indicator::Union => "GSS union membership (% of respondents)",
            Indicator::Employed => "GSS working full time (% of respondents)",
            Indicator::College => "GSS bachelor's degree or higher (% of respondents)",
            Indicator::AvgIncome => "GSS mean respondent income",
        }
    }

    /// Source headers, lowercase, in order of preference.
    fn headers(&self) -> &'static [&'static str] {
        match self {
            Indicator::Union => &["union"],
            Indicator::Employed => &["wrkstat"],
            Indicator::College => &["degree"],
            Indicator::AvgIncome => &["realinc", "income"],
        }
    }

    /// Contribution of one response to the yearly mean.
    fn score(&self, code: f64) -> f64 {
        let hit = |b: bool| if b { 100.0 } else { 0.0 };
        match self {
            Indicator::Union => hit(code == 1.0),
            Indicator::Employed => hit(code == 1.0),
            Indicator::College => hit(code >= 3.0),
            Indicator::AvgIncome => code,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.n += 1;
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YearAggregate {
    pub respondents: usize,
    /// Aligned with [`SurveyAggregates::indicators`].
    pub values: Vec<Option<f64>>,
}

/// Survey indicators aggregated by year. Only indicators whose source
/// column exists in the extract are present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurveyAggregates {
    pub indicators: Vec<Indicator>,
    pub years: BTreeMap<i32, YearAggregate>,
}

impl SurveyAggregates {
    pub fn value(&self, year: i32, indicator: Indicator) -> Option<f64> {
        let idx = self.indicators.iter().position(|i| *i == indicator)?;
        self.years.get(&year)?.values[idx]
    }

    pub fn respondents(&self, year: i32) -> Option<usize> {
        self.years.get(&year).map(|y| y.respondents)
    }
}

/// Aggregate the extract at `path` by year.
#[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn aggregate_extract<P: AsRef<Path>>(path: P) -> Result<SurveyAggregates> {
    let file = File::open(&path)
        .with_context(|| format!("opening survey extract {:?}", path.as_ref()))?;
    let agg = aggregate_reader(file)
        .with_context(|| format!("aggregating survey extract {:?}", path.as_ref()))?;
    info!(
        years = agg.years.len(),
        indicators = ?agg.indicators.iter().map(Indicator::column).collect::<Vec<_>>(),
        "aggregated survey extract"
    );
    Ok(agg)
}

/// Aggregate CSV rows from any reader. Headers are matched case-insensitively.
/// Responses that are missing or non-numeric are left out of that indicator's
/// denominator, but still count as respondents.
pub fn aggregate_reader<R: Read>(reader: R) -> Result<SurveyAggregates> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    // 1) map lowercase header → index
    let header_map: BTreeMap<String, usize> = rdr
        .headers()
        .context("reading survey header")?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_ascii_lowercase(), i))
        .collect();
    let find = |candidates: &[&str]| candidates.iter().find_map(|c| header_map.get(*c).copied());

    let year_idx =
        find(YEAR_HEADERS).ok_or_else(|| anyhow!("survey extract has no year column"))?;
    let present: Vec<(Indicator, usize)> = Indicator::ALL
        .iter()
        .filter_map(|ind| find(ind.headers()).map(|idx| (*ind, idx)))
        .collect();
    if present.is_empty() {
        warn!("survey extract has none of the indicator columns; only counts will be produced");
    }

    // 2) accumulate per year
    let mut by_year: BTreeMap<i32, (usize, Vec<Mean>)> = BTreeMap::new();
    let mut skipped = 0usize;
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("survey CSV record {}", line + 1))?;
        let year = record
            .get(year_idx)
            .and_then(parse_value)
            .filter(|y| y.fract() == 0.0)
            .map(|y| y as i32);
        let Some(year) = year else {
            skipped += 1;
            continue;
        };

        let (count, means) = by_year
            .entry(year)
            .or_insert_with(|| (0, vec![Mean::default(); present.len()]));
        *count += 1;
        for (slot, (ind, idx)) in present.iter().enumerate() {
            if let Some(code) = record.get(*idx).and_then(parse_value) {
                means[slot].push(ind.score(code));
            }
        }
    }
    if skipped > 0 {
        debug!(skipped, "survey rows without a usable year");
    }

    // 3) finalize
    let years = by_year
        .into_iter()
        .map(|(year, (respondents, means))| {
            (
                year,
                YearAggregate {
                    respondents,
                    values: means.iter().map(Mean::get).collect(),
                },
            )
        })
        .collect();

    Ok(SurveyAggregates {
        indicators: present.into_iter().map(|(ind, _)| ind).collect(),
        years,
    })
}

/// Write `year, respondent_count, <indicators...>` as CSV.
pub fn write_aggregates<P: AsRef<Path>>(path: P, agg: &SurveyAggregates) -> Result<()> {
    write_atomic(&path, |file| {
        let mut wtr = csv::Writer::from_writer(file);
        let mut header = vec!["year".to_string(), "respondent_count".to_string()];
        header.extend(agg.indicators.iter().map(|i| i.column().to_string()));
        wtr.write_record(&header)?;

        for (year, row) in &agg.years {
            let mut record = vec![year.to_string(), row.respondents.to_string()];
            record.extend(row.values.iter().map(|v| cell_text(*v)));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    })
    .with_context(|| format!("writing survey aggregates {:?}", path.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const EXTRACT: &str = "\
YEAR,UNION,WRKSTAT,DEGREE,REALINC
2018,1,1,3,50000
2018,2,2,1,30000
2018,,1,4,
2021,2,1,0,40000
,1,1,1,1
";

    #[test]
    fn aggregates_by_year_with_missing_excluded() -> Result<()> {
        let agg = aggregate_reader(EXTRACT.as_bytes())?;
        assert_eq!(agg.indicators, Indicator::ALL.to_vec());
        assert_eq!(agg.years.len(), 2);

        assert_eq!(agg.respondents(2018), Some(3));
        // two union answers, one of them yes
        assert_eq!(agg.value(2018, Indicator::Union), Some(50.0));
        let employed = agg.value(2018, Indicator::Employed).unwrap();
        assert!((employed - 200.0 / 3.0).abs() < 1e-9);
        let college = agg.value(2018, Indicator::College).unwrap();
        assert!((college - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(agg.value(2018, Indicator::AvgIncome), Some(40000.0));

        assert_eq!(agg.value(2021, Indicator::Union), Some(0.0));
        assert_eq!(agg.value(2021, Indicator::College), Some(0.0));
        assert_eq!(agg.value(1999, Indicator::Union), None);
        Ok(())
    }

    #[test]
    fn absent_columns_are_skipped() -> Result<()> {
        let agg = aggregate_reader("year,income\n2000,10\n2000,30\n".as_bytes())?;
        assert_eq!(agg.indicators, vec![Indicator::AvgIncome]);
        assert_eq!(agg.value(2000, Indicator::AvgIncome), Some(20.0));
        assert_eq!(agg.value(2000, Indicator::Union), None);
        Ok(())
    }

    #[test]
    fn year_column_is_required() {
        let err = aggregate_reader("union\n1\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("year"));
    }

    #[test]
    fn writes_aggregate_csv() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("gss.csv");
        let agg = aggregate_reader("year,union\n2000,1\n2000,2\n".as_bytes())?;
        write_aggregates(&path, &agg)?;
        let text = fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["year,respondent_count,gss_union_pct", "2000,2,50"]);
        Ok(())
    }
}
