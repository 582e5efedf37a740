// src/pipeline.rs

use anyhow::{Context, Result};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::fetch::census::PovertySource;
use crate::fetch::fred::FredSource;
use crate::fetch::Transport;
use crate::panel::{build_annual_panel, write_panel};
use crate::survey::{aggregate_extract, write_aggregates, SurveyAggregates};
use crate::table::{
    annotate, build_metadata, merge, write_csv, write_parquet, write_sidecar, Series, SeriesMeta,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every source came back empty; nothing is written.
    #[error("no data was retrieved from any source")]
    NoData,
}

/// What one run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Columns whose source answered, even with no observations.
    pub fetched: Vec<String>,
    /// Columns that are present but unavailable.
    pub failed: Vec<String>,
    pub rows: usize,
    pub columns: usize,
}

/// Fetch every configured source, merge, annotate and write the outputs.
///
/// Individual source failures are logged and recorded in the sidecar; only
/// an entirely empty result is an error.
pub async fn run<T: Transport + ?Sized>(config: &Config, transport: &T) -> Result<RunSummary> {
    let started = Instant::now();
    let policy = config.retry.policy();
    let mut series: Vec<Series> = Vec::new();

    // 1) FRED, one series at a time
    let total = config.fred.series.len();
    if total > 0 {
        let fred = FredSource::new(
            transport,
            &config.fred.base_url,
            config.api_key().unwrap_or_default(),
            &policy,
        )
        .with_context(|| format!("bad FRED base URL {:?}", config.fred.base_url))?;

        for (i, spec) in config.fred.series.iter().enumerate() {
            info!("[{}/{}] fetching FRED {} → {}", i + 1, total, spec.id, spec.column);
            match fred.fetch(spec).await {
                Ok(s) => series.push(s),
                Err(e) => {
                    error!(series = %spec.id, error = %e, "FRED series failed; column will be empty");
                    series.push(Series::empty(
                        spec.id.clone(),
                        spec.column.clone(),
                        spec.frequency,
                        SeriesMeta {
                            source: "FRED".to_string(),
                            note: Some(format!("FRED series {}", spec.id)),
                            unavailable: Some(e.to_string()),
                            ..Default::default()
                        },
                    ));
                }
            }
        }
    }

    // 2) Census poverty rate, never fatal
    if config.census.enabled {
        info!("fetching Census poverty → {}", config.census.column);
        let census = PovertySource::new(
            transport,
            &config.census.base_url,
            &config.census.column,
            (config.census.first_year, config.census.last_year),
            &policy,
        );
        series.push(census.fetch().await);
    }

    let (fetched, failed): (Vec<&Series>, Vec<&Series>) =
        series.iter().partition(|s| s.meta.unavailable.is_none());
    let fetched: Vec<String> = fetched.iter().map(|s| s.column.clone()).collect();
    let failed: Vec<String> = failed.iter().map(|s| s.column.clone()).collect();

    // 3) merge on exact dates
    info!(series = series.len(), "merging");
    let table = merge(&series)?;
    if table.is_empty() {
        error!(failed = ?failed, "every source failed or returned nothing");
        return Err(PipelineError::NoData.into());
    }

    // 4) annotate and write
    info!(rows = table.num_rows(), "annotating");
    let annotated = annotate(&table);
    info!("writing → {}", config.output.table.display());
    write_csv(&config.output.table, &annotated)?;
    info!("writing → {}", config.output.metadata.display());
    write_sidecar(&config.output.metadata, &build_metadata(&table))?;
    if let Some(path) = &config.output.parquet {
        info!("writing → {}", path.display());
        write_parquet(path, &annotated)?;
    }

    // 5) survey aggregates, optional and soft
    let survey: Option<SurveyAggregates> = match &config.survey.extract {
        Some(path) => match aggregate_extract(path) {
            Ok(agg) => {
                if let Err(e) = write_aggregates(&config.output.survey_aggregates, &agg) {
                    warn!("could not write survey aggregates: {:#}", e);
                }
                Some(agg)
            }
            Err(e) => {
                warn!("survey extract skipped: {:#}", e);
                None
            }
        },
        None => None,
    };

    // 6) annual panel
    if config.panel.enabled {
        if let Some(path) = &config.output.panel {
            let panel = build_annual_panel(
                &table,
                survey.as_ref(),
                config.panel.unemployment_column.as_deref(),
            );
            write_panel(path, &config.output.panel_labels, &panel)?;
        }
    }

    let summary = RunSummary {
        fetched,
        failed,
        rows: table.num_rows(),
        columns: table.columns().len(),
    };
    info!(
        rows = summary.rows,
        columns = summary.columns,
        failed = summary.failed.len(),
        elapsed = ?started.elapsed(),
        path = %config.output.table.display(),
        "run complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Secret, SeriesSpec};
    use crate::fetch::testing::{init_test_logging, FnTransport};
    use crate::fetch::FetchError;
    use crate::table::Frequency;
    use serde_json::{json, Value};
    use std::{fs, path::Path};
    use tempfile::tempdir;
    use url::Url;

    fn config(dir: &Path) -> Config {
        init_test_logging();
        let mut c = Config::default();
        c.fred.api_key = Some(Secret::new("test-key"));
        c.fred.series = vec![
            SeriesSpec {
                id: "UNRATE".into(),
                column: "UNEMPLOYMENT_RATE".into(),
                frequency: Frequency::Monthly,
            },
            SeriesSpec {
                id: "GINI".into(),
                column: "GINI_INDEX".into(),
                frequency: Frequency::Annual,
            },
        ];
        c.retry.initial_backoff_ms = 0;
        c.output.table = dir.join("out.csv");
        c.output.metadata = dir.join("out_meta.json");
        c.output.panel = Some(dir.join("panel.csv"));
        c.output.panel_labels = dir.join("panel_labels.json");
        c.output.survey_aggregates = dir.join("gss.csv");
        c
    }

    fn series_id(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "series_id")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    fn unavailable() -> FetchError {
        FetchError::Server {
            url: "http://test/".into(),
            status: 503,
        }
    }

    fn census_body() -> Value {
        json!([
            ["YEAR", "AGE", "POV_RATE"],
            ["2019", "All people", "10.5"],
            ["2020", "All people", "11.4"]
        ])
    }

    fn respond(url: &Url, _: usize) -> Result<Value, FetchError> {
        if url.path().contains("histpov2") {
            return Ok(census_body());
        }
        let id = series_id(url);
        if !url.path().ends_with("observations") {
            return Ok(json!({"seriess": [{"id": id, "frequency_short": "M"}]}));
        }
        match id.as_str() {
            "UNRATE" => Ok(json!({"observations": [
                {"date": "2019-12-01", "value": "3.5"},
                {"date": "2020-01-01", "value": "3.6"}
            ]})),
            _ => Err(unavailable()),
        }
    }

    #[tokio::test]
    async fn partial_failure_still_writes_outputs() -> Result<()> {
        let dir = tempdir()?;
        let c = config(dir.path());
        let transport = FnTransport::new(respond);

        let summary = run(&c, &transport).await?;
        assert_eq!(
            summary.fetched,
            vec!["UNEMPLOYMENT_RATE".to_string(), "POVERTY_RATE_OFFICIAL".to_string()]
        );
        assert_eq!(summary.failed, vec!["GINI_INDEX".to_string()]);
        // 2019-12-01, 2019-12-31, 2020-01-01, 2020-12-31
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.columns, 3);

        let csv = fs::read_to_string(&c.output.table)?;
        let header = csv.lines().next().unwrap_or_default();
        assert_eq!(
            header,
            "date,UNEMPLOYMENT_RATE,UNEMPLOYMENT_RATE_PCT_CHANGE,GINI_INDEX,GINI_INDEX_PCT_CHANGE,\
             POVERTY_RATE_OFFICIAL,POVERTY_RATE_OFFICIAL_PCT_CHANGE"
        );

        let meta: Value = serde_json::from_str(&fs::read_to_string(&c.output.metadata)?)?;
        assert_eq!(meta["series"]["GINI"]["status"], "unavailable");
        assert_eq!(meta["series"]["UNRATE"]["status"], "ok");
        // the key never reaches the outputs
        assert!(!meta.to_string().contains("test-key"));

        assert!(c.output.panel.as_ref().is_some_and(|p| p.is_file()));
        Ok(())
    }

    #[tokio::test]
    async fn empty_but_valid_series_counts_as_fetched() -> Result<()> {
        let dir = tempdir()?;
        let mut c = config(dir.path());
        c.fred.series[1] = SeriesSpec {
            id: "NEWSERIES".into(),
            column: "NEW_SERIES".into(),
            frequency: Frequency::Annual,
        };
        let transport = FnTransport::new(|url: &Url, nth| {
            if series_id(url) == "NEWSERIES" && url.path().ends_with("observations") {
                Ok(json!({"observations": []}))
            } else {
                respond(url, nth)
            }
        });

        let summary = run(&c, &transport).await?;
        assert!(summary.fetched.contains(&"NEW_SERIES".to_string()));
        assert!(summary.failed.is_empty());

        let meta: Value = serde_json::from_str(&fs::read_to_string(&c.output.metadata)?)?;
        assert_eq!(meta["series"]["NEWSERIES"]["status"], "ok");
        assert_eq!(meta["series"]["NEWSERIES"]["observations"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn nothing_fetched_is_no_data() -> Result<()> {
        let dir = tempdir()?;
        let mut c = config(dir.path());
        c.census.enabled = false;
        let transport = FnTransport::new(|_: &Url, _| Err(unavailable()));

        let err = run(&c, &transport).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoData)
        ));
        assert!(!c.output.table.exists());
        Ok(())
    }

    #[tokio::test]
    async fn bad_survey_extract_is_not_fatal() -> Result<()> {
        let dir = tempdir()?;
        let mut c = config(dir.path());
        c.survey.extract = Some(dir.path().join("missing.csv"));
        let transport = FnTransport::new(respond);

        run(&c, &transport).await?;
        assert!(c.output.table.is_file());
        assert!(!c.output.survey_aggregates.exists());
        Ok(())
    }

    #[tokio::test]
    async fn survey_extract_joins_the_panel() -> Result<()> {
        let dir = tempdir()?;
        let extract = dir.path().join("gss_extract.csv");
        fs::write(&extract, "year,union\n2019,1\n2019,2\n")?;
        let mut c = config(dir.path());
        c.survey.extract = Some(extract);
        let transport = FnTransport::new(respond);

        run(&c, &transport).await?;
        let panel = fs::read_to_string(c.output.panel.as_ref().unwrap())?;
        assert!(panel.lines().next().unwrap_or_default().contains("gss_union_pct"));
        assert!(c.output.survey_aggregates.is_file());
        Ok(())
    }
}
