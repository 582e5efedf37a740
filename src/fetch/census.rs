// src/fetch/census.rs

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{error, info, instrument};
use url::Url;

use super::{with_retry, FetchError, RetryPolicy, Transport};
use crate::table::parse::{json_text, json_value, leading_year};
use crate::table::{Frequency, Observation, Series, SeriesMeta};

pub const DEFAULT_BASE_URL: &str = "https://api.census.gov/data/timeseries/poverty/histpov2";
pub const SERIES_ID: &str = "CENSUS_HISTPOV2_POV_RATE_ALL_PEOPLE";

/// AGE labels the endpoint uses for the all-ages total.
const ALL_PEOPLE: &[&str] = &["All people", "All People", "0"];

/// Official poverty rate (all people) from the Census historical poverty tables.
pub struct PovertySource<'a, T: Transport + ?Sized> {
    transport: &'a T,
    base_url: &'a str,
    column: &'a str,
    first_year: i32,
    last_year: i32,
    policy: &'a RetryPolicy,
}

impl<'a, T: Transport + ?Sized> PovertySource<'a, T> {
    pub fn new(
        transport: &'a T,
        base_url: &'a str,
        column: &'a str,
        (first_year, last_year): (i32, i32),
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            transport,
            base_url,
            column,
            first_year,
            last_year,
            policy,
        }
    }

    fn meta(&self) -> SeriesMeta {
        SeriesMeta {
            source: "U.S. Census Bureau".to_string(),
            title: Some("Official Poverty Rate (All People)".to_string()),
            unit: Some("Percent".to_string()),
            seasonal_adjustment: Some("Not Seasonally Adjusted".to_string()),
            note: Some(
                "U.S. Census Historical Poverty Tables (histpov2); filtered for 'All people'; \
                 dated December 31 of each year."
                    .to_string(),
            ),
            unavailable: None,
        }
    }

    fn url(&self) -> Result<Url, url::ParseError> {
        let time = format!("from {} to {}", self.first_year, self.last_year);
        Url::parse_with_params(
            self.base_url,
            &[("get", "YEAR,AGE,POV_RATE"), ("time", time.as_str())],
        )
    }

    /// Try the endpoint; any failure is returned as-is.
    pub async fn try_fetch(&self) -> Result<Series, FetchError> {
        let url = self.url().map_err(|e| FetchError::Payload {
            url: self.base_url.to_string(),
            message: e.to_string(),
        })?;
        let body = with_retry(self.policy, "Census poverty", || self.transport.get_json(&url))
            .await
            .into_result()?;
        let observations = parse_poverty_rows(&url, &body)?;
        Ok(Series::new(
            SERIES_ID,
            self.column,
            Frequency::Annual,
            self.meta(),
            observations,
        ))
    }

    /// The endpoint is known to be brittle, so failure is never fatal: it
    /// yields an empty series marked unavailable, with its metadata kept.
    #[instrument(level = "info", skip(self), fields(column = %self.column))]
    pub async fn fetch(&self) -> Series {
        match self.try_fetch().await {
            Ok(series) => {
                info!(
                    observations = series.len(),
                    range = ?series.observed_range(),
                    "fetched"
                );
                series
            }
            Err(e) => {
                error!(error = %e, "Census poverty unavailable; continuing without it");
                let mut meta = self.meta();
                meta.unavailable = Some(e.to_string());
                Series::empty(SERIES_ID, self.column, Frequency::Annual, meta)
            }
        }
    }
}

/// Pick the all-people rows out of Census' header-plus-rows array.
fn parse_poverty_rows(url: &Url, body: &Value) -> Result<Vec<Observation>, FetchError> {
    let rows = body
        .as_array()
        .ok_or_else(|| FetchError::payload(url, "expected a JSON array of rows"))?;
    let (header, rows) = rows
        .split_first()
        .ok_or_else(|| FetchError::payload(url, "empty response"))?;
    let header: Vec<String> = header
        .as_array()
        .ok_or_else(|| FetchError::payload(url, "header row is not an array"))?
        .iter()
        .map(|h| json_text(Some(h)).unwrap_or_default())
        .collect();

    let position = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| FetchError::payload(url, format!("unexpected columns, no {}", name)))
    };
    let (i_year, i_age, i_rate) = (position("YEAR")?, position("AGE")?, position("POV_RATE")?);

    let mut out = Vec::new();
    for row in rows {
        let Some(cells) = row.as_array() else {
            continue;
        };
        let age = json_text(cells.get(i_age)).unwrap_or_default();
        if !ALL_PEOPLE.contains(&age.as_str()) {
            continue;
        }
        let Some(year) = json_text(cells.get(i_year)).as_deref().and_then(leading_year) else {
            continue;
        };
        let Some(date) = NaiveDate::from_ymd_opt(year, 12, 31) else {
            continue;
        };
        out.push(Observation::new(date, json_value(cells.get(i_rate))));
    }

    if out.is_empty() {
        return Err(FetchError::payload(url, "no 'All people' rows matched"));
    }
    Ok(out)
}
