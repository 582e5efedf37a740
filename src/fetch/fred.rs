// src/fetch/fred.rs

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{with_retry, FetchError, RetryPolicy, Transport};
use crate::config::SeriesSpec;
use crate::table::parse::{json_value, parse_date};
use crate::table::{Frequency, Observation, Series, SeriesMeta};

pub const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred/";

const SOURCE: &str = "FRED";

/// The subset of FRED's `seriess[0]` record we keep.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SeriesInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub frequency: Option<String>,
    pub frequency_short: Option<String>,
    pub units: Option<String>,
    pub seasonal_adjustment: Option<String>,
    pub notes: Option<String>,
    pub observation_start: Option<String>,
    pub observation_end: Option<String>,
}

/// FRED series and observation endpoints.
pub struct FredSource<'a, T: Transport + ?Sized> {
    transport: &'a T,
    base: Url,
    api_key: &'a str,
    policy: &'a RetryPolicy,
}

impl<'a, T: Transport + ?Sized> FredSource<'a, T> {
    pub fn new(
        transport: &'a T,
        base_url: &str,
        api_key: &'a str,
        policy: &'a RetryPolicy,
    ) -> Result<Self, url::ParseError> {
        // `join` drops the last segment unless the base ends in '/'
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };
        Ok(Self {
            transport,
            base,
            api_key,
            policy,
        })
    }

    fn endpoint(&self, path: &str, series_id: &str) -> Result<Url, FetchError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| FetchError::payload(&self.base, format!("bad endpoint {}: {}", path, e)))?;
        url.query_pairs_mut()
            .append_pair("series_id", series_id)
            .append_pair("api_key", self.api_key)
            .append_pair("file_type", "json");
        Ok(url)
    }

    /// Series metadata (title, units, frequency, ...).
    pub async fn series_info(&self, series_id: &str) -> Result<SeriesInfo, FetchError> {
        let url = self.endpoint("series", series_id)?;
        let label = format!("FRED {} metadata", series_id);
        let body = with_retry(self.policy, &label, || self.transport.get_json(&url))
            .await
            .into_result()?;
        parse_series_info(&url, &body)
    }

    /// Full observation history. Values FRED marks as missing (".") come back as `None`.
    pub async fn observations(&self, series_id: &str) -> Result<Vec<Observation>, FetchError> {
        let url = self.endpoint("series/observations", series_id)?;
        let label = format!("FRED {} observations", series_id);
        let body = with_retry(self.policy, &label, || self.transport.get_json(&url))
            .await
            .into_result()?;
        parse_observations(&url, &body)
    }

    /// Fetch one series into `spec.column`. Metadata failures are tolerated;
    /// an observations failure is returned to the caller.
    #[instrument(level = "info", skip(self, spec), fields(series = %spec.id, column = %spec.column))]
    pub async fn fetch(&self, spec: &SeriesSpec) -> Result<Series, FetchError> {
        // 1) metadata, soft
        let info = match self.series_info(&spec.id).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "metadata unavailable; using declared values");
                SeriesInfo::default()
            }
        };

        // 2) observations, hard
        let observations = self.observations(&spec.id).await?;

        // 3) assemble
        let frequency = resolve_frequency(spec, &info);
        let series = Series::new(
            spec.id.clone(),
            spec.column.clone(),
            frequency,
            SeriesMeta {
                source: SOURCE.to_string(),
                title: info.title,
                unit: info.units,
                seasonal_adjustment: info.seasonal_adjustment,
                note: Some(
                    info.notes
                        .filter(|n| !n.trim().is_empty())
                        .unwrap_or_else(|| format!("FRED series {}", spec.id)),
                ),
                unavailable: None,
            },
            observations,
        );
        info!(
            frequency = %series.frequency,
            observations = series.len(),
            range = ?series.observed_range(),
            "fetched"
        );
        Ok(series)
    }
}

/// Reported frequency wins over the declared one.
fn resolve_frequency(spec: &SeriesSpec, info: &SeriesInfo) -> Frequency {
    let reported = info
        .frequency_short
        .as_deref()
        .and_then(Frequency::from_short_code);
    match reported {
        Some(f) if f != spec.frequency && spec.frequency != Frequency::Unknown => {
            warn!(
                declared = %spec.frequency,
                reported = %f,
                "FRED reports a different frequency than declared"
            );
            f
        }
        Some(f) => f,
        None => spec.frequency,
    }
}

fn parse_series_info(url: &Url, body: &Value) -> Result<SeriesInfo, FetchError> {
    let first = body
        .get("seriess")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .ok_or_else(|| FetchError::payload(url, "no `seriess` entries"))?;
    serde_json::from_value(first.clone()).map_err(|e| FetchError::payload(url, e.to_string()))
}

fn parse_observations(url: &Url, body: &Value) -> Result<Vec<Observation>, FetchError> {
    let raw = body
        .get("observations")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::payload(url, "missing `observations` array"))?;

    let mut out = Vec::with_capacity(raw.len());
    let mut dropped = 0usize;
    for obs in raw {
        let date = obs.get("date").and_then(Value::as_str).and_then(parse_date);
        match date {
            Some(date) => out.push(Observation::new(date, json_value(obs.get("value")))),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "observations without a usable date");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{init_test_logging, no_wait, server_error, FnTransport};
    use chrono::NaiveDate;
    use serde_json::json;

    fn spec(id: &str, column: &str, frequency: Frequency) -> SeriesSpec {
        SeriesSpec {
            id: id.into(),
            column: column.into(),
            frequency,
        }
    }

    fn metadata() -> Value {
        json!({"seriess": [{
            "id": "UNRATE",
            "title": "Unemployment Rate",
            "frequency": "Monthly",
            "frequency_short": "M",
            "units": "Percent",
            "seasonal_adjustment": "Seasonally Adjusted",
            "notes": "",
            "observation_start": "1948-01-01",
            "observation_end": "2024-01-01"
        }]})
    }

    fn observations() -> Value {
        json!({"observations": [
            {"date": "2020-01-01", "value": "3.5"},
            {"date": "2020-02-01", "value": "."},
            {"date": "2020-03-01", "value": "4.4"},
            {"date": "bogus", "value": "1.0"},
            {"value": "1.0"}
        ]})
    }

    #[tokio::test]
    async fn fetch_builds_series_with_missing_markers() {
        let transport = FnTransport::new(|url: &Url, _| {
            assert!(url.query_pairs().any(|(k, v)| k == "file_type" && v == "json"));
            if url.path().ends_with("series/observations") {
                Ok(observations())
            } else {
                Ok(metadata())
            }
        });
        let policy = no_wait();
        let fred = FredSource::new(&transport, DEFAULT_BASE_URL, "k", &policy).unwrap();
        let s = fred
            .fetch(&spec("UNRATE", "UNEMPLOYMENT_RATE", Frequency::Monthly))
            .await
            .unwrap();

        assert_eq!(s.column, "UNEMPLOYMENT_RATE");
        assert_eq!(s.frequency, Frequency::Monthly);
        assert_eq!(s.meta.unit.as_deref(), Some("Percent"));
        assert_eq!(s.meta.note.as_deref(), Some("FRED series UNRATE"));
        assert_eq!(s.len(), 3);
        assert_eq!(s.observations()[1].value, None);
        assert_eq!(
            s.observations()[2].date,
            NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()
        );
    }

    #[tokio::test]
    async fn metadata_failure_falls_back_to_declared_frequency() {
        let transport = FnTransport::new(|url: &Url, _| {
            if url.path().ends_with("series/observations") {
                Ok(observations())
            } else {
                Err(FetchError::Client {
                    url: "u".into(),
                    status: 404,
                })
            }
        });
        let policy = no_wait();
        let fred = FredSource::new(&transport, DEFAULT_BASE_URL, "k", &policy).unwrap();
        let s = fred
            .fetch(&spec("X", "X", Frequency::Annual))
            .await
            .unwrap();
        assert_eq!(s.frequency, Frequency::Annual);
        assert_eq!(s.meta.title, None);
    }

    #[tokio::test]
    async fn observations_retry_then_succeed() {
        init_test_logging();
        let transport = FnTransport::new(|url: &Url, nth| {
            if !url.path().ends_with("series/observations") {
                return Ok(metadata());
            }
            if nth < 3 {
                Err(server_error())
            } else {
                Ok(observations())
            }
        });
        let policy = no_wait();
        let fred = FredSource::new(&transport, DEFAULT_BASE_URL, "k", &policy).unwrap();
        let s = fred.fetch(&spec("UNRATE", "U", Frequency::Monthly)).await;
        assert!(s.is_ok());
        assert_eq!(transport.calls_to("series/observations"), 3);
    }

    #[tokio::test]
    async fn observations_give_up_after_max_attempts() {
        let transport = FnTransport::new(|url: &Url, _| {
            if url.path().ends_with("series/observations") {
                Err(server_error())
            } else {
                Ok(metadata())
            }
        });
        let policy = no_wait();
        let fred = FredSource::new(&transport, DEFAULT_BASE_URL, "k", &policy).unwrap();
        let s = fred.fetch(&spec("UNRATE", "U", Frequency::Monthly)).await;
        assert!(matches!(s, Err(FetchError::Server { .. })));
        assert_eq!(transport.calls_to("series/observations"), 3);
    }

    #[test]
    fn base_without_trailing_slash_still_joins() {
        let transport = FnTransport::new(|_: &Url, _| Ok(json!({})));
        let policy = no_wait();
        let fred =
            FredSource::new(&transport, "https://example.org/fred", "k", &policy).unwrap();
        let url = fred.endpoint("series/observations", "GDP").unwrap();
        assert_eq!(url.path(), "/fred/series/observations");
    }

    #[test]
    fn missing_observations_array_is_a_payload_error() {
        let url = Url::parse(DEFAULT_BASE_URL).unwrap();
        let err = parse_observations(&url, &json!({"error_message": "nope"})).unwrap_err();
        assert!(!err.is_transient());
    }
}
