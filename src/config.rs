// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::fetch::{census, fred, RetryPolicy};
use crate::table::Frequency;

/// Environment variable holding the FRED API key. Overrides the config file.
pub const API_KEY_ENV: &str = "FRED_API_KEY";
/// Environment variable naming the config file when no CLI argument is given.
pub const CONFIG_PATH_ENV: &str = "POPIMPACT_CONFIG";
/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "popimpact.yaml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no FRED API key: set FRED_API_KEY or `fred.api_key` in the config file")]
    MissingApiKey,
    #[error("retry.max_attempts must be at least 1")]
    NoAttempts,
    #[error("series #{0} has an empty id")]
    EmptySeriesId(usize),
    #[error("series `{0}` has an empty column name")]
    EmptyColumn(String),
    #[error("column `{0}` is used more than once")]
    DuplicateColumn(String),
    #[error("series id `{0}` is listed more than once")]
    DuplicateSeriesId(String),
    #[error("retry.timeout_secs must be at least 1")]
    ZeroTimeout,
    #[error("census year range {0}..={1} is empty")]
    YearRange(i32, i32),
}

/// A credential. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// One FRED series to fetch and the column it lands in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub id: String,
    pub column: String,
    #[serde(default)]
    pub frequency: Frequency,
}

impl SeriesSpec {
    fn new(id: &str, column: &str, frequency: Frequency) -> Self {
        Self {
            id: id.to_string(),
            column: column.to_string(),
            frequency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FredConfig {
    pub api_key: Option<Secret>,
    pub base_url: String,
    pub series: Vec<SeriesSpec>,
}

impl Default for FredConfig {
    fn default() -> Self {
        use Frequency::*;
        Self {
            api_key: None,
            base_url: fred::DEFAULT_BASE_URL.to_string(),
            series: vec![
                SeriesSpec::new("UNRATE", "UNEMPLOYMENT_RATE", Monthly),
                SeriesSpec::new("CIVPART", "LABOR_FORCE_PARTICIPATION", Monthly),
                SeriesSpec::new("MEHOINUSA672N", "REAL_MEDIAN_HH_INCOME", Annual),
                SeriesSpec::new("SIPOVGINIUSA", "GINI_INDEX", Annual),
                SeriesSpec::new("A794RC0A052NBEA", "REAL_PCE_PER_CAPITA", Annual),
                SeriesSpec::new("SPDYNLE00INUSA", "LIFE_EXPECTANCY_AT_BIRTH", Annual),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CensusConfig {
    pub enabled: bool,
    pub base_url: String,
    pub column: String,
    pub first_year: i32,
    pub last_year: i32,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: census::DEFAULT_BASE_URL.to_string(),
            column: "POVERTY_RATE_OFFICIAL".to_string(),
            first_year: 1959,
            last_year: 2024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_attempts: p.max_attempts,
            initial_backoff_ms: p.initial_backoff.as_millis() as u64,
            max_backoff_ms: p.max_backoff.as_millis() as u64,
            timeout_secs: p.timeout.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub table: PathBuf,
    pub metadata: PathBuf,
    pub parquet: Option<PathBuf>,
    pub panel: Option<PathBuf>,
    pub panel_labels: PathBuf,
    pub survey_aggregates: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            table: PathBuf::from("./population_impact_datasets.csv"),
            metadata: PathBuf::from("./population_impact_datasets_meta.json"),
            parquet: None,
            panel: Some(PathBuf::from("./annual_panel.csv")),
            panel_labels: PathBuf::from("./annual_panel_labels.json"),
            survey_aggregates: PathBuf::from("./gss_annual_aggregates.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub enabled: bool,
    /// Column that drives `unemp_cat`.
    pub unemployment_column: Option<String>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            unemployment_column: Some("UNEMPLOYMENT_RATE".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Respondent-level survey extract (CSV).
    pub extract: Option<PathBuf>,
}

/// Everything a run needs. Load with [`Config::load`], which also validates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fred: FredConfig,
    pub census: CensusConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
    pub panel: PanelConfig,
    pub survey: SurveyConfig,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing YAML config")
    }

    /// Read `path` if given, else `$POPIMPACT_CONFIG`, else `./popimpact.yaml`
    /// if it exists, else defaults. `$FRED_API_KEY` overrides the file's key.
    /// The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(|| {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                p.is_file().then_some(p)
            });

        let mut config = match &path {
            Some(p) => {
                info!(path = %p.display(), "loading config");
                let text =
                    fs::read_to_string(p).with_context(|| format!("reading config {:?}", p))?;
                Self::from_yaml(&text).with_context(|| format!("in {:?}", p))?
            }
            None => {
                debug!("no config file; using defaults");
                Self::default()
            }
        };

        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.fred.api_key = Some(Secret::new(key.trim()));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Startup checks. Fails on the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key().is_none() && !self.fred.series.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.retry.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        // the sidecar is keyed by series id, so ids must be unique too
        let mut columns = HashSet::new();
        let mut ids = HashSet::new();
        for (i, s) in self.fred.series.iter().enumerate() {
            if s.id.trim().is_empty() {
                return Err(ConfigError::EmptySeriesId(i));
            }
            if s.column.trim().is_empty() {
                return Err(ConfigError::EmptyColumn(s.id.clone()));
            }
            if !columns.insert(s.column.as_str()) {
                return Err(ConfigError::DuplicateColumn(s.column.clone()));
            }
            if !ids.insert(s.id.trim()) {
                return Err(ConfigError::DuplicateSeriesId(s.id.clone()));
            }
        }

        if self.census.enabled {
            if self.census.column.trim().is_empty() {
                return Err(ConfigError::EmptyColumn(census::SERIES_ID.to_string()));
            }
            if !columns.insert(self.census.column.as_str()) {
                return Err(ConfigError::DuplicateColumn(self.census.column.clone()));
            }
            if !ids.insert(census::SERIES_ID) {
                return Err(ConfigError::DuplicateSeriesId(census::SERIES_ID.to_string()));
            }
            if self.census.first_year > self.census.last_year {
                return Err(ConfigError::YearRange(
                    self.census.first_year,
                    self.census.last_year,
                ));
            }
        }
        Ok(())
    }

    /// The API key, if one is set and not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.fred
            .api_key
            .as_ref()
            .filter(|k| !k.is_blank())
            .map(Secret::expose)
    }
}
