use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::cache::DEFAULT_TTL;
use crate::domain::{DisplayUnit, EnergySource};
use crate::error::AccuracyError;
use crate::forecast::alignment::DEFAULT_CADENCE_MINUTES;
use crate::forecast::{
    AccuracyRequest, EnergyConversion, EngineSettings, GroupBy, PenaltyCalculator, PenaltySchedule,
    SelectionMode,
};
use crate::repo::TimeWindow;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub penalty: PenaltyConfig,
    pub report: ReportConfig,
    #[serde(default)]
    pub input: InputConfig,
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub cadence_minutes: i64,
    pub horizon_bucket_minutes: Option<i64>,
    pub observer_preference: Vec<String>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            cadence_minutes: DEFAULT_CADENCE_MINUTES,
            horizon_bucket_minutes: None,
            observer_preference: EngineSettings::default().observer_preference,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_seconds)
    }
}

/// Tariff settings. Penalties are only computed when `avc_kw` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub avc_kw: Option<f64>,
    pub conversion: EnergyConversion,
    /// Replaces the default bands; checked for overlap when loaded
    pub bands: Option<PenaltySchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    pub location_id: Uuid,
    #[serde(default)]
    pub energy_source: EnergySource,
    pub forecasters: Vec<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[serde(default)]
    pub display_unit: DisplayUnit,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub selection: SelectionMode,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub locations_path: PathBuf,
    pub forecasts_path: PathBuf,
    pub observations_path: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            locations_path: PathBuf::from("data/locations.json"),
            forecasts_path: PathBuf::from("data/forecasts.json"),
            observations_path: PathBuf::from("data/observations.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,sqlx=warn".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("FA__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.alignment.cadence_minutes <= 0 {
            return Err(AccuracyError::Config(format!(
                "alignment.cadence_minutes must be positive, got {}",
                self.alignment.cadence_minutes
            )));
        }
        if matches!(self.alignment.horizon_bucket_minutes, Some(w) if w <= 0) {
            return Err(AccuracyError::Config(
                "alignment.horizon_bucket_minutes must be positive".to_string(),
            ));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(AccuracyError::Config("cache.ttl_seconds must be positive".to_string()));
        }
        if self.report.forecasters.is_empty() {
            return Err(AccuracyError::Config("report.forecasters is empty".to_string()));
        }
        if self.report.window_end <= self.report.window_start {
            return Err(AccuracyError::Config(format!(
                "report window end {} is not after start {}",
                self.report.window_end, self.report.window_start
            )));
        }
        self.penalty_calculator()?;
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cadence: Duration::minutes(self.alignment.cadence_minutes),
            observer_preference: self.alignment.observer_preference.clone(),
        }
    }

    pub fn to_request(&self) -> crate::error::Result<AccuracyRequest> {
        let report = &self.report;
        let mut group_by = report.group_by;
        if group_by.horizon_bucket_minutes.is_none() {
            group_by.horizon_bucket_minutes = self.alignment.horizon_bucket_minutes;
        }
        Ok(AccuracyRequest {
            location_id: report.location_id,
            energy_source: report.energy_source,
            window: TimeWindow::new(report.window_start, report.window_end)?,
            forecasters: report.forecasters.clone(),
            selection: report.selection,
            group_by,
        })
    }

    /// `None` unless an AVC is configured
    pub fn penalty_calculator(&self) -> crate::error::Result<Option<PenaltyCalculator>> {
        let Some(avc_kw) = self.penalty.avc_kw else {
            return Ok(None);
        };
        let schedule = self.penalty.bands.clone().unwrap_or_default();
        PenaltyCalculator::new(avc_kw, schedule, self.penalty.conversion).map(Some)
    }
}
