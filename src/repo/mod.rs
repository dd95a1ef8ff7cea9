//! Read contracts for the collaborators the pipeline depends on.
//!
//! Implementations convert whatever their backend returns into the typed
//! domain records at this boundary.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{EnergySource, ForecastRecord, Location, ObservationRecord};
use crate::error::AccuracyError;

pub mod cached;
pub mod memory;

#[cfg(feature = "db")]
pub mod pg;

pub use cached::CachedRepo;
pub use memory::InMemoryRepo;

/// Half-open interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> crate::error::Result<Self> {
        if end <= start {
            return Err(AccuracyError::InvalidInput(format!(
                "time window end {end} is not after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Forecasts of one forecaster whose target timestamp falls in `window`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastQuery {
    pub location_id: Uuid,
    pub energy_source: EnergySource,
    pub window: TimeWindow,
    pub forecaster: String,
}

/// Observations from any of `observers` with timestamps in `window`.
/// An empty observer list means every observer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservationQuery {
    pub location_id: Uuid,
    pub energy_source: EnergySource,
    pub window: TimeWindow,
    pub observers: Vec<String>,
}

impl ObservationQuery {
    pub fn admits_observer(&self, name: &str) -> bool {
        self.observers.is_empty() || self.observers.iter().any(|o| o == name)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastRepository: Send + Sync {
    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObservationRepository: Send + Sync {
    async fn observations(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationRepository: Send + Sync {
    async fn location(&self, id: Uuid) -> Result<Location>;
}
