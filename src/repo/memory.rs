//! Repository over records held in memory, e.g. loaded from JSON exports.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::{
    ForecastQuery, ForecastRepository, LocationRepository, ObservationQuery,
    ObservationRepository,
};
use crate::domain::{EnergySource, ForecastRecord, Location, ObservationRecord};

/// Records for a single energy source
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepo {
    energy_source: EnergySource,
    locations: HashMap<Uuid, Location>,
    forecasts: Vec<ForecastRecord>,
    observations: Vec<ObservationRecord>,
}

impl InMemoryRepo {
    pub fn new(
        energy_source: EnergySource,
        locations: Vec<Location>,
        forecasts: Vec<ForecastRecord>,
        observations: Vec<ObservationRecord>,
    ) -> Self {
        Self {
            energy_source,
            locations: locations.into_iter().map(|l| (l.id, l)).collect(),
            forecasts,
            observations,
        }
    }

    /// Load JSON arrays of locations, forecasts and observations
    pub async fn load_json(
        energy_source: EnergySource,
        locations_path: &Path,
        forecasts_path: &Path,
        observations_path: &Path,
    ) -> Result<Self> {
        let locations: Vec<Location> = read_json(locations_path).await?;
        let forecasts: Vec<ForecastRecord> = read_json(forecasts_path).await?;
        let observations: Vec<ObservationRecord> = read_json(observations_path).await?;

        info!(
            locations = locations.len(),
            forecasts = forecasts.len(),
            observations = observations.len(),
            %energy_source,
            "loaded records from JSON"
        );

        Ok(Self::new(energy_source, locations, forecasts, observations))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse {}", path.display()))
}

#[async_trait]
impl ForecastRepository for InMemoryRepo {
    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>> {
        if query.energy_source != self.energy_source {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for f in self
            .forecasts
            .iter()
            .filter(|f| f.location_id == query.location_id && f.forecaster_id == query.forecaster)
        {
            if query.window.contains(f.target_timestamp()?) {
                records.push(f.clone());
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ObservationRepository for InMemoryRepo {
    async fn observations(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>> {
        if query.energy_source != self.energy_source {
            return Ok(Vec::new());
        }
        Ok(self
            .observations
            .iter()
            .filter(|o| {
                o.location_id == query.location_id
                    && query.admits_observer(&o.observer_name)
                    && query.window.contains(o.timestamp)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LocationRepository for InMemoryRepo {
    async fn location(&self, id: Uuid) -> Result<Location> {
        self.locations
            .get(&id)
            .cloned()
            .with_context(|| format!("unknown location {id}"))
    }
}
