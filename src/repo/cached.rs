use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use super::{
    ForecastQuery, ForecastRepository, LocationRepository, ObservationQuery,
    ObservationRepository, TimeWindow,
};
use crate::cache::CachedFetch;
use crate::domain::{EnergySource, ForecastRecord, Location, ObservationRecord};

type ObservationKey = (Uuid, EnergySource, TimeWindow, Vec<String>);

/// Decorates a repository with TTL caches per read contract. Keys come
/// from the query alone, so every handle sharing a `CachedRepo` shares its
/// entries.
pub struct CachedRepo<R> {
    inner: R,
    forecasts: CachedFetch<ForecastQuery, ForecastQuery, Vec<ForecastRecord>>,
    observations: CachedFetch<ObservationQuery, ObservationKey, Vec<ObservationRecord>>,
    locations: CachedFetch<Uuid, Uuid, Location>,
}

impl<R> CachedRepo<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            forecasts: CachedFetch::new(ttl, |q: &ForecastQuery| q.clone()),
            // Observer order does not change the result set
            observations: CachedFetch::new(ttl, |q: &ObservationQuery| {
                let mut observers = q.observers.clone();
                observers.sort();
                observers.dedup();
                (q.location_id, q.energy_source, q.window, observers)
            }),
            locations: CachedFetch::new(ttl, |id: &Uuid| *id),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.forecasts.cache().clear();
        self.observations.cache().clear();
        self.locations.cache().clear();
    }
}

#[async_trait]
impl<R: ForecastRepository> ForecastRepository for CachedRepo<R> {
    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>> {
        let records = self
            .forecasts
            .fetch(query, || self.inner.forecasts(query))
            .await?;
        Ok(records.as_ref().clone())
    }
}

#[async_trait]
impl<R: ObservationRepository> ObservationRepository for CachedRepo<R> {
    async fn observations(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>> {
        let records = self
            .observations
            .fetch(query, || self.inner.observations(query))
            .await?;
        Ok(records.as_ref().clone())
    }
}

#[async_trait]
impl<R: LocationRepository> LocationRepository for CachedRepo<R> {
    async fn location(&self, id: Uuid) -> Result<Location> {
        let location = self
            .locations
            .fetch(&id, || self.inner.location(id))
            .await?;
        Ok(location.as_ref().clone())
    }
}
