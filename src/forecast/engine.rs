use chrono::Duration;
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::alignment::{self, DEFAULT_CADENCE_MINUTES};
use super::metrics::{self, GroupBy, MetricAggregate, WindowSummary};
use super::penalty::{PenaltyCalculator, PenaltyReport, PenaltySample};
use super::selection::{select_forecasts, SelectionMode};
use crate::domain::{EnergySource, ForecastRecord, Location, MergedSample};
use crate::error::{AccuracyError, Result};
use crate::repo::{
    ForecastQuery, ForecastRepository, LocationRepository, ObservationQuery,
    ObservationRepository, TimeWindow,
};

/// Alignment settings shared by every evaluation
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cadence: Duration,
    /// Most preferred observer first
    pub observer_preference: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cadence: Duration::minutes(DEFAULT_CADENCE_MINUTES),
            observer_preference: vec![
                "pvlive_day_after".to_string(),
                "pvlive_in_day".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccuracyRequest {
    pub location_id: Uuid,
    pub energy_source: EnergySource,
    pub window: TimeWindow,
    pub forecasters: Vec<String>,
    pub selection: SelectionMode,
    pub group_by: GroupBy,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    pub location: Location,
    pub window: TimeWindow,
    pub summary: WindowSummary,
    pub metrics: Vec<MetricAggregate>,
    pub unmatched_forecasts: usize,
    pub unmatched_observations: usize,
    #[serde(skip)]
    pub samples: Vec<MergedSample>,
}

impl AccuracyReport {
    /// Run the tariff over this report's samples
    pub fn penalty(&self, calculator: &PenaltyCalculator) -> PenaltyReport {
        let samples: Vec<PenaltySample> = self.samples.iter().map(PenaltySample::from).collect();
        calculator.calculate(&samples)
    }
}

/// Fetches, selects, aligns and aggregates forecasts against observations
pub struct AccuracyEngine {
    pub forecasts: Arc<dyn ForecastRepository>,
    pub observations: Arc<dyn ObservationRepository>,
    pub locations: Arc<dyn LocationRepository>,
    pub settings: EngineSettings,
}

impl AccuracyEngine {
    pub fn new(
        forecasts: Arc<dyn ForecastRepository>,
        observations: Arc<dyn ObservationRepository>,
        locations: Arc<dyn LocationRepository>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            forecasts,
            observations,
            locations,
            settings,
        }
    }

    /// Fetch every requested forecaster concurrently. One failure fails
    /// the whole fetch.
    pub async fn fetch_forecasts(&self, request: &AccuracyRequest) -> Result<Vec<ForecastRecord>> {
        let fetches = request.forecasters.iter().map(|forecaster| {
            let query = ForecastQuery {
                location_id: request.location_id,
                energy_source: request.energy_source,
                window: request.window,
                forecaster: forecaster.clone(),
            };
            async move {
                self.forecasts
                    .forecasts(&query)
                    .await
                    .map_err(AccuracyError::from_upstream)
            }
        });

        let records: Vec<ForecastRecord> =
            try_join_all(fetches).await?.into_iter().flatten().collect();
        for record in &records {
            record.validate()?;
        }
        Ok(records)
    }

    #[instrument(skip(self, request), fields(location = %request.location_id))]
    pub async fn evaluate(&self, request: &AccuracyRequest) -> Result<AccuracyReport> {
        if request.forecasters.is_empty() {
            return Err(AccuracyError::InvalidInput(
                "at least one forecaster must be requested".to_string(),
            ));
        }

        let location = self
            .locations
            .location(request.location_id)
            .await
            .map_err(AccuracyError::from_upstream)?;

        let observation_query = ObservationQuery {
            location_id: request.location_id,
            energy_source: request.energy_source,
            window: request.window,
            observers: self.settings.observer_preference.clone(),
        };
        let (forecasts, observations) = futures::try_join!(
            self.fetch_forecasts(request),
            async {
                self.observations
                    .observations(&observation_query)
                    .await
                    .map_err(AccuracyError::from_upstream)
            }
        )?;

        let selected = select_forecasts(&forecasts, &request.selection);
        let observations =
            alignment::prefer_observers(&observations, &self.settings.observer_preference);
        let aligned = alignment::merge(&selected, &observations, self.settings.cadence)?;

        let metrics = metrics::aggregate_with_generation_mean(
            &aligned.samples,
            request.group_by,
            aligned.mean_observed_watts,
        )?;
        let summary = metrics::summarize(&aligned.samples)?;

        info!(
            location = %location.name,
            forecasters = request.forecasters.len(),
            samples = summary.sample_count,
            unmatched_forecasts = aligned.unmatched_forecasts,
            unmatched_observations = aligned.unmatched_observations,
            mae_w = summary.mae,
            "forecast accuracy evaluated"
        );

        Ok(AccuracyReport {
            location,
            window: request.window,
            summary,
            metrics,
            unmatched_forecasts: aligned.unmatched_forecasts,
            unmatched_observations: aligned.unmatched_observations,
            samples: aligned.samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LocationType, ObservationRecord};
    use crate::repo::{MockForecastRepository, MockLocationRepository, MockObservationRepository};
    use chrono::{TimeZone, Utc};

    fn request(forecasters: &[&str]) -> AccuracyRequest {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        AccuracyRequest {
            location_id: Uuid::nil(),
            energy_source: EnergySource::Solar,
            window: TimeWindow::new(start, start + Duration::days(1)).unwrap(),
            forecasters: forecasters.iter().map(|f| f.to_string()).collect(),
            selection: SelectionMode::Latest,
            group_by: GroupBy::default(),
        }
    }

    fn location_repo() -> MockLocationRepository {
        let mut repo = MockLocationRepository::new();
        repo.expect_location().returning(|id| {
            Ok(Location {
                id,
                name: "National".to_string(),
                effective_capacity_watts: Some(1e9),
                location_type: LocationType::Nation,
            })
        });
        repo
    }

    fn noon_observation() -> ObservationRecord {
        ObservationRecord {
            observer_name: "pvlive_day_after".to_string(),
            location_id: Uuid::nil(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            value_fraction: 0.5,
            effective_capacity_watts: Some(1e9),
        }
    }

    fn engine(
        forecasts: MockForecastRepository,
        observations: MockObservationRepository,
    ) -> AccuracyEngine {
        AccuracyEngine::new(
            Arc::new(forecasts),
            Arc::new(observations),
            Arc::new(location_repo()),
            EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_one_failing_forecaster_aborts_evaluation() {
        let mut forecasts = MockForecastRepository::new();
        forecasts
            .expect_forecasts()
            .returning(|query| match query.forecaster.as_str() {
                "ukv" => Err(anyhow::anyhow!("deadline exceeded")),
                _ => Ok(Vec::new()),
            });
        let mut observations = MockObservationRepository::new();
        observations
            .expect_observations()
            .returning(|_| Ok(vec![noon_observation()]));

        let err = engine(forecasts, observations)
            .evaluate(&request(&["pvnet", "ukv"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AccuracyError::Upstream(_)));
        assert_eq!(err.to_string(), "deadline exceeded");
    }

    #[tokio::test]
    async fn test_observation_failure_propagates() {
        let mut forecasts = MockForecastRepository::new();
        forecasts.expect_forecasts().returning(|_| Ok(Vec::new()));
        let mut observations = MockObservationRepository::new();
        observations
            .expect_observations()
            .returning(|_| Err(anyhow::anyhow!("database unreachable")));

        let err = engine(forecasts, observations)
            .evaluate(&request(&["pvnet"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AccuracyError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_no_forecasters_is_invalid() {
        let engine = engine(MockForecastRepository::new(), MockObservationRepository::new());
        let err = engine.evaluate(&request(&[])).await.unwrap_err();
        assert!(matches!(err, AccuracyError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_invalid_forecast_record_rejected() {
        let mut forecasts = MockForecastRepository::new();
        forecasts.expect_forecasts().returning(|_| {
            Ok(vec![ForecastRecord {
                forecaster_id: "pvnet".to_string(),
                forecaster_version: "1.0".to_string(),
                location_id: Uuid::nil(),
                init_timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap(),
                horizon_minutes: 60,
                p50_fraction: 1.5,
                p10_fraction: None,
                p25_fraction: None,
                p75_fraction: None,
                p90_fraction: None,
            }])
        });
        let mut observations = MockObservationRepository::new();
        observations
            .expect_observations()
            .returning(|_| Ok(vec![noon_observation()]));

        let err = engine(forecasts, observations)
            .evaluate(&request(&["pvnet"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AccuracyError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_repository_invalid_record_keeps_its_variant() {
        let mut forecasts = MockForecastRepository::new();
        forecasts.expect_forecasts().returning(|_| {
            Err(AccuracyError::InvalidRecord("horizon out of range".to_string()).into())
        });
        let mut observations = MockObservationRepository::new();
        observations
            .expect_observations()
            .returning(|_| Ok(vec![noon_observation()]));

        let err = engine(forecasts, observations)
            .evaluate(&request(&["pvnet"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AccuracyError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_no_overlap_is_empty_result() {
        let mut forecasts = MockForecastRepository::new();
        forecasts.expect_forecasts().returning(|_| Ok(Vec::new()));
        let mut observations = MockObservationRepository::new();
        observations
            .expect_observations()
            .returning(|_| Ok(vec![noon_observation()]));

        let err = engine(forecasts, observations)
            .evaluate(&request(&["pvnet"]))
            .await
            .unwrap_err();
        assert!(err.is_empty_result());
    }
}
