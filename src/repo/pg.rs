#![cfg(feature = "db")]
//! Postgres-backed repositories. Rows are decoded into plain `FromRow`
//! structs and converted to domain records before leaving this module.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{
    ForecastQuery, ForecastRepository, LocationRepository, ObservationQuery,
    ObservationRepository,
};
use crate::domain::{ForecastRecord, Location, LocationType, ObservationRecord};

pub struct PgRepo {
    pub pool: PgPool,
}

impl PgRepo {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to forecast database")?;
        Ok(Self { pool })
    }
}

#[derive(Debug, FromRow)]
struct ForecastRow {
    forecaster_name: String,
    forecaster_version: String,
    location_uuid: Uuid,
    init_time_utc: DateTime<Utc>,
    horizon_minutes: i32,
    p50_fraction: f64,
    p10_fraction: Option<f64>,
    p25_fraction: Option<f64>,
    p75_fraction: Option<f64>,
    p90_fraction: Option<f64>,
}

impl From<ForecastRow> for ForecastRecord {
    fn from(row: ForecastRow) -> Self {
        Self {
            forecaster_id: row.forecaster_name,
            forecaster_version: row.forecaster_version,
            location_id: row.location_uuid,
            init_timestamp: row.init_time_utc,
            horizon_minutes: i64::from(row.horizon_minutes),
            p50_fraction: row.p50_fraction,
            p10_fraction: row.p10_fraction,
            p25_fraction: row.p25_fraction,
            p75_fraction: row.p75_fraction,
            p90_fraction: row.p90_fraction,
        }
    }
}

#[derive(Debug, FromRow)]
struct ObservationRow {
    observer_name: String,
    location_uuid: Uuid,
    timestamp_utc: DateTime<Utc>,
    value_fraction: f64,
    capacity_watts: Option<f64>,
}

impl From<ObservationRow> for ObservationRecord {
    fn from(row: ObservationRow) -> Self {
        Self {
            observer_name: row.observer_name,
            location_id: row.location_uuid,
            timestamp: row.timestamp_utc,
            value_fraction: row.value_fraction,
            effective_capacity_watts: row.capacity_watts,
        }
    }
}

#[derive(Debug, FromRow)]
struct LocationRow {
    location_uuid: Uuid,
    location_name: String,
    capacity_watts: Option<f64>,
    location_type: String,
}

impl TryFrom<LocationRow> for Location {
    type Error = anyhow::Error;

    fn try_from(row: LocationRow) -> Result<Self> {
        let location_type: LocationType = row
            .location_type
            .parse()
            .with_context(|| format!("unknown location type {:?}", row.location_type))?;
        Ok(Self {
            id: row.location_uuid,
            name: row.location_name,
            effective_capacity_watts: row.capacity_watts,
            location_type,
        })
    }
}

#[async_trait]
impl ForecastRepository for PgRepo {
    async fn forecasts(&self, query: &ForecastQuery) -> Result<Vec<ForecastRecord>> {
        let rows = sqlx::query_as::<_, ForecastRow>(
            r#"
            SELECT f.forecaster_name, f.forecaster_version, f.location_uuid,
                   f.init_time_utc, fv.horizon_minutes, fv.p50_fraction,
                   fv.p10_fraction, fv.p25_fraction, fv.p75_fraction, fv.p90_fraction
            FROM forecast_values fv
            JOIN forecasts f ON f.forecast_uuid = fv.forecast_uuid
            WHERE f.location_uuid = $1
              AND f.energy_source = $2
              AND f.forecaster_name = $3
              AND fv.target_time_utc >= $4 AND fv.target_time_utc < $5
            ORDER BY f.init_time_utc ASC, fv.horizon_minutes ASC
            "#,
        )
        .bind(query.location_id)
        .bind(query.energy_source.to_string())
        .bind(&query.forecaster)
        .bind(query.window.start)
        .bind(query.window.end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch forecast values")?;

        debug!(
            forecaster = %query.forecaster,
            rows = rows.len(),
            "fetched forecast values"
        );
        Ok(rows.into_iter().map(ForecastRecord::from).collect())
    }
}

#[async_trait]
impl ObservationRepository for PgRepo {
    async fn observations(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>> {
        let rows = sqlx::query_as::<_, ObservationRow>(
            r#"
            SELECT o.observer_name, o.location_uuid, o.timestamp_utc,
                   o.value_fraction, o.capacity_watts
            FROM observations o
            WHERE o.location_uuid = $1
              AND o.energy_source = $2
              AND o.timestamp_utc >= $3 AND o.timestamp_utc < $4
              AND (cardinality($5::text[]) = 0 OR o.observer_name = ANY($5))
            ORDER BY o.timestamp_utc ASC
            "#,
        )
        .bind(query.location_id)
        .bind(query.energy_source.to_string())
        .bind(query.window.start)
        .bind(query.window.end)
        .bind(&query.observers)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch observations")?;

        debug!(rows = rows.len(), "fetched observations");
        Ok(rows.into_iter().map(ObservationRecord::from).collect())
    }
}

#[async_trait]
impl LocationRepository for PgRepo {
    async fn location(&self, id: Uuid) -> Result<Location> {
        let row = sqlx::query_as::<_, LocationRow>(
            r#"
            SELECT location_uuid, location_name, capacity_watts, location_type
            FROM locations
            WHERE location_uuid = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch location {id}"))?;

        Location::try_from(row)
    }
}
