use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::units::{capacity_or_err, fraction_to_watts};
use crate::error::{AccuracyError, Result};

// ============================================================================
// Locations
// ============================================================================

/// Aggregation level of a location
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LocationType {
    Nation,
    Gsp,
    Site,
}

/// Generation technology a query is filtered on
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnergySource {
    #[default]
    Solar,
    Wind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    /// Installed capacity (W). Optional at the boundary so a missing value
    /// surfaces as an error instead of a default.
    pub effective_capacity_watts: Option<f64>,
    pub location_type: LocationType,
}

impl Location {
    pub fn capacity_watts(&self) -> Result<f64> {
        capacity_or_err(self.effective_capacity_watts, self.id, None)
    }
}

// ============================================================================
// Forecasts
// ============================================================================

/// One forecast value for one location, issued at `init_timestamp` and
/// predicting `horizon_minutes` ahead. Values are fractions of capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub forecaster_id: String,
    pub forecaster_version: String,
    pub location_id: Uuid,
    pub init_timestamp: DateTime<Utc>,
    pub horizon_minutes: i64,
    pub p50_fraction: f64,
    #[serde(default)]
    pub p10_fraction: Option<f64>,
    #[serde(default)]
    pub p25_fraction: Option<f64>,
    #[serde(default)]
    pub p75_fraction: Option<f64>,
    #[serde(default)]
    pub p90_fraction: Option<f64>,
}

/// Longest lead time a record may carry
pub const MAX_HORIZON_MINUTES: i64 = 60 * 24 * 366;

impl ForecastRecord {
    /// The instant this record predicts. Fails for horizons that push the
    /// target outside the representable range.
    pub fn target_timestamp(&self) -> Result<DateTime<Utc>> {
        Duration::try_minutes(self.horizon_minutes)
            .and_then(|lead| self.init_timestamp.checked_add_signed(lead))
            .ok_or_else(|| {
                AccuracyError::InvalidRecord(format!(
                    "horizon {} minutes from {} is out of range for forecaster {}",
                    self.horizon_minutes, self.init_timestamp, self.forecaster_id
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_HORIZON_MINUTES).contains(&self.horizon_minutes) {
            return Err(AccuracyError::InvalidRecord(format!(
                "horizon {} outside [0, {MAX_HORIZON_MINUTES}] for forecaster {} at {}",
                self.horizon_minutes, self.forecaster_id, self.init_timestamp
            )));
        }
        self.target_timestamp()?;

        let quantiles = [
            ("p50", Some(self.p50_fraction)),
            ("p10", self.p10_fraction),
            ("p25", self.p25_fraction),
            ("p75", self.p75_fraction),
            ("p90", self.p90_fraction),
        ];
        for (name, value) in quantiles {
            if let Some(v) = value {
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err(AccuracyError::InvalidRecord(format!(
                        "{name} fraction {v} outside [0, 1] for forecaster {} at {}",
                        self.forecaster_id, self.init_timestamp
                    )));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Measured generation for one location at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Source discriminator, e.g. provisional "in-day" vs revised "day-after"
    pub observer_name: String,
    pub location_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub value_fraction: f64,
    /// Capacity valid at `timestamp`. Authoritative for power conversion.
    pub effective_capacity_watts: Option<f64>,
}

impl ObservationRecord {
    pub fn capacity_watts(&self) -> Result<f64> {
        capacity_or_err(
            self.effective_capacity_watts,
            self.location_id,
            Some(self.timestamp),
        )
    }
}

// ============================================================================
// Merged samples
// ============================================================================

/// Quantile forecasts converted to watts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantilePowers {
    pub p10_watts: Option<f64>,
    pub p25_watts: Option<f64>,
    pub p75_watts: Option<f64>,
    pub p90_watts: Option<f64>,
}

/// A forecast joined to the observation at its target timestamp.
/// Lives for one aggregation call only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedSample {
    pub forecaster_id: String,
    pub forecaster_version: String,
    pub location_id: Uuid,
    pub observer_name: String,
    pub init_timestamp: DateTime<Utc>,
    pub target_timestamp: DateTime<Utc>,
    pub horizon_minutes: i64,
    pub forecast_fraction: f64,
    pub observed_fraction: f64,
    pub capacity_watts: f64,
    pub forecast_power_watts: f64,
    pub observed_power_watts: f64,
    pub quantiles: QuantilePowers,
    /// forecast - observed (W)
    pub error: f64,
    pub absolute_error: f64,
}

impl MergedSample {
    /// Join a forecast with its observation. Both sides are converted with
    /// the observation's capacity.
    pub fn from_pair(forecast: &ForecastRecord, observation: &ObservationRecord) -> Result<Self> {
        let capacity = observation.capacity_watts()?;
        let forecast_power = fraction_to_watts(forecast.p50_fraction, capacity);
        let observed_power = fraction_to_watts(observation.value_fraction, capacity);
        let to_watts = |fraction: Option<f64>| fraction.map(|f| fraction_to_watts(f, capacity));
        let error = forecast_power - observed_power;

        Ok(Self {
            forecaster_id: forecast.forecaster_id.clone(),
            forecaster_version: forecast.forecaster_version.clone(),
            location_id: forecast.location_id,
            observer_name: observation.observer_name.clone(),
            init_timestamp: forecast.init_timestamp,
            target_timestamp: forecast.target_timestamp()?,
            horizon_minutes: forecast.horizon_minutes,
            forecast_fraction: forecast.p50_fraction,
            observed_fraction: observation.value_fraction,
            capacity_watts: capacity,
            forecast_power_watts: forecast_power,
            observed_power_watts: observed_power,
            quantiles: QuantilePowers {
                p10_watts: to_watts(forecast.p10_fraction),
                p25_watts: to_watts(forecast.p25_fraction),
                p75_watts: to_watts(forecast.p75_fraction),
                p90_watts: to_watts(forecast.p90_fraction),
            },
            error,
            absolute_error: error.abs(),
        })
    }

    /// UTC calendar day of the target timestamp
    pub fn target_date(&self) -> NaiveDate {
        self.target_timestamp.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn forecast(horizon: i64, p50: f64) -> ForecastRecord {
        ForecastRecord {
            forecaster_id: "pvnet".to_string(),
            forecaster_version: "1.0.0".to_string(),
            location_id: Uuid::nil(),
            init_timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
            horizon_minutes: horizon,
            p50_fraction: p50,
            p10_fraction: None,
            p25_fraction: None,
            p75_fraction: None,
            p90_fraction: None,
        }
    }

    fn observation(value: f64, capacity: Option<f64>) -> ObservationRecord {
        ObservationRecord {
            observer_name: "pvlive_day_after".to_string(),
            location_id: Uuid::nil(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap(),
            value_fraction: value,
            effective_capacity_watts: capacity,
        }
    }

    #[test]
    fn test_target_timestamp() {
        let record = forecast(90, 0.5);
        assert_eq!(
            record.target_timestamp().unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, 11, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_huge_horizon_is_invalid_record() {
        let record = forecast(i64::MAX / 2, 0.5);
        assert!(matches!(
            record.target_timestamp(),
            Err(AccuracyError::InvalidRecord(_))
        ));
        assert!(matches!(record.validate(), Err(AccuracyError::InvalidRecord(_))));

        assert!(forecast(MAX_HORIZON_MINUTES, 0.5).validate().is_ok());
        assert!(forecast(MAX_HORIZON_MINUTES + 1, 0.5).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_horizon() {
        assert!(forecast(-30, 0.5).validate().is_err());
        assert!(forecast(0, 0.5).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_fraction_out_of_range() {
        assert!(forecast(30, 1.2).validate().is_err());

        let mut record = forecast(30, 0.4);
        record.p90_fraction = Some(-0.1);
        assert!(record.validate().is_err());

        record.p90_fraction = Some(f64::NAN);
        assert!(record.validate().is_err());

        record.p90_fraction = Some(0.9);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_merged_sample_uses_observation_capacity() {
        let mut fc = forecast(60, 0.5);
        fc.p10_fraction = Some(0.25);
        let sample = MergedSample::from_pair(&fc, &observation(0.4, Some(2_000_000.0))).unwrap();

        assert_eq!(sample.forecast_power_watts, 1_000_000.0);
        assert_eq!(sample.observed_power_watts, 800_000.0);
        assert_eq!(sample.error, 200_000.0);
        assert_eq!(sample.absolute_error, 200_000.0);
        assert_eq!(sample.quantiles.p10_watts, Some(500_000.0));
        assert_eq!(sample.quantiles.p90_watts, None);
    }

    #[test]
    fn test_merged_sample_missing_capacity_fails() {
        let result = MergedSample::from_pair(&forecast(60, 0.5), &observation(0.4, None));
        assert!(matches!(
            result,
            Err(AccuracyError::MissingCapacity { timestamp: Some(_), .. })
        ));
    }

    #[test]
    fn test_location_type_parse() {
        assert_eq!("GSP".parse::<LocationType>().unwrap(), LocationType::Gsp);
        assert_eq!(LocationType::Nation.to_string(), "NATION");
        assert_eq!("wind".parse::<EnergySource>().unwrap(), EnergySource::Wind);
    }

    proptest! {
        #[test]
        fn prop_target_is_init_plus_horizon(horizon in 0i64..10_000, offset in 0i64..1_000_000) {
            let mut record = forecast(horizon, 0.5);
            record.init_timestamp += Duration::seconds(offset);
            prop_assert_eq!(
                record.target_timestamp().unwrap() - record.init_timestamp,
                Duration::minutes(horizon)
            );
        }
    }
}
