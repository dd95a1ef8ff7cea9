//! Forecast Metrics and Evaluation
//!
//! Error statistics over merged samples, grouped by forecaster and
//! optionally by horizon and day: MAE, mean error, spread of the absolute
//! error, and MAE normalized by capacity and by observed generation.

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::domain::{DisplayUnit, MergedSample};
use crate::error::{AccuracyError, Result};
use crate::forecast::alignment::bucket_horizon;

/// z-score for a two sided 95% normal interval
pub const Z_95: f64 = 1.96;

/// Minimum group size for a confidence band
pub const MIN_BAND_SAMPLES: usize = 2;

/// Which dimensions besides the forecaster form the grouping key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupBy {
    pub horizon: bool,
    pub date: bool,
    /// Floor horizons to this width before grouping
    pub horizon_bucket_minutes: Option<i64>,
}

impl Default for GroupBy {
    fn default() -> Self {
        Self {
            horizon: true,
            date: false,
            horizon_bucket_minutes: None,
        }
    }
}

impl GroupBy {
    pub fn forecaster_only() -> Self {
        Self {
            horizon: false,
            date: false,
            horizon_bucket_minutes: None,
        }
    }

    fn key_for(&self, sample: &MergedSample) -> GroupKey {
        GroupKey {
            forecaster: sample.forecaster_id.clone(),
            horizon_minutes: self.horizon.then(|| match self.horizon_bucket_minutes {
                Some(width) => bucket_horizon(sample.horizon_minutes, width),
                None => sample.horizon_minutes,
            }),
            date: self.date.then(|| sample.target_date()),
        }
    }
}

/// Grouping key. Unused dimensions are `None`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub forecaster: String,
    pub horizon_minutes: Option<i64>,
    pub date: Option<NaiveDate>,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.forecaster)?;
        if let Some(h) = self.horizon_minutes {
            write!(f, " h={h}m")?;
        }
        if let Some(d) = self.date {
            write!(f, " {d}")?;
        }
        Ok(())
    }
}

/// Error statistics for one group. Power values are in watts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub key: GroupKey,
    pub sample_count: usize,
    /// Mean absolute error
    pub mae: f64,
    /// Mean signed error (bias), forecast minus observed
    pub mean_error: f64,
    /// Sample standard deviation of the absolute error. `None` below two
    /// samples.
    pub std: Option<f64>,
    /// Standard error of the mean, std / sqrt(n)
    pub sem: Option<f64>,
    pub mean_capacity_watts: f64,
    pub nmae_by_capacity: Option<f64>,
    /// MAE over the mean observed generation of the whole queried window
    pub nmae_by_generation: Option<f64>,
    /// Share of observations inside the p10..p90 band
    pub coverage_p10_p90: Option<f64>,
}

impl MetricAggregate {
    /// 95% band `metric ± 1.96 × sem`. Refused for groups under two
    /// samples.
    pub fn confidence_band(&self, metric: f64) -> Result<(f64, f64)> {
        match self.sem {
            Some(sem) if self.sample_count >= MIN_BAND_SAMPLES => {
                let margin = Z_95 * sem;
                Ok((metric - margin, metric + margin))
            }
            _ => Err(AccuracyError::InsufficientSamples {
                required: MIN_BAND_SAMPLES,
                actual: self.sample_count,
            }),
        }
    }

    pub fn mae_band(&self) -> Result<(f64, f64)> {
        self.confidence_band(self.mae)
    }

    /// Presentation copy in `unit`. Normalized metrics are unitless and
    /// pass through unchanged.
    pub fn in_unit(&self, unit: DisplayUnit) -> DisplayMetrics {
        DisplayMetrics {
            key: self.key.clone(),
            unit,
            sample_count: self.sample_count,
            mae: unit.to_display(self.mae),
            mean_error: unit.to_display(self.mean_error),
            std: self.std.map(|v| unit.to_display(v)),
            sem: self.sem.map(|v| unit.to_display(v)),
            mean_capacity: unit.to_display(self.mean_capacity_watts),
            nmae_by_capacity: self.nmae_by_capacity,
            nmae_by_generation: self.nmae_by_generation,
            coverage_p10_p90: self.coverage_p10_p90,
        }
    }
}

impl fmt::Display for MetricAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: n={}, MAE={:.3} W, ME={:.3} W",
            self.key, self.sample_count, self.mae, self.mean_error
        )
    }
}

/// [`MetricAggregate`] scaled for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMetrics {
    pub key: GroupKey,
    pub unit: DisplayUnit,
    pub sample_count: usize,
    pub mae: f64,
    pub mean_error: f64,
    pub std: Option<f64>,
    pub sem: Option<f64>,
    pub mean_capacity: f64,
    pub nmae_by_capacity: Option<f64>,
    pub nmae_by_generation: Option<f64>,
    pub coverage_p10_p90: Option<f64>,
}

/// Whole-window figures, independent of grouping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub sample_count: usize,
    pub mae: f64,
    pub mean_error: f64,
    pub mean_observed_watts: f64,
    pub mean_capacity_watts: f64,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Sample standard deviation (n - 1 denominator). `None` for fewer than two
/// values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let m = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    Some(variance.sqrt())
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator != 0.0 && denominator.is_finite()).then(|| numerator / denominator)
}

fn coverage(samples: &[&MergedSample]) -> Option<f64> {
    let banded: Vec<bool> = samples
        .iter()
        .filter_map(|s| match (s.quantiles.p10_watts, s.quantiles.p90_watts) {
            (Some(lo), Some(hi)) => {
                Some(s.observed_power_watts >= lo && s.observed_power_watts <= hi)
            }
            _ => None,
        })
        .collect();
    if banded.is_empty() {
        return None;
    }
    Some(banded.iter().filter(|inside| **inside).count() as f64 / banded.len() as f64)
}

fn aggregate_group(
    key: GroupKey,
    samples: &[&MergedSample],
    mean_observed: f64,
) -> MetricAggregate {
    let n = samples.len();
    let abs_errors: Vec<f64> = samples.iter().map(|s| s.absolute_error).collect();

    let mae = abs_errors.iter().sum::<f64>() / n as f64;
    let mean_error = samples.iter().map(|s| s.error).sum::<f64>() / n as f64;
    let std = sample_std(&abs_errors);
    let sem = std.map(|s| s / (n as f64).sqrt());
    let mean_capacity = samples.iter().map(|s| s.capacity_watts).sum::<f64>() / n as f64;

    MetricAggregate {
        key,
        sample_count: n,
        mae,
        mean_error,
        std,
        sem,
        mean_capacity_watts: mean_capacity,
        nmae_by_capacity: ratio(mae, mean_capacity),
        nmae_by_generation: ratio(mae, mean_observed),
        coverage_p10_p90: coverage(samples),
    }
}

/// Mean observed power with every (location, target) slot counted once,
/// however many forecasters or horizons landed on it
pub fn slot_mean_observed(samples: &[MergedSample]) -> Option<f64> {
    let slots: HashMap<(Uuid, DateTime<Utc>), f64> = samples
        .iter()
        .map(|s| ((s.location_id, s.target_timestamp), s.observed_power_watts))
        .collect();
    mean(slots.into_values())
}

/// Group `samples` by `group_by` and compute error statistics per group.
///
/// `nmae_by_generation` is normalized by the mean observed generation of
/// the distinct observation slots in the input, not of each group, so the
/// denominator is identical for every horizon being compared. Prefer
/// [`aggregate_with_generation_mean`] with [`Alignment::mean_observed_watts`]
/// when the whole queried window is known.
///
/// Returns groups ordered by key. Fails with `EmptyResult` on no samples.
///
/// [`Alignment::mean_observed_watts`]: crate::forecast::Alignment::mean_observed_watts
pub fn aggregate(samples: &[MergedSample], group_by: GroupBy) -> Result<Vec<MetricAggregate>> {
    let mean_observed = slot_mean_observed(samples)
        .ok_or_else(|| AccuracyError::empty("aggregation over zero merged samples"))?;
    aggregate_with_generation_mean(samples, group_by, mean_observed)
}

/// [`aggregate`] with the generation-NMAE denominator supplied by the
/// caller, typically the mean over every observation in the queried window
pub fn aggregate_with_generation_mean(
    samples: &[MergedSample],
    group_by: GroupBy,
    mean_observed_watts: f64,
) -> Result<Vec<MetricAggregate>> {
    if samples.is_empty() {
        return Err(AccuracyError::empty("aggregation over zero merged samples"));
    }

    let groups: BTreeMap<GroupKey, Vec<&MergedSample>> = samples
        .iter()
        .map(|s| (group_by.key_for(s), s))
        .into_group_map()
        .into_iter()
        .collect();

    let out: Vec<MetricAggregate> = groups
        .into_iter()
        .map(|(key, group)| aggregate_group(key, &group, mean_observed_watts))
        .collect();

    tracing::debug!(
        samples = samples.len(),
        groups = out.len(),
        mean_observed_watts,
        "aggregated forecast errors"
    );
    Ok(out)
}

/// Whole-window summary
pub fn summarize(samples: &[MergedSample]) -> Result<WindowSummary> {
    let n = samples.len();
    if n == 0 {
        return Err(AccuracyError::empty("summary over zero merged samples"));
    }
    Ok(WindowSummary {
        sample_count: n,
        mae: samples.iter().map(|s| s.absolute_error).sum::<f64>() / n as f64,
        mean_error: samples.iter().map(|s| s.error).sum::<f64>() / n as f64,
        mean_observed_watts: samples.iter().map(|s| s.observed_power_watts).sum::<f64>()
            / n as f64,
        mean_capacity_watts: samples.iter().map(|s| s.capacity_watts).sum::<f64>() / n as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuantilePowers;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn sample(
        forecaster: &str,
        horizon: i64,
        target: DateTime<Utc>,
        forecast_w: f64,
        observed_w: f64,
        capacity_w: f64,
    ) -> MergedSample {
        let error = forecast_w - observed_w;
        MergedSample {
            forecaster_id: forecaster.to_string(),
            forecaster_version: "1.0".to_string(),
            location_id: Uuid::nil(),
            observer_name: "pvlive".to_string(),
            init_timestamp: target - Duration::minutes(horizon),
            target_timestamp: target,
            horizon_minutes: horizon,
            forecast_fraction: forecast_w / capacity_w,
            observed_fraction: observed_w / capacity_w,
            capacity_watts: capacity_w,
            forecast_power_watts: forecast_w,
            observed_power_watts: observed_w,
            quantiles: QuantilePowers::default(),
            error,
            absolute_error: error.abs(),
        }
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_basic_statistics() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0),
            sample("pvnet", 30, noon(2), 90.0, 100.0, 1000.0),
            sample("pvnet", 30, noon(3), 130.0, 100.0, 1000.0),
        ];

        let metrics = aggregate(&samples, GroupBy::default()).unwrap();
        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];

        // |errors| = 10, 10, 30
        assert!((m.mae - 50.0 / 3.0).abs() < 1e-9);
        // errors = 10, -10, 30
        assert!((m.mean_error - 10.0).abs() < 1e-9);
        // sample std of [10, 10, 30]: mean 50/3, var = (2*(20/3)^2 + (40/3)^2) / 2
        let expected_std = ((2.0 * (20.0f64 / 3.0).powi(2) + (40.0f64 / 3.0).powi(2)) / 2.0).sqrt();
        assert!((m.std.unwrap() - expected_std).abs() < 1e-9);
        assert!((m.sem.unwrap() - expected_std / 3f64.sqrt()).abs() < 1e-9);
        assert!((m.nmae_by_capacity.unwrap() - m.mae / 1000.0).abs() < 1e-12);
        assert!((m.nmae_by_generation.unwrap() - m.mae / 100.0).abs() < 1e-12);
        assert_eq!(m.sample_count, 3);
    }

    #[test]
    fn test_std_undefined_for_single_sample() {
        let samples = vec![sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0)];
        let m = &aggregate(&samples, GroupBy::default()).unwrap()[0];
        assert_eq!(m.std, None);
        assert_eq!(m.sem, None);
        assert!(m.mae_band().is_err());
    }

    #[test]
    fn test_empty_samples_are_an_error_not_zero() {
        let err = aggregate(&[], GroupBy::default()).unwrap_err();
        assert!(err.is_empty_result());
        assert!(summarize(&[]).unwrap_err().is_empty_result());
    }

    #[test]
    fn test_nmae_by_generation_uses_window_mean() {
        // Horizon 30 sees 100 W observed, horizon 60 sees 300 W; the window
        // mean is 200 W and both groups must be divided by it.
        let samples = vec![
            sample("pvnet", 30, noon(1), 120.0, 100.0, 1000.0),
            sample("pvnet", 60, noon(2), 330.0, 300.0, 1000.0),
        ];
        let metrics = aggregate(&samples, GroupBy::default()).unwrap();
        assert_eq!(metrics.len(), 2);

        assert_eq!(metrics[0].key.horizon_minutes, Some(30));
        assert!((metrics[0].nmae_by_generation.unwrap() - 20.0 / 200.0).abs() < 1e-12);
        assert_eq!(metrics[1].key.horizon_minutes, Some(60));
        assert!((metrics[1].nmae_by_generation.unwrap() - 30.0 / 200.0).abs() < 1e-12);
    }

    #[test]
    fn test_shared_observation_counts_once_in_generation_mean() {
        // ukv only covers the bright noon(2) slot; adding it must not shift
        // the denominator pvnet is divided by.
        let pvnet = vec![
            sample("pvnet", 30, noon(1), 200.0, 100.0, 1000.0),
            sample("pvnet", 30, noon(2), 700.0, 800.0, 1000.0),
            sample("pvnet", 30, noon(3), 200.0, 100.0, 1000.0),
        ];
        let mut both = pvnet.clone();
        both.push(sample("ukv", 30, noon(2), 800.0, 800.0, 1000.0));

        let alone = &aggregate(&pvnet, GroupBy::forecaster_only()).unwrap()[0];
        let shared = &aggregate(&both, GroupBy::forecaster_only()).unwrap()[0];
        assert_eq!(shared.key.forecaster, "pvnet");
        assert!((alone.nmae_by_generation.unwrap() - 100.0 / (1000.0 / 3.0)).abs() < 1e-12);
        assert!(
            (alone.nmae_by_generation.unwrap() - shared.nmae_by_generation.unwrap()).abs() < 1e-12
        );
    }

    #[test]
    fn test_explicit_generation_mean_is_used() {
        let samples = vec![sample("pvnet", 30, noon(1), 150.0, 100.0, 1000.0)];
        let m = &aggregate_with_generation_mean(&samples, GroupBy::default(), 250.0).unwrap()[0];
        assert!((m.nmae_by_generation.unwrap() - 50.0 / 250.0).abs() < 1e-12);
        assert!(aggregate_with_generation_mean(&[], GroupBy::default(), 250.0)
            .unwrap_err()
            .is_empty_result());
    }

    #[test]
    fn test_group_by_forecaster_horizon_and_date() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0),
            sample("pvnet", 30, noon(2), 120.0, 100.0, 1000.0),
            sample("pvnet", 45, noon(2), 120.0, 100.0, 1000.0),
            sample("ukv", 30, noon(1), 100.0, 100.0, 1000.0),
        ];

        let by_day = aggregate(
            &samples,
            GroupBy {
                horizon: true,
                date: true,
                horizon_bucket_minutes: None,
            },
        )
        .unwrap();
        assert_eq!(by_day.len(), 4);
        assert_eq!(by_day[0].key.date, Some(noon(1).date_naive()));

        let bucketed = aggregate(
            &samples,
            GroupBy {
                horizon: true,
                date: false,
                horizon_bucket_minutes: Some(30),
            },
        )
        .unwrap();
        assert_eq!(bucketed.len(), 2);
        assert_eq!(bucketed[0].key.forecaster, "pvnet");
        assert_eq!(bucketed[0].sample_count, 3);

        let per_forecaster = aggregate(&samples, GroupBy::forecaster_only()).unwrap();
        assert_eq!(per_forecaster.len(), 2);
        assert_eq!(per_forecaster[1].key.forecaster, "ukv");
        assert_eq!(per_forecaster[1].mae, 0.0);
        assert_eq!(per_forecaster[1].key.horizon_minutes, None);
    }

    #[test]
    fn test_capacity_normalization_uses_group_mean_capacity() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0),
            sample("pvnet", 30, noon(2), 110.0, 100.0, 3000.0),
        ];
        let m = &aggregate(&samples, GroupBy::default()).unwrap()[0];
        assert_eq!(m.mean_capacity_watts, 2000.0);
        assert!((m.nmae_by_capacity.unwrap() - 10.0 / 2000.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_generation_gives_no_generation_nmae() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 10.0, 0.0, 1000.0),
            sample("pvnet", 30, noon(2), 5.0, 0.0, 1000.0),
        ];
        let m = &aggregate(&samples, GroupBy::default()).unwrap()[0];
        assert_eq!(m.nmae_by_generation, None);
        assert!(m.nmae_by_capacity.is_some());
    }

    #[test]
    fn test_confidence_band() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0),
            sample("pvnet", 30, noon(2), 130.0, 100.0, 1000.0),
        ];
        let m = &aggregate(&samples, GroupBy::default()).unwrap()[0];
        let (lo, hi) = m.mae_band().unwrap();
        let margin = Z_95 * m.sem.unwrap();
        assert!((lo - (m.mae - margin)).abs() < 1e-12);
        assert!((hi - (m.mae + margin)).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_coverage() {
        let mut inside = sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0);
        inside.quantiles.p10_watts = Some(80.0);
        inside.quantiles.p90_watts = Some(140.0);
        let mut outside = sample("pvnet", 30, noon(2), 110.0, 200.0, 1000.0);
        outside.quantiles.p10_watts = Some(80.0);
        outside.quantiles.p90_watts = Some(140.0);
        let no_band = sample("pvnet", 30, noon(3), 110.0, 100.0, 1000.0);

        let m = &aggregate(&[inside, outside, no_band], GroupBy::default()).unwrap()[0];
        assert_eq!(m.coverage_p10_p90, Some(0.5));

        let plain = vec![sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0)];
        assert_eq!(aggregate(&plain, GroupBy::default()).unwrap()[0].coverage_p10_p90, None);
    }

    #[test]
    fn test_in_unit_scales_power_only() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 3_000_000.0, 1_000_000.0, 10_000_000.0),
            sample("pvnet", 30, noon(2), 1_000_000.0, 1_000_000.0, 10_000_000.0),
        ];
        let m = &aggregate(&samples, GroupBy::default()).unwrap()[0];
        let shown = m.in_unit(DisplayUnit::Megawatt);
        assert_eq!(shown.mae, 1.0);
        assert_eq!(shown.mean_capacity, 10.0);
        assert_eq!(shown.nmae_by_capacity, m.nmae_by_capacity);
        // Stored aggregate keeps watts
        assert_eq!(m.mae, 1_000_000.0);
    }

    #[test]
    fn test_summary() {
        let samples = vec![
            sample("pvnet", 30, noon(1), 110.0, 100.0, 1000.0),
            sample("ukv", 60, noon(1), 80.0, 100.0, 3000.0),
        ];
        let summary = summarize(&samples).unwrap();
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.mae, 15.0);
        assert_eq!(summary.mean_error, -5.0);
        assert_eq!(summary.mean_observed_watts, 100.0);
        assert_eq!(summary.mean_capacity_watts, 2000.0);
    }

    proptest! {
        #[test]
        fn prop_mae_non_negative_and_zero_iff_exact(
            pairs in prop::collection::vec((0.0f64..1e6, 0.0f64..1e6), 1..40),
            exact in any::<bool>(),
        ) {
            let samples: Vec<MergedSample> = pairs
                .iter()
                .enumerate()
                .map(|(i, (f, o))| {
                    let forecast = if exact { *o } else { *f };
                    let target = noon(1) + Duration::minutes(30 * i as i64);
                    sample("pvnet", 30, target, forecast, *o, 1e6)
                })
                .collect();

            let m = &aggregate(&samples, GroupBy::forecaster_only()).unwrap()[0];
            prop_assert!(m.mae >= 0.0);
            let all_equal = samples
                .iter()
                .all(|s| s.forecast_power_watts == s.observed_power_watts);
            prop_assert_eq!(m.mae == 0.0, all_equal);
        }
    }
}
