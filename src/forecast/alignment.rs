//! Time alignment of forecast and observation series.
//!
//! Both sides are floored to a shared cadence and inner-joined on
//! (location, timestamp). Unmatched rows are dropped and counted.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{fraction_to_watts, ForecastRecord, MergedSample, ObservationRecord};
use crate::error::{AccuracyError, Result};

/// Default join cadence
pub const DEFAULT_CADENCE_MINUTES: i64 = 30;

/// Output of [`merge`]: the joined samples plus data-quality counters
#[derive(Debug, Clone, Serialize)]
pub struct Alignment {
    pub samples: Vec<MergedSample>,
    /// Forecasts with no observation at their target timestamp
    pub unmatched_forecasts: usize,
    /// Observation slots no forecast landed on
    pub unmatched_observations: usize,
    /// Observations dropped because another one already occupied the
    /// same cadence slot
    pub collapsed_observations: usize,
    /// Mean observed power over every observation slot in the input,
    /// matched or not. Each slot counts once however many forecasters
    /// landed on it.
    pub mean_observed_watts: f64,
}

/// Floor `ts` to a multiple of `cadence` since the epoch
pub fn floor_to_cadence(ts: DateTime<Utc>, cadence: Duration) -> Result<DateTime<Utc>> {
    ts.duration_trunc(cadence)
        .map_err(|e| AccuracyError::InvalidInput(format!("cannot floor {ts} to {cadence}: {e}")))
}

/// Floor a horizon to a bucket width. Widths <= 0 leave it unchanged.
pub fn bucket_horizon(horizon_minutes: i64, width_minutes: i64) -> i64 {
    if width_minutes <= 0 {
        return horizon_minutes;
    }
    horizon_minutes - horizon_minutes.rem_euclid(width_minutes)
}

/// Keep one observation per (location, timestamp), choosing by the order
/// of `preference`. Observers not listed rank after listed ones; among
/// equal ranks the first seen is kept.
pub fn prefer_observers(
    observations: &[ObservationRecord],
    preference: &[String],
) -> Vec<ObservationRecord> {
    let rank = |name: &str| {
        preference
            .iter()
            .position(|p| p == name)
            .unwrap_or(preference.len())
    };

    let mut best: HashMap<(Uuid, DateTime<Utc>), usize> = HashMap::new();
    for (idx, obs) in observations.iter().enumerate() {
        let key = (obs.location_id, obs.timestamp);
        match best.get(&key) {
            Some(&current)
                if rank(&observations[current].observer_name) <= rank(&obs.observer_name) => {}
            _ => {
                best.insert(key, idx);
            }
        }
    }

    let mut kept: Vec<usize> = best.into_values().collect();
    kept.sort_unstable();
    kept.into_iter().map(|i| observations[i].clone()).collect()
}

/// Inner-join forecasts to observations on target timestamp after flooring
/// both to `cadence`. Fails with `EmptyResult` when nothing overlaps.
pub fn merge(
    forecasts: &[ForecastRecord],
    observations: &[ObservationRecord],
    cadence: Duration,
) -> Result<Alignment> {
    if cadence <= Duration::zero() {
        return Err(AccuracyError::InvalidInput(format!(
            "alignment cadence must be positive, got {cadence}"
        )));
    }

    // Earliest raw timestamp wins a slot, so an on-cadence reading beats
    // the sub-cadence readings floored onto it.
    let mut sorted: Vec<&ObservationRecord> = observations.iter().collect();
    sorted.sort_by_key(|o| o.timestamp);

    let mut slots: HashMap<(Uuid, DateTime<Utc>), &ObservationRecord> = HashMap::new();
    let mut collapsed = 0usize;
    let mut slot_power = 0.0;
    for obs in sorted {
        let slot = floor_to_cadence(obs.timestamp, cadence)?;
        if slots.contains_key(&(obs.location_id, slot)) {
            collapsed += 1;
        } else {
            slot_power += fraction_to_watts(obs.value_fraction, obs.capacity_watts()?);
            slots.insert((obs.location_id, slot), obs);
        }
    }

    let mut samples = Vec::new();
    let mut used: HashSet<(Uuid, DateTime<Utc>)> = HashSet::new();
    let mut unmatched_forecasts = 0usize;
    for forecast in forecasts {
        let key = (
            forecast.location_id,
            floor_to_cadence(forecast.target_timestamp()?, cadence)?,
        );
        match slots.get(&key) {
            Some(obs) => {
                samples.push(MergedSample::from_pair(forecast, obs)?);
                used.insert(key);
            }
            None => unmatched_forecasts += 1,
        }
    }
    let unmatched_observations = slots.len() - used.len();

    debug!(
        forecasts = forecasts.len(),
        observations = observations.len(),
        matched = samples.len(),
        unmatched_forecasts,
        unmatched_observations,
        collapsed_observations = collapsed,
        "merged forecast and observation series"
    );

    if samples.is_empty() {
        warn!(
            forecasts = forecasts.len(),
            observations = observations.len(),
            "forecast and observation series do not overlap"
        );
        return Err(AccuracyError::empty(format!(
            "no overlap between {} forecasts and {} observations",
            forecasts.len(),
            observations.len()
        )));
    }

    samples.sort_by(|a, b| {
        (a.target_timestamp, &a.forecaster_id, a.horizon_minutes).cmp(&(
            b.target_timestamp,
            &b.forecaster_id,
            b.horizon_minutes,
        ))
    });

    Ok(Alignment {
        mean_observed_watts: slot_power / slots.len() as f64,
        samples,
        unmatched_forecasts,
        unmatched_observations,
        collapsed_observations: collapsed,
    })
}

/// Map each target to the latest frame at or before it, if that frame is
/// no older than `tolerance`. Used to line up image streams published at
/// different cadences (e.g. 5 and 15 minutes).
pub fn align_frames(
    targets: &[DateTime<Utc>],
    frames: &[DateTime<Utc>],
    tolerance: Duration,
) -> Vec<Option<DateTime<Utc>>> {
    let mut frames = frames.to_vec();
    frames.sort_unstable();
    frames.dedup();

    targets
        .iter()
        .map(|target| {
            let idx = frames.partition_point(|f| f <= target);
            idx.checked_sub(1)
                .map(|i| frames[i])
                .filter(|frame| *target - *frame <= tolerance)
        })
        .collect()
}
