//! Forecast selection policy
//!
//! For every (forecaster, target timestamp) pair there can be many records,
//! one per lead time. A [`SelectionMode`] reduces them to at most one.

use chrono::{DateTime, Utc};
use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::ForecastRecord;

/// How the applicable forecast is chosen for each target timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectionMode {
    /// Smallest horizon, i.e. the most recently issued forecast
    #[default]
    Latest,
    /// Closest horizon at or above the threshold
    Horizon { min_horizon_minutes: i64 },
    /// Every record issued at exactly this instant
    CreationTime { init_timestamp: DateTime<Utc> },
    /// Most recent forecast issued at or before the cutoff
    LatestBefore { cutoff: DateTime<Utc> },
}

impl SelectionMode {
    fn admits(&self, record: &ForecastRecord) -> bool {
        match self {
            Self::Latest => true,
            Self::Horizon {
                min_horizon_minutes,
            } => record.horizon_minutes >= *min_horizon_minutes,
            Self::CreationTime { init_timestamp } => record.init_timestamp == *init_timestamp,
            Self::LatestBefore { cutoff } => record.init_timestamp <= *cutoff,
        }
    }
}

/// Compare dotted version strings component by component. Numeric
/// components compare as numbers, missing trailing components count as
/// zero, anything else falls back to text order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| {
        v.trim_start_matches(['v', 'V'])
            .split(|c: char| c == '.' || c == '-')
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    let component = |x: &str, y: &str| match (x.parse::<u64>(), y.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => x.cmp(y),
    };

    split(a)
        .iter()
        .zip_longest(split(b).iter())
        .map(|pair| match pair {
            EitherOrBoth::Both(x, y) => component(x.as_str(), y.as_str()),
            EitherOrBoth::Left(x) => component(x.as_str(), "0"),
            EitherOrBoth::Right(y) => component("0", y.as_str()),
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Whether `candidate` should replace `current` for the same
/// (forecaster, target timestamp).
///
/// Smaller horizon wins. On equal horizons the greater forecaster version
/// wins, and on a full tie the later record in input order wins.
fn supersedes(candidate: &ForecastRecord, current: &ForecastRecord) -> bool {
    match candidate.horizon_minutes.cmp(&current.horizon_minutes) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => {
            compare_versions(&candidate.forecaster_version, &current.forecaster_version).is_ge()
        }
    }
}

/// Apply `mode` to `records`, returning at most one record per
/// (forecaster, target timestamp), ordered by forecaster then target.
pub fn select_forecasts(records: &[ForecastRecord], mode: &SelectionMode) -> Vec<ForecastRecord> {
    let mut chosen: BTreeMap<(&str, DateTime<Utc>), &ForecastRecord> = BTreeMap::new();

    for record in records.iter().filter(|r| mode.admits(r)) {
        let Ok(target) = record.target_timestamp() else {
            warn!(
                forecaster = %record.forecaster_id,
                horizon_minutes = record.horizon_minutes,
                "skipping forecast with unrepresentable target"
            );
            continue;
        };
        let key = (record.forecaster_id.as_str(), target);
        match chosen.get(&key) {
            Some(current) if !supersedes(record, current) => {}
            _ => {
                chosen.insert(key, record);
            }
        }
    }

    tracing::debug!(
        ?mode,
        candidates = records.len(),
        selected = chosen.len(),
        "forecast selection applied"
    );

    chosen.into_values().cloned().collect()
}
