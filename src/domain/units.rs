//! Fraction-of-capacity to power conversion and display scaling.
//!
//! All arithmetic happens in watts. Display units are applied only when a
//! value is presented.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AccuracyError, Result};

/// Convert a capacity fraction into watts
pub fn fraction_to_watts(fraction: f64, capacity_watts: f64) -> f64 {
    fraction * capacity_watts
}

/// Inverse of [`fraction_to_watts`]. `None` for zero capacity.
pub fn watts_to_fraction(power_watts: f64, capacity_watts: f64) -> Option<f64> {
    (capacity_watts != 0.0).then(|| power_watts / capacity_watts)
}

/// Unwrap a capacity value, failing loudly when it is missing or unusable
pub fn capacity_or_err(
    capacity_watts: Option<f64>,
    location_id: Uuid,
    timestamp: Option<DateTime<Utc>>,
) -> Result<f64> {
    match capacity_watts {
        Some(c) if c.is_finite() && c >= 0.0 => Ok(c),
        _ => Err(AccuracyError::MissingCapacity {
            location_id,
            timestamp,
        }),
    }
}

/// Unit a power value is presented in
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum DisplayUnit {
    #[serde(rename = "W")]
    #[strum(serialize = "W")]
    Watt,
    #[serde(rename = "kW")]
    #[strum(serialize = "kW")]
    Kilowatt,
    #[default]
    #[serde(rename = "MW")]
    #[strum(serialize = "MW")]
    Megawatt,
    #[serde(rename = "GW")]
    #[strum(serialize = "GW")]
    Gigawatt,
}

impl DisplayUnit {
    /// Watts per display unit
    pub fn scale(&self) -> f64 {
        match self {
            Self::Watt => 1.0,
            Self::Kilowatt => 1e3,
            Self::Megawatt => 1e6,
            Self::Gigawatt => 1e9,
        }
    }

    pub fn to_display(&self, watts: f64) -> f64 {
        watts / self.scale()
    }

    pub fn from_display(&self, value: f64) -> f64 {
        value * self.scale()
    }
}
