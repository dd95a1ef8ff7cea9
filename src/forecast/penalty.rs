//! Deviation penalty calculator
//!
//! Applies a banded tariff to the gap between generated and forecast power.
//! The band is picked from the absolute deviation as a percentage of the
//! contracted capacity (AVC); the penalty is the band rate times the
//! deviation converted by an explicit [`EnergyConversion`].

use serde::{Deserialize, Serialize};

use crate::domain::MergedSample;
use crate::error::{AccuracyError, Result};

/// Half-open percentage band `[lower_pct, upper_pct)`; no upper bound when
/// `upper_pct` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyBand {
    pub lower_pct: f64,
    pub upper_pct: Option<f64>,
    /// Currency per unit energy
    pub rate: f64,
}

impl PenaltyBand {
    fn contains(&self, pct: f64) -> bool {
        pct >= self.lower_pct && self.upper_pct.map_or(true, |upper| pct < upper)
    }
}

/// Ordered, non-overlapping bands. Deserializes as a plain list of bands
/// and is validated the same way as [`PenaltySchedule::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PenaltyBand>", into = "Vec<PenaltyBand>")]
pub struct PenaltySchedule {
    bands: Vec<PenaltyBand>,
}

impl TryFrom<Vec<PenaltyBand>> for PenaltySchedule {
    type Error = AccuracyError;

    fn try_from(bands: Vec<PenaltyBand>) -> Result<Self> {
        Self::new(bands)
    }
}

impl From<PenaltySchedule> for Vec<PenaltyBand> {
    fn from(schedule: PenaltySchedule) -> Self {
        schedule.bands
    }
}

impl Default for PenaltySchedule {
    fn default() -> Self {
        Self {
            bands: vec![
                PenaltyBand {
                    lower_pct: 7.0,
                    upper_pct: Some(15.0),
                    rate: 0.25,
                },
                PenaltyBand {
                    lower_pct: 15.0,
                    upper_pct: Some(23.0),
                    rate: 0.50,
                },
                PenaltyBand {
                    lower_pct: 23.0,
                    upper_pct: None,
                    rate: 0.75,
                },
            ],
        }
    }
}

impl PenaltySchedule {
    /// Build a schedule from bands, which must be ordered and non-overlapping
    pub fn new(mut bands: Vec<PenaltyBand>) -> Result<Self> {
        bands.sort_by(|a, b| a.lower_pct.total_cmp(&b.lower_pct));

        for band in &bands {
            if !band.lower_pct.is_finite() || band.lower_pct < 0.0 {
                return Err(AccuracyError::InvalidInput(format!(
                    "penalty band lower bound {} must be a non-negative number",
                    band.lower_pct
                )));
            }
            if band.upper_pct.is_some_and(|upper| upper <= band.lower_pct) {
                return Err(AccuracyError::InvalidInput(format!(
                    "penalty band [{}, {:?}) is empty",
                    band.lower_pct, band.upper_pct
                )));
            }
            if !band.rate.is_finite() || band.rate < 0.0 {
                return Err(AccuracyError::InvalidInput(format!(
                    "penalty rate {} must be non-negative",
                    band.rate
                )));
            }
        }

        for pair in bands.windows(2) {
            match pair[0].upper_pct {
                Some(upper) if upper <= pair[1].lower_pct => {}
                _ => {
                    return Err(AccuracyError::InvalidInput(format!(
                        "penalty bands starting at {}% and {}% overlap",
                        pair[0].lower_pct, pair[1].lower_pct
                    )))
                }
            }
        }

        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[PenaltyBand] {
        &self.bands
    }

    /// Rate for an absolute deviation percentage; zero outside every band
    pub fn rate_for(&self, deviation_pct: f64) -> f64 {
        let pct = deviation_pct.abs();
        self.bands
            .iter()
            .find(|band| band.contains(pct))
            .map_or(0.0, |band| band.rate)
    }
}

/// Conversion from an absolute kW deviation to the energy quantity the
/// rate is charged on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnergyConversion {
    /// Divide kW by 1000, as the dashboard tariff always has. Note this
    /// treats a power value as energy.
    KwToMwLegacy,
    /// kW held for `interval_hours`, giving kWh
    Kwh { interval_hours: f64 },
    /// Divide kW by an arbitrary factor
    Custom { divisor: f64 },
}

impl Default for EnergyConversion {
    fn default() -> Self {
        Self::KwToMwLegacy
    }
}

impl EnergyConversion {
    pub fn apply(&self, deviation_kw: f64) -> f64 {
        match self {
            Self::KwToMwLegacy => deviation_kw / 1000.0,
            Self::Kwh { interval_hours } => deviation_kw * interval_hours,
            Self::Custom { divisor } => deviation_kw / divisor,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::KwToMwLegacy => Ok(()),
            Self::Kwh { interval_hours } if *interval_hours > 0.0 => Ok(()),
            Self::Custom { divisor } if *divisor != 0.0 && divisor.is_finite() => Ok(()),
            other => Err(AccuracyError::InvalidInput(format!(
                "invalid energy conversion {other:?}"
            ))),
        }
    }
}

/// Paired generation and forecast power (kW)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltySample {
    pub generation_kw: f64,
    pub forecast_kw: f64,
}

impl From<&MergedSample> for PenaltySample {
    fn from(sample: &MergedSample) -> Self {
        Self {
            generation_kw: sample.observed_power_watts / 1000.0,
            forecast_kw: sample.forecast_power_watts / 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PenaltyLine {
    pub deviation_kw: f64,
    pub deviation_pct: f64,
    pub rate: f64,
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenaltyReport {
    pub lines: Vec<PenaltyLine>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyCalculator {
    avc_kw: f64,
    schedule: PenaltySchedule,
    conversion: EnergyConversion,
}

impl PenaltyCalculator {
    pub fn new(
        avc_kw: f64,
        schedule: PenaltySchedule,
        conversion: EnergyConversion,
    ) -> Result<Self> {
        if !avc_kw.is_finite() || avc_kw <= 0.0 {
            return Err(AccuracyError::InvalidInput(format!(
                "contracted capacity must be positive, got {avc_kw} kW"
            )));
        }
        conversion.validate()?;
        Ok(Self {
            avc_kw,
            schedule,
            conversion,
        })
    }

    pub fn avc_kw(&self) -> f64 {
        self.avc_kw
    }

    pub fn line(&self, sample: &PenaltySample) -> PenaltyLine {
        let deviation_kw = sample.generation_kw - sample.forecast_kw;
        let deviation_pct = deviation_kw / self.avc_kw * 100.0;
        let rate = self.schedule.rate_for(deviation_pct);
        PenaltyLine {
            deviation_kw,
            deviation_pct,
            rate,
            penalty: rate * self.conversion.apply(deviation_kw.abs()),
        }
    }

    pub fn calculate(&self, samples: &[PenaltySample]) -> PenaltyReport {
        let lines: Vec<PenaltyLine> = samples.iter().map(|s| self.line(s)).collect();
        let total = lines.iter().map(|l| l.penalty).sum();
        PenaltyReport { lines, total }
    }
}
