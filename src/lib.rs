//! Forecast accuracy evaluation for renewable generation forecasts.
//!
//! Forecast series are selected by policy, aligned with observed
//! generation, normalized to watts and reduced to grouped error statistics.
//! A banded penalty calculator and a TTL cache for collaborator reads sit
//! alongside the pipeline.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod repo;
pub mod telemetry;

pub use error::{AccuracyError, Result};
