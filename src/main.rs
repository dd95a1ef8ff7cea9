use anyhow::Result;
use forecast_accuracy::config::Config;
use forecast_accuracy::forecast::{AccuracyEngine, DisplayMetrics};
use forecast_accuracy::repo::{
    CachedRepo, ForecastRepository, InMemoryRepo, LocationRepository, ObservationRepository,
};
use forecast_accuracy::telemetry::init_tracing;
use std::sync::Arc;
use tracing::{info, warn};

fn build_engine<R>(inner: R, cfg: &Config) -> AccuracyEngine
where
    R: ForecastRepository + ObservationRepository + LocationRepository + 'static,
{
    let repo = Arc::new(CachedRepo::new(inner, cfg.cache.ttl()));
    AccuracyEngine::new(repo.clone(), repo.clone(), repo, cfg.engine_settings())
}

async fn engine_for(cfg: &Config) -> Result<AccuracyEngine> {
    #[cfg(feature = "db")]
    {
        if let Some(db) = &cfg.db {
            use forecast_accuracy::repo::pg::PgRepo;
            let pg = PgRepo::connect(&db.url, db.max_connections).await?;
            info!("reading records from postgres");
            return Ok(build_engine(pg, cfg));
        }
    }

    if cfg.db.is_some() && !cfg!(feature = "db") {
        warn!("[db] configured but the db feature is disabled, reading JSON input instead");
    }

    let memory = InMemoryRepo::load_json(
        cfg.report.energy_source,
        &cfg.input.locations_path,
        &cfg.input.forecasts_path,
        &cfg.input.observations_path,
    )
    .await?;
    Ok(build_engine(memory, cfg))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;
    init_tracing(&cfg.logging.filter);

    let engine = engine_for(&cfg).await?;
    let request = cfg.to_request()?;

    info!(
        location = %request.location_id,
        forecasters = ?request.forecasters,
        selection = ?request.selection,
        "evaluating forecast accuracy"
    );

    let report = engine.evaluate(&request).await?;
    let unit = cfg.report.display_unit;
    let metrics: Vec<DisplayMetrics> = report.metrics.iter().map(|m| m.in_unit(unit)).collect();
    let penalty = cfg.penalty_calculator()?.map(|calculator| report.penalty(&calculator).total);

    let output = serde_json::json!({
        "location": report.location,
        "window": report.window,
        "unit": unit.to_string(),
        "summary": report.summary,
        "unmatched_forecasts": report.unmatched_forecasts,
        "unmatched_observations": report.unmatched_observations,
        "metrics": metrics,
        "penalty_total": penalty,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
