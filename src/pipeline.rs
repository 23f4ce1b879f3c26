/// End-to-end processing run.
///
/// Wires the stages in dependency order: parse → clean → tessellate →
/// associate → reconcile water levels → reduce → uncertainty → IHO
/// qualification. Schema validation runs at the stage boundaries; a
/// violation is fatal. Per-station reconciliation failures are collected
/// and logged, and the surviving stations keep processing.
///
/// Services (API handler, caches, vessel lookup, uncertainty table) are
/// constructed once per run and injected, so tests drive the same code
/// path with in-memory sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::filter::{self, ALL_FILTERS};
use crate::georeference::{self, GeoreferenceReport};
use crate::ingest::{self, ParseError};
use crate::iwls::handler::DEFAULT_CACHE_TTL;
use crate::iwls::{Endpoint, IwlsApi, QueryHandler, ResponseCache};
use crate::model::Sounding;
use crate::order::{self, OrderQualification};
use crate::reconcile::{self, ReconcileError, ReconcileOptions};
use crate::schema::{self, SchemaViolationError};
use crate::stations::{StationsError, StationsHandler, WaterLevelSource};
use crate::uncertainty::{self, StationUncertainty, UncertaintyError};
use crate::vessel::{VesselConfigSource, VesselError};
use crate::zones::{self, TideZone, DEFAULT_WORK_UNIT_GAP_MINUTES};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Schema(#[from] SchemaViolationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stations(#[from] StationsError),
    #[error(transparent)]
    Vessel(#[from] VesselError),
    #[error(transparent)]
    Uncertainty(#[from] UncertaintyError),
    #[error("failed to initialize the HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of a processing run.
#[derive(Debug)]
pub struct ProcessedDataset {
    pub soundings: Vec<Sounding>,
    pub georeference: GeoreferenceReport,
    /// Stations whose water levels could not be reconciled.
    pub reconcile_errors: BTreeMap<String, ReconcileError>,
    pub qualification: OrderQualification,
}

/// Builds the stations handler for the configured environment, with the
/// disk response cache isolated per API profile when a cache directory is
/// given.
pub fn build_stations_handler(
    config: &PipelineConfig,
    response_cache_dir: Option<&Path>,
) -> Result<StationsHandler, PipelineError> {
    let environment = config.active_environment()?;

    let mut handler = QueryHandler::new(
        environment.calls,
        StdDuration::from_secs(environment.period),
    )?;
    if let Some(directory) = response_cache_dir {
        handler = handler.with_cache(ResponseCache::new(
            directory.join(environment.endpoint.config_name()),
            DEFAULT_CACHE_TTL,
        ));
    }

    let api = IwlsApi::new(Endpoint::for_kind(environment.endpoint), handler);
    Ok(StationsHandler::new(api))
}

/// Full run against the remote tidal service: zones come from the
/// station listing, water levels from the handler.
pub fn process(
    files: &[PathBuf],
    vessel_id: &str,
    handler: &StationsHandler,
    vessel_configs: &dyn VesselConfigSource,
    station_uncertainty: &StationUncertainty,
    config: &PipelineConfig,
) -> Result<ProcessedDataset, PipelineError> {
    let tide_zones = zones::build_zones(handler, &config.time_series.priority, &[])?;
    process_with_zones(
        files,
        vessel_id,
        &tide_zones,
        Arc::new(handler.clone()),
        vessel_configs,
        station_uncertainty,
        config,
    )
}

/// The processing run proper, with tessellated zones and a water-level
/// source supplied by the caller.
pub fn process_with_zones(
    files: &[PathBuf],
    vessel_id: &str,
    tide_zones: &[TideZone],
    water_levels: Arc<dyn WaterLevelSource>,
    vessel_configs: &dyn VesselConfigSource,
    station_uncertainty: &StationUncertainty,
    config: &PipelineConfig,
) -> Result<ProcessedDataset, PipelineError> {
    // Ingestion: one parser for the whole batch.
    let assignment = ingest::group(files)?;
    info!(
        "parsing {} {} files",
        assignment.files.len(),
        assignment.kind
    );
    let soundings = ingest::read_files(assignment.kind, &assignment.files)?;
    schema::validate_sorted_unique("ingest", &soundings)?;
    info!("{} raw soundings", soundings.len());

    // Cleaning: every filter enabled; survivors satisfy the raw schema.
    let mut soundings = filter::clean(soundings, &config.filter, &ALL_FILTERS);
    schema::validate_raw("clean", &soundings)?;
    info!("{} soundings after filtering", soundings.len());

    // Zone association and work units.
    zones::attach_zones(&mut soundings, tide_zones);
    let work_units = zones::make_work_units(
        &soundings,
        tide_zones,
        Duration::minutes(DEFAULT_WORK_UNIT_GAP_MINUTES),
    );

    // Water-level reconciliation; failures are per-station.
    let options = ReconcileOptions::from(&config.time_series);
    let (water_level_series, reconcile_errors) =
        reconcile::reconcile_for_stations(water_levels, &work_units, &options);
    for series in water_level_series.values() {
        schema::validate_reconciled("reconcile", series)?;
    }
    for (station, error) in &reconcile_errors {
        warn!("water levels unavailable for station '{station}': {error}");
    }

    // Reduction to chart datum.
    let vessel = vessel_configs.get_vessel_config(vessel_id)?;
    let georeference = georeference::georeference(
        &mut soundings,
        &water_level_series,
        &vessel,
        config.georeference.water_level_tolerance,
    )?;
    schema::validate_processed("georeference", &soundings)?;

    // Uncertainty and order qualification.
    uncertainty::compute_tvu(&mut soundings, station_uncertainty, &config.uncertainty);
    uncertainty::compute_thu(&mut soundings, &config.uncertainty);
    order::classify_soundings(&mut soundings);
    let qualification =
        order::qualification_summary(&soundings, config.uncertainty.decimal_precision);

    Ok(ProcessedDataset {
        soundings,
        georeference,
        reconcile_errors,
        qualification,
    })
}
