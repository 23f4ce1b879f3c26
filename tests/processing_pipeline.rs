/// End-to-end pipeline test: OFM files on disk through parsing, cleaning,
/// zone association, water-level reconciliation, reduction, uncertainty
/// and IHO qualification — with an in-memory tidal source and a JSON
/// vessel registry standing in for the external services.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use csb_pipeline::config::PipelineConfig;
use csb_pipeline::model::{SeriesLabel, TimeSeries, WaterLevelSample};
use csb_pipeline::pipeline::{process_with_zones, PipelineError};
use csb_pipeline::stations::{Station, WaterLevelSource};
use csb_pipeline::uncertainty::StationUncertainty;
use csb_pipeline::vessel::VesselConfigJsonSource;
use csb_pipeline::zones::tessellate;

const CONFIG_TOML: &str = r#"
[DATA.Transformation.filter]
min_depth = 0.0
max_depth = 100.0

[DATA.Transformation.uncertainty]
constant_tvu_wlo = 0.1
constant_tvu_wlp = 0.4
depth_coefficient_tvu = 2.0
cone_angle_sonar = 20.0
constant_thu = 1.0
decimal_precision = 3

[DATA.Georeference.water_level]
water_level_tolerance = 15

[IWLS.API.TimeSeries]
priority = ["wlo", "wlp"]
max_time_gap = "60 min"
"threshold_interpolation-filling" = "3 h"
"#;

const VESSELS_JSON: &str = r#"[
  {
    "id": "Aventure",
    "axis_convention": "CARIS",
    "navigation": [{ "time_stamp": "2020-01-01T00:00:00Z", "x": 0.0, "y": 0.0, "z": 0.0 }],
    "motion": [{ "time_stamp": "2020-01-01T00:00:00Z", "x": 0.0, "y": 0.0, "z": 0.0 }],
    "sounder": [{ "time_stamp": "2020-01-01T00:00:00Z", "x": 0.1, "y": 0.3, "z": 0.05 }],
    "waterline": [{ "time_stamp": "2020-01-01T00:00:00Z", "z": -0.2 }]
  }
]"#;

// ---------------------------------------------------------------------------
// In-memory tidal source
// ---------------------------------------------------------------------------

struct FixtureSource {
    series: HashMap<(String, TimeSeries), Vec<(DateTime<Utc>, f64)>>,
}

impl WaterLevelSource for FixtureSource {
    fn station_position(&self, _station_id: &str) -> Option<(f64, f64)> {
        Some((-68.5, 48.4))
    }

    fn time_series_samples(
        &self,
        station_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        code: TimeSeries,
        _wlo_qc_flag_filter: &[String],
    ) -> Vec<WaterLevelSample> {
        self.series
            .get(&(station_id.to_string(), code))
            .map(|samples| {
                samples
                    .iter()
                    .filter(|(at, _)| *at >= from && *at <= to)
                    .map(|(at, value)| {
                        WaterLevelSample::new(*at, *value, SeriesLabel::Observed(code))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 1, 18, 0, 0).unwrap() + Duration::minutes(minute)
}

fn gauge_station(id: &str, longitude: f64, latitude: f64) -> Station {
    Station {
        id: id.to_string(),
        code: format!("0{id}"),
        name: format!("Gauge {id}"),
        latitude,
        longitude,
        time_series: vec![TimeSeries::Wlo, TimeSeries::Wlp],
        is_tidal: Some(true),
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    files: Vec<PathBuf>,
    vessels: VesselConfigJsonSource,
    config: PipelineConfig,
}

/// OFM file with soundings at 18:30/18:31/18:32 near (-68.5, 48.4),
/// plus rows the cleaner must reject (zero depth, out-of-range latitude,
/// over-max depth).
fn build_fixture(extra_rows: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();

    let ofm_path = dir.path().join("survey.xyz");
    let mut file = std::fs::File::create(&ofm_path).unwrap();
    write!(
        file,
        "LON,LAT,DEPTH,TIME\n\
         -68.50,48.40,12.0,2024-10-01T18:30:00Z\n\
         -68.51,48.41,14.0,2024-10-01T18:31:00Z\n\
         -68.52,48.42,16.0,2024-10-01T18:32:00Z\n\
         -68.52,48.42,0.0,2024-10-01T18:32:10Z\n\
         -68.52,95.00,16.0,2024-10-01T18:32:20Z\n\
         -68.52,48.42,450.0,2024-10-01T18:32:30Z\n\
         {extra_rows}"
    )
    .unwrap();

    let vessels_path = dir.path().join("vessels.json");
    std::fs::write(&vessels_path, VESSELS_JSON).unwrap();

    Fixture {
        files: vec![ofm_path],
        vessels: VesselConfigJsonSource::new(vessels_path),
        config: PipelineConfig::from_toml_str(CONFIG_TOML).unwrap(),
        _dir: dir,
    }
}

fn steady_levels(station: &str) -> FixtureSource {
    // wlo at 0.5 m every minute over 18:00–19:00.
    let samples: Vec<(DateTime<Utc>, f64)> = (0..=60).map(|m| (at(m), 0.5)).collect();
    FixtureSource {
        series: HashMap::from([((station.to_string(), TimeSeries::Wlo), samples)]),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_full_run_reduces_and_qualifies_soundings() {
    let fixture = build_fixture("");
    let zones = tessellate(&[gauge_station("a", -68.5, 48.4)]);
    let source = Arc::new(steady_levels("a"));

    let dataset = process_with_zones(
        &fixture.files,
        "Aventure",
        &zones,
        source,
        &fixture.vessels,
        &StationUncertainty::empty(),
        &fixture.config,
    )
    .expect("pipeline should succeed");

    // The three invalid rows are gone.
    assert_eq!(dataset.soundings.len(), 3);
    assert!(dataset.reconcile_errors.is_empty());
    assert_eq!(dataset.georeference.reduced, 3);

    for sounding in &dataset.soundings {
        // depth_raw + sounder.z − waterline.z − water level
        let expected = sounding.depth_raw_m + 0.05 - (-0.2) - 0.5;
        let processed = sounding.depth_processed_m.expect("reduced");
        assert!(
            (processed - expected).abs() < 1e-9,
            "raw {} reduced to {processed}, expected {expected}",
            sounding.depth_raw_m
        );

        let info = sounding.water_level.as_ref().unwrap();
        assert_eq!(info.water_level_m, 0.5);
        assert_eq!(info.series.to_string(), "wlo");
        assert_eq!(info.zone.id, "a");

        assert!(sounding.uncertainty_m.is_some());
        assert!(sounding.thu_m.is_some());
        assert!(sounding.iho_order.is_some());
    }

    // TVU with observed water levels: depth * 2% + 0.1.
    let first = &dataset.soundings[0];
    assert!((first.uncertainty_m.unwrap() - 0.34).abs() < 1e-9);

    // Every classified sounding appears in the cumulative summary.
    assert_eq!(dataset.qualification.not_met.sounding_count, 3);
    assert_eq!(dataset.qualification.not_met.sounding_percentage, 100.0);
}

#[test]
fn test_station_without_data_leaves_soundings_unreduced() {
    let fixture = build_fixture("");
    let zones = tessellate(&[gauge_station("a", -68.5, 48.4)]);
    // Source knows nothing about station "a".
    let source = Arc::new(FixtureSource {
        series: HashMap::new(),
    });

    let dataset = process_with_zones(
        &fixture.files,
        "Aventure",
        &zones,
        source,
        &fixture.vessels,
        &StationUncertainty::empty(),
        &fixture.config,
    )
    .expect("per-station failures are not fatal");

    assert!(dataset.reconcile_errors.contains_key("a"));
    assert_eq!(dataset.georeference.reduced, 0);

    for sounding in &dataset.soundings {
        assert!(sounding.depth_processed_m.is_none());
        // Uncertainty still computes, falling back to the wlp constant:
        // depth * 2% + 0.4.
        let expected = sounding.depth_raw_m * 0.02 + 0.4;
        assert!((sounding.uncertainty_m.unwrap() - expected).abs() < 1e-9);
    }
}

#[test]
fn test_soundings_outside_every_zone_stay_unzoned() {
    // Put the only gauge far away from the survey area.
    let fixture = build_fixture("");
    let zones = tessellate(&[gauge_station("far", 135.0, -30.0)]);
    let source = Arc::new(steady_levels("far"));

    let dataset = process_with_zones(
        &fixture.files,
        "Aventure",
        &zones,
        source,
        &fixture.vessels,
        &StationUncertainty::empty(),
        &fixture.config,
    )
    .unwrap();

    assert_eq!(dataset.georeference.without_zone, 3);
    assert!(dataset.soundings.iter().all(|s| s.tide_zone.is_none()));
}

#[test]
fn test_unknown_vessel_is_fatal() {
    let fixture = build_fixture("");
    let zones = tessellate(&[gauge_station("a", -68.5, 48.4)]);
    let source = Arc::new(steady_levels("a"));

    let result = process_with_zones(
        &fixture.files,
        "Nonesuch",
        &zones,
        source,
        &fixture.vessels,
        &StationUncertainty::empty(),
        &fixture.config,
    );

    assert!(matches!(result, Err(PipelineError::Vessel(_))));
}

#[test]
fn test_mixed_format_batch_is_fatal() {
    let fixture = build_fixture("");
    let dir = tempfile::tempdir().unwrap();

    // A Lowrance file alongside the OFM one.
    let lowrance = dir.path().join("sonar.csv");
    std::fs::write(
        &lowrance,
        "DateTime[UTC],Longitude[°WGS84],Latitude[°WGS84],WaterDepth[Feet],SurveyType\n\
         2024-10-01 18:30:00,-68.5,48.4,39.37,Primary\n",
    )
    .unwrap();

    let mut files = fixture.files.clone();
    files.push(lowrance);

    let zones = tessellate(&[gauge_station("a", -68.5, 48.4)]);
    let source = Arc::new(steady_levels("a"));

    let result = process_with_zones(
        &files,
        "Aventure",
        &zones,
        source,
        &fixture.vessels,
        &StationUncertainty::empty(),
        &fixture.config,
    );

    assert!(matches!(result, Err(PipelineError::Parse(_))));
}
