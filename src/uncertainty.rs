/// Total propagated uncertainty (TVU and THU) per sounding.
///
/// TVU = depth_raw * (depth_coefficient / 100) + station component, where
/// the station component is the observation constant when the water level
/// traces back to `wlo`, else a per-station lookup defaulting to the
/// prediction constant. THU is the sonar cone opening projected at depth
/// plus a constant positioning term. Both round to the configured
/// precision and are monotonically non-decreasing in depth.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::config::UncertaintyConfig;
use crate::model::Sounding;

#[derive(Debug, thiserror::Error)]
pub enum UncertaintyError {
    #[error("failed to read station uncertainty file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse station uncertainty file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StationUncertaintyEntry {
    uncertainty_m: f64,
}

/// Per-station vertical uncertainty, keyed by station code. Loaded once
/// at pipeline entry and injected where needed.
#[derive(Debug, Default)]
pub struct StationUncertainty {
    by_code: HashMap<String, f64>,
}

impl StationUncertainty {
    pub fn empty() -> StationUncertainty {
        StationUncertainty::default()
    }

    pub fn from_map(by_code: HashMap<String, f64>) -> StationUncertainty {
        StationUncertainty { by_code }
    }

    /// Loads a `{code: {uncertainty_m: ...}}` JSON file.
    pub fn from_json_file(path: &Path) -> Result<StationUncertainty, UncertaintyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| UncertaintyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let entries: HashMap<String, StationUncertaintyEntry> = serde_json::from_str(&contents)?;

        debug!("{} station uncertainty entries loaded", entries.len());

        Ok(StationUncertainty {
            by_code: entries
                .into_iter()
                .map(|(code, entry)| (code, entry.uncertainty_m))
                .collect(),
        })
    }

    pub fn get(&self, station_code: &str) -> Option<f64> {
        self.by_code.get(station_code).copied()
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Computes the TVU for every sounding in place.
pub fn compute_tvu(
    soundings: &mut [Sounding],
    station_uncertainty: &StationUncertainty,
    config: &UncertaintyConfig,
) {
    debug!("computing vertical uncertainty for {} soundings", soundings.len());

    for sounding in soundings.iter_mut() {
        let depth_component = sounding.depth_raw_m * (config.depth_coefficient_tvu / 100.0);

        let observation_based = sounding
            .water_level
            .as_ref()
            .is_some_and(|info| info.series.is_observation_based());

        let station_component = if observation_based {
            config.constant_tvu_wlo
        } else {
            sounding
                .tide_zone
                .as_ref()
                .and_then(|zone| station_uncertainty.get(&zone.code))
                .unwrap_or(config.constant_tvu_wlp)
        };

        sounding.uncertainty_m = Some(round_to(
            depth_component + station_component,
            config.decimal_precision,
        ));
    }
}

/// Computes the THU for every sounding in place.
pub fn compute_thu(soundings: &mut [Sounding], config: &UncertaintyConfig) {
    debug!("computing horizontal uncertainty for {} soundings", soundings.len());

    let cone_coefficient = (config.cone_angle_sonar.to_radians() / 2.0).tan();

    for sounding in soundings.iter_mut() {
        sounding.thu_m = Some(round_to(
            sounding.depth_raw_m * cone_coefficient + config.constant_thu,
            config.decimal_precision,
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeriesLabel, TideZoneRef, TimeSeries, WaterLevelInfo};
    use chrono::{TimeZone, Utc};

    fn config() -> UncertaintyConfig {
        UncertaintyConfig {
            constant_tvu_wlo: 0.1,
            constant_tvu_wlp: 0.4,
            depth_coefficient_tvu: 2.0,
            cone_angle_sonar: 20.0,
            constant_thu: 5.0,
            decimal_precision: 3,
        }
    }

    fn sounding(depth: f64) -> Sounding {
        Sounding::new(
            Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap(),
            48.4,
            -68.5,
            depth,
            None,
        )
    }

    fn with_water_level(mut s: Sounding, series: SeriesLabel, zone_code: &str) -> Sounding {
        let zone = TideZoneRef {
            id: "id".to_string(),
            code: zone_code.to_string(),
            name: "name".to_string(),
        };
        s.tide_zone = Some(zone.clone());
        s.water_level = Some(WaterLevelInfo {
            water_level_m: 0.5,
            series,
            zone,
        });
        s
    }

    #[test]
    fn test_tvu_uses_wlo_constant_for_observed_levels() {
        let mut rows = vec![with_water_level(
            sounding(10.0),
            SeriesLabel::Observed(TimeSeries::Wlo),
            "03248",
        )];

        compute_tvu(&mut rows, &StationUncertainty::empty(), &config());

        // 10 * 0.02 + 0.1
        assert_eq!(rows[0].uncertainty_m, Some(0.3));
    }

    #[test]
    fn test_tvu_interpolated_wlo_still_counts_as_observation() {
        let mut rows = vec![with_water_level(
            sounding(10.0),
            SeriesLabel::Interpolated(TimeSeries::Wlo),
            "03248",
        )];

        compute_tvu(&mut rows, &StationUncertainty::empty(), &config());
        assert_eq!(rows[0].uncertainty_m, Some(0.3));
    }

    #[test]
    fn test_tvu_prediction_uses_station_lookup_then_constant() {
        let lookup = StationUncertainty::from_map(HashMap::from([(
            "03248".to_string(),
            0.25,
        )]));

        let mut rows = vec![
            with_water_level(sounding(10.0), SeriesLabel::Observed(TimeSeries::Wlp), "03248"),
            with_water_level(sounding(10.0), SeriesLabel::Observed(TimeSeries::Wlp), "99999"),
        ];

        compute_tvu(&mut rows, &lookup, &config());

        // Known station: 0.2 + 0.25; unknown: 0.2 + 0.4 fallback.
        assert_eq!(rows[0].uncertainty_m, Some(0.45));
        assert_eq!(rows[1].uncertainty_m, Some(0.6));
    }

    #[test]
    fn test_unreduced_sounding_falls_back_to_prediction_constant() {
        let mut rows = vec![sounding(10.0)];
        compute_tvu(&mut rows, &StationUncertainty::empty(), &config());
        assert_eq!(rows[0].uncertainty_m, Some(0.6));
    }

    #[test]
    fn test_thu_cone_projection() {
        let mut rows = vec![sounding(30.0)];
        compute_thu(&mut rows, &config());

        // 30 * tan(10°) + 5 = 10.29...
        let expected = 30.0 * (10f64.to_radians()).tan() + 5.0;
        assert!((rows[0].thu_m.unwrap() - round_to(expected, 3)).abs() < 1e-12);
    }

    #[test]
    fn test_uncertainties_monotonic_in_depth() {
        let mut rows: Vec<Sounding> = (1..=60).map(|d| sounding(d as f64)).collect();
        compute_tvu(&mut rows, &StationUncertainty::empty(), &config());
        compute_thu(&mut rows, &config());

        for pair in rows.windows(2) {
            assert!(pair[0].uncertainty_m.unwrap() <= pair[1].uncertainty_m.unwrap());
            assert!(pair[0].thu_m.unwrap() <= pair[1].thu_m.unwrap());
            assert!(pair[0].uncertainty_m.unwrap() >= 0.0);
            assert!(pair[0].thu_m.unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_station_uncertainty_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station_uncertainty.json");
        std::fs::write(
            &path,
            r#"{"03248": {"uncertainty_m": 0.25}, "03360": {"uncertainty_m": 0.31}}"#,
        )
        .unwrap();

        let lookup = StationUncertainty::from_json_file(&path).unwrap();
        assert_eq!(lookup.get("03248"), Some(0.25));
        assert_eq!(lookup.get("03360"), Some(0.31));
        assert_eq!(lookup.get("00000"), None);
    }
}
