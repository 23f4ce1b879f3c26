/// Bathymetric reduction to chart datum.
///
/// Each zoned sounding is joined to the nearest reconciled water-level
/// sample within the configured tolerance and reduced with the CARIS
/// sign convention (+z down):
///
///     depth_processed = depth_raw + sounder.z − waterline.z − water_level
///
/// Soundings without a zone, without a reconciled series or without a
/// close-enough sample stay un-reduced; they are counted, not fatal. A
/// vessel configuration change inside the dataset interval is fatal — the
/// run cannot mix lever arms.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::model::{ReconciledSample, ReconciledSeries, Sounding, WaterLevelInfo};
use crate::vessel::{VesselConfig, VesselError};

/// Why soundings were left un-reduced, for the run log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeoreferenceReport {
    pub reduced: usize,
    pub without_zone: usize,
    pub without_series: usize,
    pub outside_tolerance: usize,
}

/// Nearest sample to `time`, by binary search over the monotonic series.
fn nearest_sample(series: &ReconciledSeries, time: DateTime<Utc>) -> Option<&ReconciledSample> {
    if series.samples.is_empty() {
        return None;
    }

    let split = series.samples.partition_point(|s| s.event_date <= time);
    let before = split.checked_sub(1).map(|i| &series.samples[i]);
    let after = series.samples.get(split);

    match (before, after) {
        (Some(b), Some(a)) => {
            if time - b.event_date <= a.event_date - time {
                Some(b)
            } else {
                Some(a)
            }
        }
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Reduces every zoned sounding in place.
pub fn georeference(
    soundings: &mut [Sounding],
    water_levels: &BTreeMap<String, ReconciledSeries>,
    vessel: &VesselConfig,
    water_level_tolerance: Duration,
) -> Result<GeoreferenceReport, VesselError> {
    let mut report = GeoreferenceReport::default();

    let Some(min_time) = soundings.iter().map(|s| s.time_utc).min() else {
        return Ok(report);
    };
    let max_time = soundings
        .iter()
        .map(|s| s.time_utc)
        .max()
        .expect("non-empty after min");

    // One lever-arm pair for the whole run; a mid-run change is fatal.
    let sounder = vessel.sounder_over(min_time, max_time)?;
    let waterline = vessel.waterline_over(min_time, max_time)?;

    for sounding in soundings.iter_mut() {
        let Some(zone) = sounding.tide_zone.clone() else {
            report.without_zone += 1;
            continue;
        };
        let Some(series) = water_levels.get(&zone.id) else {
            report.without_series += 1;
            continue;
        };
        let Some(sample) = nearest_sample(series, sounding.time_utc) else {
            report.without_series += 1;
            continue;
        };

        let offset = (sample.event_date - sounding.time_utc).abs();
        if offset > water_level_tolerance {
            report.outside_tolerance += 1;
            continue;
        }

        sounding.depth_processed_m =
            Some(sounding.depth_raw_m + sounder.z - waterline.z - sample.value);
        sounding.water_level = Some(WaterLevelInfo {
            water_level_m: sample.value,
            series: sample.series,
            zone,
        });
        report.reduced += 1;
    }

    info!(
        "{} soundings reduced to chart datum ({} without zone, {} without water levels, {} outside the {} tolerance)",
        report.reduced,
        report.without_zone,
        report.without_series,
        report.outside_tolerance,
        water_level_tolerance,
    );
    if report.reduced == 0 && !soundings.is_empty() {
        warn!("no sounding could be reduced");
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeriesLabel, TideZoneRef, TimeSeries};
    use crate::vessel::{AxisConvention, LeverArm, Waterline};
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn vessel(sounder_z: f64, waterline_z: f64) -> VesselConfig {
        let epoch = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        VesselConfig {
            id: "test".to_string(),
            name: None,
            axis_convention: AxisConvention::Caris,
            navigation: vec![LeverArm { time_stamp: epoch, x: 0.0, y: 0.0, z: 0.0 }],
            motion: vec![LeverArm { time_stamp: epoch, x: 0.0, y: 0.0, z: 0.0 }],
            sounder: vec![LeverArm { time_stamp: epoch, x: 0.0, y: 0.0, z: sounder_z }],
            waterline: vec![Waterline { time_stamp: epoch, z: waterline_z }],
        }
    }

    fn series(station: &str, values: &[(i64, f64)]) -> ReconciledSeries {
        ReconciledSeries {
            station_id: station.to_string(),
            position: None,
            start: at(values.first().unwrap().0),
            end: at(values.last().unwrap().0),
            series_codes: vec![TimeSeries::Wlo],
            samples: values
                .iter()
                .map(|(minute, value)| ReconciledSample {
                    event_date: at(*minute),
                    value: *value,
                    series: SeriesLabel::Observed(TimeSeries::Wlo),
                })
                .collect(),
        }
    }

    fn zoned_sounding(minute: i64, depth: f64, zone: &str) -> Sounding {
        let mut sounding = Sounding::new(at(minute), 48.4, -68.5, depth, None);
        sounding.tide_zone = Some(TideZoneRef {
            id: zone.to_string(),
            code: format!("0{zone}"),
            name: format!("Station {zone}"),
        });
        sounding
    }

    #[test]
    fn test_reduction_matches_caris_convention() {
        // Worked example: raw 12.000, water level 0.500, waterline 0.2 m
        // above datum (z = -0.200), sounder 0.05 m below reference.
        let mut soundings = vec![zoned_sounding(0, 12.0, "stn")];
        let mut levels = BTreeMap::new();
        levels.insert("stn".to_string(), series("stn", &[(0, 0.5)]));

        let report = georeference(
            &mut soundings,
            &levels,
            &vessel(0.05, -0.2),
            Duration::minutes(15),
        )
        .unwrap();

        assert_eq!(report.reduced, 1);
        let processed = soundings[0].depth_processed_m.unwrap();
        assert!(
            (processed - 11.75).abs() < 1e-9,
            "12.000 + 0.050 - (-0.200) - 0.500 = 11.750, got {processed}"
        );

        let info = soundings[0].water_level.as_ref().unwrap();
        assert_eq!(info.water_level_m, 0.5);
        assert_eq!(info.series.to_string(), "wlo");
        assert_eq!(info.zone.id, "stn");
    }

    #[test]
    fn test_nearest_sample_selection() {
        let s = series("stn", &[(0, 1.0), (10, 2.0), (20, 3.0)]);

        assert_eq!(nearest_sample(&s, at(4)).unwrap().value, 1.0);
        assert_eq!(nearest_sample(&s, at(6)).unwrap().value, 2.0);
        assert_eq!(nearest_sample(&s, at(10)).unwrap().value, 2.0);
        assert_eq!(nearest_sample(&s, at(100)).unwrap().value, 3.0);
        // Equidistant prefers the earlier sample.
        assert_eq!(nearest_sample(&s, at(5)).unwrap().value, 1.0);
    }

    #[test]
    fn test_sample_outside_tolerance_leaves_sounding_unreduced() {
        let mut soundings = vec![zoned_sounding(0, 12.0, "stn")];
        let mut levels = BTreeMap::new();
        levels.insert("stn".to_string(), series("stn", &[(40, 0.5)]));

        let report = georeference(
            &mut soundings,
            &levels,
            &vessel(0.0, 0.0),
            Duration::minutes(15),
        )
        .unwrap();

        assert_eq!(report.reduced, 0);
        assert_eq!(report.outside_tolerance, 1);
        assert!(soundings[0].depth_processed_m.is_none());
        assert!(soundings[0].water_level.is_none());
    }

    #[test]
    fn test_missing_zone_and_missing_series_are_counted() {
        let mut soundings = vec![
            Sounding::new(at(0), 48.4, -68.5, 12.0, None), // no zone
            zoned_sounding(0, 12.0, "orphan"),             // zone without levels
        ];
        let levels = BTreeMap::new();

        let report = georeference(
            &mut soundings,
            &levels,
            &vessel(0.0, 0.0),
            Duration::minutes(15),
        )
        .unwrap();

        assert_eq!(report.without_zone, 1);
        assert_eq!(report.without_series, 1);
        assert_eq!(report.reduced, 0);
    }

    #[test]
    fn test_mid_run_sensor_change_is_fatal() {
        let epoch = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut config = vessel(0.05, -0.2);
        config.sounder.push(LeverArm {
            time_stamp: at(5),
            x: 0.0,
            y: 0.0,
            z: 0.9,
        });
        assert_eq!(config.sounder[0].time_stamp, epoch);

        let mut soundings = vec![
            zoned_sounding(0, 12.0, "stn"),
            zoned_sounding(10, 12.0, "stn"),
        ];
        let mut levels = BTreeMap::new();
        levels.insert("stn".to_string(), series("stn", &[(0, 0.5), (10, 0.5)]));

        let result = georeference(&mut soundings, &levels, &config, Duration::minutes(15));
        assert!(matches!(
            result,
            Err(VesselError::SensorConfiguration("sounder"))
        ));
    }
}
