/// Integration tests for water-level reconciliation through the public
/// API, driving the reconciler with an in-memory station source.
///
/// These cover the two repair paths end to end:
/// 1. Gap FILL — a hole in the observed series larger than the tolerated
///    gap is spliced from the next series in priority.
/// 2. Gap INTERPOLATION — a short hole is resampled onto the uniform
///    grid with cubic-spline values and `-interpolated` labels.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use csb_pipeline::model::{SeriesLabel, TimeSeries, WaterLevelSample};
use csb_pipeline::reconcile::{identify_gaps, reconcile, reconcile_for_stations, ReconcileError, ReconcileOptions};
use csb_pipeline::stations::WaterLevelSource;
use csb_pipeline::zones::WorkUnit;

// ---------------------------------------------------------------------------
// In-memory station source
// ---------------------------------------------------------------------------

struct FixtureSource {
    series: HashMap<(String, TimeSeries), Vec<(DateTime<Utc>, f64)>>,
}

impl FixtureSource {
    fn new() -> FixtureSource {
        FixtureSource {
            series: HashMap::new(),
        }
    }

    fn with_series(
        mut self,
        station: &str,
        code: TimeSeries,
        samples: Vec<(DateTime<Utc>, f64)>,
    ) -> FixtureSource {
        self.series.insert((station.to_string(), code), samples);
        self
    }
}

impl WaterLevelSource for FixtureSource {
    fn station_position(&self, _station_id: &str) -> Option<(f64, f64)> {
        Some((-68.52, 48.42))
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
    Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

/// Smooth tide-like level so spline fits behave like real data.
fn tide(minute: i64) -> f64 {
    1.5 + (minute as f64 / 180.0 * std::f64::consts::PI).sin()
}

fn minutes(list: impl IntoIterator<Item = i64>) -> Vec<(DateTime<Utc>, f64)> {
    list.into_iter().map(|m| (at(m), tide(m))).collect()
}

// ---------------------------------------------------------------------------
// Fill path
// ---------------------------------------------------------------------------

#[test]
fn test_gap_fill_splices_second_series_inside_the_hole() {
    // wlo minute-by-minute to 00:30, silent until 01:15, then on to
    // 02:00. wlp every 15 minutes across the whole window. With
    // interpolation disabled, the hole must be filled from wlp.
    let mut wlo: Vec<i64> = (0..=30).collect();
    wlo.extend(75..=120);
    let source = FixtureSource::new()
        .with_series("station", TimeSeries::Wlo, minutes(wlo))
        .with_series("station", TimeSeries::Wlp, minutes((0..=8).map(|k| k * 15)));

    let options = ReconcileOptions {
        max_time_gap: Some(Duration::minutes(10)),
        threshold_interpolation_filling: None,
        wlo_qc_flag_filter: Vec::new(),
        buffer_time: None,
    };

    let priority = [TimeSeries::Wlo, TimeSeries::Wlp];
    let series = reconcile(&source, "station", at(0), at(120), &priority, &options)
        .expect("reconciliation should succeed");

    // wlp contributes exactly the samples strictly inside the hole.
    let wlp_minutes: Vec<i64> = series
        .samples
        .iter()
        .filter(|s| s.series.series() == TimeSeries::Wlp)
        .map(|s| (s.event_date - at(0)).num_minutes())
        .collect();
    assert_eq!(wlp_minutes, vec![45, 60], "wlp fills 00:45 and 01:00");

    // Everything else is labelled wlo.
    for sample in &series.samples {
        let minute = (sample.event_date - at(0)).num_minutes();
        if !wlp_minutes.contains(&minute) {
            assert_eq!(sample.series.series(), TimeSeries::Wlo, "minute {minute}");
        }
    }

    // Original wlo values are untouched by the combination.
    for minute in (0..=30).chain(75..=120) {
        let sample = series
            .samples
            .iter()
            .find(|s| s.event_date == at(minute))
            .expect("wlo sample must survive");
        assert_eq!(sample.value, tide(minute));
    }

    // Output invariants: strictly monotonic, spans the request.
    assert!(series
        .samples
        .windows(2)
        .all(|w| w[0].event_date < w[1].event_date));
    assert_eq!(series.start, at(0));
    assert_eq!(series.end, at(120));
    assert_eq!(series.series_codes, vec![TimeSeries::Wlo, TimeSeries::Wlp]);
}

#[test]
fn test_interpolation_takes_precedence_when_gap_is_under_threshold() {
    // Same series layout, but the 45-minute hole is below the 3-hour
    // interpolation threshold: it must be interpolated from wlo itself,
    // and wlp stays out entirely.
    let mut wlo: Vec<i64> = (0..=30).collect();
    wlo.extend(75..=120);
    let source = FixtureSource::new()
        .with_series("station", TimeSeries::Wlo, minutes(wlo))
        .with_series("station", TimeSeries::Wlp, minutes((0..=8).map(|k| k * 15)));

    let options = ReconcileOptions {
        max_time_gap: Some(Duration::minutes(10)),
        threshold_interpolation_filling: Some(Duration::hours(3)),
        wlo_qc_flag_filter: Vec::new(),
        buffer_time: None,
    };

    let priority = [TimeSeries::Wlo, TimeSeries::Wlp];
    let series = reconcile(&source, "station", at(0), at(120), &priority, &options).unwrap();

    assert!(
        series
            .samples
            .iter()
            .any(|s| matches!(s.series, SeriesLabel::Interpolated(TimeSeries::Wlo))),
        "the hole must carry interpolated wlo samples"
    );
    assert!(
        series
            .samples
            .iter()
            .all(|s| s.series.series() != TimeSeries::Wlp),
        "wlp must not contribute when interpolation repairs the gap"
    );
}

// ---------------------------------------------------------------------------
// Interpolation path
// ---------------------------------------------------------------------------

#[test]
fn test_short_gap_resamples_on_grid_with_interpolated_labels() {
    // 1-minute sampling over two hours with a 10-minute hole centred on
    // 01:00; 2-minute tolerated gap, 1-hour threshold.
    let mut present: Vec<i64> = (0..=55).collect();
    present.extend(65..=120);
    let source =
        FixtureSource::new().with_series("station", TimeSeries::Wlo, minutes(present));

    let options = ReconcileOptions {
        max_time_gap: Some(Duration::minutes(2)),
        threshold_interpolation_filling: Some(Duration::hours(1)),
        wlo_qc_flag_filter: Vec::new(),
        buffer_time: None,
    };

    let series = reconcile(
        &source,
        "station",
        at(0),
        at(120),
        &[TimeSeries::Wlo],
        &options,
    )
    .unwrap();

    let inserted: Vec<(i64, f64)> = series
        .samples
        .iter()
        .filter(|s| matches!(s.series, SeriesLabel::Interpolated(_)))
        .map(|s| ((s.event_date - at(0)).num_minutes(), s.value))
        .collect();

    // Resampled points land on 2-minute multiples inside the hole.
    let grid: Vec<i64> = inserted.iter().map(|(m, _)| *m).collect();
    assert_eq!(grid, vec![56, 58, 60, 62, 64]);

    for sample in series
        .samples
        .iter()
        .filter(|s| matches!(s.series, SeriesLabel::Interpolated(_)))
    {
        assert_eq!(sample.series.to_string(), "wlo-interpolated");
    }

    // Continuity: no resample escapes the envelope of the flanking
    // observations (±5% for spline overshoot).
    let flank: Vec<f64> = (48..=55).chain(65..=72).map(tide).collect();
    let low = flank.iter().copied().fold(f64::INFINITY, f64::min);
    let high = flank.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let margin = 0.05 * (high - low).abs().max(high.abs());
    for (minute, value) in &inserted {
        assert!(
            *value >= low - margin && *value <= high + margin,
            "minute {minute}: {value} outside [{low}, {high}] ± {margin}"
        );
    }
}

// ---------------------------------------------------------------------------
// Classification and failure isolation
// ---------------------------------------------------------------------------

#[test]
fn test_gap_classes_partition_all_gaps() {
    let samples: Vec<WaterLevelSample> = [0i64, 2, 4, 20, 22, 300, 302]
        .iter()
        .map(|m| WaterLevelSample::new(at(*m), tide(*m), SeriesLabel::Observed(TimeSeries::Wlo)))
        .collect();

    let analysis = identify_gaps(&samples, Duration::minutes(5), Some(Duration::hours(1)));

    assert_eq!(analysis.all.len(), 2);
    let mut union = analysis.to_interpolate.clone();
    union.extend(analysis.to_fill.iter().copied());
    union.sort_by_key(|gap| gap.start);
    assert_eq!(union, analysis.all, "interpolate ∪ fill must equal all gaps");

    // Disjoint by construction of the threshold comparison.
    for gap in &analysis.to_interpolate {
        assert!(!analysis.to_fill.contains(gap));
    }
}

#[test]
fn test_station_failure_never_aborts_the_others() {
    let source = Arc::new(
        FixtureSource::new().with_series("alive", TimeSeries::Wlo, minutes(0..=60)),
    );

    let unit = |id: &str| WorkUnit {
        station_id: id.to_string(),
        t_min: at(0),
        t_max: at(60),
        time_series: vec![TimeSeries::Wlo, TimeSeries::Wlp],
    };

    let options = ReconcileOptions {
        max_time_gap: Some(Duration::minutes(10)),
        threshold_interpolation_filling: None,
        wlo_qc_flag_filter: Vec::new(),
        buffer_time: None,
    };

    let (series, errors) =
        reconcile_for_stations(source, &[unit("alive"), unit("silent")], &options);

    assert!(series.contains_key("alive"), "healthy station must survive");
    assert_eq!(series.len(), 1);
    assert!(
        matches!(
            errors.get("silent"),
            Some(ReconcileError::NoWaterLevelData { .. })
        ),
        "silent station lands in the error map: {errors:?}"
    );
}
