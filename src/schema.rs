/// Stage-boundary schema validation.
///
/// Every pipeline stage validates its input and output against the
/// invariants of the schema it consumes or produces. A violation is a
/// programmer error (a stage emitted data it never should have) and is
/// fatal: `SchemaViolationError` names the stage and the offending fields.

use chrono::Utc;

use crate::model::{ReconciledSeries, Sounding};

#[derive(Debug, Clone, thiserror::Error)]
#[error("schema violation in stage '{stage}': invalid fields {fields:?} ({row_count} offending rows)")]
pub struct SchemaViolationError {
    pub stage: &'static str,
    pub fields: Vec<&'static str>,
    pub row_count: usize,
}

fn check(
    stage: &'static str,
    violations: Vec<(&'static str, usize)>,
) -> Result<(), SchemaViolationError> {
    let offending: Vec<(&'static str, usize)> =
        violations.into_iter().filter(|(_, n)| *n > 0).collect();

    if offending.is_empty() {
        return Ok(());
    }

    let row_count = offending.iter().map(|(_, n)| n).max().copied().unwrap_or(0);
    Err(SchemaViolationError {
        stage,
        fields: offending.into_iter().map(|(f, _)| f).collect(),
        row_count,
    })
}

/// Parser output: finite coordinates in range, positive depths, no
/// timestamps from the future, non-negative speeds where present.
pub fn validate_raw(stage: &'static str, soundings: &[Sounding]) -> Result<(), SchemaViolationError> {
    let now = Utc::now();

    let bad_lat = soundings
        .iter()
        .filter(|s| !s.latitude.is_finite() || s.latitude < -90.0 || s.latitude > 90.0)
        .count();
    let bad_lon = soundings
        .iter()
        .filter(|s| !s.longitude.is_finite() || s.longitude < -180.0 || s.longitude > 180.0)
        .count();
    let bad_depth = soundings
        .iter()
        .filter(|s| !s.depth_raw_m.is_finite() || s.depth_raw_m <= 0.0)
        .count();
    let bad_time = soundings.iter().filter(|s| s.time_utc > now).count();
    let bad_speed = soundings
        .iter()
        .filter(|s| s.speed_kn.is_some_and(|v| !v.is_finite() || v < 0.0))
        .count();

    check(
        stage,
        vec![
            ("latitude", bad_lat),
            ("longitude", bad_lon),
            ("depth_raw_m", bad_depth),
            ("time_utc", bad_time),
            ("speed_kn", bad_speed),
        ],
    )
}

/// Parser output ordering invariant: sorted by time, no exact duplicates
/// on the (time, lat, lon, depth) key.
pub fn validate_sorted_unique(
    stage: &'static str,
    soundings: &[Sounding],
) -> Result<(), SchemaViolationError> {
    let unsorted = soundings
        .windows(2)
        .filter(|w| w[0].time_utc > w[1].time_utc)
        .count();
    let duplicated = soundings
        .windows(2)
        .filter(|w| {
            w[0].time_utc == w[1].time_utc
                && w[0].latitude == w[1].latitude
                && w[0].longitude == w[1].longitude
                && w[0].depth_raw_m == w[1].depth_raw_m
        })
        .count();

    check(stage, vec![("time_utc", unsorted), ("dedup_key", duplicated)])
}

/// Reconciler output: samples strictly monotonic in event date, every
/// value finite, and the series spanning its declared [start, end].
pub fn validate_reconciled(
    stage: &'static str,
    series: &ReconciledSeries,
) -> Result<(), SchemaViolationError> {
    let non_monotonic = series
        .samples
        .windows(2)
        .filter(|w| w[0].event_date >= w[1].event_date)
        .count();
    let non_finite = series
        .samples
        .iter()
        .filter(|s| !s.value.is_finite())
        .count();
    let span_violations = series
        .samples
        .iter()
        .filter(|s| s.event_date < series.start || s.event_date > series.end)
        .count();

    check(
        stage,
        vec![
            ("event_date", non_monotonic),
            ("value", non_finite),
            ("interval_span", span_violations),
        ],
    )
}

/// Processed output: every reduced sounding carries the full reduction
/// record (water level info and a finite processed depth).
pub fn validate_processed(
    stage: &'static str,
    soundings: &[Sounding],
) -> Result<(), SchemaViolationError> {
    let incomplete = soundings
        .iter()
        .filter(|s| s.depth_processed_m.is_some() != s.water_level.is_some())
        .count();
    let non_finite = soundings
        .iter()
        .filter(|s| s.depth_processed_m.is_some_and(|d| !d.is_finite()))
        .count();

    check(
        stage,
        vec![
            ("water_level", incomplete),
            ("depth_processed_m", non_finite),
        ],
    )
}
