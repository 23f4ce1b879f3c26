/// Water-level reconciliation.
///
/// For one station and interval, walks the prioritized list of series and
/// produces a single continuous water-level record: the preferred series
/// where it has data, cubic-spline resamples across its short gaps, and
/// splices from lower-priority series across the long ones. The combined
/// record never overwrites a sample a higher-priority series already
/// provided.
///
/// Interpolation needs every fit value present; when the requested window
/// cut a series short, the attempt fails with `InterpolationValue` and is
/// retried with a doubled context buffer (see `retry`). A series that
/// keeps failing is excluded from interpolation and only fills.

pub mod retry;
pub mod spline;

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use threadpool::ThreadPool;

use crate::config::TimeSeriesConfig;
use crate::model::{
    ReconciledSample, ReconciledSeries, SeriesLabel, TimeSeries, WaterLevelSample,
};
use crate::stations::WaterLevelSource;
use crate::zones::WorkUnit;
use self::retry::RetryState;
use self::spline::CubicSpline;

/// Concurrent reconciliations across work units.
const RECONCILE_POOL_SIZE: usize = 10;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    #[error("no water level data for station '{station_id}' from {from} to {to}")]
    NoWaterLevelData {
        station_id: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    #[error("cannot interpolate values from {from} to {to} for series '{series}'; values are missing")]
    InterpolationValue {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        series: TimeSeries,
    },
}

/// Reconciliation knobs, lifted from `IWLS.API.TimeSeries` configuration.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Largest tolerated sampling gap; `None` disables gap repair.
    pub max_time_gap: Option<Duration>,
    /// Gaps shorter than this interpolate, longer ones fill; `None` means
    /// fill only.
    pub threshold_interpolation_filling: Option<Duration>,
    pub wlo_qc_flag_filter: Vec<String>,
    pub buffer_time: Option<Duration>,
}

impl From<&TimeSeriesConfig> for ReconcileOptions {
    fn from(config: &TimeSeriesConfig) -> Self {
        ReconcileOptions {
            max_time_gap: config.max_time_gap,
            threshold_interpolation_filling: config.threshold_interpolation_filling,
            wlo_qc_flag_filter: config.wlo_qc_flag_filter.clone(),
            buffer_time: config.buffer_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Gap analysis
// ---------------------------------------------------------------------------

/// A sampling hole: no values strictly between `start` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Gap {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains_strict(&self, time: DateTime<Utc>) -> bool {
        time > self.start && time < self.end
    }
}

#[derive(Debug, Clone, Default)]
pub struct GapAnalysis {
    pub all: Vec<Gap>,
    pub to_interpolate: Vec<Gap>,
    pub to_fill: Vec<Gap>,
}

/// Finds sampling holes longer than `max_time_gap` and classifies each
/// against the interpolation threshold (`None` sends everything to fill).
///
/// Null-valued edge rows participate in the walk: a series that does not
/// reach the requested bounds shows its uncovered edges as gaps.
pub fn identify_gaps(
    samples: &[WaterLevelSample],
    max_time_gap: Duration,
    threshold_interpolation_filling: Option<Duration>,
) -> GapAnalysis {
    if samples.is_empty() {
        return GapAnalysis::default();
    }

    let coverage: Vec<&WaterLevelSample> = samples
        .iter()
        .enumerate()
        .filter(|(index, sample)| {
            sample.value.is_some() || *index == 0 || *index == samples.len() - 1
        })
        .map(|(_, sample)| sample)
        .collect();

    let mut analysis = GapAnalysis::default();

    for pair in coverage.windows(2) {
        let delta = pair[1].event_date - pair[0].event_date;
        if delta <= max_time_gap {
            continue;
        }
        let gap = Gap {
            start: pair[0].event_date,
            end: pair[1].event_date,
        };
        analysis.all.push(gap);

        match threshold_interpolation_filling {
            None => analysis.to_fill.push(gap),
            Some(threshold) if gap.duration() < threshold => analysis.to_interpolate.push(gap),
            Some(_) => analysis.to_fill.push(gap),
        }
    }

    if !analysis.all.is_empty() {
        let total_minutes: i64 = analysis.all.iter().map(|g| g.duration().num_minutes()).sum();
        debug!(
            "{} gaps over {max_time_gap} ({total_minutes} minutes missing)",
            analysis.all.len()
        );
    }

    analysis
}

// ---------------------------------------------------------------------------
// Per-series fetch
// ---------------------------------------------------------------------------

/// Retrieves one series over [from − buffer, to + buffer], drops nulls,
/// and pads null markers onto edges the data does not reach. `None` when
/// the source has nothing at all for this series.
pub fn fetch_series(
    source: &dyn WaterLevelSource,
    station_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    code: TimeSeries,
    buffer_time: Option<Duration>,
    wlo_qc_flag_filter: &[String],
) -> Option<Vec<WaterLevelSample>> {
    let from_buffered = buffer_time.map_or(from, |buffer| from - buffer);
    let to_buffered = buffer_time.map_or(to, |buffer| to + buffer);

    let mut samples = source.time_series_samples(
        station_id,
        from_buffered,
        to_buffered,
        code,
        wlo_qc_flag_filter,
    );

    samples.retain(|sample| sample.value.is_some());
    if samples.is_empty() {
        return None;
    }
    samples.sort_by_key(|sample| sample.event_date);

    if samples.first().map(|s| s.event_date) > Some(from) {
        debug!("padding a null marker at {from} for {code}");
        samples.insert(0, WaterLevelSample::empty_at(from));
    }
    if samples.last().map(|s| s.event_date) < Some(to) {
        debug!("padding a null marker at {to} for {code}");
        samples.push(WaterLevelSample::empty_at(to));
    }

    Some(samples)
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

fn epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

/// Resamples the interpolate-gaps onto a uniform grid (period =
/// `max_time_gap`, anchored at the series start) with values from a
/// cubic spline fitted over the whole series.
///
/// The fit needs every value present: a null anywhere (typically an
/// uncovered edge) raises `InterpolationValue` so the retry machinery
/// can widen the request.
pub fn interpolate_gaps(
    mut samples: Vec<WaterLevelSample>,
    gaps: &[Gap],
    max_time_gap: Duration,
) -> Result<Vec<WaterLevelSample>, ReconcileError> {
    if gaps.is_empty() {
        return Ok(samples);
    }

    let Some(code) = samples.iter().find_map(|s| s.series.map(|l| l.series())) else {
        return Ok(samples);
    };

    let first = samples.first().expect("non-empty series").event_date;
    let last = samples.last().expect("non-empty series").event_date;

    if samples.iter().any(|s| s.value.is_none()) {
        warn!(
            "cubic spline interpolation needs complete values; missing data between {first} and {last} for {code}"
        );
        return Err(ReconcileError::InterpolationValue {
            from: first,
            to: last,
            series: code,
        });
    }

    let xs: Vec<f64> = samples.iter().map(|s| epoch_seconds(s.event_date)).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.value.expect("checked above")).collect();

    let Some(fitted) = CubicSpline::fit(&xs, &ys) else {
        return Err(ReconcileError::InterpolationValue {
            from: first,
            to: last,
            series: code,
        });
    };

    debug!("interpolating {} gaps for {code} on a {max_time_gap} grid", gaps.len());

    let mut resampled = Vec::new();
    let mut grid = first + max_time_gap;
    while grid < last {
        if gaps.iter().any(|gap| gap.contains_strict(grid)) {
            resampled.push(WaterLevelSample {
                event_date: grid,
                value: Some(fitted.evaluate(epoch_seconds(grid))),
                series: Some(SeriesLabel::Interpolated(code)),
                qc_flag: None,
            });
        }
        grid += max_time_gap;
    }

    samples.extend(resampled);
    samples.sort_by_key(|s| s.event_date);

    Ok(samples)
}

// ---------------------------------------------------------------------------
// Combination
// ---------------------------------------------------------------------------

/// Splices `series` samples lying strictly inside the fill-gaps into the
/// combined record. On a timestamp collision the combined (higher
/// priority) value wins unless it is a null marker.
pub fn combine(
    combined: Vec<WaterLevelSample>,
    series: Vec<WaterLevelSample>,
    fill_gaps: &[Gap],
) -> Vec<WaterLevelSample> {
    if combined.is_empty() {
        return series;
    }

    let mut merged = combined;

    let fillers: Vec<WaterLevelSample> = series
        .iter()
        .filter(|sample| {
            sample.value.is_some()
                && fill_gaps.iter().any(|gap| gap.contains_strict(sample.event_date))
        })
        .cloned()
        .collect();

    if !fillers.is_empty() {
        debug!("filling {} samples from a lower-priority series", fillers.len());
    }

    for filler in fillers {
        match merged.iter_mut().find(|s| s.event_date == filler.event_date) {
            Some(existing) if existing.value.is_none() => *existing = filler,
            Some(_) => {}
            None => merged.push(filler),
        }
    }

    // Null markers outside the gaps resolve too when the lower-priority
    // series sampled that exact instant.
    for marker in merged.iter_mut().filter(|s| s.value.is_none()) {
        if let Some(donor) = series
            .iter()
            .find(|s| s.event_date == marker.event_date && s.value.is_some())
        {
            *marker = donor.clone();
        }
    }

    merged.sort_by_key(|s| s.event_date);
    merged
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

fn reconcile_once(
    source: &dyn WaterLevelSource,
    station_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    priority: &[TimeSeries],
    options: &ReconcileOptions,
    state: &RetryState,
) -> Result<Vec<WaterLevelSample>, ReconcileError> {
    let mut combined: Vec<WaterLevelSample> = Vec::new();

    for code in priority {
        let Some(series) = fetch_series(
            source,
            station_id,
            from,
            to,
            *code,
            state.buffer_time,
            &options.wlo_qc_flag_filter,
        ) else {
            debug!("no {code} data for station '{station_id}' from {from} to {to}");
            continue;
        };

        let Some(max_time_gap) = options.max_time_gap else {
            debug!("gap repair disabled; keeping the first available series for '{station_id}'");
            return Ok(series);
        };

        let threshold = state.threshold_for(*code, options.threshold_interpolation_filling);

        let target = if combined.is_empty() { &series } else { &combined };
        let gaps = identify_gaps(target, max_time_gap, threshold);

        if gaps.all.is_empty() {
            if combined.is_empty() {
                combined = series;
            }
            break;
        }

        let series = interpolate_gaps(series, &gaps.to_interpolate, max_time_gap)?;
        combined = combine(combined, series, &gaps.to_fill);
    }

    Ok(combined)
}

fn finalize(
    source: &dyn WaterLevelSource,
    station_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    priority: &[TimeSeries],
    samples: Vec<WaterLevelSample>,
) -> Result<ReconciledSeries, ReconcileError> {
    let mut resolved: Vec<ReconciledSample> = samples
        .into_iter()
        .filter_map(|sample| {
            Some(ReconciledSample {
                event_date: sample.event_date,
                value: sample.value?,
                series: sample.series?,
            })
        })
        .collect();

    if resolved.is_empty() {
        warn!("no water level data retrieved for station '{station_id}'");
        return Err(ReconcileError::NoWaterLevelData {
            station_id: station_id.to_string(),
            from,
            to,
        });
    }

    resolved.sort_by_key(|s| s.event_date);
    resolved.dedup_by_key(|s| s.event_date);

    let mut series_codes: Vec<TimeSeries> = Vec::new();
    for code in priority {
        if resolved.iter().any(|s| s.series.series() == *code) {
            series_codes.push(*code);
        }
    }

    Ok(ReconciledSeries {
        station_id: station_id.to_string(),
        position: source.station_position(station_id),
        start: resolved.first().expect("non-empty").event_date,
        end: resolved.last().expect("non-empty").event_date,
        series_codes,
        samples: resolved,
    })
}

/// Reconciles one station over one interval, retrying interpolation
/// failures with a widening buffer and eventually excluding series that
/// cannot be interpolated.
pub fn reconcile(
    source: &dyn WaterLevelSource,
    station_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    priority: &[TimeSeries],
    options: &ReconcileOptions,
) -> Result<ReconciledSeries, ReconcileError> {
    let mut state = RetryState::new(options.buffer_time);

    // Every failure either burns an attempt or excludes a series, so the
    // round count is bounded; the cap is a backstop, not a policy.
    let max_rounds = (priority.len() as u32 + 1) * retry::MAX_INTERPOLATION_ATTEMPTS + 1;
    let mut last_error = None;

    for _ in 0..max_rounds {
        match reconcile_once(source, station_id, from, to, priority, options, &state) {
            Ok(samples) => return finalize(source, station_id, from, to, priority, samples),
            Err(ReconcileError::InterpolationValue { from, to, series }) => {
                warn!(
                    "interpolation failed for '{station_id}' ({series}, {from} to {to}); retrying with a larger buffer"
                );
                state = state.after_interpolation_failure(series);
                last_error = Some(ReconcileError::InterpolationValue { from, to, series });
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_error.unwrap_or(ReconcileError::NoWaterLevelData {
        station_id: station_id.to_string(),
        from,
        to,
    }))
}

/// Merges series reconciled from different work units of one station.
fn merge_series(mut existing: ReconciledSeries, other: ReconciledSeries) -> ReconciledSeries {
    existing.samples.extend(other.samples);
    existing.samples.sort_by_key(|s| s.event_date);
    existing.samples.dedup_by_key(|s| s.event_date);

    for code in other.series_codes {
        if !existing.series_codes.contains(&code) {
            existing.series_codes.push(code);
        }
    }

    existing.start = existing.start.min(other.start);
    existing.end = existing.end.max(other.end);
    existing.position = existing.position.or(other.position);
    existing
}

/// Runs the reconciler across work units on a bounded pool. One station's
/// failure never aborts the others: errors land in the second map.
pub fn reconcile_for_stations(
    source: Arc<dyn WaterLevelSource>,
    units: &[WorkUnit],
    options: &ReconcileOptions,
) -> (
    BTreeMap<String, ReconciledSeries>,
    BTreeMap<String, ReconcileError>,
) {
    let mut series_by_station = BTreeMap::new();
    let mut errors = BTreeMap::new();

    if units.is_empty() {
        return (series_by_station, errors);
    }

    let pool = ThreadPool::new(units.len().min(RECONCILE_POOL_SIZE));
    let (tx, rx) = mpsc::channel();

    for unit in units.iter().cloned() {
        let source = Arc::clone(&source);
        let options = options.clone();
        let tx = tx.clone();
        pool.execute(move || {
            info!(
                "retrieving water levels for station '{}' from {} to {} with series {:?}",
                unit.station_id, unit.t_min, unit.t_max, unit.time_series
            );
            let result = reconcile(
                source.as_ref(),
                &unit.station_id,
                unit.t_min,
                unit.t_max,
                &unit.time_series,
                &options,
            );
            let _ = tx.send((unit.station_id, result));
        });
    }
    drop(tx);

    for (station_id, result) in rx {
        match result {
            Ok(series) => match series_by_station.entry(station_id) {
                std::collections::btree_map::Entry::Occupied(mut entry) => {
                    let merged = merge_series(entry.get().clone(), series);
                    entry.insert(merged);
                }
                std::collections::btree_map::Entry::Vacant(entry) => {
                    entry.insert(series);
                }
            },
            Err(error) => {
                warn!("station '{station_id}' failed: {error}");
                errors.insert(station_id, error);
            }
        }
    }

    (series_by_station, errors)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
