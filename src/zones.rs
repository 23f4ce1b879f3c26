/// Tide-zone tessellation and sounding association.
///
/// Each tide-gauge station gets a Voronoi cell: the region of points
/// closer to it than to any other station, computed in plain WGS84
/// degrees (an accepted approximation for regional extents). Soundings
/// are joined to zones with a containment predicate, and each zone's
/// timeline is split into work units at large temporal gaps so water
/// levels are never requested across idle hours.
///
/// Cells are built by half-plane intersection: a cell starts from the
/// expanded bounding box of the station set and is clipped against the
/// perpendicular bisector toward every other station.

use chrono::{DateTime, Duration, Utc};
use geo::{Contains, Coord, LineString, Point, Polygon};
use log::{debug, info};

use crate::model::{Sounding, TideZoneRef, TimeSeries};
use crate::stations::{Station, StationsError, StationsHandler};

/// How far the seed rectangle extends past the station bounding box, in
/// degrees. Outer cells are unbounded in theory; this caps them well
/// beyond any sounding of regional interest.
const BOUNDS_MARGIN_DEG: f64 = 15.0;

/// Default temporal gap that starts a new work unit.
pub const DEFAULT_WORK_UNIT_GAP_MINUTES: i64 = 10;

/// Voronoi cell with the generating station's attributes.
#[derive(Debug, Clone)]
pub struct TideZone {
    pub id: String,
    pub code: String,
    pub name: String,
    /// Station series, ordered by the configured priority.
    pub time_series: Vec<TimeSeries>,
    pub polygon: Polygon<f64>,
}

impl TideZone {
    pub fn zone_ref(&self) -> TideZoneRef {
        TideZoneRef {
            id: self.id.clone(),
            code: self.code.clone(),
            name: self.name.clone(),
        }
    }
}

/// One reconciliation job: a station, a time interval, and the series
/// priority inherited from the zone.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub station_id: String,
    pub t_min: DateTime<Utc>,
    pub t_max: DateTime<Utc>,
    pub time_series: Vec<TimeSeries>,
}

// ---------------------------------------------------------------------------
// Tessellation
// ---------------------------------------------------------------------------

fn bounding_seed(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let min_x = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min) - BOUNDS_MARGIN_DEG;
    let max_x = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max) + BOUNDS_MARGIN_DEG;
    let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min) - BOUNDS_MARGIN_DEG;
    let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max) + BOUNDS_MARGIN_DEG;

    vec![
        (min_x, min_y),
        (max_x, min_y),
        (max_x, max_y),
        (min_x, max_y),
    ]
}

/// Signed margin of `p` for the half-plane of points at least as close to
/// `owner` as to `other` (non-negative inside).
fn bisector_margin(p: (f64, f64), owner: (f64, f64), other: (f64, f64)) -> f64 {
    let owner_sq = owner.0 * owner.0 + owner.1 * owner.1;
    let other_sq = other.0 * other.0 + other.1 * other.1;
    (other_sq - owner_sq) - 2.0 * ((other.0 - owner.0) * p.0 + (other.1 - owner.1) * p.1)
}

/// Sutherland–Hodgman clip of a convex polygon against one half-plane.
fn clip_half_plane(
    vertices: Vec<(f64, f64)>,
    owner: (f64, f64),
    other: (f64, f64),
) -> Vec<(f64, f64)> {
    let mut clipped = Vec::with_capacity(vertices.len() + 1);

    for i in 0..vertices.len() {
        let current = vertices[i];
        let next = vertices[(i + 1) % vertices.len()];
        let current_margin = bisector_margin(current, owner, other);
        let next_margin = bisector_margin(next, owner, other);

        if current_margin >= 0.0 {
            clipped.push(current);
            if next_margin < 0.0 {
                let t = current_margin / (current_margin - next_margin);
                clipped.push((
                    current.0 + t * (next.0 - current.0),
                    current.1 + t * (next.1 - current.1),
                ));
            }
        } else if next_margin >= 0.0 {
            let t = current_margin / (current_margin - next_margin);
            clipped.push((
                current.0 + t * (next.0 - current.0),
                current.1 + t * (next.1 - current.1),
            ));
        }
    }

    clipped
}

fn voronoi_cell(owner: (f64, f64), all: &[(f64, f64)], seed: &[(f64, f64)]) -> Polygon<f64> {
    let mut vertices = seed.to_vec();

    for &other in all {
        if other == owner {
            continue;
        }
        vertices = clip_half_plane(vertices, owner, other);
        if vertices.is_empty() {
            break;
        }
    }

    Polygon::new(
        LineString::from(
            vertices
                .into_iter()
                .map(|(x, y)| Coord { x, y })
                .collect::<Vec<_>>(),
        ),
        vec![],
    )
}

/// Builds one influence zone per station.
pub fn tessellate(stations: &[Station]) -> Vec<TideZone> {
    if stations.is_empty() {
        return Vec::new();
    }

    let points: Vec<(f64, f64)> = stations
        .iter()
        .map(|s| (s.longitude, s.latitude))
        .collect();
    let seed = bounding_seed(&points);

    let zones: Vec<TideZone> = stations
        .iter()
        .map(|station| TideZone {
            id: station.id.clone(),
            code: station.code.clone(),
            name: station.name.clone(),
            time_series: station.time_series.clone(),
            polygon: voronoi_cell((station.longitude, station.latitude), &points, &seed),
        })
        .collect();

    debug!("{} tide zones tessellated", zones.len());
    zones
}

/// Fetches the stations advertising at least one of the priority series
/// and tessellates their influence zones. An empty exclusion set means no
/// exclusion.
pub fn build_zones(
    handler: &StationsHandler,
    time_series_priority: &[TimeSeries],
    excluded_stations: &[String],
) -> Result<Vec<TideZone>, StationsError> {
    let stations = handler.stations(time_series_priority, excluded_stations)?;
    info!("{} stations selected for tessellation", stations.len());
    Ok(tessellate(&stations))
}

// ---------------------------------------------------------------------------
// Association and work units
// ---------------------------------------------------------------------------

/// Left spatial join: each sounding gets the zone containing it, or stays
/// unzoned when it falls outside every cell.
pub fn attach_zones(soundings: &mut [Sounding], zones: &[TideZone]) {
    let mut unmatched = 0usize;

    for sounding in soundings.iter_mut() {
        let point = Point::new(sounding.longitude, sounding.latitude);
        sounding.tide_zone = zones
            .iter()
            .find(|zone| zone.polygon.contains(&point))
            .map(|zone| zone.zone_ref());
        if sounding.tide_zone.is_none() {
            unmatched += 1;
        }
    }

    if unmatched > 0 {
        info!("{unmatched} soundings fall outside every tide zone");
    }
}

/// Splits each zone's soundings into work units wherever consecutive
/// samples are separated by more than `gap_threshold`.
pub fn make_work_units(
    soundings: &[Sounding],
    zones: &[TideZone],
    gap_threshold: Duration,
) -> Vec<WorkUnit> {
    let mut units = Vec::new();

    for zone in zones {
        let mut times: Vec<DateTime<Utc>> = soundings
            .iter()
            .filter(|s| s.tide_zone.as_ref().is_some_and(|z| z.id == zone.id))
            .map(|s| s.time_utc)
            .collect();
        if times.is_empty() {
            continue;
        }
        times.sort();

        let mut start = times[0];
        let mut previous = times[0];
        for &time in &times[1..] {
            if time - previous > gap_threshold {
                units.push(WorkUnit {
                    station_id: zone.id.clone(),
                    t_min: start,
                    t_max: previous,
                    time_series: zone.time_series.clone(),
                });
                start = time;
            }
            previous = time;
        }
        units.push(WorkUnit {
            station_id: zone.id.clone(),
            t_min: start,
            t_max: previous,
            time_series: zone.time_series.clone(),
        });
    }

    debug!("{} work units over {} zones", units.len(), zones.len());
    units
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
