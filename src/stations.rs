/// Tide-gauge station handler.
///
/// Wraps the IWLS client and owns the profile-specific decoding: the
/// public API embeds each station's time-series list in its payload and
/// dates events with ISO-8601 strings, while the private flavours expose
/// a per-station listing route (where only `active` series count) and
/// epoch-millisecond event dates. Everything downstream sees one
/// `Station` shape and one `WaterLevelSource` capability.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use geo::{HaversineDistance, Point};
use log::{debug, warn};
use threadpool::ThreadPool;

use crate::iwls::api::{default_block, validate_coordinates, ApiParameterError};
use crate::iwls::cache::TtlCache;
use crate::iwls::IwlsApi;
use crate::model::{SeriesLabel, TimeSeries, WaterLevelSample};

/// Tidal-flag lookups stay cached for a day.
const TIDAL_INFO_TTL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Concurrent per-station metadata fetches.
const METADATA_POOL_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum StationsError {
    #[error("failed to retrieve station listing (status {status_code}): {message} {errors:?}")]
    Listing {
        status_code: u16,
        message: String,
        errors: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Station model
// ---------------------------------------------------------------------------

/// Metadata for a single tide-gauge station.
#[derive(Debug, Clone)]
pub struct Station {
    /// 24-character opaque station id.
    pub id: String,
    /// Short human code (e.g. "03248").
    pub code: String,
    /// Official station name.
    pub name: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    /// Available series, ordered by the configured priority.
    pub time_series: Vec<TimeSeries>,
    /// Whether the station is tidal; `None` when metadata was unavailable.
    pub is_tidal: Option<bool>,
}

impl Station {
    pub fn position(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// The closest station to a position, by great-circle distance.
pub fn closest_station<'a>(
    stations: &'a [Station],
    latitude: f64,
    longitude: f64,
) -> Result<Option<&'a Station>, ApiParameterError> {
    validate_coordinates(latitude, longitude)?;
    let here = Point::new(longitude, latitude);

    Ok(stations.iter().min_by(|a, b| {
        a.position()
            .haversine_distance(&here)
            .total_cmp(&b.position().haversine_distance(&here))
    }))
}

// ---------------------------------------------------------------------------
// Water-level source capability
// ---------------------------------------------------------------------------

/// What the reconciler needs from the outside world. The stations handler
/// is the production implementation; tests substitute in-memory sources.
pub trait WaterLevelSource: Send + Sync {
    /// (longitude, latitude) of a station, when known.
    fn station_position(&self, station_id: &str) -> Option<(f64, f64)>;

    /// Samples of one series over [from, to], sorted by event date.
    /// Remote failures read as an empty series (logged, never raised).
    fn time_series_samples(
        &self,
        station_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        code: TimeSeries,
        wlo_qc_flag_filter: &[String],
    ) -> Vec<WaterLevelSample>;
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StationsHandler {
    api: IwlsApi,
    tidal_cache: Arc<TtlCache<String, Option<bool>>>,
}

impl StationsHandler {
    pub fn new(api: IwlsApi) -> StationsHandler {
        StationsHandler {
            api,
            tidal_cache: Arc::new(TtlCache::new(TIDAL_INFO_TTL)),
        }
    }

    pub fn api(&self) -> &IwlsApi {
        &self.api
    }

    fn is_private(&self) -> bool {
        self.api.endpoint().kind.is_private()
    }

    fn raw_stations(&self) -> Result<Vec<serde_json::Value>, StationsError> {
        let response = self.api.get_all_stations();
        if !response.is_ok() {
            return Err(StationsError::Listing {
                status_code: response.status_code,
                message: response
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
                errors: response.errors,
            });
        }
        Ok(response.data_array().to_vec())
    }

    /// Series advertised by one station payload, with their active flag.
    /// The public listing embeds them; private flavours need the listing
    /// route (whose response marks inactive series).
    fn station_series(&self, station: &serde_json::Value) -> Vec<(TimeSeries, bool)> {
        let embedded = station.get("timeSeries").and_then(|v| v.as_array());

        let listing: Vec<serde_json::Value> = match embedded {
            Some(items) => items.clone(),
            None if self.is_private() => {
                let id = station.get("id").and_then(|v| v.as_str()).unwrap_or("");
                match self.api.get_station_time_series(id) {
                    Ok(response) if response.is_ok() => response.data_array().to_vec(),
                    _ => Vec::new(),
                }
            }
            None => Vec::new(),
        };

        listing
            .iter()
            .filter_map(|item| {
                let code = item.get("code").and_then(|v| v.as_str())?;
                let active = item.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
                TimeSeries::from_code(code).ok().map(|ts| (ts, active))
            })
            .collect()
    }

    fn decode_station(
        &self,
        station: &serde_json::Value,
        time_series: Vec<TimeSeries>,
    ) -> Option<Station> {
        let id = station.get("id").and_then(|v| v.as_str())?;
        let code = station.get("code").and_then(|v| v.as_str())?;
        let name = station
            .get("officialName")
            .or_else(|| station.get("name"))
            .and_then(|v| v.as_str())?;
        let latitude = station.get("latitude").and_then(|v| v.as_f64())?;
        let longitude = station.get("longitude").and_then(|v| v.as_f64())?;

        Some(Station {
            id: id.to_string(),
            code: code.to_string(),
            name: name.replace('/', "-"),
            latitude,
            longitude,
            time_series,
            is_tidal: None,
        })
    }

    /// Stations filtered by advertised series and exclusion set.
    ///
    /// `filter_time_series` keeps stations advertising at least one of
    /// the listed series (active ones on private flavours) and orders
    /// each station's series by the list. An empty filter and an empty
    /// exclusion set both mean "no filtering".
    pub fn stations(
        &self,
        filter_time_series: &[TimeSeries],
        excluded_stations: &[String],
    ) -> Result<Vec<Station>, StationsError> {
        let raw = self.raw_stations()?;
        debug!("{} stations in the listing", raw.len());

        let mut stations = Vec::new();
        let mut undecodable = 0usize;

        for payload in &raw {
            let id = payload.get("id").and_then(|v| v.as_str()).unwrap_or("");
            if excluded_stations.iter().any(|e| e == id) {
                continue;
            }

            let series = self.station_series(payload);

            let selected: Vec<TimeSeries> = if filter_time_series.is_empty() {
                series.iter().map(|(ts, _)| *ts).collect()
            } else {
                let mut selected: Vec<TimeSeries> = series
                    .iter()
                    .filter(|(ts, active)| *active && filter_time_series.contains(ts))
                    .map(|(ts, _)| *ts)
                    .collect();
                if selected.is_empty() {
                    continue;
                }
                selected.sort_by_key(|ts| {
                    filter_time_series
                        .iter()
                        .position(|p| p == ts)
                        .unwrap_or(usize::MAX)
                });
                selected.dedup();
                selected
            };

            match self.decode_station(payload, selected) {
                Some(station) => stations.push(station),
                None => undecodable += 1,
            }
        }

        if undecodable > 0 {
            warn!("{undecodable} stations with incomplete attributes were skipped");
        }

        self.attach_tidal_info(&mut stations);

        Ok(stations)
    }

    /// Fetches the tidal flag for every station on a bounded pool, going
    /// through the day-long cache.
    fn attach_tidal_info(&self, stations: &mut [Station]) {
        if stations.is_empty() {
            return;
        }

        let pool = ThreadPool::new(stations.len().min(METADATA_POOL_SIZE));
        let (tx, rx) = mpsc::channel();

        for (index, station) in stations.iter().enumerate() {
            let handler = self.clone();
            let id = station.id.clone();
            let tx = tx.clone();
            pool.execute(move || {
                let flag = handler.tidal_flag(&id);
                let _ = tx.send((index, flag));
            });
        }
        drop(tx);

        for (index, flag) in rx {
            stations[index].is_tidal = flag;
        }
    }

    fn tidal_flag(&self, station_id: &str) -> Option<bool> {
        let key = station_id.to_string();
        if let Some(cached) = self.tidal_cache.get(&key) {
            return cached;
        }

        let flag = match self.api.get_metadata_station(station_id) {
            Ok(response) if response.is_ok() => {
                let column = if self.is_private() { "tidal" } else { "isTidal" };
                response
                    .data
                    .as_ref()
                    .and_then(|data| data.get(column))
                    .and_then(|v| v.as_bool())
            }
            _ => None,
        };

        self.tidal_cache.insert(key, flag);
        flag
    }

    fn decode_sample(
        &self,
        item: &serde_json::Value,
        code: TimeSeries,
    ) -> Option<WaterLevelSample> {
        let event_date = if self.is_private() {
            let epoch = item.get("eventDateEpoch").and_then(|v| v.as_i64())?;
            DateTime::from_timestamp_millis(epoch)?
        } else {
            let iso = item.get("eventDate").and_then(|v| v.as_str())?;
            DateTime::parse_from_rfc3339(iso).ok()?.with_timezone(&Utc)
        };

        let qc_key = if self.is_private() { "qcFlag" } else { "qcFlagCode" };

        Some(WaterLevelSample {
            event_date,
            value: item.get("value").and_then(|v| v.as_f64()),
            series: Some(SeriesLabel::Observed(code)),
            qc_flag: item
                .get(qc_key)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

impl WaterLevelSource for StationsHandler {
    fn station_position(&self, station_id: &str) -> Option<(f64, f64)> {
        let stations = self.api.get_all_stations();
        stations.data_array().iter().find_map(|payload| {
            let id = payload.get("id").and_then(|v| v.as_str())?;
            if id != station_id {
                return None;
            }
            let latitude = payload.get("latitude").and_then(|v| v.as_f64())?;
            let longitude = payload.get("longitude").and_then(|v| v.as_f64())?;
            Some((longitude, latitude))
        })
    }

    fn time_series_samples(
        &self,
        station_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        code: TimeSeries,
        wlo_qc_flag_filter: &[String],
    ) -> Vec<WaterLevelSample> {
        let response =
            match self
                .api
                .get_time_serie_block_data(station_id, from, to, code, default_block(), true)
            {
                Ok(response) => response,
                Err(error) => {
                    warn!("invalid request for station '{station_id}': {error}");
                    return Vec::new();
                }
            };

        if !response.is_ok() {
            warn!(
                "status {}: failed to retrieve {code} for station '{station_id}': {:?}",
                response.status_code, response.errors
            );
            // A partial block (400) still carries usable samples.
            if response.data_array().is_empty() {
                return Vec::new();
            }
        }

        let mut samples: Vec<WaterLevelSample> = response
            .data_array()
            .iter()
            .filter_map(|item| self.decode_sample(item, code))
            .collect();

        if code == TimeSeries::Wlo && !wlo_qc_flag_filter.is_empty() {
            samples.retain(|sample| {
                sample
                    .qc_flag
                    .as_ref()
                    .is_none_or(|flag| !wlo_qc_flag_filter.contains(flag))
            });
        }

        samples
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, latitude: f64, longitude: f64) -> Station {
        Station {
            id: id.to_string(),
            code: id.to_string(),
            name: format!("Station {id}"),
            latitude,
            longitude,
            time_series: vec![TimeSeries::Wlo],
            is_tidal: Some(true),
        }
    }

    #[test]
    fn test_closest_station_by_great_circle() {
        let stations = vec![
            station("a", 48.0, -69.0),
            station("b", 49.0, -68.0),
            station("c", 60.0, -135.0),
        ];

        let closest = closest_station(&stations, 48.1, -68.9).unwrap().unwrap();
        assert_eq!(closest.id, "a");
    }

    #[test]
    fn test_closest_station_rejects_bad_coordinates() {
        let stations = vec![station("a", 48.0, -69.0)];
        assert!(closest_station(&stations, 95.0, 0.0).is_err());
    }

    #[test]
    fn test_closest_station_empty_set() {
        assert!(closest_station(&[], 48.0, -69.0).unwrap().is_none());
    }

    #[test]
    fn test_station_position_point_is_lon_lat() {
        let s = station("a", 48.0, -69.0);
        let p = s.position();
        assert_eq!(p.x(), -69.0);
        assert_eq!(p.y(), 48.0);
    }
}
