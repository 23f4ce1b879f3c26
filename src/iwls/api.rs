/// Typed IWLS operations: station listings, metadata lookups and the
/// windowed time-series retrieval with concurrent aggregation.
///
/// Query parameters are validated before anything is sent: station ids
/// must be 24 characters and belong to the known station set, dates must
/// be strict `YYYY-MM-DDTHH:MM:SSZ`, and series codes are enum-checked by
/// construction. Validation failures are `ApiParameterError`s and fail
/// the request; remote failures come back inside the `Response`.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use log::{debug, warn};
use regex::Regex;
use threadpool::ThreadPool;

use super::cache::TtlCache;
use super::endpoint::Endpoint;
use super::handler::{QueryHandler, Response};
use crate::model::TimeSeries;

/// Concurrent window/code fetches per block request.
const FETCH_POOL_SIZE: usize = 10;

/// Metadata lookups stay cached for 20 minutes.
const METADATA_TTL: StdDuration = StdDuration::from_secs(20 * 60);

/// Default request window: most series cap one request at 7 days.
pub fn default_block() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiParameterError {
    #[error("station id must be 24 characters: '{0}'")]
    InvalidStationId(String),
    #[error("station id is not in the known station set: '{0}'")]
    UnknownStationId(String),
    #[error("date must be ISO 8601 UTC (ex: 2021-02-13T19:18:00Z): '{0}'")]
    InvalidDate(String),
    #[error("latitude must be within [-90, 90] and longitude within [-180, 180]: ({0}, {1})")]
    InvalidCoordinates(f64, f64),
}

// ---------------------------------------------------------------------------
// Date helpers
// ---------------------------------------------------------------------------

pub fn format_iso8601(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Strict parse of the API's query-date format.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, ApiParameterError> {
    validate_iso_date(value)?;
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
        .map(|naive| naive.and_utc())
        .map_err(|_| ApiParameterError::InvalidDate(value.to_string()))
}

pub fn validate_iso_date(value: &str) -> Result<(), ApiParameterError> {
    let pattern =
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z$").expect("static pattern");
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(ApiParameterError::InvalidDate(value.to_string()))
    }
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ApiParameterError> {
    if latitude.abs() <= 90.0 && longitude.abs() <= 180.0 {
        Ok(())
    } else {
        Err(ApiParameterError::InvalidCoordinates(latitude, longitude))
    }
}

/// Splits [from, to] into consecutive windows no longer than `delta`.
pub fn split_time(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    delta: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut current = from;
    while current < to {
        let end = (current + delta).min(to);
        windows.push((current, end));
        current = end;
    }
    windows
}

/// Event-date sort key accepting both API flavours (epoch milliseconds or
/// ISO-8601 string).
fn event_sort_key(item: &serde_json::Value) -> i64 {
    if let Some(epoch) = item.get("eventDateEpoch").and_then(|v| v.as_i64()) {
        return epoch;
    }
    item.get("eventDate")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct IwlsApi {
    endpoint: Endpoint,
    handler: QueryHandler,
    metadata_cache: Arc<TtlCache<String, Response>>,
}

impl IwlsApi {
    pub fn new(endpoint: Endpoint, handler: QueryHandler) -> IwlsApi {
        IwlsApi {
            endpoint,
            handler,
            metadata_cache: Arc::new(TtlCache::new(METADATA_TTL)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn cached(&self, key: String, url: String) -> Response {
        self.metadata_cache
            .get_or_insert_with(key, || self.handler.query(&url, &[]))
    }

    /// `/stations` — the full station listing (cached).
    pub fn get_all_stations(&self) -> Response {
        self.cached("stations".to_string(), self.endpoint.stations())
    }

    /// `/stations/{id}`.
    pub fn get_info_station(&self, station: &str) -> Result<Response, ApiParameterError> {
        self.validate_station_id(station)?;
        Ok(self.handler.query(&self.endpoint.station(station), &[]))
    }

    /// `/stations/{id}/metadata` — includes the tidal flag (cached).
    pub fn get_metadata_station(&self, station: &str) -> Result<Response, ApiParameterError> {
        self.validate_station_id(station)?;
        Ok(self.cached(
            format!("metadata:{station}"),
            self.endpoint.station_metadata(station),
        ))
    }

    /// Per-station time-series listing. Private flavours have a dedicated
    /// route; the public API embeds the list in the station payload.
    pub fn get_station_time_series(&self, station: &str) -> Result<Response, ApiParameterError> {
        self.validate_station_id(station)?;
        if self.endpoint.kind.is_private() {
            Ok(self.cached(
                format!("time-series:{station}"),
                self.endpoint.station_time_series(station),
            ))
        } else {
            self.get_info_station(station)
        }
    }

    pub fn get_chs_regions(&self) -> Response {
        self.cached("chs-regions".to_string(), self.endpoint.chs_regions())
    }

    pub fn get_height_types(&self) -> Response {
        self.cached("height-types".to_string(), self.endpoint.height_types())
    }

    pub fn get_phenomena(&self) -> Response {
        self.cached("phenomena".to_string(), self.endpoint.phenomena())
    }

    pub fn get_tide_tables(&self) -> Response {
        self.cached("tide-tables".to_string(), self.endpoint.tide_tables())
    }

    pub fn get_time_series_definitions(&self) -> Response {
        self.cached(
            "time-series-definitions".to_string(),
            self.endpoint.time_series_definitions(),
        )
    }

    /// One raw data window, no validation (callers validate up front).
    fn fetch_window(
        &self,
        station: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        code: TimeSeries,
    ) -> Response {
        let url = self.endpoint.station_data(station, code.code());
        let mut params = vec![
            ("from".to_string(), format_iso8601(from)),
            ("to".to_string(), format_iso8601(to)),
        ];
        if !self.endpoint.kind.is_private() {
            params.push(("time-series-code".to_string(), code.code().to_string()));
        }
        self.handler.query(&url, &params)
    }

    /// `/stations/{id}/data` for one interval no longer than the block.
    pub fn get_time_serie_data(
        &self,
        station: &str,
        from: &str,
        to: &str,
        code: TimeSeries,
    ) -> Result<Response, ApiParameterError> {
        self.validate_station_id(station)?;
        let from = parse_iso8601(from)?;
        let to = parse_iso8601(to)?;
        Ok(self.fetch_window(station, from, to, code))
    }

    /// Fetches [from, to] as concurrent windows of at most `block` and
    /// aggregates the samples. Any failed window degrades the response to
    /// status 400 carrying the partial data plus one error per window.
    pub fn get_time_serie_block_data(
        &self,
        station: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        code: TimeSeries,
        block: Duration,
        sorted: bool,
    ) -> Result<Response, ApiParameterError> {
        self.validate_station_id(station)?;

        debug!(
            "fetching {code} for station '{station}' from {} to {} in blocks of {block}",
            format_iso8601(from),
            format_iso8601(to),
        );

        let windows = split_time(from, to, block);
        if windows.is_empty() {
            return Ok(Response::ok(serde_json::Value::Array(Vec::new())));
        }

        let pool = ThreadPool::new(windows.len().min(FETCH_POOL_SIZE));
        let (tx, rx) = mpsc::channel();
        for (start, end) in windows {
            let api = self.clone();
            let station = station.to_string();
            let tx = tx.clone();
            pool.execute(move || {
                let response = api.fetch_window(&station, start, end, code);
                let _ = tx.send((start, end, response));
            });
        }
        drop(tx);

        let mut aggregated: Vec<serde_json::Value> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for (start, end, response) in rx {
            if response.is_ok() {
                aggregated.extend(response.data_array().iter().cloned());
            } else {
                let error = format!(
                    "{} - {:?} MISSING DATA FROM {} TO {} FOR '{code}' AT '{station}'",
                    response.message.as_deref().unwrap_or("Unknown error"),
                    response.errors,
                    format_iso8601(start),
                    format_iso8601(end),
                );
                warn!("failed to retrieve data: {error}");
                errors.push(error);
            }
        }

        if sorted {
            aggregated.sort_by_key(event_sort_key);
        }

        if errors.is_empty() {
            Ok(Response::ok(serde_json::Value::Array(aggregated)))
        } else {
            Ok(Response {
                status_code: 400,
                data: Some(serde_json::Value::Array(aggregated)),
                message: Some("MISSING DATA".to_string()),
                errors,
            })
        }
    }

    /// Fetches several series concurrently for one station.
    pub fn get_time_series_data(
        &self,
        codes: &[TimeSeries],
        station: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        block: Duration,
    ) -> Result<HashMap<TimeSeries, Response>, ApiParameterError> {
        self.validate_station_id(station)?;

        let pool = ThreadPool::new(codes.len().clamp(1, FETCH_POOL_SIZE));
        let (tx, rx) = mpsc::channel();
        for code in codes.iter().copied() {
            let api = self.clone();
            let station = station.to_string();
            let tx = tx.clone();
            pool.execute(move || {
                let response =
                    api.get_time_serie_block_data(&station, from, to, code, block, true);
                let _ = tx.send((code, response));
            });
        }
        drop(tx);

        let mut results = HashMap::new();
        for (code, response) in rx {
            // Validation already ran; a validation error here is impossible.
            results.insert(code, response?);
        }
        Ok(results)
    }

    /// Ids of every known station, from the cached listing. `None` when
    /// the listing itself cannot be retrieved.
    fn known_station_ids(&self) -> Option<Vec<String>> {
        let stations = self.get_all_stations();
        if !stations.is_ok() {
            return None;
        }
        Some(
            stations
                .data_array()
                .iter()
                .filter_map(|s| s.get("id").and_then(|v| v.as_str()).map(str::to_string))
                .collect(),
        )
    }

    pub fn validate_station_id(&self, station: &str) -> Result<(), ApiParameterError> {
        if station.len() != 24 {
            return Err(ApiParameterError::InvalidStationId(station.to_string()));
        }
        // The membership check is best-effort: when the listing is down,
        // a well-formed id passes and the data request reports the miss.
        if let Some(known) = self.known_station_ids() {
            if !known.iter().any(|id| id == station) {
                return Err(ApiParameterError::UnknownStationId(station.to_string()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
