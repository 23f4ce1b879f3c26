/// Lowrance sonar-log reader (`.csv` exports).
///
/// Depths arrive in feet and speeds in m/s; both are converted here.
/// Only `SurveyType == Primary` rows are soundings (the other channels
/// are sidescan/downscan imagery), and timestamps are rounded to 100 ms
/// to normalize the logger's uneven clock precision.

use std::path::Path;

use chrono::DateTime;
use log::{debug, warn};

use super::{cell, coerce_f64, coerce_time_utc, find_column, read_csv_rows, ParseError, RawRecord};

pub(crate) const LONGITUDE: &str = "Longitude[°WGS84]";
pub(crate) const LATITUDE: &str = "Latitude[°WGS84]";
pub(crate) const DEPTH_FEET: &str = "WaterDepth[Feet]";
pub(crate) const TIME: &str = "DateTime[UTC]";
pub(crate) const SPEED_MS: &str = "Speed[m/s]";
pub(crate) const SURVEY_TYPE: &str = "SurveyType";
pub(crate) const PRIMARY: &str = "Primary";

pub(crate) const HEADER: &[&str] = &[LONGITUDE, LATITUDE, DEPTH_FEET, TIME, SURVEY_TYPE];

const FEET_TO_METERS: f64 = 0.3048;
const MS_TO_KNOTS: f64 = 1.94384;

fn round_3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Rounds a timestamp to the nearest 100 ms.
fn round_to_100ms(time: DateTime<chrono::Utc>) -> DateTime<chrono::Utc> {
    let millis = time.timestamp_millis();
    let rounded = (millis as f64 / 100.0).round() as i64 * 100;
    DateTime::from_timestamp_millis(rounded).unwrap_or(time)
}

pub(crate) fn read(file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    debug!("reading Lowrance file {}", file.display());

    let (headers, rows) = read_csv_rows(file, true)?;

    let time = find_column(&headers, TIME).ok_or_else(|| ParseError::MissingTimeColumn {
        file: file.to_path_buf(),
        column: TIME.to_string(),
    })?;
    let lon = find_column(&headers, LONGITUDE).ok_or_else(|| ParseError::MissingLongitudeColumn {
        file: file.to_path_buf(),
        column: LONGITUDE.to_string(),
    })?;
    let lat = find_column(&headers, LATITUDE).ok_or_else(|| ParseError::MissingLatitudeColumn {
        file: file.to_path_buf(),
        column: LATITUDE.to_string(),
    })?;
    let depth = find_column(&headers, DEPTH_FEET).ok_or_else(|| ParseError::MissingDepthColumn {
        file: file.to_path_buf(),
        column: DEPTH_FEET.to_string(),
    })?;
    let survey_type = find_column(&headers, SURVEY_TYPE).ok_or_else(|| ParseError::MissingColumn {
        file: file.to_path_buf(),
        column: SURVEY_TYPE.to_string(),
    })?;

    // Speed is optional on older logger firmwares.
    let speed = find_column(&headers, SPEED_MS);
    if speed.is_none() {
        warn!("column '{SPEED_MS}' absent from {}", file.display());
    }

    Ok(rows
        .iter()
        .filter(|row| cell(row, survey_type).trim() == PRIMARY)
        .map(|row| RawRecord {
            time_utc: coerce_time_utc(cell(row, time)).map(round_to_100ms),
            latitude: coerce_f64(cell(row, lat)),
            longitude: coerce_f64(cell(row, lon)),
            depth_m: coerce_f64(cell(row, depth)).map(|feet| round_3(feet * FEET_TO_METERS)),
            speed_kn: speed
                .and_then(|index| coerce_f64(cell(row, index)))
                .map(|ms| round_3(ms * MS_TO_KNOTS)),
        })
        .collect())
}
