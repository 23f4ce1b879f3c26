/// Actisense n2k decoded-log reader (`.csv`).
///
/// Position and clock come from the GNSS PGN (`Position date` +
/// `Position time`, `Latitude.1`/`Longitude.1`), the sounding from the
/// depth PGN (`Water Depth Transducer`, metres). Speed over ground is
/// metric (m/s) and converted to knots.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::debug;

use super::{cell, coerce_f64, find_column, read_csv_rows, ParseError, RawRecord};

pub(crate) const LINE: &str = "Line";
pub(crate) const TIME: &str = "Time";
pub(crate) const NAME: &str = "Name";
pub(crate) const DEPTH: &str = "Water Depth Transducer";
pub(crate) const OFFSET: &str = "Offset";
pub(crate) const POSITION_DATE: &str = "Position date";
pub(crate) const POSITION_TIME: &str = "Position time";
pub(crate) const LATITUDE: &str = "Latitude.1";
pub(crate) const LONGITUDE: &str = "Longitude.1";
pub(crate) const COURSE_OVER_GROUND: &str = "Course Over Ground";
pub(crate) const SPEED_OVER_GROUND: &str = "Speed Over Ground";
pub(crate) const PGN: &str = "PGN";

pub(crate) const HEADER: &[&str] = &[
    LINE,
    TIME,
    NAME,
    DEPTH,
    OFFSET,
    POSITION_DATE,
    POSITION_TIME,
    LATITUDE,
    LONGITUDE,
    COURSE_OVER_GROUND,
    SPEED_OVER_GROUND,
    PGN,
];

const MS_TO_KNOTS: f64 = 1.94384;

fn round_3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn parse_position_clock(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date.trim(), "%d/%m/%Y").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M:%S"))
        .ok()?;
    Some(date.and_time(time).and_utc())
}

pub(crate) fn read(file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    debug!("reading Actisense file {}", file.display());

    let (headers, rows) = read_csv_rows(file, true)?;

    let position_date =
        find_column(&headers, POSITION_DATE).ok_or_else(|| ParseError::MissingTimeColumn {
            file: file.to_path_buf(),
            column: POSITION_DATE.to_string(),
        })?;
    let position_time =
        find_column(&headers, POSITION_TIME).ok_or_else(|| ParseError::MissingTimeColumn {
            file: file.to_path_buf(),
            column: POSITION_TIME.to_string(),
        })?;
    let lat = find_column(&headers, LATITUDE).ok_or_else(|| ParseError::MissingLatitudeColumn {
        file: file.to_path_buf(),
        column: LATITUDE.to_string(),
    })?;
    let lon = find_column(&headers, LONGITUDE).ok_or_else(|| ParseError::MissingLongitudeColumn {
        file: file.to_path_buf(),
        column: LONGITUDE.to_string(),
    })?;
    let depth = find_column(&headers, DEPTH).ok_or_else(|| ParseError::MissingDepthColumn {
        file: file.to_path_buf(),
        column: DEPTH.to_string(),
    })?;
    let speed = find_column(&headers, SPEED_OVER_GROUND);

    Ok(rows
        .iter()
        .map(|row| RawRecord {
            time_utc: parse_position_clock(cell(row, position_date), cell(row, position_time)),
            latitude: coerce_f64(cell(row, lat)),
            longitude: coerce_f64(cell(row, lon)),
            depth_m: coerce_f64(cell(row, depth)),
            speed_kn: speed
                .and_then(|index| coerce_f64(cell(row, index)))
                .map(|ms| round_3(ms * MS_TO_KNOTS)),
        })
        .collect())
}
