/// OFM logger reader (`.xyz` files with a CSV body).
///
/// Column layout: `LON,LAT,DEPTH,TIME` with ISO-8601 UTC timestamps and
/// depths already in metres.

use std::path::Path;

use log::debug;

use super::{cell, coerce_f64, coerce_time_utc, find_column, read_csv_rows, ParseError, RawRecord};

pub(crate) const LONGITUDE: &str = "LON";
pub(crate) const LATITUDE: &str = "LAT";
pub(crate) const DEPTH: &str = "DEPTH";
pub(crate) const TIME: &str = "TIME";

/// Header signature used by format detection.
pub(crate) const HEADER: &[&str] = &[LONGITUDE, LATITUDE, DEPTH, TIME];

pub(crate) fn read(file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    debug!("reading OFM file {}", file.display());

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
    let depth = find_column(&headers, DEPTH).ok_or_else(|| ParseError::MissingDepthColumn {
        file: file.to_path_buf(),
        column: DEPTH.to_string(),
    })?;

    Ok(rows
        .iter()
        .map(|row| RawRecord {
            time_utc: coerce_time_utc(cell(row, time)),
            latitude: coerce_f64(cell(row, lat)),
            longitude: coerce_f64(cell(row, lon)),
            depth_m: coerce_f64(cell(row, depth)),
            speed_kn: None,
        })
        .collect())
}
