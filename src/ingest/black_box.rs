/// BlackBox NMEA logger reader (headerless `.txt` files).
///
/// Fixed column order: time, date, latitude, longitude, speed, depth.
/// The clock is split across two integer columns — `HHMMSSff`
/// (centiseconds) and `ddmmyy` — reassembled here into a UTC instant.
/// Speeds arrive in km/h.

use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;

use super::{cell, coerce_f64, read_csv_rows, ParseError, RawRecord};

/// Positional columns of a BlackBox row.
const COL_TIME: usize = 0;
const COL_DATE: usize = 1;
const COL_LATITUDE: usize = 2;
const COL_LONGITUDE: usize = 3;
const COL_SPEED_KMH: usize = 4;
const COL_DEPTH: usize = 5;
const COLUMN_COUNT: usize = 6;

const KMH_TO_KNOTS: f64 = 0.539957;

fn round_3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Reassembles `ddmmyy` + `HHMMSSff` into a UTC instant. The logger
/// strips leading zeros, so both fields are re-padded before slicing.
fn parse_clock(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = format!("{:0>6}", date.trim());
    let time = format!("{:0>8}", time.trim());

    if date.len() != 6
        || time.len() != 8
        || !date.bytes().all(|b| b.is_ascii_digit())
        || !time.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let day: u32 = date[0..2].parse().ok()?;
    let month: u32 = date[2..4].parse().ok()?;
    let year: i32 = 2000 + date[4..6].parse::<i32>().ok()?;

    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let second: u32 = time[4..6].parse().ok()?;
    let centis: i64 = time[6..8].parse().ok()?;

    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .map(|t| t + Duration::milliseconds(centis * 10))
}

pub(crate) fn read(file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    debug!("reading BlackBox file {}", file.display());

    let (_, rows) = read_csv_rows(file, false)?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    // Headerless format: the only column validation possible is arity.
    if rows.iter().all(|row| row.len() < COLUMN_COUNT) {
        return Err(ParseError::MissingDepthColumn {
            file: file.to_path_buf(),
            column: format!("column {COL_DEPTH}"),
        });
    }

    Ok(rows
        .iter()
        .map(|row| RawRecord {
            time_utc: parse_clock(cell(row, COL_DATE), cell(row, COL_TIME)),
            latitude: coerce_f64(cell(row, COL_LATITUDE)),
            longitude: coerce_f64(cell(row, COL_LONGITUDE)),
            depth_m: coerce_f64(cell(row, COL_DEPTH)),
            speed_kn: coerce_f64(cell(row, COL_SPEED_KMH)).map(|kmh| round_3(kmh * KMH_TO_KNOTS)),
        })
        .collect())
}
