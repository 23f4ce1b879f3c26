/// Logger-file ingestion: format detection, per-format readers and the
/// shared normalization into `Sounding` rows.
///
/// Each supported logger format gets its own file under ingest/ rather
/// than bloating this one. This module owns what the formats share: the
/// (header signature, extension) registry driving auto-detection, the
/// pooled multi-file reader and the finalization pass (drop incomplete
/// rows, deduplicate, sort by time).

pub mod actisense;
pub mod b12_csb;
pub mod black_box;
pub mod dcdb;
pub mod lowrance;
pub mod ofm;
pub mod wibl;

pub(crate) mod fixtures;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use regex::Regex;
use threadpool::ThreadPool;

use crate::model::Sounding;

/// Upper bound on concurrent file reads.
const MAX_READ_WORKERS: usize = 4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read file '{file}': {source}")]
    Io {
        file: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse file '{file}': {message}")]
    Malformed { file: PathBuf, message: String },
    #[error("file '{file}' has no time column '{column}'")]
    MissingTimeColumn { file: PathBuf, column: String },
    #[error("file '{file}' has no latitude column '{column}'")]
    MissingLatitudeColumn { file: PathBuf, column: String },
    #[error("file '{file}' has no longitude column '{column}'")]
    MissingLongitudeColumn { file: PathBuf, column: String },
    #[error("file '{file}' has no depth column '{column}'")]
    MissingDepthColumn { file: PathBuf, column: String },
    #[error("file '{file}' has no column '{column}'")]
    MissingColumn { file: PathBuf, column: String },
    #[error("no parser matches file '{file}'")]
    ParserIdentifier { file: PathBuf },
    #[error("files resolve to multiple parsers: {first} and {second}")]
    MultipleParsers { first: ParserKind, second: ParserKind },
}

impl ParseError {
    pub(crate) fn io(file: &Path, source: std::io::Error) -> Self {
        ParseError::Io {
            file: file.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(file: &Path, message: impl Into<String>) -> Self {
        ParseError::Malformed {
            file: file.to_path_buf(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Formats and registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserKind {
    Ofm,
    Dcdb,
    Lowrance,
    BlackBox,
    Actisense,
    B12Csb,
    Wibl,
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParserKind::Ofm => "OFM",
            ParserKind::Dcdb => "DCDB",
            ParserKind::Lowrance => "Lowrance",
            ParserKind::BlackBox => "BlackBox",
            ParserKind::Actisense => "Actisense",
            ParserKind::B12Csb => "B12-CSB",
            ParserKind::Wibl => "WIBL",
        };
        f.write_str(name)
    }
}

/// Normalized file extension classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extension {
    Csv,
    Xyz,
    Txt,
    GeoJson,
    Wibl,
}

/// Matches the filename tail against the recognized extension patterns.
/// WIBL loggers number rotated files (`log.wibl`, `log.wibl.1`, ...).
fn normalized_extension(file: &Path) -> Option<Extension> {
    let name = file.file_name()?.to_string_lossy().to_lowercase();

    let patterns: [(&str, Extension); 5] = [
        (r"\.csv$", Extension::Csv),
        (r"\.xyz$", Extension::Xyz),
        (r"\.txt$", Extension::Txt),
        (r"\.geojson$", Extension::GeoJson),
        (r"\.wibl(\.\d+)?$", Extension::Wibl),
    ];

    patterns.iter().find_map(|(pattern, extension)| {
        Regex::new(pattern)
            .expect("static pattern")
            .is_match(&name)
            .then_some(*extension)
    })
}

struct FormatSignature {
    kind: ParserKind,
    extension: Extension,
    /// Columns that must all appear in the header; `None` for headerless
    /// or non-tabular formats.
    header: Option<&'static [&'static str]>,
}

/// Detection registry, most specific header signatures first so a file
/// carrying a superset of a smaller signature resolves to the right format.
const REGISTRY: &[FormatSignature] = &[
    FormatSignature {
        kind: ParserKind::Actisense,
        extension: Extension::Csv,
        header: Some(actisense::HEADER),
    },
    FormatSignature {
        kind: ParserKind::Lowrance,
        extension: Extension::Csv,
        header: Some(lowrance::HEADER),
    },
    FormatSignature {
        kind: ParserKind::Dcdb,
        extension: Extension::Csv,
        header: Some(dcdb::HEADER),
    },
    FormatSignature {
        kind: ParserKind::Ofm,
        extension: Extension::Xyz,
        header: Some(ofm::HEADER),
    },
    FormatSignature {
        kind: ParserKind::BlackBox,
        extension: Extension::Txt,
        header: None,
    },
    FormatSignature {
        kind: ParserKind::B12Csb,
        extension: Extension::GeoJson,
        header: None,
    },
    FormatSignature {
        kind: ParserKind::Wibl,
        extension: Extension::Wibl,
        header: None,
    },
];

/// Reads the header row of a text file. Returns `None` when the first row
/// is data (all-numeric fields), as in headerless BlackBox logs.
fn read_header(file: &Path) -> Result<Option<Vec<String>>, ParseError> {
    let handle = File::open(file).map_err(|e| ParseError::io(file, e))?;
    let mut reader = BufReader::new(handle);
    let mut line = Vec::new();
    reader
        .read_until(b'\n', &mut line)
        .map_err(|e| ParseError::io(file, e))?;

    let decoded = decode_text(&line);
    let fields: Vec<String> = decoded
        .trim_end_matches(['\r', '\n'])
        .split(',')
        .map(|field| field.trim().to_string())
        .collect();

    if fields.iter().any(|field| field.parse::<f64>().is_ok()) {
        debug!("file {} has no header row", file.display());
        return Ok(None);
    }

    Ok(Some(fields))
}

/// UTF-8 with Latin-1 fallback, the encodings logger exports come in.
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Reads a whole CSV file (decoding first) into header names and rows.
/// Ragged rows are tolerated; cell-level problems surface as nulls later.
pub(crate) fn read_csv_rows(
    file: &Path,
    has_headers: bool,
) -> Result<(Vec<String>, Vec<csv::StringRecord>), ParseError> {
    let bytes = std::fs::read(file).map_err(|e| ParseError::io(file, e))?;
    let text = decode_text(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = if has_headers {
        reader
            .headers()
            .map_err(|e| ParseError::malformed(file, e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record.map_err(|e| ParseError::malformed(file, e.to_string()))?);
    }

    Ok((headers, rows))
}

pub(crate) fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

/// Cell accessor tolerating short rows.
pub(crate) fn cell<'a>(record: &'a csv::StringRecord, index: usize) -> &'a str {
    record.get(index).unwrap_or("")
}

/// Identifies the parser responsible for a file from its extension and,
/// for text formats, its header signature.
pub fn detect(file: &Path) -> Result<ParserKind, ParseError> {
    let extension = normalized_extension(file).ok_or_else(|| ParseError::ParserIdentifier {
        file: file.to_path_buf(),
    })?;

    // Non-tabular formats are identified by extension alone.
    let header = match extension {
        Extension::GeoJson | Extension::Wibl => None,
        _ => read_header(file)?,
    };

    for format in REGISTRY {
        if format.extension != extension {
            continue;
        }
        let matches = match (format.header, &header) {
            (None, None) => true,
            (Some(signature), Some(columns)) => signature
                .iter()
                .all(|required| columns.iter().any(|c| c == required)),
            _ => false,
        };
        if matches {
            debug!("file {} resolved to parser {}", file.display(), format.kind);
            return Ok(format.kind);
        }
    }

    Err(ParseError::ParserIdentifier {
        file: file.to_path_buf(),
    })
}

/// A batch of files resolved to one parser.
#[derive(Debug, Clone)]
pub struct ParserAssignment {
    pub kind: ParserKind,
    pub files: Vec<PathBuf>,
}

/// Resolves a batch of files, requiring them all to share one parser.
pub fn group(files: &[PathBuf]) -> Result<ParserAssignment, ParseError> {
    let mut assignment: Option<ParserAssignment> = None;

    for file in files {
        let kind = detect(file)?;
        match &mut assignment {
            None => {
                assignment = Some(ParserAssignment {
                    kind,
                    files: vec![file.clone()],
                });
            }
            Some(existing) if existing.kind == kind => existing.files.push(file.clone()),
            Some(existing) => {
                return Err(ParseError::MultipleParsers {
                    first: existing.kind,
                    second: kind,
                });
            }
        }
    }

    assignment.ok_or(ParseError::ParserIdentifier {
        file: PathBuf::from("<empty batch>"),
    })
}

// ---------------------------------------------------------------------------
// Raw records and shared coercion helpers
// ---------------------------------------------------------------------------

/// Parser-internal row. Mandatory fields are optional here; rows missing
/// any of them are dropped (and counted) during finalization.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub time_utc: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub depth_m: Option<f64>,
    pub speed_kn: Option<f64>,
}

/// Numeric coercion: unparseable cells become null instead of failing the
/// file.
pub(crate) fn coerce_f64(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Time coercion accepting the timestamp shapes seen across logger
/// exports: RFC 3339, ISO without offset, and space-separated variants.
pub(crate) fn coerce_time_utc(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Pooled reading and finalization
// ---------------------------------------------------------------------------

fn parse_file(kind: ParserKind, file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    match kind {
        ParserKind::Ofm => ofm::read(file),
        ParserKind::Dcdb => dcdb::read(file),
        ParserKind::Lowrance => lowrance::read(file),
        ParserKind::BlackBox => black_box::read(file),
        ParserKind::Actisense => actisense::read(file),
        ParserKind::B12Csb => b12_csb::read(file),
        ParserKind::Wibl => wibl::read(file),
    }
}

/// Reads a batch of same-format files on a bounded pool and normalizes the
/// union into clean, deduplicated, time-sorted soundings.
pub fn read_files(kind: ParserKind, files: &[PathBuf]) -> Result<Vec<Sounding>, ParseError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let pool = ThreadPool::new(files.len().min(MAX_READ_WORKERS));
    let (tx, rx) = mpsc::channel();

    for (index, file) in files.iter().cloned().enumerate() {
        let tx = tx.clone();
        pool.execute(move || {
            let result = parse_file(kind, &file);
            // Receiver only disappears when an earlier file already failed.
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    let mut buffers: Vec<Vec<RawRecord>> = vec![Vec::new(); files.len()];
    for (index, result) in rx {
        buffers[index] = result?;
    }

    let records: Vec<RawRecord> = buffers.into_iter().flatten().collect();
    debug!("{} raw soundings parsed from {} files", records.len(), files.len());

    Ok(finalize(records))
}

/// Drops rows missing mandatory fields, deduplicates on
/// (time, lat, lon, depth) and sorts by time.
fn finalize(records: Vec<RawRecord>) -> Vec<Sounding> {
    let initial = records.len();

    let mut soundings: Vec<Sounding> = records
        .into_iter()
        .filter_map(|record| {
            Some(Sounding::new(
                record.time_utc?,
                record.latitude?,
                record.longitude?,
                record.depth_m?,
                // Negative speeds are logger glitches, not measurements.
                record.speed_kn.filter(|speed| *speed >= 0.0),
            ))
        })
        .collect();

    let dropped = initial - soundings.len();
    if dropped > 0 {
        warn!("{dropped} rows with missing mandatory values were dropped");
    }

    soundings.sort_by(|a, b| {
        a.time_utc
            .cmp(&b.time_utc)
            .then_with(|| a.latitude.total_cmp(&b.latitude))
            .then_with(|| a.longitude.total_cmp(&b.longitude))
            .then_with(|| a.depth_raw_m.total_cmp(&b.depth_raw_m))
    });

    let before_dedup = soundings.len();
    soundings.dedup_by(|a, b| {
        a.time_utc == b.time_utc
            && a.latitude == b.latitude
            && a.longitude == b.longitude
            && a.depth_raw_m == b.depth_raw_m
    });
    let duplicates = before_dedup - soundings.len();
    if duplicates > 0 {
        warn!("{duplicates} duplicate soundings were removed");
    }

    soundings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
