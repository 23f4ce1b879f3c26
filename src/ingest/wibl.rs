/// WIBL binary logger reader (`.wibl`, `.wibl.N`).
///
/// WIBL files are packet streams with a free-running elapsed-millisecond
/// clock; absolute time exists only in the system-time reference packets.
/// The adapter interpolates every sounding onto UTC from those
/// references, pairs it with the latest position fix, writes the result
/// as a B12-CSB GeoJSON next to the input file, and hands off to the
/// B12-CSB reader.
///
/// Packet framing: `[id: u32 LE][payload length: u32 LE][payload]`.
///   SYSTEM_TIME (1)  — elapsed_ms: u32, epoch_seconds: f64
///   GNSS        (10) — elapsed_ms: u32, longitude: f64, latitude: f64
///   DEPTH       (11) — elapsed_ms: u32, depth_m: f64
/// Unknown packet ids are skipped by length.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use log::{debug, warn};

use super::{b12_csb, ParseError, RawRecord};

pub const PKT_SYSTEM_TIME: u32 = 1;
pub const PKT_GNSS: u32 = 10;
pub const PKT_DEPTH: u32 = 11;

/// Elapsed counters are u32 milliseconds; a rollover adds one quantum.
const ELAPSED_TIME_QUANTUM: u64 = 1 << 32;

/// Conversion seam for the binary format. The pipeline only depends on
/// "a WIBL file becomes a B12-CSB GeoJSON"; the packet walk below is one
/// implementation of that contract.
pub trait WiblAdapter {
    /// Converts a WIBL file to GeoJSON. `Ok(None)` means the file holds
    /// nothing usable (no time source or no soundings) and reads as empty.
    fn to_geojson(&self, file: &Path) -> Result<Option<PathBuf>, ParseError>;
}

pub(crate) fn read(file: &Path) -> Result<Vec<RawRecord>, ParseError> {
    read_with_adapter(file, &PacketWiblAdapter)
}

pub fn read_with_adapter(
    file: &Path,
    adapter: &dyn WiblAdapter,
) -> Result<Vec<RawRecord>, ParseError> {
    match adapter.to_geojson(file)? {
        Some(geojson_file) => b12_csb::read(&geojson_file),
        None => Ok(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Packet walk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct TimeReference {
    elapsed_ms: u64,
    epoch_seconds: f64,
}

#[derive(Debug, Clone, Copy)]
struct PositionFix {
    elapsed_ms: u64,
    longitude: f64,
    latitude: f64,
}

#[derive(Debug, Clone, Copy)]
struct DepthEvent {
    elapsed_ms: u64,
    depth_m: f64,
}

/// Unwraps the u32 elapsed counter into a monotonically increasing u64.
#[derive(Default)]
struct ElapsedUnwrapper {
    last_raw: Option<u32>,
    offset: u64,
}

impl ElapsedUnwrapper {
    fn unwrap(&mut self, raw: u32) -> u64 {
        if let Some(last) = self.last_raw {
            if raw < last {
                self.offset += ELAPSED_TIME_QUANTUM;
            }
        }
        self.last_raw = Some(raw);
        self.offset + u64::from(raw)
    }
}

struct PacketContents {
    time_refs: Vec<TimeReference>,
    positions: Vec<PositionFix>,
    depths: Vec<DepthEvent>,
}

fn read_u32(payload: &[u8], offset: usize) -> Option<u32> {
    payload
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_f64(payload: &[u8], offset: usize) -> Option<f64> {
    payload.get(offset..offset + 8).map(|b| {
        f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

fn walk_packets(file: &Path, bytes: &[u8]) -> Result<PacketContents, ParseError> {
    let mut contents = PacketContents {
        time_refs: Vec::new(),
        positions: Vec::new(),
        depths: Vec::new(),
    };
    let mut clock = ElapsedUnwrapper::default();
    let mut offset = 0usize;

    while offset + 8 <= bytes.len() {
        let id = read_u32(bytes, offset).expect("bounds checked");
        let length = read_u32(bytes, offset + 4).expect("bounds checked") as usize;
        let payload_start = offset + 8;
        let payload_end = payload_start + length;

        if payload_end > bytes.len() {
            return Err(ParseError::malformed(
                file,
                format!("truncated packet id {id} at byte {offset}"),
            ));
        }
        let payload = &bytes[payload_start..payload_end];

        match id {
            PKT_SYSTEM_TIME => {
                if let (Some(elapsed), Some(epoch)) = (read_u32(payload, 0), read_f64(payload, 4)) {
                    contents.time_refs.push(TimeReference {
                        elapsed_ms: clock.unwrap(elapsed),
                        epoch_seconds: epoch,
                    });
                }
            }
            PKT_GNSS => {
                if let (Some(elapsed), Some(lon), Some(lat)) =
                    (read_u32(payload, 0), read_f64(payload, 4), read_f64(payload, 12))
                {
                    contents.positions.push(PositionFix {
                        elapsed_ms: clock.unwrap(elapsed),
                        longitude: lon,
                        latitude: lat,
                    });
                }
            }
            PKT_DEPTH => {
                if let (Some(elapsed), Some(depth)) = (read_u32(payload, 0), read_f64(payload, 4)) {
                    contents.depths.push(DepthEvent {
                        elapsed_ms: clock.unwrap(elapsed),
                        depth_m: depth,
                    });
                }
            }
            _ => {}
        }

        offset = payload_end;
    }

    Ok(contents)
}

/// Maps an elapsed instant onto UTC seconds by linear interpolation
/// between the bracketing time references (extrapolating at the edges).
fn interpolate_epoch(time_refs: &[TimeReference], elapsed_ms: u64) -> f64 {
    debug_assert!(!time_refs.is_empty());

    if time_refs.len() == 1 {
        let only = time_refs[0];
        return only.epoch_seconds + (elapsed_ms as f64 - only.elapsed_ms as f64) / 1000.0;
    }

    let after = time_refs
        .iter()
        .position(|r| r.elapsed_ms >= elapsed_ms)
        .unwrap_or(time_refs.len() - 1)
        .max(1);
    let (a, b) = (time_refs[after - 1], time_refs[after]);

    let span_ms = (b.elapsed_ms - a.elapsed_ms) as f64;
    if span_ms == 0.0 {
        return a.epoch_seconds;
    }
    let fraction = (elapsed_ms as f64 - a.elapsed_ms as f64) / span_ms;
    a.epoch_seconds + fraction * (b.epoch_seconds - a.epoch_seconds)
}

fn last_position_before(positions: &[PositionFix], elapsed_ms: u64) -> Option<PositionFix> {
    positions
        .iter()
        .take_while(|p| p.elapsed_ms <= elapsed_ms)
        .last()
        .copied()
}

/// `log.wibl` becomes `log-wibl.geojson` next to the input.
fn output_filename(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wibl".to_string());
    let suffix = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}-{suffix}.geojson"))
}

/// Default adapter: the packet walk described in the module docs.
pub struct PacketWiblAdapter;

impl WiblAdapter for PacketWiblAdapter {
    fn to_geojson(&self, file: &Path) -> Result<Option<PathBuf>, ParseError> {
        debug!("converting WIBL file {}", file.display());

        let bytes = fs::read(file).map_err(|e| ParseError::io(file, e))?;
        let contents = walk_packets(file, &bytes)?;

        if contents.time_refs.is_empty() {
            warn!("no time source in WIBL file {}", file.display());
            return Ok(None);
        }
        if contents.depths.is_empty() {
            warn!("no soundings in WIBL file {}", file.display());
            return Ok(None);
        }

        let mut positions = contents.positions;
        positions.sort_by_key(|p| p.elapsed_ms);
        let mut time_refs = contents.time_refs;
        time_refs.sort_by_key(|r| r.elapsed_ms);

        let mut features = Vec::new();
        let mut without_position = 0usize;
        for depth in &contents.depths {
            let Some(position) = last_position_before(&positions, depth.elapsed_ms) else {
                without_position += 1;
                continue;
            };

            let epoch = interpolate_epoch(&time_refs, depth.elapsed_ms);
            let Some(time) = DateTime::from_timestamp_millis((epoch * 1000.0).round() as i64)
            else {
                continue;
            };

            let mut properties = JsonObject::new();
            properties.insert(
                b12_csb::TIME.to_string(),
                serde_json::Value::String(time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
            );
            properties.insert(b12_csb::DEPTH.to_string(), serde_json::json!(depth.depth_m));

            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![
                    position.longitude,
                    position.latitude,
                ]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            });
        }

        if without_position > 0 {
            warn!(
                "{without_position} soundings without a position fix in {}",
                file.display()
            );
        }
        if features.is_empty() {
            return Ok(None);
        }

        let collection = GeoJson::from(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        });

        let output = output_filename(file);
        fs::write(&output, collection.to_string()).map_err(|e| ParseError::io(&output, e))?;
        debug!("wrote {}", output.display());

        Ok(Some(output))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::test_support::WiblWriter;
    use super::*;
    use chrono::{TimeZone, Utc};

    /// 2024-10-01T18:30:00Z as unix seconds.
    const EPOCH: f64 = 1727807400.0;

    #[test]
    fn test_depths_are_georeferenced_and_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.wibl");

        let mut writer = WiblWriter::new();
        writer.system_time(0, EPOCH);
        writer.system_time(10_000, EPOCH + 10.0);
        writer.gnss(1_000, -68.52, 48.42);
        writer.depth(5_000, 12.5);
        writer.write_to(&path);

        let records = read(&path).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].depth_m, Some(12.5));
        assert_eq!(records[0].longitude, Some(-68.52));
        assert_eq!(records[0].latitude, Some(48.42));
        // Elapsed 5000 ms interpolates to EPOCH + 5 s.
        assert_eq!(
            records[0].time_utc.unwrap(),
            Utc.with_ymd_and_hms(2024, 10, 1, 18, 30, 5).unwrap()
        );
    }

    #[test]
    fn test_no_time_source_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.wibl");

        let mut writer = WiblWriter::new();
        writer.gnss(1_000, -68.52, 48.42);
        writer.depth(2_000, 12.5);
        writer.write_to(&path);

        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_no_depth_packets_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.wibl");

        let mut writer = WiblWriter::new();
        writer.system_time(0, EPOCH);
        writer.gnss(1_000, -68.52, 48.42);
        writer.write_to(&path);

        assert!(read(&path).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_packets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.wibl");

        let mut writer = WiblWriter::new();
        writer.system_time(0, EPOCH);
        writer.unknown(99, &[0xAA; 16]);
        writer.gnss(1_000, -68.52, 48.42);
        writer.depth(2_000, 12.5);
        writer.write_to(&path);

        assert_eq!(read(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_depth_before_any_position_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.wibl");

        let mut writer = WiblWriter::new();
        writer.system_time(0, EPOCH);
        writer.depth(500, 11.0);
        writer.gnss(1_000, -68.52, 48.42);
        writer.depth(2_000, 12.5);
        writer.write_to(&path);

        let records = read(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].depth_m, Some(12.5));
    }

    #[test]
    fn test_truncated_packet_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.wibl");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PKT_DEPTH.to_le_bytes());
        bytes.extend_from_slice(&64u32.to_le_bytes()); // claims 64 payload bytes
        bytes.extend_from_slice(&[0u8; 4]); // delivers 4
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read(&path).unwrap_err(),
            ParseError::Malformed { .. }
        ));
    }

    #[test]
    fn test_output_filename_keeps_wibl_marker() {
        assert_eq!(
            output_filename(Path::new("/data/log.wibl")),
            PathBuf::from("/data/log-wibl.geojson")
        );
        assert_eq!(
            output_filename(Path::new("/data/log.wibl.3")),
            PathBuf::from("/data/log.wibl-3.geojson")
        );
    }
}
